//! Recursive-descent parser for the shell grammar:
//!
//! ```text
//! sequence  := pipeline ( ('&'|';') sequence? )?
//! pipeline  := command ( '|' pipeline )?
//! command   := '(' sequence ')' redir | '{' sequence '}' redir | words redir
//! redir     := ('<' filename)? ('>' filename)?
//! ```
//!
//! The tree owns its children outright, so dropping the root frees everything.

use std::path::PathBuf;

use crate::errors::ShellError;
use crate::lexer::{self, Operator, Token, TokenKind};

/// Groups nested deeper than this are rejected instead of recursing further.
pub const MAX_NESTING: usize = 64;

/// Pipelines joined by `;` or `&`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SequenceNode {
    pub pipelines: Vec<PipelineNode>,
}

/// Operator that terminated a pipeline inside a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Separator {
    /// `;`
    Sequential,
    /// `&`
    Background,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineNode {
    pub commands: Vec<CommandNode>,
    /// `None` when the pipeline ended the input or its group.
    pub separator: Option<Separator>,
}

/// What a command runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandForm {
    /// Program name followed by its arguments. Never empty.
    Words(Vec<String>),
    /// `{ ... }`
    Block(SequenceNode),
    /// `( ... )`
    Subshell(SequenceNode),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandNode {
    pub form: CommandForm,
    pub infile: Option<PathBuf>,
    pub outfile: Option<PathBuf>,
}

struct AstBuilder {
    tokens: Vec<Token>,
    pos: usize,
    end: usize,
}

impl AstBuilder {
    fn new(tokens: Vec<Token>, end: usize) -> Self {
        AstBuilder { tokens, pos: 0, end }
    }

    fn build_ast(mut self) -> Result<Option<SequenceNode>, ShellError> {
        if self.tokens.is_empty() {
            return Ok(None);
        }
        let sequence = self.parse_sequence(0)?;

        if self.peek().is_some() {
            return Err(self.error("extra characters at end of input"));
        }
        Ok(Some(sequence))
    }

    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn peek_op(&self) -> Option<Operator> {
        match self.peek() {
            Some(TokenKind::Op(op)) => Some(*op),
            _ => None,
        }
    }

    fn eat(&mut self, op: Operator) -> bool {
        if self.peek_op() == Some(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn position(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |t| t.pos)
    }

    fn error(&self, message: &str) -> ShellError {
        ShellError::Parse {
            message: message.to_string(),
            position: self.position(),
        }
    }

    fn at_sequence_end(&self) -> bool {
        matches!(
            self.peek(),
            None | Some(TokenKind::Op(Operator::CloseParen | Operator::CloseBrace))
        )
    }

    fn parse_sequence(&mut self, depth: usize) -> Result<SequenceNode, ShellError> {
        let mut pipelines = Vec::new();

        loop {
            let mut pipeline = self.parse_pipeline(depth)?;
            if self.eat(Operator::Ampersand) {
                pipeline.separator = Some(Separator::Background);
            } else if self.eat(Operator::Semicolon) {
                pipeline.separator = Some(Separator::Sequential);
            }
            let joined = pipeline.separator.is_some();
            pipelines.push(pipeline);

            if !joined || self.at_sequence_end() {
                break;
            }
        }

        Ok(SequenceNode { pipelines })
    }

    fn parse_pipeline(&mut self, depth: usize) -> Result<PipelineNode, ShellError> {
        let mut commands = vec![self.parse_command(depth)?];
        while self.eat(Operator::Pipe) {
            commands.push(self.parse_command(depth)?);
        }
        Ok(PipelineNode {
            commands,
            separator: None,
        })
    }

    fn parse_command(&mut self, depth: usize) -> Result<CommandNode, ShellError> {
        let form = match self.peek_op() {
            Some(Operator::OpenParen) => {
                CommandForm::Subshell(self.parse_group(depth, Operator::CloseParen)?)
            }
            Some(Operator::OpenBrace) => {
                CommandForm::Block(self.parse_group(depth, Operator::CloseBrace)?)
            }
            _ => CommandForm::Words(self.parse_words()?),
        };

        let mut command = CommandNode {
            form,
            infile: None,
            outfile: None,
        };
        self.parse_redirects(&mut command)?;
        Ok(command)
    }

    fn parse_group(
        &mut self,
        depth: usize,
        close: Operator,
    ) -> Result<SequenceNode, ShellError> {
        if depth + 1 > MAX_NESTING {
            return Err(self.error("nesting too deep"));
        }
        self.pos += 1; // the opening ( or {
        let body = self.parse_sequence(depth + 1)?;
        if !self.eat(close) {
            return Err(self.error(&format!("expected {}", close.as_str())));
        }
        Ok(body)
    }

    fn parse_words(&mut self) -> Result<Vec<String>, ShellError> {
        let mut words = Vec::new();
        while let Some(TokenKind::Word(w)) = self.peek() {
            words.push(w.clone());
            self.pos += 1;
        }
        if words.is_empty() {
            return Err(self.error("expected command"));
        }
        Ok(words)
    }

    /// Redirections may come in either order; a repeated one overrides the first.
    fn parse_redirects(&mut self, command: &mut CommandNode) -> Result<(), ShellError> {
        loop {
            if self.eat(Operator::RedirectIn) {
                command.infile = Some(self.parse_filename("expected filename after <")?);
            } else if self.eat(Operator::RedirectOut) {
                command.outfile = Some(self.parse_filename("expected filename after >")?);
            } else {
                return Ok(());
            }
        }
    }

    fn parse_filename(&mut self, missing: &str) -> Result<PathBuf, ShellError> {
        match self.peek() {
            Some(TokenKind::Word(w)) => {
                let path = PathBuf::from(w);
                self.pos += 1;
                Ok(path)
            }
            _ => Err(self.error(missing)),
        }
    }
}

/// Parse one input line. Blank lines produce `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<SequenceNode>, ShellError> {
    let tokens = lexer::split_into_tokens(line);
    AstBuilder::new(tokens, line.len()).build_ast()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> SequenceNode {
        parse_line(line).unwrap().expect("non-empty line")
    }

    fn words(node: &CommandNode) -> Vec<&str> {
        match &node.form {
            CommandForm::Words(w) => w.iter().map(String::as_str).collect(),
            other => panic!("expected words, got {:?}", other),
        }
    }

    fn parse_error(line: &str) -> (String, usize) {
        match parse_line(line) {
            Err(ShellError::Parse { message, position }) => (message, position),
            other => panic!("expected parse error for {:?}, got {:?}", line, other),
        }
    }

    #[test]
    fn test_pipeline_with_redirects() {
        let seq = parse("sort < in.txt | uniq -c > out.txt");
        assert_eq!(seq.pipelines.len(), 1);
        let cmds = &seq.pipelines[0].commands;
        assert_eq!(words(&cmds[0]), vec!["sort"]);
        assert_eq!(cmds[0].infile, Some(PathBuf::from("in.txt")));
        assert_eq!(words(&cmds[1]), vec!["uniq", "-c"]);
        assert_eq!(cmds[1].outfile, Some(PathBuf::from("out.txt")));
    }

    #[test]
    fn test_separators_are_recorded_per_pipeline() {
        let seq = parse("sleep 5 & ls ; pwd");
        let seps: Vec<_> = seq.pipelines.iter().map(|p| p.separator).collect();
        assert_eq!(
            seps,
            vec![Some(Separator::Background), Some(Separator::Sequential), None]
        );
    }

    #[test]
    fn test_trailing_ampersand_is_allowed() {
        let seq = parse("sleep 1 &");
        assert_eq!(seq.pipelines.len(), 1);
        assert_eq!(seq.pipelines[0].separator, Some(Separator::Background));
    }

    #[test]
    fn test_block_and_subshell() {
        let seq = parse("{ cd /tmp ; pwd } > log | ( ls )");
        let cmds = &seq.pipelines[0].commands;
        match &cmds[0].form {
            CommandForm::Block(inner) => assert_eq!(inner.pipelines.len(), 2),
            other => panic!("expected block, got {:?}", other),
        }
        assert_eq!(cmds[0].outfile, Some(PathBuf::from("log")));
        assert!(matches!(cmds[1].form, CommandForm::Subshell(_)));
    }

    #[test]
    fn test_blank_line_is_no_tree() {
        assert_eq!(parse_line("   ").unwrap(), None);
    }

    #[test]
    fn test_unbalanced_group_reports_position() {
        assert_eq!(parse_error("( echo a"), ("expected )".to_string(), 8));
        assert_eq!(parse_error("{ echo a )").0, "expected }");
    }

    #[test]
    fn test_missing_filename() {
        assert_eq!(parse_error("cat <").0, "expected filename after <");
        assert_eq!(parse_error("ls > | wc").0, "expected filename after >");
    }

    #[test]
    fn test_trailing_tokens() {
        assert_eq!(
            parse_error("ls > out extra"),
            ("extra characters at end of input".to_string(), 9)
        );
        assert_eq!(parse_error("ls )").0, "extra characters at end of input");
    }

    #[test]
    fn test_missing_command() {
        assert_eq!(parse_error("| wc").0, "expected command");
        assert_eq!(parse_error("ls |").0, "expected command");
        assert_eq!(parse_error("( )").0, "expected command");
    }

    #[test]
    fn test_nesting_limit() {
        let deep = format!("{}ls{}", "( ".repeat(MAX_NESTING + 1), " )".repeat(MAX_NESTING + 1));
        assert_eq!(parse_error(&deep).0, "nesting too deep");

        let ok = format!("{}ls{}", "( ".repeat(MAX_NESTING), " )".repeat(MAX_NESTING));
        assert!(parse_line(&ok).is_ok());
    }
}

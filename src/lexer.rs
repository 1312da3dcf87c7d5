//! Lexical analysis of a single command line.
//!
//! Words are runs of characters separated by blanks. The operator characters
//! `| & ; < > ( ) { }` always form a token of their own, so `a|b` and `a | b`
//! scan the same way. There is no quoting.

/// Operator tokens recognised by the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `|`
    Pipe,
    /// `&`
    Ampersand,
    /// `;`
    Semicolon,
    /// `<`
    RedirectIn,
    /// `>`
    RedirectOut,
    /// `(`
    OpenParen,
    /// `)`
    CloseParen,
    /// `{`
    OpenBrace,
    /// `}`
    CloseBrace,
}

impl Operator {
    fn from_char(ch: char) -> Option<Self> {
        Some(match ch {
            '|' => Operator::Pipe,
            '&' => Operator::Ampersand,
            ';' => Operator::Semicolon,
            '<' => Operator::RedirectIn,
            '>' => Operator::RedirectOut,
            '(' => Operator::OpenParen,
            ')' => Operator::CloseParen,
            '{' => Operator::OpenBrace,
            '}' => Operator::CloseBrace,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Pipe => "|",
            Operator::Ampersand => "&",
            Operator::Semicolon => ";",
            Operator::RedirectIn => "<",
            Operator::RedirectOut => ">",
            Operator::OpenParen => "(",
            Operator::CloseParen => ")",
            Operator::OpenBrace => "{",
            Operator::CloseBrace => "}",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Word(String),
    Op(Operator),
}

/// A token together with the byte offset where it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: usize,
}

struct Scanner<'a> {
    input: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl<'a> Scanner<'a> {
    fn new(input: &'a str) -> Self {
        Scanner {
            input,
            chars: input.char_indices().peekable(),
        }
    }

    fn make_tokens(&mut self) -> Vec<Token> {
        let mut out = Vec::new();

        while let Some(&(pos, ch)) = self.chars.peek() {
            if is_blank(ch) {
                self.chars.next();
            } else if let Some(op) = Operator::from_char(ch) {
                self.chars.next();
                out.push(Token {
                    kind: TokenKind::Op(op),
                    pos,
                });
            } else {
                let word = self.read_word(pos);
                out.push(Token {
                    kind: TokenKind::Word(word),
                    pos,
                });
            }
        }

        out
    }

    fn read_word(&mut self, start: usize) -> String {
        let mut end = self.input.len();
        while let Some(&(pos, ch)) = self.chars.peek() {
            if is_blank(ch) || Operator::from_char(ch).is_some() {
                end = pos;
                break;
            }
            self.chars.next();
        }
        self.input[start..end].to_string()
    }
}

fn is_blank(ch: char) -> bool {
    matches!(ch, ' ' | '\t' | '\n' | '\r')
}

/// Split a line into tokens.
pub fn split_into_tokens(line: &str) -> Vec<Token> {
    Scanner::new(line).make_tokens()
}

use crate::command::{Command, Mode};
use crate::config::ShellConfig;
use crate::env::Environment;
use crate::jobs::JobTable;
use crate::parser::{self, CommandForm, CommandNode, Separator, SequenceNode};
use crate::pipeline::{self, Pipeline};
use anyhow::{Context, Result};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::collections::VecDeque;
use std::io::BufRead;
use tracing::{debug, warn};

/// Pipelines of one parsed line, in execution order.
#[derive(Debug, Default)]
pub struct Sequence {
    pipelines: VecDeque<Pipeline>,
}

impl Sequence {
    /// Convert the syntax tree. A pipeline is backgrounded only when `&`
    /// follows it; `;` and end of input both mean foreground.
    pub fn from_tree(tree: &SequenceNode) -> Self {
        let pipelines = tree
            .pipelines
            .iter()
            .map(|node| {
                let commands = node.commands.iter().map(convert).collect();
                let foreground = node.separator != Some(Separator::Background);
                Pipeline::new(commands, foreground)
            })
            .collect();
        Self { pipelines }
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    pub fn pop_front(&mut self) -> Option<Pipeline> {
        self.pipelines.pop_front()
    }
}

fn convert(node: &CommandNode) -> Command {
    let infile = node.infile.clone();
    let outfile = node.outfile.clone();
    match &node.form {
        CommandForm::Words(words) => Command::prepare(words.clone(), infile, outfile),
        CommandForm::Block(block) => Command::group(Mode::Block, block.clone(), infile, outfile),
        CommandForm::Subshell(block) => {
            Command::group(Mode::Subshell, block.clone(), infile, outfile)
        }
    }
}

/// Execute every pipeline of `tree` left to right, stopping as soon as
/// `exit` has run.
pub fn run(tree: &SequenceNode, env: &mut Environment, jobs: &mut JobTable) -> Result<()> {
    let mut sequence = Sequence::from_tree(tree);
    while let Some(pipeline) = sequence.pop_front() {
        if env.should_exit {
            debug!(skipped = sequence.len() + 1, "exit requested");
            break;
        }
        pipeline::execute(pipeline, env, jobs)?;
    }
    Ok(())
}

/// The shell: parses lines and runs them against one environment and job table.
///
/// Example
/// ```no_run
/// use job_shell::{Interpreter, ShellConfig};
/// let mut sh = Interpreter::new(ShellConfig::non_interactive());
/// sh.run_line("echo hello | tr a-z A-Z").unwrap();
/// ```
pub struct Interpreter {
    env: Environment,
    jobs: JobTable,
    config: ShellConfig,
}

impl Interpreter {
    pub fn new(config: ShellConfig) -> Self {
        let jobs = if config.interactive {
            JobTable::interactive()
        } else {
            JobTable::default()
        };
        Self {
            env: Environment::new(config.interactive),
            jobs,
            config,
        }
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn jobs(&self) -> &JobTable {
        &self.jobs
    }

    pub fn should_exit(&self) -> bool {
        self.env.should_exit
    }

    /// Parse and run one line. Parse errors are reported and swallowed; only
    /// fatal resource errors are returned.
    pub fn run_line(&mut self, line: &str) -> Result<()> {
        match parser::parse_line(line) {
            Ok(Some(tree)) => run(&tree, &mut self.env, &mut self.jobs),
            Ok(None) => Ok(()),
            Err(e) => {
                eprintln!("jobsh: {e}");
                Ok(())
            }
        }
    }

    fn remember(&mut self, line: &str) {
        if !line.trim().is_empty() {
            self.env.push_history(line);
        }
    }

    /// Run lines from a script or pipe until EOF or `exit`. No prompt is shown.
    pub fn run_script(&mut self, input: impl BufRead) -> Result<()> {
        for line in input.lines() {
            let line = line.context("failed to read input")?;
            self.remember(&line);
            self.run_line(&line)?;
            if self.should_exit() {
                break;
            }
        }
        Ok(())
    }

    /// Read-Eval-Print Loop with line editing and a persistent history file.
    pub fn repl(&mut self) -> Result<()> {
        let mut rl = DefaultEditor::new()?;
        let history_file = self.config.history_file.clone();
        if let Err(e) = rl.load_history(&history_file) {
            debug!(path = %history_file.display(), "no history loaded: {e}");
        }
        for line in rl.history().iter() {
            self.env.push_history(line.as_str());
        }

        loop {
            match rl.readline(&self.config.prompt) {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        rl.add_history_entry(line.as_str())?;
                    }
                    self.remember(&line);
                    self.run_line(&line)?;
                    if self.should_exit() {
                        break;
                    }
                }
                // Ctrl-C discards the line.
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => break,
                Err(err) => return Err(err.into()),
            }
        }

        if let Err(e) = rl.save_history(&history_file) {
            warn!(path = %history_file.display(), "failed to save history: {e}");
        }
        Ok(())
    }
}

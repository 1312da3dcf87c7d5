use std::path::PathBuf;

use anyhow::Result;
use argh::FromArgs;
use job_shell::{Interpreter, ShellConfig, logging, signals};
use tracing::Level;

#[derive(FromArgs)]
/// A small interactive shell with job control.
struct Args {
    /// file the interactive line history is loaded from and saved to
    #[argh(option)]
    history_file: Option<PathBuf>,

    /// log level on stderr (error, warn, info, debug, trace)
    #[argh(option)]
    log_level: Option<Level>,

    /// run a single line and exit
    #[argh(option, short = 'c')]
    command: Option<String>,
}

fn run(args: Args) -> Result<()> {
    logging::init_logging(args.log_level)?;

    let config = ShellConfig::resolve(args.history_file, args.command.is_some());
    let interactive = config.interactive;
    let mut shell = Interpreter::new(config);

    if let Some(line) = args.command {
        return shell.run_line(&line);
    }

    signals::install_shell_handlers(interactive)?;
    if interactive {
        shell.repl()
    } else {
        shell.run_script(std::io::stdin().lock())
    }
}

fn main() {
    if let Err(e) = run(argh::from_env()) {
        eprintln!("jobsh: {e:#}");
        std::process::exit(1);
    }
}

//! A small interactive shell with job control.
//!
//! Lines are scanned by [`lexer`], turned into a syntax tree by [`parser`] and
//! executed by the [`interpreter`]: every pipeline is handed to the
//! [`pipeline`] executor, which forks one process per stage through the
//! [`command`] executor and registers the result in the [`jobs`] table so it
//! can later be listed, resumed in the background or brought to the
//! foreground.
//!
//! The main entry point is [`Interpreter`], which runs lines against one
//! [`Environment`](env::Environment) and one [`JobTable`](jobs::JobTable).

pub mod builtin;
pub mod command;
pub mod config;
pub mod env;
pub mod errors;
pub mod external;
pub mod interpreter;
pub mod io_adapters;
pub mod jobs;
pub mod lexer;
pub mod logging;
pub mod parser;
pub mod pipeline;
pub mod process;
pub mod signals;

pub use command::ExitCode;
pub use config::ShellConfig;
pub use errors::{JobError, ShellError};
/// Just a convenient re-export of the line runner.
pub use interpreter::Interpreter;

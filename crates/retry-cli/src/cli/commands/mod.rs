//! CLI command handlers. Each command is in its own file.

mod config;
mod run;
mod sqlstate;

pub use config::run_config;
pub use run::run_command;
pub use sqlstate::run_sqlstate;

//! CLI for the retry engine.

mod commands;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use retry_core::config::{self, BackoffKind};

use commands::{run_command, run_config, run_sqlstate};

/// Top-level CLI for the retry tool.
#[derive(Debug, Parser)]
#[command(name = "retry")]
#[command(about = "Re-run a command until it succeeds or the retry budget runs out", long_about = None)]
pub struct Cli {
    /// Read config from this file instead of ~/.config/retry/config.toml.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Run a command, retrying on failure.
    Run(RunArgs),

    /// Show the class of a SQLSTATE code and whether it is retried.
    Sqlstate {
        /// Five-character SQLSTATE code, e.g. 40001.
        code: String,
    },

    /// Show the config file path and the resolved retry policy.
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackoffArg {
    Fixed,
    Linear,
    Exponential,
}

impl From<BackoffArg> for BackoffKind {
    fn from(arg: BackoffArg) -> Self {
        match arg {
            BackoffArg::Fixed => BackoffKind::Fixed,
            BackoffArg::Linear => BackoffKind::Linear,
            BackoffArg::Exponential => BackoffKind::Exponential,
        }
    }
}

/// Flags for `retry run`. Each one overrides the matching config value.
#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Maximum attempts including the first (0 = unlimited).
    #[arg(long, short = 'n', value_name = "N")]
    pub max_attempts: Option<u32>,

    /// Delay growth between attempts.
    #[arg(long, value_enum)]
    pub backoff: Option<BackoffArg>,

    /// First delay in seconds.
    #[arg(long, value_name = "SECS")]
    pub delay: Option<f64>,

    /// Randomize each delay by up to ±FRACTION of its value.
    #[arg(long, value_name = "FRACTION")]
    pub jitter: Option<f64>,

    /// Give up once this many seconds have been spent retrying.
    #[arg(long, value_name = "SECS")]
    pub deadline: Option<f64>,

    /// Exit code that means "do not retry" (repeatable).
    #[arg(long = "stop-on", value_name = "CODE")]
    pub stop_on: Vec<i32>,

    /// Program and arguments to run.
    #[arg(required = true, trailing_var_arg = true)]
    pub command: Vec<String>,
}

impl CliCommand {
    pub fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = match &cli.config {
            Some(path) => config::load_from(std::path::Path::new(path))?,
            None => config::load_or_init()?,
        };
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Run(args) => run_command(&cfg, &args)?,
            CliCommand::Sqlstate { code } => run_sqlstate(&code)?,
            CliCommand::Config => run_config(&cfg, cli.config.as_deref())?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;

//! Run command: spawn a program until it exits 0 or the retry policy stops.

use anyhow::{bail, Result};
use retry_core::config::AppConfig;
use retry_core::retry::{run_with_retry, Classify, Failure, RetryPolicy};
use std::fmt;
use std::io;
use std::process::Command;

use crate::cli::RunArgs;

/// Failure of one run of the child program.
#[derive(Debug)]
pub enum CommandError {
    /// The program could not be started.
    Spawn(io::Error),
    /// The program exited unsuccessfully. `code` is `None` when it was killed
    /// by a signal; `permanent` marks a configured stop code.
    Exit { code: Option<i32>, permanent: bool },
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Spawn(e) => write!(f, "failed to start command: {}", e),
            CommandError::Exit {
                code: Some(code), ..
            } => write!(f, "command exited with status {}", code),
            CommandError::Exit { code: None, .. } => write!(f, "command killed by signal"),
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CommandError::Spawn(e) => Some(e),
            CommandError::Exit { .. } => None,
        }
    }
}

/// A stop code is the caller telling us the failure is its own fault.
impl Classify for CommandError {
    fn client_error(&self) -> bool {
        matches!(self, CommandError::Exit { permanent: true, .. })
    }
}

impl CommandError {
    /// Non-zero exits are retried unless they are stop codes; spawn failures
    /// go through the default classifier (e.g. a missing binary is permanent).
    fn into_failure(self) -> Failure<CommandError> {
        match self {
            CommandError::Exit { permanent, .. } => Failure::new(!permanent, self),
            CommandError::Spawn(_) => Failure::classify(self),
        }
    }
}

/// Merge config with command-line overrides into a resolved policy.
pub fn build_policy(cfg: &AppConfig, args: &RunArgs) -> Result<RetryPolicy> {
    let mut retry = cfg.retry_config();
    if let Some(n) = args.max_attempts {
        retry.max_attempts = n;
    }
    if let Some(b) = args.backoff {
        retry.backoff = b.into();
    }
    if let Some(d) = args.delay {
        retry.base_delay_secs = d;
    }
    if let Some(j) = args.jitter {
        retry.jitter = j;
    }
    if let Some(d) = args.deadline {
        retry.deadline_secs = Some(d);
    }
    retry.to_policy()
}

fn run_once(program: &str, args: &[String], stop_on: &[i32]) -> Result<(), CommandError> {
    let status = Command::new(program)
        .args(args)
        .status()
        .map_err(CommandError::Spawn)?;
    if status.success() {
        return Ok(());
    }
    let code = status.code();
    Err(CommandError::Exit {
        code,
        permanent: code.is_some_and(|c| stop_on.contains(&c)),
    })
}

/// Run `program` under `policy`. Returns the number of attempts it took.
pub(crate) fn run_with_policy(
    policy: &RetryPolicy,
    program: &str,
    args: &[String],
    stop_on: &[i32],
) -> Result<u32> {
    let mut attempts = 0;
    run_with_retry(policy, |attempt| {
        attempts = attempt;
        tracing::info!("attempt {}: running {}", attempt, program);
        run_once(program, args, stop_on).map_err(CommandError::into_failure)
    })?;
    Ok(attempts)
}

/// Handler for `retry run`.
pub fn run_command(cfg: &AppConfig, args: &RunArgs) -> Result<()> {
    let Some((program, rest)) = args.command.split_first() else {
        bail!("no command given");
    };
    let policy = build_policy(cfg, args)?;
    let mut stop_on = cfg.permanent_exit_codes.clone();
    stop_on.extend_from_slice(&args.stop_on);

    let attempts = run_with_policy(&policy, program, rest, &stop_on)?;
    tracing::info!("{} succeeded after {} attempt(s)", program, attempts);
    Ok(())
}

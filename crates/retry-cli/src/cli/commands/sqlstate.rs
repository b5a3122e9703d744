//! Sqlstate command: show how a SQLSTATE code is classified.

use anyhow::{bail, Result};
use retry_core::retry::{is_transient_sqlstate, sqlstate_class, sqlstate_class_name};

/// One-line description of `code`, or an error if it is not a SQLSTATE code.
pub(super) fn describe(code: &str) -> Result<String> {
    let Some(class) = sqlstate_class(code) else {
        bail!("{:?} is not a five-character SQLSTATE code", code);
    };
    let name = sqlstate_class_name(class).unwrap_or("unknown class");
    let verdict = if is_transient_sqlstate(code) {
        "transient (retried)"
    } else {
        "permanent (not retried)"
    };
    Ok(format!("{}: class {} ({}) -> {}", code, class, name, verdict))
}

pub fn run_sqlstate(code: &str) -> Result<()> {
    println!("{}", describe(&code.to_ascii_uppercase())?);
    Ok(())
}

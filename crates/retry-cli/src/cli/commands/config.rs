//! Config command: print where config lives and the policy it resolves to.

use anyhow::Result;
use retry_core::config::{self, AppConfig};

pub fn run_config(cfg: &AppConfig, explicit_path: Option<&str>) -> Result<()> {
    match explicit_path {
        Some(path) => println!("config: {}", path),
        None => println!("config: {}", config::config_path()?.display()),
    }
    let retry = cfg.retry_config();
    println!("{}", toml::to_string_pretty(&retry)?);
    if !cfg.permanent_exit_codes.is_empty() {
        println!("permanent exit codes: {:?}", cfg.permanent_exit_codes);
    }
    println!("policy: {:?}", retry.to_policy()?);
    Ok(())
}

//! Configuration check command

use clap::Args;

use super::RunContext;
use crate::error::CliResult;

/// Arguments for the check command
#[derive(Args, Debug)]
pub struct CheckArgs {}

/// Print the effective configuration with secrets masked.
///
/// Loading already validated it, so reaching this point means it is usable.
pub async fn execute(_args: CheckArgs, ctx: &RunContext) -> CliResult<()> {
    let mut config = ctx.config.clone();
    config.source = config.source.redacted();
    if let Some(ldap) = config.ldap.as_mut() {
        if ldap.bind_password.is_some() {
            ldap.bind_password = Some("***".to_string());
        }
    }

    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&config)?);
    } else {
        print!("{}", serde_yaml::to_string(&config)?);
    }
    Ok(())
}

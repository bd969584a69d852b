//! CLI argument parsing and command dispatch.

pub mod args;
pub mod auth;
pub mod context;
pub mod history;
pub mod poll;

pub use args::{Cli, Commands, OutputFormat};

use crate::error::Result;
use crate::storage::config::{CliOverrides, ResolvedConfig};

/// Resolve configuration for `cli` and run its command.
///
/// # Errors
/// Returns the first configuration, startup, or command error.
pub async fn dispatch(cli: &Cli) -> Result<()> {
    let format = cli.effective_format();

    match &cli.command {
        Commands::Run(poll) => {
            let config = ResolvedConfig::resolve(&CliOverrides::from_cli(cli, Some(poll)))?;
            poll::execute_run(&config, format).await
        }
        Commands::Once(poll) => {
            let config = ResolvedConfig::resolve(&CliOverrides::from_cli(cli, Some(poll)))?;
            poll::execute_once(&config, format).await
        }
        Commands::Auth(cmd) => {
            let config = ResolvedConfig::resolve(&CliOverrides::from_cli(cli, None))?;
            auth::execute(cmd, &config, format).await
        }
        Commands::History(cmd) => {
            let config = ResolvedConfig::resolve(&CliOverrides::from_cli(cli, None))?;
            history::execute(cmd, &config, format)
        }
    }
}

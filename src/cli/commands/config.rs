//! tomb config - Inspect the effective configuration

use clap::{Args, Subcommand};

use crate::app::AppContext;
use crate::cli::output::{emit_json, robot_ok};
use crate::error::{ArchiveError, Result};

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the merged configuration
    Show {
        /// Do not mask credentials in the backend URL
        #[arg(long)]
        debug: bool,
    },
    /// Print the resolved backend type
    Backend,
}

pub fn run(ctx: &AppContext, args: &ConfigArgs) -> Result<()> {
    match &args.command {
        ConfigCommand::Show { debug } => {
            let config = if *debug {
                ctx.config.clone()
            } else {
                ctx.config.redacted()
            };
            if ctx.robot_mode {
                emit_json(&robot_ok(&config))
            } else {
                let text = toml::to_string_pretty(&config)
                    .map_err(|err| ArchiveError::Config(format!("render config: {err}")))?;
                print!("{text}");
                Ok(())
            }
        }
        ConfigCommand::Backend => {
            let backend = ctx.config.resolve_backend()?;
            if ctx.robot_mode {
                emit_json(&robot_ok(serde_json::json!({ "backend": backend })))
            } else {
                println!("{backend}");
                Ok(())
            }
        }
    }
}

//! Per-invocation state shared by every CLI command.

use std::path::PathBuf;

use crate::cli::Cli;
use crate::config::Config;
use crate::error::{ArchiveError, Result};
use crate::service::ArchiveService;

pub struct AppContext {
    pub config: Config,
    /// Directory relative paths in the config resolve against.
    pub root: PathBuf,
    pub robot_mode: bool,
    pub quiet: bool,
}

impl AppContext {
    /// Load configuration for `cli` without touching the backend.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let root = std::env::current_dir()?;
        let config = Config::load(cli.config.as_deref(), &root)?;
        Ok(Self {
            config,
            root,
            robot_mode: cli.robot,
            quiet: cli.quiet,
        })
    }

    /// Connect the configured backend.
    pub fn service(&self) -> Result<ArchiveService> {
        ArchiveService::from_config(&self.config, &self.root)
    }

    /// `explicit` if given, else the configured fallback actor.
    pub fn actor(&self, explicit: Option<&str>) -> Result<String> {
        explicit
            .map(str::to_string)
            .or_else(|| self.config.actor.clone())
            .filter(|actor| !actor.trim().is_empty())
            .ok_or_else(|| {
                ArchiveError::Validation("no actor given; pass --by or set TOMB_ACTOR".to_string())
            })
    }
}

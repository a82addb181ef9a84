//! CLI command implementations
//!
//! Each subcommand has its own module with:
//! - Args struct for command-line arguments
//! - `run()` function to execute the command

use serde_json::{Map, Value};

use crate::app::AppContext;
use crate::cli::Commands;
use crate::error::{ArchiveError, Result};

pub mod batch_restore;
pub mod config;
pub mod health_check;
pub mod init;
pub mod list;
pub mod prune_request;
pub mod purge;
pub mod referent;
pub mod restore;
pub mod schema;
pub mod show;
pub mod store;

/// Dispatch a command to its handler
pub fn run(ctx: &AppContext, command: &Commands) -> Result<()> {
    match command {
        Commands::Init(args) => init::run(ctx, args),
        Commands::Schema(args) => schema::run(ctx, args),
        Commands::Store(args) => store::run(ctx, args),
        Commands::List(args) => list::run(ctx, args),
        Commands::Show(args) => show::run(ctx, args),
        Commands::Restore(args) => restore::run(ctx, args),
        Commands::PruneRequest(args) => prune_request::run(ctx, args),
        Commands::Purge(args) => purge::run(ctx, args),
        Commands::HealthCheck(args) => health_check::run(ctx, args),
        Commands::BatchRestore(args) => batch_restore::run(ctx, args),
        Commands::Referent(args) => referent::run(ctx, args),
        Commands::Config(args) => config::run(ctx, args),
    }
}

/// Parse repeated `KEY=VALUE` flags into a JSON object of strings.
pub(crate) fn parse_key_values(pairs: &[String]) -> Result<Map<String, Value>> {
    let mut map = Map::new();
    for pair in pairs {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            ArchiveError::Validation(format!("metadata '{pair}' is not KEY=VALUE"))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ArchiveError::Validation(format!("metadata '{pair}' has an empty key")));
        }
        map.insert(key.to_string(), Value::from(value));
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_values_split_on_first_equals() {
        let map = parse_key_values(&["ticket=OPS-1".into(), "query=a=b".into()]).unwrap();
        assert_eq!(map["ticket"], "OPS-1");
        assert_eq!(map["query"], "a=b");
    }

    #[test]
    fn key_values_reject_missing_separator() {
        assert!(matches!(
            parse_key_values(&["oops".into()]),
            Err(ArchiveError::Validation(_))
        ));
        assert!(parse_key_values(&["=x".into()]).is_err());
    }
}

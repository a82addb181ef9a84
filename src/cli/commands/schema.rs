//! tomb schema - Print the DDL for one backend dialect

use clap::Args;
use serde::Serialize;

use crate::app::AppContext;
use crate::cli::output::{emit_json, robot_ok};
use crate::error::Result;
use crate::storage::schema::Backend;

#[derive(Args, Debug)]
pub struct SchemaArgs {
    /// sqlite, postgres or mariadb
    #[arg(long, default_value = "sqlite")]
    pub dialect: String,
}

#[derive(Serialize)]
struct SchemaReport<'a> {
    dialect: Backend,
    statements: &'a [&'a str],
}

pub fn run(ctx: &AppContext, args: &SchemaArgs) -> Result<()> {
    let dialect: Backend = args.dialect.parse()?;
    let statements = dialect.statements();
    if ctx.robot_mode {
        return emit_json(&robot_ok(SchemaReport {
            dialect,
            statements,
        }));
    }
    for statement in statements {
        println!("{};\n", statement.trim_end().trim_end_matches(';'));
    }
    Ok(())
}

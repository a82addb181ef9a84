//! tomb - Tombstone archive CLI
//!
//! Content-addressed, auditable archival of files removed from a codebase.

use std::fs::OpenOptions;
use std::process::ExitCode;
use std::sync::Mutex;

use clap::Parser;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use tomb::Result;
use tomb::app::AppContext;
use tomb::cli::Cli;
use tomb::cli::output::{emit_json, robot_error_structured};
use tomb::config::LoggingConfig;

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if cli.robot {
                // Robot mode: structured error on stdout as well
                let _ = emit_json(&robot_error_structured(&e));
            }
            eprintln!("ERROR: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let ctx = AppContext::from_cli(cli)?;
    init_tracing(cli, &ctx.config.logging);
    tomb::cli::commands::run(&ctx, &cli.command)
}

fn init_tracing(cli: &Cli, logging: &LoggingConfig) {
    if cli.quiet {
        return;
    }

    let filter = match cli.verbose {
        0 => format!("warn,tomb={}", logging.level),
        1 => "info,tomb=debug".to_string(),
        2 => "debug,tomb=trace".to_string(),
        _ => "trace".to_string(),
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let writer = match &logging.file {
        Some(path) => match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => BoxMakeWriter::new(Mutex::new(file)),
            Err(err) => {
                eprintln!("WARNING: cannot open log file {}: {err}", path.display());
                BoxMakeWriter::new(std::io::stderr)
            }
        },
        None => BoxMakeWriter::new(std::io::stderr),
    };
    let to_file = logging.file.is_some();

    if cli.robot || logging.format == "json" {
        // JSON logging for robot mode
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_writer(writer))
            .init();
    } else {
        // Human-readable logging
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_ansi(!to_file).with_writer(writer))
            .init();
    }
}

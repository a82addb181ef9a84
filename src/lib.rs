pub mod app;
pub mod batch;
pub mod cli;
pub mod config;
pub mod error;
pub mod retry;
pub mod service;
pub mod storage;
pub mod utils;

pub use error::{ArchiveError, Result};

/// Package version from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;

use crate::error::{ArchiveError, ErrorCode, Result};

#[derive(Serialize)]
pub struct RobotResponse<T> {
    pub status: RobotStatus,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub data: T,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RobotStatus {
    Ok,
    #[serde(rename = "error")]
    StructuredError {
        /// Error code enum value (e.g., "TOMBSTONE_NOT_FOUND")
        code: ErrorCode,
        numeric_code: u16,
        message: String,
        suggestion: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        context: Option<serde_json::Value>,
        recoverable: bool,
        category: String,
    },
}

pub fn robot_ok<T: Serialize>(data: T) -> RobotResponse<T> {
    RobotResponse {
        status: RobotStatus::Ok,
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        data,
        warnings: Vec::new(),
    }
}

/// Robot error response carrying code, suggestion and context.
pub fn robot_error_structured(err: &ArchiveError) -> RobotResponse<serde_json::Value> {
    RobotResponse {
        status: RobotStatus::from(err),
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        data: serde_json::Value::Null,
        warnings: Vec::new(),
    }
}

impl From<&ArchiveError> for RobotStatus {
    fn from(err: &ArchiveError) -> Self {
        let structured = err.to_structured();
        Self::StructuredError {
            code: structured.code,
            numeric_code: structured.numeric_code,
            message: structured.message,
            suggestion: structured.suggestion,
            context: structured.context,
            recoverable: structured.recoverable,
            category: structured.category,
        }
    }
}

pub fn emit_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value)?;
    println!("{payload}");
    Ok(())
}

/// `robot_ok(data)` in robot mode, otherwise whatever `human` renders.
pub fn emit<T: Serialize>(robot: bool, data: &T, human: impl FnOnce(&T) -> String) -> Result<()> {
    if robot {
        emit_json(&robot_ok(data))
    } else {
        println!("{}", human(data));
        Ok(())
    }
}

pub struct HumanLayout {
    lines: Vec<String>,
    key_width: usize,
}

impl Default for HumanLayout {
    fn default() -> Self {
        Self::new()
    }
}

impl HumanLayout {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            lines: Vec::new(),
            key_width: 14,
        }
    }

    pub fn title(&mut self, text: &str) -> &mut Self {
        self.lines.push(text.bold().to_string());
        self.lines.push(String::new());
        self
    }

    pub fn section(&mut self, text: &str) -> &mut Self {
        self.lines.push(text.bold().to_string());
        self.lines.push("-".repeat(text.len().max(3)));
        self
    }

    pub fn kv(&mut self, key: &str, value: &str) -> &mut Self {
        let padded = format!("{key:width$}", width = self.key_width);
        self.lines.push(format!("{} {value}", padded.dimmed()));
        self
    }

    pub fn bullet(&mut self, text: &str) -> &mut Self {
        self.lines.push(format!("- {text}"));
        self
    }

    pub fn blank(&mut self) -> &mut Self {
        self.lines.push(String::new());
        self
    }

    #[must_use]
    pub fn build(&self) -> String {
        self.lines.join("\n")
    }
}

//! Progress reporting for long-running commands (batch restore).
//!
//! - TTY mode: an indicatif progress bar
//! - Non-TTY mode: one line per update on stderr
//! - Robot mode: JSON progress events on stderr
//! - Quiet mode: nothing

use std::io::IsTerminal;

use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

/// Progress output mode based on terminal capabilities and user preferences
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressMode {
    Tty,
    NonTty,
    Robot,
    Quiet,
}

impl ProgressMode {
    #[must_use]
    pub fn detect(robot_mode: bool, quiet: bool) -> Self {
        if quiet {
            Self::Quiet
        } else if robot_mode {
            Self::Robot
        } else if std::io::stderr().is_terminal() {
            Self::Tty
        } else {
            Self::NonTty
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressEventType {
    ProgressStart,
    ProgressUpdate,
    ProgressComplete,
    ProgressError,
}

/// JSON progress event for robot mode
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub event_type: &'static str,
    pub event: ProgressEventType,
    pub operation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: String,
}

impl ProgressEvent {
    fn new(event: ProgressEventType, operation: &str) -> Self {
        Self {
            event_type: "progress",
            event,
            operation: operation.to_string(),
            current: None,
            total: None,
            message: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    const fn with_progress(mut self, current: u64, total: u64) -> Self {
        self.current = Some(current);
        self.total = Some(total);
        self
    }

    fn with_message(mut self, message: &str) -> Self {
        self.message = Some(message.to_string());
        self
    }

    fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            eprintln!("{json}");
        }
    }
}

/// Handle for updating or finishing a progress bar.
pub enum ProgressHandle {
    Tty(ProgressBar),
    NonTty { operation: String, total: u64 },
    Robot { operation: String, total: u64 },
    Noop,
}

impl ProgressHandle {
    /// Start a determinate progress bar over `total` steps.
    #[must_use]
    pub fn start(mode: ProgressMode, total: u64, msg: &str) -> Self {
        match mode {
            ProgressMode::Quiet => Self::Noop,
            ProgressMode::Robot => {
                ProgressEvent::new(ProgressEventType::ProgressStart, msg)
                    .with_progress(0, total)
                    .emit();
                Self::Robot {
                    operation: msg.to_string(),
                    total,
                }
            }
            ProgressMode::NonTty => {
                eprintln!("[tomb] {msg} (0/{total})");
                Self::NonTty {
                    operation: msg.to_string(),
                    total,
                }
            }
            ProgressMode::Tty => {
                let pb = ProgressBar::new(total);
                if let Ok(style) =
                    ProgressStyle::default_bar().template("{msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
                {
                    pb.set_style(style.progress_chars("█▓▒░"));
                }
                pb.set_message(msg.to_string());
                Self::Tty(pb)
            }
        }
    }

    pub fn set_position(&self, pos: u64) {
        match self {
            Self::Tty(pb) => pb.set_position(pos),
            Self::NonTty { operation, total } => eprintln!("[tomb] {operation} ({pos}/{total})"),
            Self::Robot { operation, total } => {
                ProgressEvent::new(ProgressEventType::ProgressUpdate, operation)
                    .with_progress(pos, *total)
                    .emit();
            }
            Self::Noop => {}
        }
    }

    pub fn finish_with_message(&self, msg: &str) {
        match self {
            Self::Tty(pb) => pb.finish_with_message(format!("✓ {msg}")),
            Self::NonTty { .. } => eprintln!("[tomb] ✓ {msg}"),
            Self::Robot { operation, .. } => {
                ProgressEvent::new(ProgressEventType::ProgressComplete, operation)
                    .with_message(msg)
                    .emit();
            }
            Self::Noop => {}
        }
    }

    pub fn abandon_with_message(&self, msg: &str) {
        match self {
            Self::Tty(pb) => pb.abandon_with_message(format!("✗ {msg}")),
            Self::NonTty { .. } => eprintln!("[tomb] ✗ {msg}"),
            Self::Robot { operation, .. } => {
                ProgressEvent::new(ProgressEventType::ProgressError, operation)
                    .with_message(msg)
                    .emit();
            }
            Self::Noop => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_wins_over_robot() {
        assert_eq!(ProgressMode::detect(true, true), ProgressMode::Quiet);
        assert_eq!(ProgressMode::detect(true, false), ProgressMode::Robot);
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let event = ProgressEvent::new(ProgressEventType::ProgressUpdate, "batch restore")
            .with_progress(3, 10);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["event"], "progress_update");
        assert_eq!(json["current"], 3);
        assert!(json.get("message").is_none());
    }

    #[test]
    fn noop_handle_is_silent() {
        let handle = ProgressHandle::start(ProgressMode::Quiet, 5, "x");
        handle.set_position(1);
        handle.finish_with_message("done");
        assert!(matches!(handle, ProgressHandle::Noop));
    }
}

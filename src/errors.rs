//! Error types for every component of the dashboard.
//!
//! Probe and controller errors never leave their component: they are turned
//! into degraded sections of the render frame. Only [`FatalError`] reaches
//! the top level.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure of a probe's external utility or of its output.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    /// Binary missing, non-zero exit, or timeout.
    #[error("`{program}` unavailable: {reason}")]
    CommandUnavailable { program: String, reason: String },

    /// Output could not be interpreted at all.
    #[error("unexpected output from `{program}`: {reason}")]
    ParseError { program: String, reason: String },
}

impl ProbeError {
    pub fn unavailable(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CommandUnavailable {
            program: program.into(),
            reason: reason.into(),
        }
    }

    pub fn parse(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ParseError {
            program: program.into(),
            reason: reason.into(),
        }
    }

    pub fn timed_out(program: impl Into<String>, after: Duration) -> Self {
        Self::unavailable(
            program,
            format!("timed out after {}", humantime::format_duration(after)),
        )
    }
}

/// Failure of the keep-awake supervisor.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ControllerError {
    /// The sleep-prevention child could not be spawned or died.
    #[error("keep-awake process `{program}` failed: {reason}")]
    ChildProcessFailed { program: String, reason: String },

    /// `start()` called after the controller was stopped.
    #[error("keep-awake controller already stopped")]
    AlreadyStopped,
}

/// Errors that end the process.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("terminal unavailable: {0}")]
    TerminalUnavailable(#[source] io::Error),
}

/// On-disk snapshot store errors. Always logged, never surfaced.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("cache file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cache record {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("cache record {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("cache record {path} has schema {found}, expected {expected}")]
    Schema {
        path: PathBuf,
        found: u32,
        expected: u32,
    },
}

//! Probes: query an external utility and normalize its output.
//!
//! All external calls go through [`CommandRunner`] so tests can replace the
//! host utilities with canned output.

pub mod network;
pub mod power;

use std::process::Stdio;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::process::Command;
use tracing::debug;

use crate::errors::ProbeError;

pub use network::NetworkProbe;
pub use power::PowerProbe;

/// One invocation of an external utility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new<I, S>(program: &str, args: I, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            timeout,
        }
    }

    /// `program arg arg ...`, used as the key for fake runners and in logs.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Runs an external utility and returns its stdout.
///
/// Missing binaries, non-zero exits, and timeouts are all
/// [`ProbeError::CommandUnavailable`].
pub trait CommandRunner: Send + Sync {
    fn run<'a>(&'a self, spec: &'a CommandSpec) -> BoxFuture<'a, Result<String, ProbeError>>;
}

/// Runs commands on the host with `tokio::process`.
///
/// The child is killed when the returned future is dropped, so a probe
/// abandoned on shutdown or timeout leaves no process behind.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run<'a>(&'a self, spec: &'a CommandSpec) -> BoxFuture<'a, Result<String, ProbeError>> {
        Box::pin(async move {
            debug!(command = %spec.command_line(), "running probe utility");
            let child = Command::new(&spec.program)
                .args(&spec.args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| ProbeError::unavailable(&spec.program, e.to_string()))?;

            let output = tokio::time::timeout(spec.timeout, child.wait_with_output())
                .await
                .map_err(|_| ProbeError::timed_out(&spec.program, spec.timeout))?
                .map_err(|e| ProbeError::unavailable(&spec.program, e.to_string()))?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(ProbeError::unavailable(
                    &spec.program,
                    format!("{} {}", output.status, stderr.trim()),
                ));
            }
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        })
    }
}

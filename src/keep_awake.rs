//! Supervises the long-lived sleep-prevention process.
//!
//! `Idle -> Running -> Stopped`. [`start`](KeepAwakeController::start)
//! applies the one-time power settings (best effort) and spawns the child;
//! [`check_health`](KeepAwakeController::check_health) is polled every tick
//! and restarts a child that died, up to `max_restarts`, after which the
//! controller reports [`KeepAwakeStatus::Degraded`]. It never reports the
//! host as kept awake without a live child.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

use crate::config::KeepAwakeConfig;
use crate::errors::ControllerError;
use crate::probe::{CommandRunner, CommandSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Running,
    Stopped,
}

/// What the display shows for sleep prevention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeepAwakeStatus {
    /// Turned off by configuration.
    Disabled,
    Idle,
    Active { pid: Option<u32>, restarts: u32 },
    /// The child is gone and will not be restarted.
    Degraded { reason: String },
    Stopped,
}

pub struct KeepAwakeController {
    config: KeepAwakeConfig,
    runner: Arc<dyn CommandRunner>,
    settings_timeout: Duration,
    state: ControllerState,
    child: Option<Child>,
    restarts: u32,
    failure: Option<ControllerError>,
}

impl KeepAwakeController {
    pub fn new(config: KeepAwakeConfig, runner: Arc<dyn CommandRunner>, settings_timeout: Duration) -> Self {
        Self {
            config,
            runner,
            settings_timeout,
            state: ControllerState::Idle,
            child: None,
            restarts: 0,
            failure: None,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn status(&self) -> KeepAwakeStatus {
        if !self.config.enabled {
            return KeepAwakeStatus::Disabled;
        }
        match (self.state, &self.child, &self.failure) {
            (ControllerState::Idle, ..) => KeepAwakeStatus::Idle,
            (ControllerState::Stopped, ..) => KeepAwakeStatus::Stopped,
            (ControllerState::Running, Some(child), _) => KeepAwakeStatus::Active {
                pid: child.id(),
                restarts: self.restarts,
            },
            (ControllerState::Running, None, failure) => KeepAwakeStatus::Degraded {
                reason: failure
                    .as_ref()
                    .map_or_else(|| "not running".to_string(), ToString::to_string),
            },
        }
    }

    /// Apply power settings and launch the keep-awake child.
    ///
    /// Settings failures are logged only. A child that cannot be spawned
    /// goes through the same restart policy as one that dies later.
    pub async fn start(&mut self) -> Result<(), ControllerError> {
        match self.state {
            ControllerState::Running => return Ok(()),
            ControllerState::Stopped => return Err(ControllerError::AlreadyStopped),
            ControllerState::Idle => {}
        }
        if !self.config.enabled {
            debug!("keep-awake disabled");
            return Ok(());
        }

        self.apply_power_settings().await;

        self.state = ControllerState::Running;
        match self.spawn() {
            Ok(child) => {
                info!(pid = child.id(), program = %self.config.program, "keep-awake started");
                self.child = Some(child);
            }
            Err(e) => self.recover(e),
        }
        Ok(())
    }

    async fn apply_power_settings(&self) {
        for argv in &self.config.power_settings {
            let Some((program, args)) = argv.split_first() else {
                continue;
            };
            let spec = CommandSpec::new(program, args.iter().cloned(), self.settings_timeout);
            match self.runner.run(&spec).await {
                Ok(_) => debug!(command = %spec.command_line(), "applied power setting"),
                Err(e) => warn!(command = %spec.command_line(), error = %e, "power setting failed"),
            }
        }
    }

    fn spawn(&self) -> Result<Child, ControllerError> {
        Command::new(&self.config.program)
            .args(&self.config.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.failed(e.to_string()))
    }

    fn failed(&self, reason: String) -> ControllerError {
        ControllerError::ChildProcessFailed {
            program: self.config.program.clone(),
            reason,
        }
    }

    /// Restart after a failure while restarts remain, else go degraded.
    fn recover(&mut self, mut failure: ControllerError) {
        self.child = None;
        loop {
            error!(error = %failure, "keep-awake process failed");
            if self.restarts >= self.config.max_restarts {
                warn!(restarts = self.restarts, "keep-awake degraded, giving up");
                self.failure = Some(failure);
                return;
            }
            self.restarts += 1;
            match self.spawn() {
                Ok(child) => {
                    info!(pid = child.id(), attempt = self.restarts, "keep-awake restarted");
                    self.child = Some(child);
                    return;
                }
                Err(e) => failure = e,
            }
        }
    }

    /// Detect an unexpected child exit and apply the restart policy.
    pub fn check_health(&mut self) -> KeepAwakeStatus {
        if self.state == ControllerState::Running {
            if let Some(child) = self.child.as_mut() {
                let failure = match child.try_wait() {
                    Ok(None) => None,
                    Ok(Some(status)) => Some(format!("exited unexpectedly with {status}")),
                    Err(e) => Some(e.to_string()),
                };
                if let Some(reason) = failure {
                    let failure = self.failed(reason);
                    self.recover(failure);
                }
            }
        }
        self.status()
    }

    /// Terminate the child and wait up to `grace` for it, then kill it.
    ///
    /// Idempotent; stopping an idle controller just marks it stopped.
    pub async fn stop(&mut self, grace: Duration) {
        if self.state == ControllerState::Stopped {
            return;
        }
        self.state = ControllerState::Stopped;

        let Some(mut child) = self.child.take() else {
            return;
        };
        let pid = child.id();
        request_exit(&mut child);

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => info!(?pid, %status, "keep-awake stopped"),
            Ok(Err(e)) => warn!(?pid, error = %e, "failed waiting for keep-awake process"),
            Err(_) => {
                warn!(?pid, "keep-awake did not exit in time, killing");
                if let Err(e) = child.kill().await {
                    error!(?pid, error = %e, "failed to kill keep-awake process");
                }
            }
        }
    }
}

impl Drop for KeepAwakeController {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
    }
}

/// Ask the child to exit: SIGTERM on Unix, immediate kill elsewhere.
#[cfg(unix)]
fn request_exit(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        debug!(pid, error = %e, "SIGTERM failed");
    }
}

#[cfg(not(unix))]
fn request_exit(child: &mut Child) {
    let _ = child.start_kill();
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::probe::SystemRunner;
    use pretty_assertions::assert_eq;

    const GRACE: Duration = Duration::from_secs(2);

    fn controller(program: &str, args: &[&str]) -> KeepAwakeController {
        let config = KeepAwakeConfig {
            enabled: true,
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            power_settings: vec![vec!["false".into()], vec!["coffee-no-such-pmset".into()]],
            max_restarts: 1,
        };
        KeepAwakeController::new(config, Arc::new(SystemRunner), Duration::from_secs(2))
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    #[tokio::test]
    async fn start_then_stop() {
        let mut ctl = controller("sleep", &["60"]);
        assert_eq!(ctl.status(), KeepAwakeStatus::Idle);

        ctl.start().await.unwrap();
        assert_eq!(ctl.state(), ControllerState::Running);
        assert!(matches!(ctl.check_health(), KeepAwakeStatus::Active { restarts: 0, .. }));

        let started = std::time::Instant::now();
        ctl.stop(GRACE).await;
        assert!(started.elapsed() < GRACE);
        assert_eq!(ctl.status(), KeepAwakeStatus::Stopped);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let mut ctl = controller("sleep", &["60"]);
        ctl.start().await.unwrap();
        ctl.stop(GRACE).await;
        ctl.stop(GRACE).await;
        assert_eq!(ctl.state(), ControllerState::Stopped);
    }

    #[tokio::test]
    async fn stop_before_start_marks_stopped() {
        let mut ctl = controller("sleep", &["60"]);
        ctl.stop(GRACE).await;
        assert_eq!(ctl.status(), KeepAwakeStatus::Stopped);
        assert_eq!(ctl.start().await, Err(ControllerError::AlreadyStopped));
    }

    #[tokio::test]
    async fn child_ignoring_sigterm_is_killed_after_grace() {
        let mut ctl = controller("sh", &["-c", "trap '' TERM; exec sleep 60"]);
        ctl.start().await.unwrap();
        settle().await;

        let grace = Duration::from_millis(300);
        let started = std::time::Instant::now();
        ctl.stop(grace).await;
        assert!(started.elapsed() >= grace);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn missing_program_is_degraded_not_active() {
        let mut ctl = controller("coffee-no-such-caffeinate", &[]);
        ctl.start().await.unwrap();
        match ctl.check_health() {
            KeepAwakeStatus::Degraded { reason } => assert!(reason.contains("coffee-no-such-caffeinate")),
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[tokio::test]
    async fn dead_child_is_restarted_once_then_degraded() {
        let mut ctl = controller("true", &[]);
        ctl.start().await.unwrap();

        settle().await;
        assert!(matches!(ctl.check_health(), KeepAwakeStatus::Active { restarts: 1, .. }));

        settle().await;
        assert!(matches!(ctl.check_health(), KeepAwakeStatus::Degraded { .. }));

        ctl.stop(GRACE).await;
        assert_eq!(ctl.status(), KeepAwakeStatus::Stopped);
    }

    #[tokio::test]
    async fn disabled_controller_spawns_nothing() {
        let mut ctl = controller("sleep", &["60"]);
        ctl.config.enabled = false;
        ctl.start().await.unwrap();
        assert_eq!(ctl.check_health(), KeepAwakeStatus::Disabled);
        assert!(ctl.child.is_none());
    }
}

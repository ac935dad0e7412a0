//! Cheap host readings taken every tick: uptime and this process's memory.

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use crate::types::UptimeReading;

/// Collects host metrics from the underlying OS.
pub struct Collector {
    sys: System,
    pid: Option<Pid>,
    /// Seconds since boot from a monotonic source.
    uptime_secs: fn() -> u64,
}

impl Default for Collector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector {
    pub fn new() -> Self {
        Self::with_uptime_source(System::uptime)
    }

    pub fn with_uptime_source(uptime_secs: fn() -> u64) -> Self {
        Self {
            sys: System::new(),
            pid: sysinfo::get_current_pid().ok(),
            uptime_secs,
        }
    }

    /// Time since boot. Wall-clock changes do not affect it.
    pub fn uptime(&self) -> UptimeReading {
        UptimeReading::from_secs((self.uptime_secs)())
    }

    /// Resident memory of this process in bytes.
    pub fn memory_bytes(&mut self) -> Option<u64> {
        let pid = self.pid?;
        self.sys.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
        self.sys.process(pid).map(sysinfo::Process::memory)
    }
}

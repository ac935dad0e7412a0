//! One tick of the dashboard: read the clocks, pull both probes through
//! their caches, and compose a [`RenderFrame`].
//!
//! A tick never fails. Probe errors become degraded sections; only the
//! shutdown signal ends the loop that calls [`RefreshLoop::tick`].

use chrono::{FixedOffset, Local};
use tracing::trace;

use crate::collector::Collector;
use crate::config::{ClockConfig, Config};
use crate::keep_awake::KeepAwakeStatus;
use crate::probe::{NetworkProbe, PowerProbe};
use crate::types::{RenderFrame, SecondaryClock, Section};

/// Ticks between memory samples (once per second at 4 Hz).
const MEMORY_SAMPLE_TICKS: u64 = 4;

pub struct RefreshLoop {
    power: PowerProbe,
    network: NetworkProbe,
    collector: Collector,
    secondary: Option<(String, FixedOffset)>,
    ticks: u64,
    memory_bytes: Option<u64>,
}

impl RefreshLoop {
    pub fn new(power: PowerProbe, network: NetworkProbe, collector: Collector, config: &Config) -> Self {
        Self {
            power,
            network,
            collector,
            secondary: secondary_zone(&config.clock),
            ticks: 0,
            memory_bytes: None,
        }
    }

    /// Seed both probe caches from disk.
    pub async fn restore(&self) {
        self.power.restore().await;
        self.network.restore().await;
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Compose the frame for this tick.
    ///
    /// Each probe is asked exactly once, so the frame is consistent within
    /// the tick. `keep_awake` is the controller status observed by the
    /// caller for the same tick.
    pub async fn tick(&mut self, keep_awake: KeepAwakeStatus) -> RenderFrame {
        let tick = self.ticks;
        self.ticks += 1;

        let now = Local::now();
        let uptime = self.collector.uptime();
        if tick % MEMORY_SAMPLE_TICKS == 0 {
            self.memory_bytes = self.collector.memory_bytes();
        }

        let (power, network) = tokio::join!(self.power.snapshot(), self.network.snapshot());
        let power = Section::from(power);
        let network = Section::from(network);
        trace!(tick, power_degraded = power.is_degraded(), network_degraded = network.is_degraded());

        RenderFrame {
            tick,
            now,
            secondary: self.secondary.as_ref().map(|(label, offset)| SecondaryClock {
                label: label.clone(),
                now: now.with_timezone(offset),
            }),
            uptime,
            memory_bytes: self.memory_bytes,
            power,
            network,
            keep_awake,
        }
    }
}

fn secondary_zone(clock: &ClockConfig) -> Option<(String, FixedOffset)> {
    if clock.secondary_label.trim().is_empty() {
        return None;
    }
    let offset = FixedOffset::east_opt(clock.secondary_offset_minutes.checked_mul(60)?)?;
    Some((clock.secondary_label.clone(), offset))
}

//! Plain data handed between probes, the refresh loop, and the display.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::{Cached, Freshness};
use crate::keep_awake::KeepAwakeStatus;

/// Battery health derived from maximum capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BatteryHealth {
    Good,
    Fair,
    Poor,
    #[default]
    Unknown,
}

/// Normalized battery / AC state.
///
/// `is_charging` implies `is_plugged_in`; use [`PowerSnapshot::normalized`]
/// after filling fields from raw input.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PowerSnapshot {
    /// Charge in percent, absent on hosts without a battery.
    pub percentage: Option<u8>,
    pub is_charging: bool,
    pub is_plugged_in: bool,
    pub charger_wattage: Option<u32>,
    pub cycle_count: Option<u32>,
    pub max_capacity_percent: Option<u8>,
    pub health: BatteryHealth,
    /// Health string reported by the OS ("Normal", "Service Recommended").
    pub condition: Option<String>,
    /// Battery is at its low-charge warning level.
    pub warning_level: Option<bool>,
}

impl PowerSnapshot {
    /// Enforce the charging-implies-plugged-in invariant.
    pub fn normalized(mut self) -> Self {
        if self.is_charging && !self.is_plugged_in {
            tracing::warn!("battery reports charging without external power, treating as discharging");
            self.is_charging = false;
        }
        self
    }
}

/// How a [`NetworkSnapshot`] was ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OrderSource {
    /// OS-reported network service order.
    #[default]
    ServiceOrder,
    /// Service order unavailable; interface listing order used instead.
    ListingOrder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterfaceInfo {
    /// Device name, e.g. `en0`.
    pub name: String,
    pub is_active: bool,
    pub ipv4: Vec<String>,
    pub ipv6: Vec<String>,
    pub service_order_rank: u32,
    /// Service name, e.g. `Wi-Fi`.
    pub service: Option<String>,
    pub mac: Option<String>,
}

/// Interfaces sorted by `service_order_rank`, ranks unique.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NetworkSnapshot {
    pub interfaces: Vec<NetworkInterfaceInfo>,
    pub order_source: OrderSource,
}

impl NetworkSnapshot {
    /// Sort by rank and renumber densely so ranks stay unique.
    ///
    /// The sort is stable: interfaces sharing a rank keep their listing order.
    pub fn from_ranked(mut interfaces: Vec<NetworkInterfaceInfo>, order_source: OrderSource) -> Self {
        interfaces.sort_by_key(|iface| iface.service_order_rank);
        for (rank, iface) in (1..).zip(interfaces.iter_mut()) {
            iface.service_order_rank = rank;
        }
        Self {
            interfaces,
            order_source,
        }
    }

    pub fn active(&self) -> impl Iterator<Item = &NetworkInterfaceInfo> {
        self.interfaces.iter().filter(|iface| iface.is_active)
    }
}

/// Time since boot, broken into display units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UptimeReading {
    pub days: u64,
    pub hours: u64,
    pub minutes: u64,
    pub seconds: u64,
}

impl UptimeReading {
    pub fn from_secs(total: u64) -> Self {
        Self {
            days: total / 86_400,
            hours: (total % 86_400) / 3_600,
            minutes: (total % 3_600) / 60,
            seconds: total % 60,
        }
    }

    pub fn total_secs(&self) -> u64 {
        self.days * 86_400 + self.hours * 3_600 + self.minutes * 60 + self.seconds
    }
}

/// One section of the frame as seen by the display.
#[derive(Debug, Clone, PartialEq)]
pub enum Section<T> {
    /// Value within its TTL.
    Fresh {
        value: Arc<T>,
        computed_at: DateTime<Utc>,
    },
    /// Refresh failed; showing the last known value.
    Stale {
        value: Arc<T>,
        computed_at: DateTime<Utc>,
        age: Duration,
        error: String,
    },
    /// Nothing to show yet.
    Unavailable { error: String },
}

impl<T> Section<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Fresh { value, .. } | Self::Stale { value, .. } => Some(value.as_ref()),
            Self::Unavailable { .. } => None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        !matches!(self, Self::Fresh { .. })
    }

    pub fn computed_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Fresh { computed_at, .. } | Self::Stale { computed_at, .. } => Some(*computed_at),
            Self::Unavailable { .. } => None,
        }
    }
}

impl<T, E: std::fmt::Display> From<Result<Cached<T>, E>> for Section<T> {
    fn from(result: Result<Cached<T>, E>) -> Self {
        match result {
            Ok(cached) => match cached.freshness {
                Freshness::Fresh => Self::Fresh {
                    value: cached.value,
                    computed_at: cached.computed_at,
                },
                Freshness::Stale { error } => Self::Stale {
                    value: cached.value,
                    computed_at: cached.computed_at,
                    age: cached.age,
                    error,
                },
            },
            Err(err) => Self::Unavailable {
                error: err.to_string(),
            },
        }
    }
}

/// Fixed-offset second clock.
#[derive(Debug, Clone, PartialEq)]
pub struct SecondaryClock {
    pub label: String,
    pub now: DateTime<FixedOffset>,
}

/// Everything the display needs for one tick. No formatting decisions.
#[derive(Debug, Clone)]
pub struct RenderFrame {
    pub tick: u64,
    pub now: DateTime<Local>,
    pub secondary: Option<SecondaryClock>,
    pub uptime: UptimeReading,
    /// Resident memory of this process in bytes.
    pub memory_bytes: Option<u64>,
    pub power: Section<PowerSnapshot>,
    pub network: Section<NetworkSnapshot>,
    pub keep_awake: KeepAwakeStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn iface(name: &str, rank: u32) -> NetworkInterfaceInfo {
        NetworkInterfaceInfo {
            name: name.into(),
            is_active: false,
            ipv4: Vec::new(),
            ipv6: Vec::new(),
            service_order_rank: rank,
            service: None,
            mac: None,
        }
    }

    #[test]
    fn charging_without_power_is_discharging() {
        let raw = PowerSnapshot {
            percentage: Some(40),
            is_charging: true,
            is_plugged_in: false,
            ..PowerSnapshot::default()
        };
        let snap = raw.normalized();
        assert!(!snap.is_charging);
        assert!(!snap.is_plugged_in);
    }

    #[test]
    fn charging_with_power_is_kept() {
        let raw = PowerSnapshot {
            is_charging: true,
            is_plugged_in: true,
            ..PowerSnapshot::default()
        };
        assert!(raw.normalized().is_charging);
    }

    #[test]
    fn snapshot_orders_by_rank() {
        let snap = NetworkSnapshot::from_ranked(
            vec![iface("en3", 3), iface("en1", 1), iface("en2", 2)],
            OrderSource::ServiceOrder,
        );
        let names: Vec<_> = snap.interfaces.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["en1", "en2", "en3"]);
    }

    #[test]
    fn duplicate_ranks_are_renumbered_stably() {
        let snap = NetworkSnapshot::from_ranked(
            vec![iface("a", 5), iface("b", 2), iface("c", 5)],
            OrderSource::ServiceOrder,
        );
        let ranks: Vec<_> = snap
            .interfaces
            .iter()
            .map(|i| (i.name.as_str(), i.service_order_rank))
            .collect();
        assert_eq!(ranks, [("b", 1), ("a", 2), ("c", 3)]);
    }

    #[test]
    fn uptime_breaks_into_units() {
        let up = UptimeReading::from_secs(2 * 86_400 + 3 * 3_600 + 4 * 60 + 5);
        assert_eq!(
            up,
            UptimeReading {
                days: 2,
                hours: 3,
                minutes: 4,
                seconds: 5
            }
        );
        assert_eq!(up.total_secs(), 2 * 86_400 + 3 * 3_600 + 4 * 60 + 5);
    }
}

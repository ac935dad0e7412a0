//! Battery / AC state from `system_profiler -json SPPowerDataType`.
//!
//! Parsing is per field: a missing or reformatted field becomes `None` and
//! the rest of the snapshot survives. Only an unusable command (or output
//! that is not JSON at all) fails the whole refresh.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::{Cached, TtlCache};
use crate::config::{Config, HealthThresholds};
use crate::errors::ProbeError;
use crate::persist::SnapshotStore;
use crate::probe::{CommandRunner, CommandSpec};
use crate::types::PowerSnapshot;

const PROGRAM: &str = "system_profiler";
const CACHE_KEY: &str = "power";

const BATTERY_SECTION: &str = "spbattery_information";
const CHARGER_SECTION: &str = "sppower_ac_charger_information";

pub struct PowerProbe {
    runner: Arc<dyn CommandRunner>,
    cache: TtlCache<&'static str, PowerSnapshot, ProbeError>,
    spec: CommandSpec,
    ttl: Duration,
    thresholds: HealthThresholds,
    store: Option<SnapshotStore>,
}

impl PowerProbe {
    pub fn new(runner: Arc<dyn CommandRunner>, config: &Config, store: Option<SnapshotStore>) -> Self {
        Self {
            runner,
            cache: TtlCache::new(),
            spec: CommandSpec::new(PROGRAM, ["-json", "SPPowerDataType"], config.probe_timeout()),
            ttl: config.power_ttl(),
            thresholds: config.health,
            store,
        }
    }

    /// Seed the cache from the on-disk store, if a recent record exists.
    pub async fn restore(&self) {
        let Some(store) = &self.store else {
            return;
        };
        match store.load::<PowerSnapshot>(CACHE_KEY) {
            Ok(Some(record)) => {
                let value = record.value.normalized();
                if self.cache.seed(CACHE_KEY, value, record.computed_at, self.ttl).await {
                    info!(computed_at = %record.computed_at, "restored power snapshot");
                }
            }
            Ok(None) => {}
            Err(e) => debug!(error = %e, "ignoring persisted power snapshot"),
        }
    }

    /// Current power state, from cache unless older than the TTL.
    pub async fn snapshot(&self) -> Result<Cached<PowerSnapshot>, ProbeError> {
        self.cache
            .get_or_compute(CACHE_KEY, self.ttl, || self.fetch())
            .await
    }

    async fn fetch(&self) -> Result<PowerSnapshot, ProbeError> {
        let output = self.runner.run(&self.spec).await?;
        let snapshot = parse_power(&output, &self.thresholds)?;
        debug!(?snapshot, "power snapshot refreshed");

        if let Some(store) = &self.store {
            if let Err(e) = store.save(CACHE_KEY, chrono::Utc::now(), &snapshot) {
                warn!(error = %e, "failed to persist power snapshot");
            }
        }
        Ok(snapshot)
    }
}

/// Parse `system_profiler -json SPPowerDataType` output.
pub fn parse_power(output: &str, thresholds: &HealthThresholds) -> Result<PowerSnapshot, ProbeError> {
    let root: Value =
        serde_json::from_str(output).map_err(|e| ProbeError::parse(PROGRAM, e.to_string()))?;
    let sections = root
        .get("SPPowerDataType")
        .and_then(Value::as_array)
        .ok_or_else(|| ProbeError::parse(PROGRAM, "missing SPPowerDataType list"))?;

    let section = |name: &str| {
        sections
            .iter()
            .find(|s| s.get("_name").and_then(Value::as_str) == Some(name))
    };
    let battery = section(BATTERY_SECTION);
    let charger = section(CHARGER_SECTION);

    let charge = |key: &str| lookup(battery, &["sppower_battery_charge_info", key]);
    let health = |key: &str| lookup(battery, &["sppower_battery_health_info", key]);

    let max_capacity_percent = field(
        "max_capacity",
        health("sppower_battery_health_maximum_capacity").map(as_percent),
    );

    let snapshot = PowerSnapshot {
        percentage: field(
            "state_of_charge",
            charge("sppower_battery_state_of_charge").map(as_percent),
        ),
        is_charging: field("is_charging", charge("sppower_battery_is_charging").map(as_flag))
            .unwrap_or(false),
        is_plugged_in: field(
            "charger_connected",
            lookup(charger, &["sppower_battery_charger_connected"]).map(as_flag),
        )
        .unwrap_or(false),
        charger_wattage: field(
            "charger_watts",
            lookup(charger, &["sppower_ac_charger_watts"]).map(as_number),
        ),
        cycle_count: field(
            "cycle_count",
            health("sppower_battery_cycle_count").map(as_number),
        ),
        max_capacity_percent,
        health: thresholds.classify(max_capacity_percent),
        condition: health("sppower_battery_health")
            .and_then(Value::as_str)
            .map(str::to_string),
        warning_level: field(
            "at_warn_level",
            charge("sppower_battery_at_warn_level").map(as_flag),
        ),
    };
    Ok(snapshot.normalized())
}

fn lookup<'a>(root: Option<&'a Value>, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(root?, |value, key| value.get(key))
}

/// Drop a malformed field, keeping the rest of the snapshot.
fn field<T>(name: &str, parsed: Option<Result<T, ProbeError>>) -> Option<T> {
    match parsed? {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(field = name, error = %e, "ignoring malformed power field");
            None
        }
    }
}

fn malformed(value: &Value) -> ProbeError {
    ProbeError::parse(PROGRAM, format!("unexpected value {value}"))
}

/// `"TRUE"`, `"Yes"`, `true` and friends.
fn as_flag(value: &Value) -> Result<bool, ProbeError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => Ok(true),
            "false" | "no" => Ok(false),
            _ => Err(malformed(value)),
        },
        _ => Err(malformed(value)),
    }
}

/// A JSON number or a string with a leading integer (`"96"`, `"340 cycles"`).
fn as_number(value: &Value) -> Result<u32, ProbeError> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| malformed(value)),
        Value::String(s) => {
            let digits: String = s.trim().chars().take_while(char::is_ascii_digit).collect();
            digits.parse().map_err(|_| malformed(value))
        }
        _ => Err(malformed(value)),
    }
}

/// 0–100, written as a number or `"87%"`.
fn as_percent(value: &Value) -> Result<u8, ProbeError> {
    let n = as_number(value)?;
    u8::try_from(n)
        .ok()
        .filter(|pct| *pct <= 100)
        .ok_or_else(|| malformed(value))
}

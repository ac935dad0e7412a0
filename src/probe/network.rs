//! Interface topology from `networksetup` (service order) and `ifconfig`
//! (addresses and link state).
//!
//! Order comes from the OS network service order. When that listing is
//! unavailable the probe falls back to `ifconfig -l` listing order and marks
//! the snapshot [`OrderSource::ListingOrder`]; it never sorts by name.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::cache::{Cached, TtlCache};
use crate::config::Config;
use crate::errors::ProbeError;
use crate::persist::SnapshotStore;
use crate::probe::{CommandRunner, CommandSpec};
use crate::types::{NetworkInterfaceInfo, NetworkSnapshot, OrderSource};

const CACHE_KEY: &str = "network";

/// An interface as listed, before addresses are resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedInterface {
    pub device: String,
    pub service: Option<String>,
    pub rank: u32,
}

/// Addresses and link state of one interface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceAddresses {
    pub ipv4: Vec<String>,
    pub ipv6: Vec<String>,
    pub mac: Option<String>,
    /// `status:` line, when the driver reports one.
    pub link_active: Option<bool>,
}

impl InterfaceAddresses {
    pub fn is_active(&self) -> bool {
        self.link_active.unwrap_or(!self.ipv4.is_empty())
    }
}

pub struct NetworkProbe {
    runner: Arc<dyn CommandRunner>,
    cache: TtlCache<&'static str, NetworkSnapshot, ProbeError>,
    ttl: Duration,
    timeout: Duration,
    store: Option<SnapshotStore>,
}

impl NetworkProbe {
    pub fn new(runner: Arc<dyn CommandRunner>, config: &Config, store: Option<SnapshotStore>) -> Self {
        Self {
            runner,
            cache: TtlCache::new(),
            ttl: config.network_ttl(),
            timeout: config.probe_timeout(),
            store,
        }
    }

    /// Seed the cache from the on-disk store, if a recent record exists.
    pub async fn restore(&self) {
        let Some(store) = &self.store else {
            return;
        };
        match store.load::<NetworkSnapshot>(CACHE_KEY) {
            Ok(Some(record)) => {
                let value = NetworkSnapshot::from_ranked(record.value.interfaces, record.value.order_source);
                if self.cache.seed(CACHE_KEY, value, record.computed_at, self.ttl).await {
                    info!(computed_at = %record.computed_at, "restored network snapshot");
                }
            }
            Ok(None) => {}
            Err(e) => debug!(error = %e, "ignoring persisted network snapshot"),
        }
    }

    /// Current interface topology, from cache unless older than the TTL.
    pub async fn snapshot(&self) -> Result<Cached<NetworkSnapshot>, ProbeError> {
        self.cache
            .get_or_compute(CACHE_KEY, self.ttl, || self.fetch())
            .await
    }

    async fn fetch(&self) -> Result<NetworkSnapshot, ProbeError> {
        let (listed, order_source) = self.list_interfaces().await?;

        let resolved = join_all(listed.iter().map(|iface| self.resolve(&iface.device))).await;
        let interfaces = listed
            .into_iter()
            .zip(resolved)
            .map(|(iface, addrs)| NetworkInterfaceInfo {
                is_active: addrs.is_active(),
                name: iface.device,
                ipv4: addrs.ipv4,
                ipv6: addrs.ipv6,
                service_order_rank: iface.rank,
                service: iface.service,
                mac: addrs.mac,
            })
            .collect();

        let snapshot = NetworkSnapshot::from_ranked(interfaces, order_source);
        debug!(
            interfaces = snapshot.interfaces.len(),
            active = snapshot.active().count(),
            ?order_source,
            "network snapshot refreshed"
        );

        if let Some(store) = &self.store {
            if let Err(e) = store.save(CACHE_KEY, chrono::Utc::now(), &snapshot) {
                warn!(error = %e, "failed to persist network snapshot");
            }
        }
        Ok(snapshot)
    }

    async fn list_interfaces(&self) -> Result<(Vec<ListedInterface>, OrderSource), ProbeError> {
        let order_spec = CommandSpec::new("networksetup", ["-listnetworkserviceorder"], self.timeout);
        let ordered = self
            .runner
            .run(&order_spec)
            .await
            .map(|out| parse_service_order(&out));

        match ordered {
            Ok(listed) if !listed.is_empty() => return Ok((listed, OrderSource::ServiceOrder)),
            Ok(_) => warn!("service order listed no interfaces, falling back to listing order"),
            Err(e) => warn!(error = %e, "service order unavailable, falling back to listing order"),
        }

        let listing_spec = CommandSpec::new("ifconfig", ["-l"], self.timeout);
        let output = self.runner.run(&listing_spec).await?;
        Ok((parse_interface_list(&output), OrderSource::ListingOrder))
    }

    /// Addresses for one device; a failed lookup yields empty lists.
    async fn resolve(&self, device: &str) -> InterfaceAddresses {
        let spec = CommandSpec::new("ifconfig", [device], self.timeout);
        match self.runner.run(&spec).await {
            Ok(output) => parse_ifconfig(&output),
            Err(e) => {
                debug!(device, error = %e, "no address data for interface");
                InterfaceAddresses::default()
            }
        }
    }
}

/// Parse `networksetup -listnetworkserviceorder`.
///
/// ```text
/// (1) Wi-Fi
/// (Hardware Port: Wi-Fi, Device: en0)
///
/// (*) iPhone USB
/// (Hardware Port: iPhone USB, Device: en5)
/// ```
///
/// Disabled services (`(*)`) rank after all enabled ones, in listing order.
/// Services without a device (VPN configurations) are skipped, and a device
/// listed twice keeps its first rank.
pub fn parse_service_order(output: &str) -> Vec<ListedInterface> {
    let mut entries: Vec<(Option<u32>, String, String)> = Vec::new();
    let mut pending: Option<(Option<u32>, String)> = None;

    for line in output.lines().map(str::trim) {
        if let Some(rest) = line.strip_prefix("(Hardware Port:") {
            let Some((order, service)) = pending.take() else {
                continue;
            };
            let device = rest
                .trim_end_matches(')')
                .split_once("Device:")
                .map(|(_, device)| device.trim().to_string())
                .unwrap_or_default();
            if device.is_empty() {
                debug!(%service, "skipping service without a device");
                continue;
            }
            entries.push((order, service, device));
        } else if let Some(rest) = line.strip_prefix('(') {
            let Some((marker, service)) = rest.split_once(')') else {
                continue;
            };
            let order = marker.trim().parse::<u32>().ok();
            if order.is_none() && marker.trim() != "*" {
                continue;
            }
            pending = Some((order, service.trim().to_string()));
        }
    }

    let mut next_disabled = entries.iter().filter_map(|(order, ..)| *order).max().unwrap_or(0);
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter_map(|(order, service, device)| {
            let rank = order.unwrap_or_else(|| {
                next_disabled += 1;
                next_disabled
            });
            seen.insert(device.clone()).then_some(ListedInterface {
                device,
                service: Some(service),
                rank,
            })
        })
        .collect()
}

/// Parse `ifconfig -l`: space-separated device names in kernel order.
pub fn parse_interface_list(output: &str) -> Vec<ListedInterface> {
    let mut seen = HashSet::new();
    output
        .split_whitespace()
        .filter(|device| seen.insert(*device))
        .zip(1..)
        .map(|(device, rank)| ListedInterface {
            device: device.to_string(),
            service: None,
            rank,
        })
        .collect()
}

/// Parse `ifconfig <device>`.
pub fn parse_ifconfig(output: &str) -> InterfaceAddresses {
    let mut addrs = InterfaceAddresses::default();
    for line in output.lines() {
        let mut words = line.split_whitespace();
        match (words.next(), words.next()) {
            (Some("inet"), Some(addr)) => addrs.ipv4.push(addr.to_string()),
            (Some("inet6"), Some(addr)) => {
                let addr = addr.split_once('%').map_or(addr, |(addr, _scope)| addr);
                addrs.ipv6.push(addr.to_string());
            }
            (Some("ether"), Some(mac)) => addrs.mac = Some(mac.to_string()),
            (Some("status:"), Some(status)) => addrs.link_active = Some(status == "active"),
            _ => {}
        }
    }
    addrs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::fake::FakeRunner;
    use pretty_assertions::assert_eq;

    const SERVICE_ORDER: &str = "\
An asterisk (*) denotes that a network service is disabled.
(1) Wi-Fi
(Hardware Port: Wi-Fi, Device: en0)

(2) Thunderbolt Bridge
(Hardware Port: Thunderbolt Bridge, Device: bridge0)

(*) iPhone USB
(Hardware Port: iPhone USB, Device: en5)

(3) Tailscale
(Hardware Port: io.tailscale.ipn.macsys, Device: )
";

    const EN0: &str = "\
en0: flags=8863<UP,BROADCAST,SMART,RUNNING,SIMPLEX,MULTICAST> mtu 1500
\toptions=6460<TSO4,TSO6,CHANNEL_IO,PARTIAL_CSUM,ZEROINVERT_CSUM>
\tether a4:83:e7:12:34:56
\tinet6 fe80::1c8b:4d2f:3e1a:9b7c%en0 prefixlen 64 secured scopeid 0xe
\tinet 192.168.1.23 netmask 0xffffff00 broadcast 192.168.1.255
\tinet6 2601:db8::1234 prefixlen 64 autoconf secured
\tmedia: autoselect
\tstatus: active
";

    const BRIDGE0: &str = "\
bridge0: flags=8863<UP,BROADCAST,SMART,RUNNING,SIMPLEX,MULTICAST> mtu 1500
\tether 36:8a:1b:00:00:01
\tmedia: <unknown type>
\tstatus: inactive
";

    fn probe(runner: Arc<FakeRunner>) -> NetworkProbe {
        NetworkProbe::new(runner, &Config::default(), None)
    }

    #[test]
    fn service_order_ranks_enabled_then_disabled() {
        let listed = parse_service_order(SERVICE_ORDER);
        let ranks: Vec<_> = listed
            .iter()
            .map(|l| (l.device.as_str(), l.service.as_deref(), l.rank))
            .collect();
        assert_eq!(
            ranks,
            [
                ("en0", Some("Wi-Fi"), 1),
                ("bridge0", Some("Thunderbolt Bridge"), 2),
                ("en5", Some("iPhone USB"), 4),
            ]
        );
    }

    #[test]
    fn duplicate_device_keeps_first_rank() {
        let output = "(1) Wi-Fi\n(Hardware Port: Wi-Fi, Device: en0)\n(2) Wi-Fi 2\n(Hardware Port: Wi-Fi, Device: en0)\n";
        let listed = parse_service_order(output);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].rank, 1);
    }

    #[test]
    fn interface_list_keeps_kernel_order() {
        let listed = parse_interface_list("lo0 gif0 en0 en1 utun0\n");
        let names: Vec<_> = listed.iter().map(|l| (l.device.as_str(), l.rank)).collect();
        assert_eq!(names, [("lo0", 1), ("gif0", 2), ("en0", 3), ("en1", 4), ("utun0", 5)]);
    }

    #[test]
    fn ifconfig_addresses_and_status() {
        let addrs = parse_ifconfig(EN0);
        assert_eq!(
            addrs,
            InterfaceAddresses {
                ipv4: vec!["192.168.1.23".into()],
                ipv6: vec!["fe80::1c8b:4d2f:3e1a:9b7c".into(), "2601:db8::1234".into()],
                mac: Some("a4:83:e7:12:34:56".into()),
                link_active: Some(true),
            }
        );
        assert!(addrs.is_active());
        assert!(!parse_ifconfig(BRIDGE0).is_active());
    }

    #[test]
    fn without_status_line_active_means_has_ipv4() {
        let lo = "lo0: flags=8049<UP,LOOPBACK,RUNNING,MULTICAST> mtu 16384\n\tinet 127.0.0.1 netmask 0xff000000\n";
        assert!(parse_ifconfig(lo).is_active());
        assert!(!parse_ifconfig("gif0: flags=8010<POINTOPOINT,MULTICAST> mtu 1280\n").is_active());
    }

    #[tokio::test]
    async fn snapshot_includes_interfaces_without_addresses() {
        let runner = Arc::new(FakeRunner::default());
        runner.respond("networksetup -listnetworkserviceorder", SERVICE_ORDER);
        runner.respond("ifconfig en0", EN0);
        runner.respond("ifconfig bridge0", BRIDGE0);
        // en5 has no ifconfig answer at all.

        let snap = probe(runner).snapshot().await.unwrap();
        let view: Vec<_> = snap
            .value
            .interfaces
            .iter()
            .map(|i| (i.name.as_str(), i.is_active, i.ipv4.len(), i.service_order_rank))
            .collect();
        assert_eq!(view, [("en0", true, 1, 1), ("bridge0", false, 0, 2), ("en5", false, 0, 3)]);
        assert_eq!(snap.value.order_source, OrderSource::ServiceOrder);
    }

    #[tokio::test]
    async fn falls_back_to_listing_order() {
        let runner = Arc::new(FakeRunner::default());
        runner.fail("networksetup -listnetworkserviceorder");
        runner.respond("ifconfig -l", "lo0 en0 bridge0");
        runner.respond("ifconfig en0", EN0);

        let snap = probe(runner).snapshot().await.unwrap();
        let names: Vec<_> = snap.value.interfaces.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["lo0", "en0", "bridge0"]);
        assert_eq!(snap.value.order_source, OrderSource::ListingOrder);
    }

    #[tokio::test]
    async fn no_listing_at_all_is_error() {
        let runner = Arc::new(FakeRunner::default());
        let err = probe(runner).snapshot().await.unwrap_err();
        assert!(matches!(err, ProbeError::CommandUnavailable { .. }));
    }

    #[tokio::test]
    async fn cached_for_ttl() {
        let runner = Arc::new(FakeRunner::default());
        runner.respond("networksetup -listnetworkserviceorder", SERVICE_ORDER);
        runner.respond("ifconfig en0", EN0);
        let probe = probe(Arc::clone(&runner));

        probe.snapshot().await.unwrap();
        let calls = runner.calls();
        probe.snapshot().await.unwrap();
        assert_eq!(runner.calls(), calls);
    }
}

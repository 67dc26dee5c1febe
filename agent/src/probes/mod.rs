//! Measurement collaborators and latency-slot orchestration

mod icmp;
mod speedtest;

pub use icmp::IcmpPinger;
pub use speedtest::SpeedtestCli;

use crate::storage::LocalStore;
use regex::Regex;
use schema::{AgentError, PingSummary, Result, Throughput, DEFAULT_GATEWAY_KEYWORD, PING_SLOTS};
use std::sync::LazyLock;
use tracing::{debug, info};

/// Hostname or address of the "token.token" shape
static TARGET_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+(\.[A-Za-z0-9_-]+)+$").unwrap());

/// Runs a speed test against the configured (or best) server
pub trait ThroughputMeter {
    fn measure_throughput(&mut self, server_name: &str) -> Result<Throughput>;
}

/// Sends `count` echo requests to `host` and summarizes the replies
pub trait Pinger {
    fn ping(&mut self, host: &str, count: u32) -> Result<PingSummary>;
}

/// What a configured latency slot points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PingTarget {
    Unconfigured,
    /// Resolved to the adapter's default gateway at probe time
    DefaultGateway,
    Host(String),
}

impl PingTarget {
    pub fn parse(slot: usize, raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(PingTarget::Unconfigured);
        }
        if raw == DEFAULT_GATEWAY_KEYWORD {
            return Ok(PingTarget::DefaultGateway);
        }
        if !TARGET_SHAPE.is_match(raw) {
            return Err(AgentError::Validation {
                slot,
                target: raw.to_string(),
            });
        }
        Ok(PingTarget::Host(raw.to_string()))
    }
}

/// One latency slot: its 1-based position and target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingSlot {
    pub slot: usize,
    pub target: PingTarget,
}

impl PingSlot {
    /// Host to probe, or None if the slot is skipped
    fn host(&self, gateway: Option<&str>, store: &LocalStore) -> Option<String> {
        match &self.target {
            PingTarget::Unconfigured => None,
            PingTarget::Host(host) => Some(host.clone()),
            PingTarget::DefaultGateway => match gateway {
                Some(gw) => Some(gw.to_string()),
                None => {
                    store.log_error(format!(
                        "Ping slot {}: default gateway requested but none is known",
                        self.slot
                    ));
                    None
                }
            },
        }
    }
}

/// Validate the configured targets, logging and skipping malformed ones
pub fn ping_slots(targets: &[&str], store: &LocalStore) -> Vec<PingSlot> {
    targets
        .iter()
        .enumerate()
        .filter_map(|(i, raw)| match PingTarget::parse(i + 1, raw) {
            Ok(target) => Some(PingSlot { slot: i + 1, target }),
            Err(e) => {
                store.log_error(e.to_string());
                None
            }
        })
        .collect()
}

/// Probe every configured slot in sequence.
///
/// A single-packet probe is sent first and discarded so the neighbour cache
/// is warm before the measured probe. A failing slot stays `None`.
pub fn probe_slots<P: Pinger>(
    pinger: &mut P,
    slots: &[PingSlot],
    gateway: Option<&str>,
    count: u32,
    store: &LocalStore,
) -> [Option<PingSummary>; PING_SLOTS] {
    let mut results: [Option<PingSummary>; PING_SLOTS] = Default::default();
    
    for slot in slots {
        let Some(index) = slot.slot.checked_sub(1).filter(|i| *i < PING_SLOTS) else {
            continue;
        };
        let Some(host) = slot.host(gateway, store) else {
            continue;
        };
        
        if let Err(e) = pinger.ping(&host, 1) {
            debug!("Warm-up ping to {} failed: {}", host, e);
        }
        
        match pinger.ping(&host, count) {
            Ok(summary) => {
                info!(
                    "Ping slot {} {} -> {}/{} received",
                    slot.slot, host, summary.packets_rx, summary.packets_tx
                );
                results[index] = Some(summary);
            }
            Err(e) => store.log_error(format!("Ping slot {} to {} failed: {}", slot.slot, host, e)),
        }
    }
    
    results
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;

    /// Records every (host, count) probe; hosts listed in `unreachable` fail
    #[derive(Debug, Default)]
    pub struct FakePinger {
        pub calls: Vec<(String, u32)>,
        pub unreachable: Vec<String>,
    }

    impl Pinger for FakePinger {
        fn ping(&mut self, host: &str, count: u32) -> Result<PingSummary> {
            self.calls.push((host.to_string(), count));
            if self.unreachable.iter().any(|h| h == host) {
                return Err(AgentError::probe("ping", "sendto: network unreachable"));
            }
            Ok(PingSummary {
                host: host.to_string(),
                packets_tx: count,
                packets_rx: count,
                loss_percent: 0.0,
                rtt: Some(schema::RttStats {
                    min: 1.0,
                    avg: 2.0,
                    max: 3.0,
                    mdev: 0.5,
                }),
            })
        }
    }

    pub struct FakeMeter {
        pub result: Option<Throughput>,
        pub servers: Vec<String>,
    }

    impl FakeMeter {
        pub fn fast() -> Self {
            Self {
                result: Some(Throughput {
                    ping_time_ms: 18,
                    download_mbps: 52.31,
                    upload_mbps: 11.7,
                    server_name: "speedtest.example.net:8080".to_string(),
                }),
                servers: Vec::new(),
            }
        }
    }

    impl ThroughputMeter for FakeMeter {
        fn measure_throughput(&mut self, server_name: &str) -> Result<Throughput> {
            self.servers.push(server_name.to_string());
            self.result
                .clone()
                .ok_or_else(|| AgentError::probe("speedtest", "no servers available"))
        }
    }
}

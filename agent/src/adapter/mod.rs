//! Wireless adapter gate
//!
//! Acquires link-layer facts once per run and decides whether the run may
//! proceed. Only [`AdapterPhase::Ready`] lets measurement and delivery start;
//! every unrecoverable classification is logged, followed by an interface
//! bounce and a final exit entry.

mod system;

pub use system::SystemAdapter;

use crate::config::AdapterConfig;
use crate::storage::LocalStore;
use schema::{AbortReason, AgentError, LinkState, Result};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Probe platforms, each with its own way of resetting the wireless interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// WLAN Pi: toggle the radio through NetworkManager
    WlanPi,
    /// Raspberry Pi: take the interface down and up again
    Rpi,
}

impl Platform {
    /// Commands run, in order, to bounce `wlan_if`
    pub fn bounce_commands(self, wlan_if: &str) -> Vec<Vec<String>> {
        let cmd = |parts: &[&str]| parts.iter().map(|p| p.to_string()).collect::<Vec<_>>();
        match self {
            Platform::WlanPi => vec![
                cmd(&["nmcli", "radio", "wifi", "off"]),
                cmd(&["nmcli", "radio", "wifi", "on"]),
            ],
            Platform::Rpi => vec![
                cmd(&["sudo", "ifdown", wlan_if]),
                cmd(&["sudo", "ifup", wlan_if]),
            ],
        }
    }
}

/// Link-state collaborators consumed by the gate
pub trait LinkProbe {
    /// Fails only when the probe cannot be executed at all
    fn probe_link_state(&mut self) -> Result<LinkState>;
    
    fn probe_ip_address(&mut self) -> Option<String>;
    
    /// Default gateway address
    fn probe_route_info(&mut self) -> Option<String>;
    
    fn resolve_dns(&mut self, hostname: &str) -> bool;
    
    /// Best effort; failures are the implementation's to report
    fn bounce_interface(&mut self, platform: Platform);
}

/// Transient adapter facts, rebuilt every run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdapterState {
    pub link: LinkState,
    pub ip_address: Option<String>,
    pub default_gateway: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterPhase {
    Init,
    Probing,
    /// Link is up but the DNS gate has failed `attempt` times so far
    Degraded { attempt: u32 },
    Ready,
    Unrecoverable(AbortReason),
}

/// Drop anything that is not a usable IPv4 address.
///
/// Link-local addresses (169.254.0.0/16) mean DHCP failed and are treated
/// exactly like no address at all.
pub fn usable_ip(address: Option<String>) -> Option<String> {
    let address = address?;
    let parsed: Ipv4Addr = address.trim().parse().ok()?;
    if parsed.is_link_local() || parsed.is_unspecified() {
        return None;
    }
    Some(parsed.to_string())
}

pub struct AdapterStateMachine<'a, P> {
    probe: &'a mut P,
    config: &'a AdapterConfig,
    platform: Platform,
    phase: AdapterPhase,
    state: AdapterState,
}

impl<'a, P: LinkProbe> AdapterStateMachine<'a, P> {
    pub fn new(probe: &'a mut P, config: &'a AdapterConfig, platform: Platform) -> Self {
        Self {
            probe,
            config,
            platform,
            phase: AdapterPhase::Init,
            state: AdapterState::default(),
        }
    }
    
    fn transition(&mut self, next: AdapterPhase) {
        debug!("Adapter {:?} -> {:?}", self.phase, next);
        self.phase = next;
    }
    
    fn abort(&mut self, reason: AbortReason) -> std::result::Result<(), AbortReason> {
        self.transition(AdapterPhase::Unrecoverable(reason));
        Err(reason)
    }
    
    /// Probe and classify the adapter without side effects beyond probing.
    /// `Ok` means the machine reached `Ready`.
    pub fn probe(&mut self) -> std::result::Result<(), AbortReason> {
        self.transition(AdapterPhase::Probing);
        
        let link = match self.probe.probe_link_state() {
            Ok(link) => link,
            Err(e) => {
                debug!("Link-state probe failed: {}", e);
                return self.abort(AbortReason::ProbeUnavailable);
            }
        };
        
        let associated = link.bssid.is_some();
        self.state.link = link;
        if !associated {
            return self.abort(AbortReason::NotAssociated);
        }
        
        self.state.ip_address = usable_ip(self.probe.probe_ip_address());
        if self.state.ip_address.is_none() {
            return self.abort(AbortReason::NoValidIp);
        }
        
        self.state.default_gateway = self.probe.probe_route_info();
        if self.state.default_gateway.is_none() {
            debug!("No default gateway reported");
        }
        
        if !self.dns_gate() {
            return self.abort(AbortReason::DnsFailing);
        }
        self.transition(AdapterPhase::Ready);
        Ok(())
    }
    
    /// Final gate before any remote call, retried from the degraded state
    fn dns_gate(&mut self) -> bool {
        let attempts = self.config.dns_attempts.max(1);
        let host = self.config.dns_check_host.clone();
        
        for attempt in 1..=attempts {
            if self.probe.resolve_dns(&host) {
                return true;
            }
            
            warn!("DNS health check for {} failed (attempt {}/{})", host, attempt, attempts);
            self.transition(AdapterPhase::Degraded { attempt });
            if attempt < attempts {
                thread::sleep(Duration::from_millis(self.config.dns_retry_delay_ms));
            }
        }
        
        false
    }
    
    /// Run the gate. On an unrecoverable classification the reason is logged,
    /// the interface is bounced and an exit entry is logged, in that order.
    pub fn acquire(mut self, store: &LocalStore) -> std::result::Result<AdapterState, AbortReason> {
        if let Err(reason) = self.probe() {
            store.log_error(format!("Problem with wireless connection: {}", AgentError::LinkDown(reason)));
            store.log_error("Attempting to recover by bouncing wireless interface...");
            self.probe.bounce_interface(self.platform);
            store.log_error("Exiting: no measurement attempted this run");
            return Err(reason);
        }
        
        info!(
            "Adapter ready (bssid {}, ip {})",
            self.state.link.bssid.as_deref().unwrap_or(schema::NA),
            self.state.ip_address.as_deref().unwrap_or(schema::NA)
        );
        Ok(self.state)
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;

    /// Scripted link probe that records bounces
    #[derive(Debug, Clone)]
    pub struct FakeLink {
        pub link: Option<LinkState>,
        pub ip: Option<String>,
        pub gateway: Option<String>,
        /// Results of successive DNS checks; missing entries fail
        pub dns: Vec<bool>,
        pub dns_calls: usize,
        pub bounces: Vec<Platform>,
    }

    impl FakeLink {
        pub fn healthy() -> Self {
            Self {
                link: Some(LinkState {
                    ssid: Some("corp".to_string()),
                    bssid: Some("aa:bb:cc:dd:ee:ff".to_string()),
                    freq: Some("5.18".to_string()),
                    bit_rate: Some("144.4".to_string()),
                    signal_level: Some("-52".to_string()),
                }),
                ip: Some("10.0.0.12".to_string()),
                gateway: Some("10.0.0.1".to_string()),
                dns: vec![true],
                dns_calls: 0,
                bounces: Vec::new(),
            }
        }
    }

    impl LinkProbe for FakeLink {
        fn probe_link_state(&mut self) -> Result<LinkState> {
            self.link
                .clone()
                .ok_or_else(|| AgentError::probe("iwconfig", "command not found"))
        }

        fn probe_ip_address(&mut self) -> Option<String> {
            self.ip.clone()
        }

        fn probe_route_info(&mut self) -> Option<String> {
            self.gateway.clone()
        }

        fn resolve_dns(&mut self, _hostname: &str) -> bool {
            let ok = self.dns.get(self.dns_calls).copied().unwrap_or(false);
            self.dns_calls += 1;
            ok
        }

        fn bounce_interface(&mut self, platform: Platform) {
            self.bounces.push(platform);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeLink;
    use super::*;
    use crate::storage::tests::temp_store;

    fn config() -> AdapterConfig {
        AdapterConfig {
            dns_check_host: "www.google.com".to_string(),
            dns_attempts: 3,
            dns_retry_delay_ms: 0,
        }
    }

    #[test]
    fn test_usable_ip_rejects_link_local() {
        assert_eq!(usable_ip(Some("10.0.0.12".to_string())), Some("10.0.0.12".to_string()));
        assert_eq!(usable_ip(Some("169.254.1.5".to_string())), None);
        assert_eq!(usable_ip(Some("NA".to_string())), None);
        assert_eq!(usable_ip(Some("0.0.0.0".to_string())), None);
        assert_eq!(usable_ip(None), None);
    }

    #[test]
    fn test_healthy_adapter_is_ready() {
        let (_dir, store) = temp_store();
        let config = config();
        let mut link = FakeLink::healthy();
        
        let state = AdapterStateMachine::new(&mut link, &config, Platform::Rpi)
            .acquire(&store)
            .unwrap();
        
        assert_eq!(state.ip_address.as_deref(), Some("10.0.0.12"));
        assert_eq!(state.default_gateway.as_deref(), Some("10.0.0.1"));
        assert!(link.bounces.is_empty());
        assert!(store.error_logs().unwrap().is_empty());
    }

    #[test]
    fn test_not_associated_logs_bounces_and_exits() {
        let (_dir, store) = temp_store();
        let config = config();
        let mut link = FakeLink::healthy();
        link.link.as_mut().unwrap().bssid = None;
        
        let result = AdapterStateMachine::new(&mut link, &config, Platform::WlanPi).acquire(&store);
        
        assert_eq!(result, Err(AbortReason::NotAssociated));
        assert_eq!(link.bounces, vec![Platform::WlanPi]);
        assert_eq!(link.dns_calls, 0);
        let logs = store.error_logs().unwrap();
        assert_eq!(logs.len(), 3);
        assert!(logs[0].message.contains("not associated"));
        assert!(logs[1].message.contains("bouncing"));
        assert!(logs[2].message.starts_with("Exiting"));
    }

    #[test]
    fn test_link_local_ip_is_same_as_no_ip() {
        let config = config();
        for ip in [None, Some("169.254.1.5".to_string())] {
            let mut link = FakeLink::healthy();
            link.ip = ip;
            let mut machine = AdapterStateMachine::new(&mut link, &config, Platform::Rpi);
            assert_eq!(machine.probe(), Err(AbortReason::NoValidIp));
        }
    }

    #[test]
    fn test_probe_failure_is_unrecoverable() {
        let config = config();
        let mut link = FakeLink::healthy();
        link.link = None;
        let mut machine = AdapterStateMachine::new(&mut link, &config, Platform::Rpi);
        assert_eq!(machine.probe(), Err(AbortReason::ProbeUnavailable));
    }

    #[test]
    fn test_dns_retry_recovers_from_degraded() {
        let config = config();
        let mut link = FakeLink::healthy();
        link.dns = vec![false, true];
        let mut machine = AdapterStateMachine::new(&mut link, &config, Platform::Rpi);
        assert_eq!(machine.probe(), Ok(()));
        drop(machine);
        assert_eq!(link.dns_calls, 2);
    }

    #[test]
    fn test_dns_exhaustion_is_unrecoverable() {
        let (_dir, store) = temp_store();
        let config = config();
        let mut link = FakeLink::healthy();
        link.dns = vec![];
        
        let result = AdapterStateMachine::new(&mut link, &config, Platform::Rpi).acquire(&store);
        
        assert_eq!(result, Err(AbortReason::DnsFailing));
        assert_eq!(link.dns_calls, 3);
        assert_eq!(link.bounces, vec![Platform::Rpi]);
    }

    #[test]
    fn test_probe_result_is_terminal() {
        let config = config();
        let mut link = FakeLink::healthy();
        link.dns = vec![false, false, false];
        let mut machine = AdapterStateMachine::new(&mut link, &config, Platform::Rpi);
        
        assert_eq!(machine.probe(), Err(AbortReason::DnsFailing));
        assert_eq!(machine.phase, AdapterPhase::Unrecoverable(AbortReason::DnsFailing));
        
        let mut link = FakeLink::healthy();
        let mut machine = AdapterStateMachine::new(&mut link, &config, Platform::Rpi);
        assert_eq!(machine.probe(), Ok(()));
        assert_eq!(machine.phase, AdapterPhase::Ready);
    }

    #[test]
    fn test_missing_gateway_is_not_fatal() {
        let config = config();
        let mut link = FakeLink::healthy();
        link.gateway = None;
        let mut machine = AdapterStateMachine::new(&mut link, &config, Platform::Rpi);
        assert_eq!(machine.probe(), Ok(()));
    }

    #[test]
    fn test_bounce_commands_per_platform() {
        assert_eq!(Platform::WlanPi.bounce_commands("wlan0")[0], ["nmcli", "radio", "wifi", "off"]);
        assert_eq!(Platform::Rpi.bounce_commands("wlan1")[1], ["sudo", "ifup", "wlan1"]);
    }
}

//! Link probing through the platform's network tools
//!
//! These wrap CLI output (`iwconfig`, `ip`), so the parsers are deliberately
//! forgiving: a field that cannot be found is reported as unavailable rather
//! than as an error.

use super::{LinkProbe, Platform};
use regex::Regex;
use schema::{AgentError, LinkState, Result};
use std::net::{IpAddr, ToSocketAddrs};
use std::process::Command;
use std::str::FromStr;
use std::sync::LazyLock;
use tracing::{debug, warn};

static ESSID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"ESSID:"(.*?)""#).unwrap());
static ACCESS_POINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Access Point[=:] ((?:[0-9A-Fa-f]{2}:){5}[0-9A-Fa-f]{2})").unwrap());
static FREQUENCY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Frequency[:=](\d+\.\d+) ").unwrap());
static BIT_RATE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Bit Rate[=:]([\d.]+) ").unwrap());
static SIGNAL_LEVEL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Signal level[=:](\S+)").unwrap());
static INET: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"inet (\d+\.\d+\.\d+\.\d+)").unwrap());

pub struct SystemAdapter {
    wlan_if: String,
}

impl SystemAdapter {
    pub fn new(wlan_if: impl Into<String>) -> Self {
        Self {
            wlan_if: wlan_if.into(),
        }
    }
}

/// Run a command and return stdout and stderr together
fn run_command(program: &'static str, args: &[&str]) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| AgentError::probe(program, format!("failed to execute: {}", e)))?;
    
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    
    if !output.status.success() {
        return Err(AgentError::probe(program, format!("{}: {}", output.status, text.trim())));
    }
    
    Ok(text)
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|s| !s.is_empty())
}

/// Extract link facts from `iwconfig <if>` output
pub fn parse_iwconfig(output: &str) -> LinkState {
    LinkState {
        ssid: capture(&ESSID, output),
        bssid: capture(&ACCESS_POINT, output),
        freq: capture(&FREQUENCY, output),
        bit_rate: capture(&BIT_RATE, output),
        signal_level: capture(&SIGNAL_LEVEL, output),
    }
}

/// First IPv4 address in `ip -4 addr` (or `ifconfig`) output
pub fn parse_inet(output: &str) -> Option<String> {
    capture(&INET, output)
}

/// Parse output like: "default via 192.168.1.1 dev eth0 proto dhcp metric 100"
pub fn parse_default_gateway(output: &str) -> Option<IpAddr> {
    for line in output.lines() {
        if line.starts_with("default") {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if let Some(via_idx) = parts.iter().position(|&p| p == "via") {
                if let Some(&gateway_str) = parts.get(via_idx + 1) {
                    if let Ok(gateway) = IpAddr::from_str(gateway_str) {
                        return Some(gateway);
                    }
                }
            }
        }
    }
    None
}

impl LinkProbe for SystemAdapter {
    fn probe_link_state(&mut self) -> Result<LinkState> {
        let output = run_command("iwconfig", &[self.wlan_if.as_str()])?;
        debug!("iwconfig output: {}", output);
        Ok(parse_iwconfig(&output))
    }
    
    fn probe_ip_address(&mut self) -> Option<String> {
        match run_command("ip", &["-4", "addr", "show", "dev", self.wlan_if.as_str()]) {
            Ok(output) => parse_inet(&output),
            Err(e) => {
                debug!("IP probe failed: {}", e);
                None
            }
        }
    }
    
    fn probe_route_info(&mut self) -> Option<String> {
        match run_command("ip", &["route", "show", "default"]) {
            Ok(output) => {
                let gateway = parse_default_gateway(&output);
                debug!("Detected default gateway: {:?}", gateway);
                gateway.map(|g| g.to_string())
            }
            Err(e) => {
                debug!("Route probe failed: {}", e);
                None
            }
        }
    }
    
    fn resolve_dns(&mut self, hostname: &str) -> bool {
        match format!("{}:0", hostname).to_socket_addrs() {
            Ok(mut addrs) => addrs.next().is_some(),
            Err(e) => {
                debug!("DNS lookup of {} failed: {}", hostname, e);
                false
            }
        }
    }
    
    fn bounce_interface(&mut self, platform: Platform) {
        debug!("Bouncing {} (platform {:?})", self.wlan_if, platform);
        
        for command in platform.bounce_commands(&self.wlan_if) {
            let Some((program, args)) = command.split_first() else {
                continue;
            };
            match Command::new(program).args(args).status() {
                Ok(status) if status.success() => {}
                Ok(status) => warn!("{:?} exited with {}", command, status),
                Err(e) => warn!("Failed to run {:?}: {}", command, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ASSOCIATED: &str = r#"wlan0     IEEE 802.11  ESSID:"corp-wifi"  
          Mode:Managed  Frequency:5.18 GHz  Access Point: 3C:A8:2A:11:22:33   
          Bit Rate=144.4 Mb/s   Tx-Power=31 dBm   
          Retry short limit:7   RTS thr:off   Fragment thr:off
          Power Management:on
          Link Quality=58/70  Signal level=-52 dBm  
"#;

    const NOT_ASSOCIATED: &str = r#"wlan0     IEEE 802.11  ESSID:off/any  
          Mode:Managed  Access Point: Not-Associated   Tx-Power=31 dBm   
"#;

    #[test]
    fn test_parse_associated_iwconfig() {
        let link = parse_iwconfig(ASSOCIATED);
        assert_eq!(link.ssid.as_deref(), Some("corp-wifi"));
        assert_eq!(link.bssid.as_deref(), Some("3C:A8:2A:11:22:33"));
        assert_eq!(link.freq.as_deref(), Some("5.18"));
        assert_eq!(link.bit_rate.as_deref(), Some("144.4"));
        assert_eq!(link.signal_level.as_deref(), Some("-52"));
    }

    #[test]
    fn test_parse_not_associated_iwconfig() {
        let link = parse_iwconfig(NOT_ASSOCIATED);
        assert_eq!(link.bssid, None);
        assert_eq!(link.ssid, None);
        assert_eq!(link.freq, None);
    }

    #[test]
    fn test_parse_inet() {
        let output = "3: wlan0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500\n    inet 10.255.250.157/24 brd 10.255.250.255 scope global dynamic wlan0\n";
        assert_eq!(parse_inet(output).as_deref(), Some("10.255.250.157"));
        assert_eq!(parse_inet("3: wlan0: <NO-CARRIER> mtu 1500\n"), None);
    }

    #[test]
    fn test_parse_default_gateway() {
        let output = "default via 192.168.1.1 dev wlan0 proto dhcp metric 600\n";
        assert_eq!(parse_default_gateway(output), Some("192.168.1.1".parse().unwrap()));
        assert_eq!(parse_default_gateway("10.0.0.0/24 dev wlan0 scope link\n"), None);
    }
}

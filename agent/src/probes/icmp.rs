//! ICMP echo probes over surge-ping

use super::Pinger;
use schema::{AgentError, PingSummary, Result, RttStats};
use std::net::{IpAddr, ToSocketAddrs};
use std::time::Duration;
use surge_ping::{Client, Config as PingConfig, PingIdentifier, PingSequence, ICMP};
use tokio::runtime::Runtime;
use tracing::debug;

const PAYLOAD_SIZE: usize = 56;
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);
const INTERVAL: Duration = Duration::from_secs(1);

/// Raw-socket pinger driving its own single-threaded runtime
pub struct IcmpPinger {
    runtime: Runtime,
}

impl IcmpPinger {
    pub fn new() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| AgentError::probe("ping", format!("runtime: {}", e)))?;
        Ok(Self { runtime })
    }
    
    async fn echo_series(target: IpAddr, count: u32) -> Result<Vec<f64>> {
        let config = match target {
            IpAddr::V4(_) => PingConfig::default(),
            IpAddr::V6(_) => PingConfig::builder().kind(ICMP::V6).build(),
        };
        let client = Client::new(&config)
            .map_err(|e| AgentError::probe("ping", format!("ICMP socket (CAP_NET_RAW required): {}", e)))?;
        
        let payload = [0u8; PAYLOAD_SIZE];
        let mut pinger = client.pinger(target, PingIdentifier(rand::random())).await;
        let mut rtts = Vec::with_capacity(count as usize);
        
        for seq in 0..count {
            if seq > 0 {
                tokio::time::sleep(INTERVAL).await;
            }
            match tokio::time::timeout(REPLY_TIMEOUT, pinger.ping(PingSequence(seq as u16), &payload)).await {
                Ok(Ok((_packet, duration))) => rtts.push(duration.as_secs_f64() * 1000.0),
                Ok(Err(e)) => debug!("ICMP {} seq {} -> error: {}", target, seq, e),
                Err(_) => debug!("ICMP {} seq {} -> timeout", target, seq),
            }
        }
        
        Ok(rtts)
    }
}

impl Pinger for IcmpPinger {
    fn ping(&mut self, host: &str, count: u32) -> Result<PingSummary> {
        let target = match host.parse::<IpAddr>() {
            Ok(ip) => ip,
            Err(_) => resolve_hostname(host)?,
        };
        let rtts = self.runtime.block_on(Self::echo_series(target, count))?;
        Ok(summarize(host, count, &rtts))
    }
}

fn resolve_hostname(hostname: &str) -> Result<IpAddr> {
    let addr = format!("{}:0", hostname)
        .to_socket_addrs()
        .map_err(|e| AgentError::probe("ping", format!("cannot resolve {}: {}", hostname, e)))?
        .next()
        .ok_or_else(|| AgentError::probe("ping", format!("no addresses found for {}", hostname)))?;
    
    Ok(addr.ip())
}

/// Loss and min/avg/max/mdev over the replies that came back
pub fn summarize(host: &str, sent: u32, rtts: &[f64]) -> PingSummary {
    let received = rtts.len() as u32;
    let loss_percent = if sent == 0 {
        0.0
    } else {
        (sent.saturating_sub(received)) as f64 * 100.0 / sent as f64
    };
    
    let rtt = if rtts.is_empty() {
        None
    } else {
        let n = rtts.len() as f64;
        let mean = rtts.iter().sum::<f64>() / n;
        let mean_sq = rtts.iter().map(|r| r * r).sum::<f64>() / n;
        Some(RttStats {
            min: rtts.iter().copied().fold(f64::INFINITY, f64::min),
            avg: mean,
            max: rtts.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            mdev: (mean_sq - mean * mean).max(0.0).sqrt(),
        })
    };
    
    PingSummary {
        host: host.to_string(),
        packets_tx: sent,
        packets_rx: received,
        loss_percent,
        rtt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarize_all_replies() {
        let summary = summarize("192.0.2.1", 4, &[10.0, 20.0, 30.0, 40.0]);
        
        assert_eq!(summary.packets_rx, 4);
        assert_eq!(summary.loss_percent, 0.0);
        let rtt = summary.rtt.unwrap();
        assert_eq!(rtt.min, 10.0);
        assert_eq!(rtt.max, 40.0);
        assert!((rtt.avg - 25.0).abs() < 1e-9);
        assert!((rtt.mdev - 125.0f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_summarize_partial_loss() {
        let summary = summarize("gw", 10, &[1.5; 7]);
        
        assert_eq!(summary.packets_rx, 7);
        assert!((summary.loss_percent - 30.0).abs() < 1e-9);
        assert_eq!(summary.rtt.unwrap().mdev, 0.0);
    }

    #[test]
    fn test_summarize_total_loss_has_no_rtt() {
        let summary = summarize("192.0.2.1", 10, &[]);
        
        assert_eq!(summary.loss_percent, 100.0);
        assert!(summary.rtt.is_none());
    }
}

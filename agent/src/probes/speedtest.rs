//! Throughput measurement through the `speedtest-cli` JSON report

use super::ThroughputMeter;
use schema::{AgentError, Result, Throughput};
use serde::Deserialize;
use std::process::Command;
use tracing::{debug, info};

/// bits/s per reported Mbps
const MBPS_DIVISOR: f64 = 1_024_000.0;

#[derive(Debug, Deserialize)]
struct Report {
    download: f64,
    upload: f64,
    ping: f64,
    server: ReportServer,
}

#[derive(Debug, Deserialize)]
struct ReportServer {
    host: String,
}

pub struct SpeedtestCli {
    command: String,
}

impl SpeedtestCli {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl ThroughputMeter for SpeedtestCli {
    fn measure_throughput(&mut self, server_name: &str) -> Result<Throughput> {
        let mut cmd = Command::new(&self.command);
        cmd.arg("--json");
        if !server_name.trim().is_empty() {
            cmd.args(["--server", server_name.trim()]);
        }
        debug!("Running {:?}", cmd);
        
        let output = cmd
            .output()
            .map_err(|e| AgentError::probe("speedtest", format!("failed to execute {}: {}", self.command, e)))?;
        
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AgentError::probe("speedtest", format!("{}: {}", output.status, stderr.trim())));
        }
        
        let throughput = parse_report(&String::from_utf8_lossy(&output.stdout))?;
        info!(
            "Speedtest via {}: {:.2} down / {:.2} up Mbps, {} ms",
            throughput.server_name, throughput.download_mbps, throughput.upload_mbps, throughput.ping_time_ms
        );
        Ok(throughput)
    }
}

pub fn parse_report(json: &str) -> Result<Throughput> {
    let report: Report = serde_json::from_str(json.trim())
        .map_err(|e| AgentError::probe("speedtest", format!("unexpected report: {}", e)))?;
    
    Ok(Throughput {
        ping_time_ms: report.ping.round().max(0.0) as u32,
        download_mbps: report.download / MBPS_DIVISOR,
        upload_mbps: report.upload / MBPS_DIVISOR,
        server_name: report.server.host,
    })
}

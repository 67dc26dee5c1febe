//! Measurement sample and its positional row form
//!
//! Inside the agent every optional reading is an `Option`. The "NA" sentinel
//! only appears once a sample is flattened into a [`SampleRow`], which is the
//! shape shared by the remote destination and the local cache.

use crate::constants::{PING_SLOTS, ROW_WIDTH};
use crate::NA;
use serde::{Deserialize, Serialize};

/// Link-layer facts reported by the wireless adapter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkState {
    pub ssid: Option<String>,
    /// Access point MAC; `None` means the adapter is not associated
    pub bssid: Option<String>,
    pub freq: Option<String>,
    pub bit_rate: Option<String>,
    pub signal_level: Option<String>,
}

/// Result of one speed test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Throughput {
    pub ping_time_ms: u32,
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub server_name: String,
}

/// Round-trip statistics in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RttStats {
    pub min: f64,
    pub avg: f64,
    pub max: f64,
    pub mdev: f64,
}

/// Summary of an N-packet ICMP probe against one host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingSummary {
    pub host: String,
    pub packets_tx: u32,
    pub packets_rx: u32,
    pub loss_percent: f64,
    /// None when no reply came back
    pub rtt: Option<RttStats>,
}

/// One measurement cycle's result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Unix timestamp in seconds
    pub timestamp: i64,

    /// Local time at minute precision, e.g. "2026-10-16 14:05"
    pub display_timestamp: String,

    /// Speed test result (None if the test failed)
    pub throughput: Option<Throughput>,

    pub link: LinkState,

    /// Adapter IPv4 address
    pub ip_address: Option<String>,

    /// Probe location label
    pub location: Option<String>,

    /// One entry per configured latency target, in slot order
    pub pings: [Option<PingSummary>; PING_SLOTS],
}

impl Sample {
    /// Flatten into the fixed positional row used by every store
    pub fn to_row(&self) -> SampleRow {
        let throughput = self.throughput.as_ref();

        let mut cells = vec![
            self.display_timestamp.clone(),
            cell(throughput.map(|t| t.ping_time_ms.to_string())),
            cell(throughput.map(|t| format!("{:.2}", t.download_mbps))),
            cell(throughput.map(|t| format!("{:.2}", t.upload_mbps))),
            cell(self.link.ssid.clone()),
            cell(self.link.bssid.clone()),
            cell(self.link.freq.clone()),
            cell(self.link.bit_rate.clone()),
            cell(self.link.signal_level.clone()),
            cell(self.ip_address.clone()),
            cell(throughput.map(|t| t.server_name.clone())),
            cell(self.location.clone()),
        ];

        for slot in &self.pings {
            match slot {
                Some(summary) => {
                    cells.push(cell(Some(summary.host.clone())));
                    cells.push(summary.packets_tx.to_string());
                    cells.push(format!("{:.1}", summary.loss_percent));
                    cells.push(cell(summary.rtt.map(|r| format!("{:.3}", r.avg))));
                }
                None => cells.extend(std::iter::repeat(NA.to_string()).take(4)),
            }
        }

        SampleRow::from_cells(cells)
    }
}

/// Normalize an optional reading into a cell: blank or missing becomes "NA"
fn cell(value: Option<String>) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v,
        _ => NA.to_string(),
    }
}

/// A fully populated, positionally ordered sample row
///
/// Every cell holds either a concrete value or exactly "NA"; the width is
/// always [`ROW_WIDTH`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRow {
    cells: Vec<String>,
}

impl SampleRow {
    /// Build a row from raw cells, padding short rows and blanking empty cells
    pub fn from_cells(cells: Vec<String>) -> Self {
        let mut cells: Vec<String> = cells
            .into_iter()
            .take(ROW_WIDTH)
            .map(|c| cell(Some(c)))
            .collect();
        cells.resize(ROW_WIDTH, NA.to_string());
        Self { cells }
    }

    pub fn cells(&self) -> &[String] {
        &self.cells
    }

    pub fn into_cells(self) -> Vec<String> {
        self.cells
    }

    /// The leading human-readable timestamp cell
    pub fn display_timestamp(&self) -> &str {
        &self.cells[0]
    }
}

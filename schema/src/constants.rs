//! Schema constants: column layout, retention windows and worksheet names

/// Number of latency targets a sample can carry
pub const PING_SLOTS: usize = 3;

/// Leading columns shared by every destination row, in positional order
pub const BASE_COLUMNS: [&str; 12] = [
    "timestamp",
    "ping_time (ms)",
    "download_rate (mbps)",
    "upload_rate (mbps)",
    "ssid",
    "bssid",
    "freq",
    "bit_rate",
    "signal_level",
    "ip_address",
    "speedtest_server",
    "location",
];

/// Per-slot ping columns; the slot number (1-based) is appended to each name
pub const PING_COLUMNS: [&str; 4] = ["ping_host", "pkts_tx", "percent_loss", "rtt_avg"];

/// Total width of a sample row
pub const ROW_WIDTH: usize = BASE_COLUMNS.len() + PING_SLOTS * PING_COLUMNS.len();

/// Maximum number of undelivered samples kept in the local cache
pub const CACHE_LIMIT: usize = 20;

/// Historical samples older than this are pruned
pub const HISTORY_RETENTION_DAYS: i64 = 7;

/// Error log entries older than this are pruned
pub const ERROR_RETENTION_DAYS: i64 = 2;

/// Row cap of the remote console mirror
pub const CONSOLE_ROW_CAP: usize = 50;

/// Optional destination holding remote configuration overrides
pub const CONFIG_WORKSHEET: &str = "Config";

/// Optional destination mirroring the error log
pub const CONSOLE_WORKSHEET: &str = "Console";

/// Daily destination name format, e.g. `16-Oct-2026`
pub const WORKSHEET_DATE_FORMAT: &str = "%d-%b-%Y";

/// Human-readable timestamp format (minute precision)
pub const DISPLAY_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Keyword resolving a ping target to the adapter's default gateway
pub const DEFAULT_GATEWAY_KEYWORD: &str = "def.gw";

/// Full header row written to a freshly created daily destination
pub fn header_row() -> Vec<String> {
    let mut header: Vec<String> = BASE_COLUMNS.iter().map(|c| c.to_string()).collect();
    for slot in 1..=PING_SLOTS {
        for column in PING_COLUMNS {
            header.push(format!("{}{}", column, slot));
        }
    }
    header
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_matches_row_width() {
        let header = header_row();
        assert_eq!(header.len(), ROW_WIDTH);
        assert_eq!(header[0], "timestamp");
        assert_eq!(header[10], "speedtest_server");
        assert_eq!(header[11], "location");
        assert_eq!(header[12], "ping_host1");
        assert_eq!(header[ROW_WIDTH - 1], "rtt_avg3");
    }
}

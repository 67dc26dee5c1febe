//! Export of the local sample history

use crate::storage::HistoryRecord;
use anyhow::Result;
use std::path::Path;

const EXPORT_HEADER: [&str; 11] = [
    "timestamp",
    "display_timestamp",
    "ping_time",
    "download_rate",
    "upload_rate",
    "ssid",
    "bssid",
    "freq",
    "bit_rate",
    "signal_level",
    "ip_address",
];

/// Export history records as CSV
pub fn export_csv(records: &[HistoryRecord], output_path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(output_path)?;
    
    writer.write_record(EXPORT_HEADER)?;
    
    for r in records {
        let timestamp = r.timestamp.to_string();
        writer.write_record([
            timestamp.as_str(),
            r.display_timestamp.as_str(),
            r.ping_time.as_str(),
            r.download_rate.as_str(),
            r.upload_rate.as_str(),
            r.ssid.as_str(),
            r.bssid.as_str(),
            r.freq.as_str(),
            r.bit_rate.as_str(),
            r.signal_level.as_str(),
            r.ip_address.as_str(),
        ])?;
    }
    
    writer.flush()?;
    
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.csv");
        let record = HistoryRecord {
            timestamp: 1_760_000_000,
            display_timestamp: "2025-10-09 08:53".to_string(),
            ping_time: "18".to_string(),
            download_rate: "52.31".to_string(),
            upload_rate: "11.70".to_string(),
            ssid: "lab, 2nd floor".to_string(),
            bssid: "aa:bb:cc:dd:ee:ff".to_string(),
            freq: "5.18".to_string(),
            bit_rate: "866.7".to_string(),
            signal_level: "-51".to_string(),
            ip_address: "192.168.1.50".to_string(),
        };
        
        export_csv(&[record], &path).unwrap();
        
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("timestamp,display_timestamp,ping_time"));
        assert!(lines[1].contains("\"lab, 2nd floor\""));
        assert!(lines[1].ends_with("192.168.1.50"));
    }
}

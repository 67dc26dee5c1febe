//! Configuration management

use crate::adapter::Platform;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub general: GeneralConfig,
    #[serde(default)]
    pub speedtest: SpeedtestConfig,
    #[serde(default)]
    pub sheet: SheetConfig,
    #[serde(default)]
    pub pings: PingsConfig,
    #[serde(default)]
    pub adapter: AdapterConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeneralConfig {
    pub db_file: PathBuf,
    /// Legacy CSV cache written by older agents; imported then removed
    #[serde(default)]
    pub cache_file: Option<PathBuf>,
    pub wlan_if: String,
    pub platform: Platform,
    #[serde(default)]
    pub location: String,
    #[serde(default = "default_lock_wait_secs")]
    pub lock_wait_secs: u64,
    #[serde(default = "default_lock_stale_secs")]
    pub lock_stale_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SpeedtestConfig {
    /// Server id handed to the speed test; empty picks the best server
    #[serde(default)]
    pub server_name: String,
    #[serde(default = "default_speedtest_command")]
    pub command: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SheetConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub spreadsheet_name: String,
    #[serde(default)]
    pub credentials_file: PathBuf,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_drive_base")]
    pub drive_base: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_console_rows")]
    pub console_rows: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PingsConfig {
    #[serde(default)]
    pub ping_1: String,
    #[serde(default)]
    pub ping_2: String,
    #[serde(default)]
    pub ping_3: String,
    #[serde(default = "default_ping_count")]
    pub count: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdapterConfig {
    #[serde(default = "default_dns_check_host")]
    pub dns_check_host: String,
    #[serde(default = "default_dns_attempts")]
    pub dns_attempts: u32,
    #[serde(default = "default_dns_retry_delay_ms")]
    pub dns_retry_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for SpeedtestConfig {
    fn default() -> Self {
        Self {
            server_name: String::new(),
            command: default_speedtest_command(),
        }
    }
}

impl Default for SheetConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            spreadsheet_name: String::new(),
            credentials_file: PathBuf::new(),
            api_base: default_api_base(),
            drive_base: default_drive_base(),
            timeout_secs: default_timeout_secs(),
            console_rows: default_console_rows(),
        }
    }
}

impl Default for PingsConfig {
    fn default() -> Self {
        Self {
            ping_1: String::new(),
            ping_2: String::new(),
            ping_3: String::new(),
            count: default_ping_count(),
        }
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            dns_check_host: default_dns_check_host(),
            dns_attempts: default_dns_attempts(),
            dns_retry_delay_ms: default_dns_retry_delay_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_lock_wait_secs() -> u64 {
    30
}

fn default_lock_stale_secs() -> u64 {
    600
}

fn default_speedtest_command() -> String {
    "speedtest-cli".to_string()
}

fn default_true() -> bool {
    true
}

fn default_api_base() -> String {
    "https://sheets.googleapis.com/v4".to_string()
}

fn default_drive_base() -> String {
    "https://www.googleapis.com/drive/v3".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_console_rows() -> usize {
    schema::CONSOLE_ROW_CAP
}

fn default_ping_count() -> u32 {
    10
}

fn default_dns_check_host() -> String {
    "www.google.com".to_string()
}

fn default_dns_attempts() -> u32 {
    3
}

fn default_dns_retry_delay_ms() -> u64 {
    2000
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Parameters the remote `Config` destination may override
const REMOTE_OVERRIDABLE: [&str; 5] = ["server_name", "location", "ping_1", "ping_2", "ping_3"];

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        
        Self::parse(&contents)
    }
    
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)
            .with_context(|| "Failed to parse config file")?;
        
        if config.general.wlan_if.trim().is_empty() {
            anyhow::bail!("general.wlan_if must not be empty");
        }
        
        Ok(config)
    }
    
    /// Advisory lock marker guarding the local database
    pub fn lock_file(&self) -> PathBuf {
        let mut name = self.general.db_file.clone().into_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }
    
    /// Configured ping targets in slot order
    pub fn ping_targets(&self) -> [&str; schema::PING_SLOTS] {
        [&self.pings.ping_1, &self.pings.ping_2, &self.pings.ping_3]
    }
    
    /// Apply rows read from the remote `Config` destination.
    ///
    /// Each row is `[section:parameter, value, ...]`. Only a fixed set of
    /// parameters is honoured; later rows win. Returns how many were applied.
    pub fn apply_remote_overrides(&mut self, rows: &[Vec<String>]) -> usize {
        let mut applied = 0;
        
        for row in rows {
            let (Some(key), Some(value)) = (row.first(), row.get(1)) else {
                debug!("Ignoring short config row: {:?}", row);
                continue;
            };
            
            let Some((_section, parameter)) = key.trim().split_once(':') else {
                debug!("Ignoring malformed config key: {:?}", key);
                continue;
            };
            
            let parameter = parameter.trim();
            if !REMOTE_OVERRIDABLE.contains(&parameter) {
                debug!("Ignoring non-overridable config parameter: {}", parameter);
                continue;
            }
            
            let value = value.trim().to_string();
            match parameter {
                "server_name" => self.speedtest.server_name = value,
                "location" => self.general.location = value,
                "ping_1" => self.pings.ping_1 = value,
                "ping_2" => self.pings.ping_2 = value,
                "ping_3" => self.pings.ping_3 = value,
                _ => continue,
            }
            applied += 1;
        }
        
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [general]
        db_file = "/var/lib/wlanperf/wlanperf.db"
        wlan_if = "wlan0"
        platform = "wlanpi"
        location = "office"

        [pings]
        ping_1 = "def.gw"
    "#;

    fn rows(raw: &[Vec<&str>]) -> Vec<Vec<String>> {
        raw.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_parse_minimal_config_with_defaults() {
        let config = Config::parse(MINIMAL).unwrap();
        assert_eq!(config.general.platform, Platform::WlanPi);
        assert_eq!(config.pings.count, 10);
        assert_eq!(config.ping_targets(), ["def.gw", "", ""]);
        assert_eq!(config.sheet.console_rows, 50);
        assert_eq!(config.adapter.dns_attempts, 3);
        assert_eq!(config.speedtest.command, "speedtest-cli");
        assert_eq!(config.lock_file(), PathBuf::from("/var/lib/wlanperf/wlanperf.db.lock"));
    }

    #[test]
    fn test_unknown_platform_rejected() {
        let raw = MINIMAL.replace("wlanpi", "toaster");
        assert!(Config::parse(&raw).is_err());
    }

    #[test]
    fn test_remote_overrides_later_rows_win() {
        let mut config = Config::parse(MINIMAL).unwrap();
        let applied = config.apply_remote_overrides(&rows(&[
            vec!["General:location", "lab-2"],
            vec!["Server:server_name", "1234"],
            vec!["Pings:ping_2", "8.8.8.8"],
            vec!["General:location", "lab-3"],
        ]));
        assert_eq!(applied, 4);
        assert_eq!(config.general.location, "lab-3");
        assert_eq!(config.speedtest.server_name, "1234");
        assert_eq!(config.pings.ping_2, "8.8.8.8");
    }

    #[test]
    fn test_remote_overrides_ignore_malformed_rows() {
        let mut config = Config::parse(MINIMAL).unwrap();
        let applied = config.apply_remote_overrides(&rows(&[
            vec!["location", "no-section"],
            vec!["General:wlan_if", "eth0"],
            vec!["General:location"],
            vec![],
        ]));
        assert_eq!(applied, 0);
        assert_eq!(config.general.location, "office");
        assert_eq!(config.general.wlan_if, "wlan0");
    }
}

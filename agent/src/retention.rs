//! Age-based cleanup of the local history and error log

use crate::storage::LocalStore;
use chrono::{DateTime, Duration, Local};
use schema::{ERROR_RETENTION_DAYS, HISTORY_RETENTION_DAYS};
use tracing::info;

pub struct RetentionManager;

impl RetentionManager {
    /// Delete history rows and error log entries at or beyond their window.
    /// Each deletion runs on its own; a failure is logged and the other still
    /// happens.
    pub fn run(store: &LocalStore, now: DateTime<Local>) {
        let history_cutoff = (now - Duration::days(HISTORY_RETENTION_DAYS)).timestamp();
        match store.delete_history_through(history_cutoff) {
            Ok(n) if n > 0 => info!("Removed {} history rows older than {} days", n, HISTORY_RETENTION_DAYS),
            Ok(_) => {}
            Err(e) => store.log_error(format!("History cleanup failed: {}", e)),
        }
        
        let error_cutoff = (now - Duration::days(ERROR_RETENTION_DAYS)).timestamp();
        match store.delete_errors_through(error_cutoff) {
            Ok(n) if n > 0 => info!("Removed {} error log entries older than {} days", n, ERROR_RETENTION_DAYS),
            Ok(_) => {}
            Err(e) => store.log_error(format!("Error log cleanup failed: {}", e)),
        }
    }
}

//! Remote sink: per-day destinations in an append-only spreadsheet
//!
//! [`SheetTransport`] is the raw remote API; [`RemoteSink`] layers the
//! worksheet index, destination resolution and acknowledgment validation on
//! top of it.

mod sheets;

pub use sheets::GoogleSheets;

use chrono::NaiveDate;
use schema::{AgentError, Result, CONFIG_WORKSHEET, CONSOLE_WORKSHEET, WORKSHEET_DATE_FORMAT};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Grid size of a freshly created daily destination
const NEW_WORKSHEET_ROWS: u32 = 600;
const NEW_WORKSHEET_COLS: u32 = 26;

/// Raw operations against the remote spreadsheet
pub trait SheetTransport {
    /// Titles of every worksheet in the spreadsheet
    fn worksheet_titles(&mut self) -> Result<Vec<String>>;
    
    fn add_worksheet(&mut self, title: &str, rows: u32, cols: u32) -> Result<()>;
    
    /// Append one row, returning the remote reply body unvalidated
    fn append_row(&mut self, title: &str, row: &[String]) -> Result<Value>;
    
    fn read_values(&mut self, title: &str) -> Result<Vec<Vec<String>>>;
    
    /// Delete one row by 1-based position
    fn delete_row(&mut self, title: &str, index: usize) -> Result<()>;
}

/// Result of an append, decided by the shape of the remote reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    Ack { range: String },
    Failure { reason: String },
}

impl AppendOutcome {
    /// A reply is an acknowledgment only if it carries `updates.updatedRange`
    /// as a non-empty string; anything else is a failure, even when the
    /// transport itself reported success.
    pub fn from_reply(reply: &Value) -> Self {
        match reply.pointer("/updates/updatedRange").and_then(Value::as_str) {
            Some(range) if !range.is_empty() => AppendOutcome::Ack {
                range: range.to_string(),
            },
            _ => AppendOutcome::Failure {
                reason: format!("malformed append acknowledgment: {}", reply),
            },
        }
    }
    
    pub fn is_ack(&self) -> bool {
        matches!(self, AppendOutcome::Ack { .. })
    }
}

/// Names of the destinations present in the spreadsheet, read once per run
#[derive(Debug, Clone, Default)]
pub struct WorksheetIndex {
    titles: Vec<String>,
}

impl WorksheetIndex {
    pub fn contains(&self, title: &str) -> bool {
        self.titles.iter().any(|t| t == title)
    }
    
    fn insert(&mut self, title: &str) {
        if !self.contains(title) {
            self.titles.push(title.to_string());
        }
    }
}

/// Handle to a resolved destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    title: String,
}

impl Destination {
    pub fn title(&self) -> &str {
        &self.title
    }
}

pub struct RemoteSink<T> {
    transport: T,
    index: WorksheetIndex,
}

impl<T: SheetTransport> RemoteSink<T> {
    /// Read the worksheet index and wrap the transport
    pub fn connect(mut transport: T) -> Result<Self> {
        let titles = transport.worksheet_titles()?;
        debug!("Remote spreadsheet has {} worksheets", titles.len());
        
        Ok(Self {
            transport,
            index: WorksheetIndex { titles },
        })
    }
    
    /// Daily destination name, e.g. `16-Oct-2026`
    pub fn destination_name(date: NaiveDate) -> String {
        date.format(WORKSHEET_DATE_FORMAT).to_string()
    }
    
    /// Return the destination for `date`, creating it with the header row on
    /// first use. Fails only if the worksheet itself cannot be created.
    pub fn resolve_destination(&mut self, date: NaiveDate) -> Result<Destination> {
        let title = Self::destination_name(date);
        
        if !self.index.contains(&title) {
            info!("Creating destination worksheet {}", title);
            self.transport
                .add_worksheet(&title, NEW_WORKSHEET_ROWS, NEW_WORKSHEET_COLS)?;
            self.index.insert(&title);
            
            let destination = Destination { title };
            let outcome = self.append(&destination, &schema::header_row());
            if let AppendOutcome::Failure { reason } = outcome {
                warn!("Header row append on {} failed: {}", destination.title, reason);
            }
            return Ok(destination);
        }
        
        Ok(Destination { title })
    }
    
    /// Special destination (`Config`, `Console`) if the index lists it
    pub fn special(&self, name: &str) -> Option<Destination> {
        if self.index.contains(name) {
            Some(Destination {
                title: name.to_string(),
            })
        } else {
            None
        }
    }
    
    pub fn config_destination(&self) -> Option<Destination> {
        self.special(CONFIG_WORKSHEET)
    }
    
    pub fn console_destination(&self) -> Option<Destination> {
        self.special(CONSOLE_WORKSHEET)
    }
    
    pub fn append(&mut self, destination: &Destination, row: &[String]) -> AppendOutcome {
        match self.transport.append_row(&destination.title, row) {
            Ok(reply) => AppendOutcome::from_reply(&reply),
            Err(e) => AppendOutcome::Failure {
                reason: e.to_string(),
            },
        }
    }
    
    pub fn read_all(&mut self, destination: &Destination) -> Result<Vec<Vec<String>>> {
        self.transport.read_values(&destination.title)
    }
    
    pub fn delete_row(&mut self, destination: &Destination, index: usize) -> Result<()> {
        self.transport.delete_row(&destination.title, index)
    }
    
    /// Append rows to the console destination, then delete its oldest rows
    /// until at most `cap` remain. Returns the number of rows trimmed.
    pub fn mirror_console(&mut self, rows: &[Vec<String>], cap: usize) -> Result<usize> {
        let Some(console) = self.console_destination() else {
            return Ok(0);
        };
        
        for row in rows {
            if let AppendOutcome::Failure { reason } = self.append(&console, row) {
                return Err(AgentError::transport("console append", reason));
            }
        }
        
        let total = self.read_all(&console)?.len();
        let excess = total.saturating_sub(cap);
        for _ in 0..excess {
            self.delete_row(&console, 1)?;
        }
        
        if excess > 0 {
            debug!("Trimmed {} rows from console worksheet", excess);
        }
        Ok(excess)
    }
}


#[cfg(test)]
mod tests {
    use super::fake::FakeSheets;
    use super::*;
    use serde_json::json;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    #[test]
    fn test_ack_requires_updated_range() {
        let ok = json!({ "updates": { "updatedRange": "'16-Oct-2026'!A2:X2" } });
        assert_eq!(
            AppendOutcome::from_reply(&ok),
            AppendOutcome::Ack { range: "'16-Oct-2026'!A2:X2".to_string() }
        );
        
        for reply in [json!(null), json!("OK"), json!({}), json!({ "updates": { "updatedRange": 7 } }), json!({ "updates": { "updatedRange": "" } })] {
            assert!(!AppendOutcome::from_reply(&reply).is_ack(), "{} accepted", reply);
        }
    }

    #[test]
    fn test_destination_name_format() {
        assert_eq!(RemoteSink::<FakeSheets>::destination_name(date()), "16-Oct-2026");
    }

    #[test]
    fn test_resolve_creates_with_header_once() {
        let fake = FakeSheets::default();
        let mut sink = RemoteSink::connect(fake.clone()).unwrap();
        
        let first = sink.resolve_destination(date()).unwrap();
        let second = sink.resolve_destination(date()).unwrap();
        assert_eq!(first, second);
        
        let rows = fake.rows("16-Oct-2026");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0], schema::header_row());
    }

    #[test]
    fn test_resolve_existing_does_not_write() {
        let fake = FakeSheets::with_sheets(&["16-Oct-2026"]);
        let mut sink = RemoteSink::connect(fake.clone()).unwrap();
        sink.resolve_destination(date()).unwrap();
        assert!(fake.rows("16-Oct-2026").is_empty());
    }

    #[test]
    fn test_resolve_fails_when_creation_fails() {
        let fake = FakeSheets::default();
        fake.state.borrow_mut().fail_add = true;
        let mut sink = RemoteSink::connect(fake).unwrap();
        assert!(matches!(sink.resolve_destination(date()), Err(AgentError::Transport { .. })));
    }

    #[test]
    fn test_connect_fails_without_index() {
        let fake = FakeSheets::default();
        fake.state.borrow_mut().fail_index = true;
        assert!(RemoteSink::connect(fake).is_err());
    }

    #[test]
    fn test_special_destinations_follow_index() {
        let sink = RemoteSink::connect(FakeSheets::with_sheets(&["Config"])).unwrap();
        assert!(sink.config_destination().is_some());
        assert!(sink.console_destination().is_none());
    }

    #[test]
    fn test_console_mirror_trims_oldest() {
        let fake = FakeSheets::with_sheets(&["Console"]);
        let mut sink = RemoteSink::connect(fake.clone()).unwrap();
        
        let rows: Vec<Vec<String>> = (0..5)
            .map(|i| vec![format!("2026-10-16 10:0{}", i), format!("msg {}", i)])
            .collect();
        let trimmed = sink.mirror_console(&rows, 3).unwrap();
        
        assert_eq!(trimmed, 2);
        let remaining = fake.rows("Console");
        assert_eq!(remaining.len(), 3);
        assert_eq!(remaining[0][1], "msg 2");
        assert_eq!(remaining[2][1], "msg 4");
    }

    #[test]
    fn test_console_mirror_skipped_without_console() {
        let fake = FakeSheets::default();
        let mut sink = RemoteSink::connect(fake.clone()).unwrap();
        let rows = vec![vec!["t".to_string(), "m".to_string()]];
        assert_eq!(sink.mirror_console(&rows, 50).unwrap(), 0);
        assert_eq!(fake.state.borrow().append_calls, 0);
    }
}

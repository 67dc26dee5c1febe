//! Remote delivery with local caching and ordered replay

use crate::sink::{AppendOutcome, Destination, RemoteSink, SheetTransport};
use crate::storage::LocalStore;
use chrono::NaiveDate;
use schema::SampleRow;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The sample reached the remote store after `replayed` cached entries
    Delivered { replayed: usize },
    /// The sample was cached locally
    Cached { reason: String },
}

/// Result of replaying the cache into today's destination
struct Drain {
    acknowledged: Vec<i64>,
    failure: Option<String>,
}

pub struct DeliveryPipeline;

impl DeliveryPipeline {
    /// Deliver one sample row.
    ///
    /// Cached entries are replayed first, oldest first, so the remote store
    /// stays chronological. The first failed append stops the replay and the
    /// new sample is cached behind the entries that are still pending.
    pub fn deliver<T: SheetTransport>(
        sink: Option<&mut RemoteSink<T>>,
        store: &LocalStore,
        date: NaiveDate,
        timestamp: i64,
        row: &SampleRow,
    ) -> DeliveryOutcome {
        let Some(sink) = sink else {
            return Self::cache(store, timestamp, row, "remote sink unavailable".to_string());
        };
        
        let destination = match sink.resolve_destination(date) {
            Ok(destination) => destination,
            Err(e) => {
                return Self::cache(store, timestamp, row, format!("cannot resolve destination: {}", e));
            }
        };
        
        let drain = Self::drain(sink, &destination, store);
        if !drain.acknowledged.is_empty() {
            match store.remove_cached(&drain.acknowledged) {
                Ok(n) => info!("Replayed {} cached results", n),
                Err(e) => store.log_error(format!("Failed to clear replayed cache entries: {}", e)),
            }
        }
        if let Some(reason) = drain.failure {
            return Self::cache(store, timestamp, row, format!("cache replay failed: {}", reason));
        }
        
        match sink.append(&destination, row.cells()) {
            AppendOutcome::Ack { range } => {
                debug!("Sample appended to {} at {}", destination.title(), range);
                DeliveryOutcome::Delivered {
                    replayed: drain.acknowledged.len(),
                }
            }
            AppendOutcome::Failure { reason } => {
                Self::cache(store, timestamp, row, format!("append failed: {}", reason))
            }
        }
    }
    
    fn drain<T: SheetTransport>(
        sink: &mut RemoteSink<T>,
        destination: &Destination,
        store: &LocalStore,
    ) -> Drain {
        let entries = match store.cached_entries() {
            Ok(entries) => entries,
            Err(e) => {
                store.log_error(format!("Cannot read cached results: {}", e));
                return Drain {
                    acknowledged: Vec::new(),
                    failure: None,
                };
            }
        };
        
        let mut acknowledged = Vec::with_capacity(entries.len());
        for entry in entries {
            if let AppendOutcome::Failure { reason } = sink.append(destination, entry.row.cells()) {
                return Drain {
                    acknowledged,
                    failure: Some(reason),
                };
            }
            acknowledged.push(entry.id);
        }
        
        Drain {
            acknowledged,
            failure: None,
        }
    }
    
    fn cache(store: &LocalStore, timestamp: i64, row: &SampleRow, reason: String) -> DeliveryOutcome {
        store.log_error(format!("Remote delivery failed, caching result locally: {}", reason));
        
        match store.cache_sample(timestamp, row) {
            Ok(evicted) if evicted > 0 => {
                store.log_error(format!("Result cache full, evicted {} oldest entries", evicted));
            }
            Ok(_) => {}
            Err(e) => store.log_error(format!("Failed to cache result locally: {}", e)),
        }
        
        DeliveryOutcome::Cached { reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::fake::FakeSheets;
    use crate::storage::tests::{tagged_row, temp_store};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    const TODAY: &str = "16-Oct-2026";

    fn data_rows(fake: &FakeSheets) -> Vec<String> {
        fake.rows(TODAY).into_iter().skip(1).map(|r| r[1].clone()).collect()
    }

    #[test]
    fn test_replays_cache_in_order_before_sample() {
        let (_dir, store) = temp_store();
        for tag in ["E1", "E2", "E3"] {
            store.cache_sample(1, &tagged_row(tag)).unwrap();
        }
        let fake = FakeSheets::default();
        let mut sink = RemoteSink::connect(fake.clone()).unwrap();
        
        let outcome = DeliveryPipeline::deliver(Some(&mut sink), &store, date(), 2, &tagged_row("NEW"));
        
        assert_eq!(outcome, DeliveryOutcome::Delivered { replayed: 3 });
        assert_eq!(data_rows(&fake), vec!["E1", "E2", "E3", "NEW"]);
        assert!(store.cached_entries().unwrap().is_empty());
    }

    #[test]
    fn test_partial_drain_keeps_remaining_entries() {
        let (_dir, store) = temp_store();
        for tag in ["E1", "E2", "E3"] {
            store.cache_sample(1, &tagged_row(tag)).unwrap();
        }
        let fake = FakeSheets::default();
        let mut sink = RemoteSink::connect(fake.clone()).unwrap();
        // header + E1 succeed, E2 fails
        fake.state.borrow_mut().appends_before_failure = Some(2);
        
        let outcome = DeliveryPipeline::deliver(Some(&mut sink), &store, date(), 2, &tagged_row("S1"));
        
        assert!(matches!(outcome, DeliveryOutcome::Cached { .. }));
        assert_eq!(data_rows(&fake), vec!["E1"]);
        let pending: Vec<String> = store
            .cached_entries()
            .unwrap()
            .into_iter()
            .map(|e| e.row.cells()[1].clone())
            .collect();
        assert_eq!(pending, vec!["E2", "E3", "S1"]);
        
        // Next run: everything pending goes out, E1 is not sent twice
        fake.state.borrow_mut().appends_before_failure = None;
        let mut sink = RemoteSink::connect(fake.clone()).unwrap();
        let outcome = DeliveryPipeline::deliver(Some(&mut sink), &store, date(), 3, &tagged_row("S2"));
        
        assert_eq!(outcome, DeliveryOutcome::Delivered { replayed: 3 });
        assert_eq!(data_rows(&fake), vec!["E1", "E2", "E3", "S1", "S2"]);
    }

    #[test]
    fn test_malformed_ack_caches_sample_and_logs() {
        let (_dir, store) = temp_store();
        let fake = FakeSheets::with_sheets(&[TODAY]);
        fake.state.borrow_mut().malformed_ack = true;
        let mut sink = RemoteSink::connect(fake.clone()).unwrap();
        
        let outcome = DeliveryPipeline::deliver(Some(&mut sink), &store, date(), 5, &tagged_row("S"));
        
        assert!(matches!(outcome, DeliveryOutcome::Cached { ref reason } if reason.contains("malformed")));
        let cached = store.cached_entries().unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].row, tagged_row("S"));
        assert_eq!(store.error_logs().unwrap().len(), 1);
    }

    #[test]
    fn test_resolution_failure_skips_append() {
        let (_dir, store) = temp_store();
        store.cache_sample(1, &tagged_row("E1")).unwrap();
        let fake = FakeSheets::default();
        fake.state.borrow_mut().fail_add = true;
        let mut sink = RemoteSink::connect(fake.clone()).unwrap();
        
        let outcome = DeliveryPipeline::deliver(Some(&mut sink), &store, date(), 2, &tagged_row("S"));
        
        assert!(matches!(outcome, DeliveryOutcome::Cached { .. }));
        assert_eq!(fake.state.borrow().append_calls, 0);
        assert_eq!(store.cached_entries().unwrap().len(), 2);
    }

    #[test]
    fn test_no_sink_caches() {
        let (_dir, store) = temp_store();
        
        let outcome = DeliveryPipeline::deliver::<FakeSheets>(None, &store, date(), 2, &tagged_row("S"));
        
        assert!(matches!(outcome, DeliveryOutcome::Cached { .. }));
        assert_eq!(store.cached_entries().unwrap().len(), 1);
    }
}

//! One measurement cycle: gate, measure, deliver, clean up

use crate::adapter::{AdapterStateMachine, LinkProbe};
use crate::config::{Config, SheetConfig};
use crate::delivery::{DeliveryOutcome, DeliveryPipeline};
use crate::probes::{self, Pinger, ThroughputMeter};
use crate::retention::RetentionManager;
use crate::sink::{RemoteSink, SheetTransport};
use crate::storage::LocalStore;
use chrono::{DateTime, Local};
use schema::{AbortReason, Sample, DISPLAY_TIMESTAMP_FORMAT};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(DeliveryOutcome),
    /// The adapter gate failed; nothing was measured
    Aborted(AbortReason),
}

/// The measurement collaborators for one run
pub struct Probes<L, M, P> {
    pub link: L,
    pub meter: M,
    pub pinger: P,
}

/// Run a single cycle.
///
/// `connect` opens the remote transport; it is only called once the adapter
/// gate has passed, so no remote call is made over a broken link.
pub fn run_once<L, M, P, T, C>(
    config: &mut Config,
    store: &LocalStore,
    probes: &mut Probes<L, M, P>,
    connect: C,
    now: DateTime<Local>,
) -> RunOutcome
where
    L: LinkProbe,
    M: ThroughputMeter,
    P: Pinger,
    T: SheetTransport,
    C: FnOnce(&SheetConfig) -> schema::Result<T>,
{
    if let Some(cache_file) = config.general.cache_file.clone().filter(|_| store.is_persistent()) {
        if let Err(e) = store.import_legacy_cache(&cache_file, now) {
            store.log_error(format!("Legacy cache import from {:?} failed: {}", cache_file, e));
        }
    }
    
    let adapter = match AdapterStateMachine::new(&mut probes.link, &config.adapter, config.general.platform)
        .acquire(store)
    {
        Ok(adapter) => adapter,
        Err(reason) => return RunOutcome::Aborted(reason),
    };
    
    let mut sink = if config.sheet.enabled {
        match connect(&config.sheet).and_then(RemoteSink::connect) {
            Ok(sink) => Some(sink),
            Err(e) => {
                store.log_error(format!("Cannot open remote spreadsheet: {}", e));
                None
            }
        }
    } else {
        debug!("Remote sheet disabled");
        None
    };
    
    if let Some(sink) = sink.as_mut() {
        apply_config_sheet(config, sink, store);
    }
    
    let throughput = match probes.meter.measure_throughput(&config.speedtest.server_name) {
        Ok(throughput) => Some(throughput),
        Err(e) => {
            store.log_error(format!("Speedtest failed: {}", e));
            None
        }
    };
    
    let slots = probes::ping_slots(&config.ping_targets(), store);
    let pings = probes::probe_slots(
        &mut probes.pinger,
        &slots,
        adapter.default_gateway.as_deref(),
        config.pings.count,
        store,
    );
    
    let sample = Sample {
        timestamp: now.timestamp(),
        display_timestamp: now.format(DISPLAY_TIMESTAMP_FORMAT).to_string(),
        throughput,
        link: adapter.link,
        ip_address: adapter.ip_address,
        location: Some(config.general.location.clone()),
        pings,
    };
    let row = sample.to_row();
    debug!("Sample row: {:?}", row.cells());
    
    let delivery = DeliveryPipeline::deliver(sink.as_mut(), store, now.date_naive(), sample.timestamp, &row);
    match &delivery {
        DeliveryOutcome::Delivered { replayed } => info!("Result delivered ({} cached results replayed)", replayed),
        DeliveryOutcome::Cached { reason } => warn!("Result cached locally: {}", reason),
    }
    
    if let Err(e) = store.record_history(&sample) {
        store.log_error(format!("Failed to record sample history: {}", e));
    }
    
    if let Some(sink) = sink.as_mut() {
        mirror_console(sink, store, config.sheet.console_rows);
    }
    
    RetentionManager::run(store, now);
    
    RunOutcome::Completed(delivery)
}

fn apply_config_sheet<T: SheetTransport>(config: &mut Config, sink: &mut RemoteSink<T>, store: &LocalStore) {
    let Some(destination) = sink.config_destination() else {
        return;
    };
    
    match sink.read_all(&destination) {
        Ok(rows) => {
            let applied = config.apply_remote_overrides(&rows);
            info!("Applied {} remote config overrides", applied);
        }
        Err(e) => store.log_error(format!("Cannot read remote config: {}", e)),
    }
}

fn mirror_console<T: SheetTransport>(sink: &mut RemoteSink<T>, store: &LocalStore, cap: usize) {
    let rows: Vec<Vec<String>> = store
        .take_logged()
        .into_iter()
        .map(|entry| vec![entry.display_timestamp, entry.message])
        .collect();
    if rows.is_empty() {
        return;
    }
    
    if let Err(e) = sink.mirror_console(&rows, cap) {
        store.log_error(format!("Console mirror failed: {}", e));
    }
}

//! The LedgerPoint runtime
//!
//! Couples local in-memory state to the shared event log. One select loop
//! multiplexes the commit intake (locally-originated events heading to the
//! log) and the log reader (every event coming back, ours and our peers',
//! in total order). Each delivered event mutates the projection under its
//! collection lock and is then fanned out to subscribers.
//!
//! Readiness: on startup the instance publishes a `ServiceStart` whose
//! `start_id` embeds the process id and launch time; everything observed
//! before that event returns from the log is historical replay, everything
//! after is live traffic.

use std::collections::HashMap;
use std::process;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

use types::entities::*;
use types::events::{Event, ServiceStart};
use types::Nid;

use crate::log::{EventLog, LogError, LogRecord};
use crate::subscriber::{dispatch, Subscriber};

/// Commit intake depth; a full buffer back-pressures command submitters.
const COMMIT_BUFFER: usize = 1000;

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// Exposed so subscribers stamp event payloads consistently with the
/// runtime; the projection itself never reads the clock.
pub fn current_time_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Log(#[from] LogError),

    #[error("failed to encode {label} payload: {source}")]
    Encode {
        label: &'static str,
        source: serde_json::Error,
    },

    #[error("ledger point already started")]
    AlreadyStarted,

    #[error("commit intake closed")]
    CommitIntakeClosed,
}

#[derive(Debug, Error)]
#[error("commit intake closed")]
pub struct CommitError;

/// Cloneable handle for submitting events to the commit intake.
///
/// `send` blocks while the bounded intake is full — back-pressure from the
/// log propagates to command submitters by design.
#[derive(Clone)]
pub struct Committer {
    tx: Sender<Event>,
}

impl Committer {
    pub fn send(&self, event: impl Into<Event>) -> Result<(), CommitError> {
        self.tx.send(event.into()).map_err(|_| CommitError)
    }
}

/// Per-service event-sourcing runtime. See the crate docs for the data
/// flow; getters return copies and iteration hands out references under
/// the collection's read lock.
pub struct LedgerPoint {
    pub(crate) participants: RwLock<HashMap<String, ParticipantEntity>>,
    pub(crate) accounts: RwLock<HashMap<String, AccountEntity>>,
    pub(crate) instruments: RwLock<HashMap<String, InstrumentEntity>>,
    pub(crate) parameter: RwLock<Option<ParameterEntity>>,
    pub(crate) session_time: RwLock<Option<SessionTimeEntity>>,
    pub(crate) holidays: RwLock<HashMap<Nid, HolidayEntity>>,
    pub(crate) orders: RwLock<HashMap<Nid, OrderEntity>>,
    pub(crate) contracts: RwLock<HashMap<Nid, ContractEntity>>,
    pub(crate) trades: RwLock<HashMap<Nid, TradeEntity>>,

    subscribers: RwLock<Vec<Arc<dyn Subscriber>>>,

    log: Arc<dyn EventLog>,
    commit_tx: Sender<Event>,
    commit_rx: Mutex<Option<Receiver<Event>>>,

    ready: AtomicBool,
    service_id: String,
    start_id: String,

    decode_failures: AtomicU64,
    unknown_labels: AtomicU64,
}

impl LedgerPoint {
    pub fn new(log: Arc<dyn EventLog>, service_id: impl Into<String>) -> Self {
        let (commit_tx, commit_rx) = bounded(COMMIT_BUFFER);
        let service_id = service_id.into();
        let start_id = format!("{}_{}", process::id(), current_time_millis());
        Self {
            participants: RwLock::new(HashMap::new()),
            accounts: RwLock::new(HashMap::new()),
            instruments: RwLock::new(HashMap::new()),
            parameter: RwLock::new(None),
            session_time: RwLock::new(None),
            holidays: RwLock::new(HashMap::new()),
            orders: RwLock::new(HashMap::new()),
            contracts: RwLock::new(HashMap::new()),
            trades: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(Vec::new()),
            log,
            commit_tx,
            commit_rx: Mutex::new(Some(commit_rx)),
            ready: AtomicBool::new(false),
            service_id,
            start_id,
            decode_failures: AtomicU64::new(0),
            unknown_labels: AtomicU64::new(0),
        }
    }

    /// Register a subscriber. Must happen before [`start`](Self::start);
    /// subscribers are notified in registration order.
    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) {
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(subscriber);
    }

    /// Handle for submitting events to the commit intake.
    pub fn committer(&self) -> Committer {
        Committer {
            tx: self.commit_tx.clone(),
        }
    }

    /// True once this instance's own `ServiceStart` has round-tripped
    /// through the log.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn start_id(&self) -> &str {
        &self.start_id
    }

    /// The readiness-marker event for this instance.
    pub fn service_start_event(&self) -> ServiceStart {
        ServiceStart {
            id: self.service_id.clone(),
            start_id: self.start_id.clone(),
            start_time: Utc::now(),
        }
    }

    /// Payload decode failures observed so far.
    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    /// Records skipped for carrying an unknown event-type label.
    pub fn unknown_labels(&self) -> u64 {
        self.unknown_labels.load(Ordering::Relaxed)
    }

    // ── Getters (copies) ────────────────────────────────────────────

    pub fn get_order(&self, nid: Nid) -> Option<OrderEntity> {
        self.orders
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&nid)
            .cloned()
    }

    pub fn get_trade(&self, nid: Nid) -> Option<TradeEntity> {
        self.trades
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&nid)
            .cloned()
    }

    pub fn get_contract(&self, nid: Nid) -> Option<ContractEntity> {
        self.contracts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&nid)
            .cloned()
    }

    pub fn get_account(&self, code: &str) -> Option<AccountEntity> {
        self.accounts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(code)
            .cloned()
    }

    pub fn get_participant(&self, code: &str) -> Option<ParticipantEntity> {
        self.participants
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(code)
            .cloned()
    }

    pub fn get_instrument(&self, code: &str) -> Option<InstrumentEntity> {
        self.instruments
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(code)
            .cloned()
    }

    pub fn get_holiday(&self, nid: Nid) -> Option<HolidayEntity> {
        self.holidays
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&nid)
            .cloned()
    }

    pub fn get_parameter(&self) -> Option<ParameterEntity> {
        self.parameter
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn get_session_time(&self) -> Option<SessionTimeEntity> {
        self.session_time
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    // ── Iteration (under the collection's read lock) ────────────────
    //
    // The callback must not re-enter this LedgerPoint. Returning false
    // halts iteration.

    pub fn for_each_order<F: FnMut(&OrderEntity) -> bool>(&self, mut f: F) {
        let orders = self.orders.read().unwrap_or_else(|e| e.into_inner());
        for order in orders.values() {
            if !f(order) {
                break;
            }
        }
    }

    pub fn for_each_trade<F: FnMut(&TradeEntity) -> bool>(&self, mut f: F) {
        let trades = self.trades.read().unwrap_or_else(|e| e.into_inner());
        for trade in trades.values() {
            if !f(trade) {
                break;
            }
        }
    }

    pub fn for_each_contract<F: FnMut(&ContractEntity) -> bool>(&self, mut f: F) {
        let contracts = self.contracts.read().unwrap_or_else(|e| e.into_inner());
        for contract in contracts.values() {
            if !f(contract) {
                break;
            }
        }
    }

    pub fn for_each_account<F: FnMut(&AccountEntity) -> bool>(&self, mut f: F) {
        let accounts = self.accounts.read().unwrap_or_else(|e| e.into_inner());
        for account in accounts.values() {
            if !f(account) {
                break;
            }
        }
    }

    pub fn for_each_participant<F: FnMut(&ParticipantEntity) -> bool>(&self, mut f: F) {
        let participants = self.participants.read().unwrap_or_else(|e| e.into_inner());
        for participant in participants.values() {
            if !f(participant) {
                break;
            }
        }
    }

    pub fn for_each_instrument<F: FnMut(&InstrumentEntity) -> bool>(&self, mut f: F) {
        let instruments = self.instruments.read().unwrap_or_else(|e| e.into_inner());
        for instrument in instruments.values() {
            if !f(instrument) {
                break;
            }
        }
    }

    pub fn for_each_holiday<F: FnMut(&HolidayEntity) -> bool>(&self, mut f: F) {
        let holidays = self.holidays.read().unwrap_or_else(|e| e.into_inner());
        for holiday in holidays.values() {
            if !f(holiday) {
                break;
            }
        }
    }

    // ── Publish / ingest ────────────────────────────────────────────

    /// Serialize an event and append it to the log synchronously.
    pub fn publish(&self, event: &Event) -> Result<u64, LedgerError> {
        let payload = event.encode().map_err(|source| LedgerError::Encode {
            label: event.label(),
            source,
        })?;
        let offset = self
            .log
            .append(event.label(), payload, current_time_millis())?;
        Ok(offset)
    }

    /// Apply one delivered log record to the projection and fan it out.
    ///
    /// Malformed payloads and unknown labels are dropped with a warning;
    /// the projection loop never fails on an individual record.
    pub fn ingest(&self, record: &LogRecord) {
        let event = match Event::decode(&record.label, &record.payload) {
            Ok(event) => event,
            Err(types::events::DecodeError::UnknownLabel(label)) => {
                self.unknown_labels.fetch_add(1, Ordering::Relaxed);
                warn!(offset = record.offset, %label, "skipping record with unknown event-type");
                return;
            }
            Err(err) => {
                self.decode_failures.fetch_add(1, Ordering::Relaxed);
                warn!(offset = record.offset, %err, "dropping malformed payload");
                return;
            }
        };

        let ts = DateTime::from_timestamp_millis(record.timestamp_ms).unwrap_or_default();
        self.apply(&event, ts);

        if let Event::ServiceStart(start) = &event {
            if start.start_id == self.start_id && !self.is_ready() {
                self.ready.store(true, Ordering::Release);
                info!(
                    service_id = %self.service_id,
                    start_id = %self.start_id,
                    "replay complete, ledger point is live"
                );
            }
        }

        let subscribers = self.subscribers.read().unwrap_or_else(|e| e.into_inner());
        for subscriber in subscribers.iter() {
            dispatch(subscriber.as_ref(), &event);
        }
    }

    /// Drain pending commit-intake events into the log.
    ///
    /// Used by deterministic test harnesses in place of the select loop;
    /// fails once [`start`](Self::start) has taken the intake receiver.
    pub fn pump_commits(&self) -> Result<usize, LedgerError> {
        let guard = self.commit_rx.lock().unwrap_or_else(|e| e.into_inner());
        let rx = guard.as_ref().ok_or(LedgerError::AlreadyStarted)?;
        let mut published = 0;
        while let Ok(event) = rx.try_recv() {
            self.publish(&event)?;
            published += 1;
        }
        Ok(published)
    }

    // ── Runtime ─────────────────────────────────────────────────────

    /// Launch the select loop on its own thread.
    ///
    /// The log subscription is opened before the `ServiceStart` publish so
    /// the readiness marker is always observed. Write and read failures
    /// terminate the loop with an error; the embedding service is expected
    /// to exit and replay from scratch.
    pub fn start(
        self: Arc<Self>,
        shutdown: Receiver<()>,
    ) -> Result<JoinHandle<Result<(), LedgerError>>, LedgerError> {
        let commit_rx = self
            .commit_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(LedgerError::AlreadyStarted)?;
        let log_rx = self.log.subscribe()?;

        info!(service_id = %self.service_id, start_id = %self.start_id, "starting ledger point");

        Ok(thread::spawn(move || {
            self.run(commit_rx, log_rx, shutdown)
        }))
    }

    fn run(
        &self,
        commit_rx: Receiver<Event>,
        log_rx: Receiver<LogRecord>,
        shutdown: Receiver<()>,
    ) -> Result<(), LedgerError> {
        self.publish(&Event::ServiceStart(self.service_start_event()))?;

        loop {
            select! {
                recv(commit_rx) -> event => match event {
                    Ok(event) => {
                        self.publish(&event)?;
                    }
                    Err(_) => return Err(LedgerError::CommitIntakeClosed),
                },
                recv(log_rx) -> record => match record {
                    Ok(record) => self.ingest(&record),
                    Err(_) => return Err(LedgerError::Log(LogError::Closed)),
                },
                recv(shutdown) -> _ => {
                    // Intake is bounded, so the flush is too.
                    let mut flushed = 0;
                    while let Ok(event) = commit_rx.try_recv() {
                        self.publish(&event)?;
                        flushed += 1;
                    }
                    info!(
                        service_id = %self.service_id,
                        flushed,
                        decode_failures = self.decode_failures(),
                        unknown_labels = self.unknown_labels(),
                        "ledger point stopped"
                    );
                    return Ok(());
                }
            }
        }
    }

    // ── State checksum ──────────────────────────────────────────────

    /// Checksum over the whole projection, iterated in sorted key order.
    ///
    /// Two LedgerPoints that replayed the same log prefix produce the same
    /// checksum.
    pub fn state_checksum(&self) -> String {
        let mut hasher = Sha256::new();

        fn hash_map<K, V>(hasher: &mut Sha256, section: &str, map: &HashMap<K, V>)
        where
            K: Ord + Eq + std::hash::Hash + std::fmt::Display,
            V: serde::Serialize,
        {
            hasher.update(section.as_bytes());
            let mut keys: Vec<&K> = map.keys().collect();
            keys.sort();
            for key in keys {
                hasher.update(key.to_string().as_bytes());
                hasher.update(b":");
                if let Some(value) = map.get(key) {
                    if let Ok(json) = serde_json::to_string(value) {
                        hasher.update(json.as_bytes());
                    }
                }
                hasher.update(b",");
            }
            hasher.update(b"|");
        }

        hash_map(
            &mut hasher,
            "participants",
            &self.participants.read().unwrap_or_else(|e| e.into_inner()),
        );
        hash_map(
            &mut hasher,
            "accounts",
            &self.accounts.read().unwrap_or_else(|e| e.into_inner()),
        );
        hash_map(
            &mut hasher,
            "instruments",
            &self.instruments.read().unwrap_or_else(|e| e.into_inner()),
        );
        hash_map(
            &mut hasher,
            "holidays",
            &self.holidays.read().unwrap_or_else(|e| e.into_inner()),
        );
        hash_map(
            &mut hasher,
            "orders",
            &self.orders.read().unwrap_or_else(|e| e.into_inner()),
        );
        hash_map(
            &mut hasher,
            "contracts",
            &self.contracts.read().unwrap_or_else(|e| e.into_inner()),
        );
        hash_map(
            &mut hasher,
            "trades",
            &self.trades.read().unwrap_or_else(|e| e.into_inner()),
        );

        for (section, json) in [
            (
                "parameter",
                serde_json::to_string(&self.get_parameter()).unwrap_or_default(),
            ),
            (
                "session_time",
                serde_json::to_string(&self.get_session_time()).unwrap_or_default(),
            ),
        ] {
            hasher.update(section.as_bytes());
            hasher.update(json.as_bytes());
            hasher.update(b"|");
        }

        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::MemoryLog;
    use std::time::Duration;
    use types::events::{OrderAck, Sod};

    fn memory_point() -> (Arc<MemoryLog>, Arc<LedgerPoint>) {
        let log = Arc::new(MemoryLog::new());
        let point = Arc::new(LedgerPoint::new(log.clone(), "test"));
        (log, point)
    }

    /// Publish every pending record into the projection.
    fn drain(point: &LedgerPoint, rx: &Receiver<LogRecord>) {
        while let Ok(record) = rx.try_recv() {
            point.ingest(&record);
        }
    }

    #[test]
    fn test_readiness_handshake() {
        let (log, point) = memory_point();
        let rx = log.subscribe().unwrap();

        assert!(!point.is_ready());
        point
            .publish(&Event::ServiceStart(point.service_start_event()))
            .unwrap();
        drain(&point, &rx);
        assert!(point.is_ready());
    }

    #[test]
    fn test_foreign_service_start_does_not_mark_ready() {
        let (log, point) = memory_point();
        let rx = log.subscribe().unwrap();

        let foreign = ServiceStart {
            id: "peer".into(),
            start_id: "999_123".into(),
            start_time: Utc::now(),
        };
        point.publish(&Event::ServiceStart(foreign)).unwrap();
        drain(&point, &rx);
        assert!(!point.is_ready());
    }

    #[test]
    fn test_unknown_label_skipped_with_count() {
        let (log, point) = memory_point();
        let rx = log.subscribe().unwrap();

        log.append("OrderBlock", b"{}".to_vec(), 1).unwrap();
        drain(&point, &rx);
        assert_eq!(point.unknown_labels(), 1);
        assert_eq!(point.decode_failures(), 0);
    }

    #[test]
    fn test_malformed_payload_dropped_with_count() {
        let (log, point) = memory_point();
        let rx = log.subscribe().unwrap();

        log.append("OrderAck", b"not-json".to_vec(), 1).unwrap();
        drain(&point, &rx);
        assert_eq!(point.decode_failures(), 1);
    }

    #[test]
    fn test_commit_intake_roundtrip() {
        let (log, point) = memory_point();
        let rx = log.subscribe().unwrap();

        let committer = point.committer();
        committer.send(OrderAck { order_nid: 42 }).unwrap();
        assert_eq!(point.pump_commits().unwrap(), 1);

        let record = rx.try_recv().unwrap();
        assert_eq!(record.label, "OrderAck");
        assert_eq!(record.offset, 0);
    }

    #[test]
    fn test_subscriber_notified_in_registration_order() {
        use std::sync::atomic::AtomicUsize;

        struct Tagger {
            tag: usize,
            seen: Arc<Mutex<Vec<usize>>>,
            calls: AtomicUsize,
        }
        impl Subscriber for Tagger {
            fn on_sod(&self, _event: &Sod) {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.seen
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(self.tag);
            }
        }

        let (log, point) = memory_point();
        let rx = log.subscribe().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in [1, 2, 3] {
            point.subscribe(Arc::new(Tagger {
                tag,
                seen: seen.clone(),
                calls: AtomicUsize::new(0),
            }));
        }

        point
            .publish(&Event::Sod(Sod {
                date: Utc::now().date_naive(),
            }))
            .unwrap();
        drain(&point, &rx);

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_run_loop_processes_and_stops() {
        let (_, point) = memory_point();
        let (shutdown_tx, shutdown_rx) = bounded(1);

        let handle = point.clone().start(shutdown_rx).unwrap();

        // The loop's own ServiceStart must round-trip.
        for _ in 0..100 {
            if point.is_ready() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(point.is_ready());

        point.committer().send(OrderAck { order_nid: 7 }).unwrap();
        shutdown_tx.send(()).unwrap();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_start_twice_fails() {
        let (_, point) = memory_point();
        let (shutdown_tx, shutdown_rx) = bounded(1);
        let handle = point.clone().start(shutdown_rx).unwrap();

        let (_tx2, rx2) = bounded(1);
        assert!(matches!(
            point.clone().start(rx2),
            Err(LedgerError::AlreadyStarted)
        ));

        shutdown_tx.send(()).unwrap();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_state_checksum_stable_for_identical_replay() {
        let (log, point_a) = memory_point();
        let rx_a = log.subscribe().unwrap();
        point_a
            .publish(&Event::Sod(Sod {
                date: Utc::now().date_naive(),
            }))
            .unwrap();
        drain(&point_a, &rx_a);

        let point_b = Arc::new(LedgerPoint::new(log.clone(), "replica"));
        let rx_b = log.subscribe().unwrap();
        drain(&point_b, &rx_b);

        assert_eq!(point_a.state_checksum(), point_b.state_checksum());
    }
}

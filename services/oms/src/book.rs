//! Per-instrument order book
//!
//! Two queues per instrument, one per side. Insertion only places an order
//! in its side queue; the same-participant / cross-participant bucketing
//! is relative to the incoming counter-order, so it is computed at match
//! time, not at insert time.
//!
//! Priority when drawing counterparties:
//! - incoming `BORR` draws from the lend queue, same-participant entries
//!   first, each group sorted by quantity descending (prefer larger
//!   lenders) with entry time as the tiebreak;
//! - incoming `LEND` draws from the borrow queue, same-participant first,
//!   each group in pure entry-time order (FIFO).

use chrono::{DateTime, Utc};

use types::entities::OrderEntity;
use types::state::Side;
use types::Nid;

/// Queue entry: enough of the order to prioritize it. Live quantities are
/// read from the projection at fill time, never from this snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedOrder {
    pub nid: Nid,
    pub participant_code: String,
    pub quantity: f64,
    pub entry_at: DateTime<Utc>,
}

impl QueuedOrder {
    fn from_order(order: &OrderEntity) -> Self {
        Self {
            nid: order.nid,
            participant_code: order.participant_code.clone(),
            quantity: order.quantity,
            entry_at: order.entry_at,
        }
    }
}

/// Order book for a single instrument.
#[derive(Debug)]
pub struct OrderBook {
    instrument_code: String,
    borrow: Vec<QueuedOrder>,
    lend: Vec<QueuedOrder>,
}

impl OrderBook {
    pub fn new(instrument_code: impl Into<String>) -> Self {
        Self {
            instrument_code: instrument_code.into(),
            borrow: Vec::new(),
            lend: Vec::new(),
        }
    }

    pub fn instrument_code(&self) -> &str {
        &self.instrument_code
    }

    /// Place an order in its side queue. Re-inserting a queued NID is a
    /// no-op so a partially filled order keeps its original entry slot.
    pub fn insert(&mut self, order: &OrderEntity) {
        let queue = self.side_queue_mut(order.side);
        if queue.iter().any(|q| q.nid == order.nid) {
            return;
        }
        queue.push(QueuedOrder::from_order(order));
    }

    /// Remove an order from its side queue; false if it was not queued.
    pub fn remove(&mut self, nid: Nid, side: Side) -> bool {
        let queue = self.side_queue_mut(side);
        let before = queue.len();
        queue.retain(|q| q.nid != nid);
        queue.len() != before
    }

    /// Counterparty candidates for `incoming`, bucketed and prioritized.
    ///
    /// Same-participant entries come first; within each bucket the sort is
    /// quantity-descending for an incoming borrow and FIFO for an incoming
    /// lend, with entry time breaking quantity ties.
    pub fn counterparties(&self, incoming: &OrderEntity) -> Vec<QueuedOrder> {
        let opposite = match incoming.side {
            Side::Borr => &self.lend,
            Side::Lend => &self.borrow,
        };

        let (mut same, mut cross): (Vec<QueuedOrder>, Vec<QueuedOrder>) = opposite
            .iter()
            .cloned()
            .partition(|q| q.participant_code == incoming.participant_code);

        let by_priority = |a: &QueuedOrder, b: &QueuedOrder| match incoming.side {
            // Matching against lenders: larger quantities first.
            Side::Borr => b
                .quantity
                .partial_cmp(&a.quantity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.entry_at.cmp(&b.entry_at)),
            // Matching against borrowers: pure FIFO.
            Side::Lend => a.entry_at.cmp(&b.entry_at),
        };
        same.sort_by(by_priority);
        cross.sort_by(by_priority);

        same.extend(cross);
        same
    }

    /// (borrow queue depth, lend queue depth)
    pub fn depth(&self) -> (usize, usize) {
        (self.borrow.len(), self.lend.len())
    }

    fn side_queue_mut(&mut self, side: Side) -> &mut Vec<QueuedOrder> {
        match side {
            Side::Borr => &mut self.borrow,
            Side::Lend => &mut self.lend,
        }
    }
}

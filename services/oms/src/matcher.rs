//! Matching engine
//!
//! Walks the prioritized counterparty list for an incoming order and
//! records matches until the incoming quantity is exhausted or the list
//! runs out. Candidate availability is read from the live projection at
//! fill time (`quantity − done_quantity`), so queue entries can never
//! over-fill, and orders whose fills were reversed by a clearing rejection
//! become matchable again without re-insertion.

use std::collections::HashMap;

use tracing::debug;

use types::entities::OrderEntity;
use types::state::Side;
use types::Nid;

use crate::book::OrderBook;

/// A single match between one borrow and one lend order.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub borrower: OrderEntity,
    pub lender: OrderEntity,
    pub quantity: f64,
}

/// Outcome of matching one incoming order.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matches: Vec<Match>,
    pub remaining: f64,
}

impl MatchResult {
    pub fn fully_matched(&self) -> bool {
        self.remaining <= 0.0
    }
}

/// Order books for every instrument seen so far.
#[derive(Debug, Default)]
pub struct Matcher {
    books: HashMap<String, OrderBook>,
}

impl Matcher {
    pub fn new() -> Self {
        Self {
            books: HashMap::new(),
        }
    }

    fn book_mut(&mut self, instrument_code: &str) -> &mut OrderBook {
        self.books
            .entry(instrument_code.to_string())
            .or_insert_with(|| OrderBook::new(instrument_code))
    }

    /// Queue an order on its side of the instrument's book.
    pub fn insert(&mut self, order: &OrderEntity) {
        self.book_mut(&order.instrument_code).insert(order);
    }

    /// Remove an order from the book; false if it was not queued.
    pub fn remove(&mut self, order: &OrderEntity) -> bool {
        match self.books.get_mut(&order.instrument_code) {
            Some(book) => book.remove(order.nid, order.side),
            None => false,
        }
    }

    /// Match `incoming` against the opposite side of its instrument book.
    ///
    /// `lookup` resolves a queued NID to its live projection entity; stale
    /// entries (terminal state or nothing left to fill) are skipped.
    pub fn match_order<F>(&mut self, incoming: &OrderEntity, lookup: F) -> MatchResult
    where
        F: Fn(Nid) -> Option<OrderEntity>,
    {
        let book = self.book_mut(&incoming.instrument_code);
        let candidates = book.counterparties(incoming);

        debug!(
            order_nid = incoming.nid,
            side = %incoming.side,
            instrument = %incoming.instrument_code,
            candidates = candidates.len(),
            "matching order"
        );

        let mut result = MatchResult {
            matches: Vec::new(),
            remaining: incoming.remaining(),
        };

        for candidate in candidates {
            if result.remaining <= 0.0 {
                break;
            }
            let Some(live) = lookup(candidate.nid) else {
                continue;
            };
            if !live.state.is_working() {
                continue;
            }
            let available = live.remaining();
            let quantity = result.remaining.min(available);
            if quantity <= 0.0 {
                continue;
            }

            let (borrower, lender) = match incoming.side {
                Side::Borr => (incoming.clone(), live),
                Side::Lend => (live, incoming.clone()),
            };
            debug!(
                taker = incoming.nid,
                maker = candidate.nid,
                quantity,
                "matched"
            );
            result.matches.push(Match {
                borrower,
                lender,
                quantity,
            });
            result.remaining -= quantity;
        }

        result
    }

    /// Instruments that currently have a book.
    pub fn instrument_codes(&self) -> Vec<String> {
        self.books.keys().cloned().collect()
    }

    /// (borrow, lend) queue depths for one instrument.
    pub fn depth(&self, instrument_code: &str) -> (usize, usize) {
        self.books
            .get(instrument_code)
            .map(|b| b.depth())
            .unwrap_or((0, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use types::state::OrderState;

    fn order(nid: Nid, side: Side, participant: &str, quantity: f64, entry_offset: i64) -> OrderEntity {
        let entry = Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap()
            + chrono::Duration::seconds(entry_offset);
        OrderEntity {
            nid,
            prev_nid: 0,
            reff_request_id: format!("REQ-{nid}"),
            account_nid: 10,
            account_code: format!("{participant}-ACC"),
            participant_nid: 1,
            participant_code: participant.to_string(),
            instrument_nid: 7,
            instrument_code: "INST-X".into(),
            side,
            quantity,
            done_quantity: 0.0,
            settlement_date: entry,
            reimbursement_date: entry + chrono::Duration::days(10),
            periode: 10,
            state: OrderState::Open,
            market_price: 1000.0,
            rate: 0.0,
            instruction: String::new(),
            aro: false,
            withdraw_reff_request_id: String::new(),
            message: String::new(),
            entry_at: entry,
            pending_at: None,
            open_at: Some(entry),
            reject_at: None,
            amend_at: None,
            withdraw_at: None,
        }
    }

    /// Lookup over a fixed set of live entities.
    fn lookup_in(entities: Vec<OrderEntity>) -> impl Fn(Nid) -> Option<OrderEntity> {
        move |nid| entities.iter().find(|o| o.nid == nid).cloned()
    }

    #[test]
    fn test_empty_book_no_matches() {
        let mut matcher = Matcher::new();
        let incoming = order(1, Side::Borr, "P1", 1000.0, 0);
        let result = matcher.match_order(&incoming, |_| None);
        assert!(result.matches.is_empty());
        assert_eq!(result.remaining, 1000.0);
        assert!(!result.fully_matched());
    }

    #[test]
    fn test_full_fill_single_candidate() {
        let mut matcher = Matcher::new();
        let lend = order(2, Side::Lend, "P2", 1000.0, 0);
        matcher.insert(&lend);

        let incoming = order(1, Side::Borr, "P1", 1000.0, 1);
        let result = matcher.match_order(&incoming, lookup_in(vec![lend.clone()]));

        assert_eq!(result.matches.len(), 1);
        assert!(result.fully_matched());
        assert_eq!(result.matches[0].quantity, 1000.0);
        assert_eq!(result.matches[0].borrower.nid, 1);
        assert_eq!(result.matches[0].lender.nid, 2);
    }

    #[test]
    fn test_partial_fill_leaves_remainder() {
        let mut matcher = Matcher::new();
        let lend = order(2, Side::Lend, "P2", 600.0, 0);
        matcher.insert(&lend);

        let incoming = order(1, Side::Borr, "P1", 1000.0, 1);
        let result = matcher.match_order(&incoming, lookup_in(vec![lend]));

        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].quantity, 600.0);
        assert_eq!(result.remaining, 400.0);
        assert!(!result.fully_matched());
    }

    #[test]
    fn test_walks_multiple_candidates() {
        let mut matcher = Matcher::new();
        let l1 = order(2, Side::Lend, "P2", 400.0, 0);
        let l2 = order(3, Side::Lend, "P2", 400.0, 1);
        let l3 = order(4, Side::Lend, "P2", 400.0, 2);
        for lend in [&l1, &l2, &l3] {
            matcher.insert(lend);
        }

        let incoming = order(1, Side::Borr, "P1", 1000.0, 3);
        let result = matcher.match_order(&incoming, lookup_in(vec![l1, l2, l3]));

        assert_eq!(result.matches.len(), 3);
        assert!(result.fully_matched());
        let quantities: Vec<f64> = result.matches.iter().map(|m| m.quantity).collect();
        assert_eq!(quantities, vec![400.0, 400.0, 200.0]);
    }

    #[test]
    fn test_skips_filled_and_terminal_candidates() {
        let mut matcher = Matcher::new();
        let mut filled = order(2, Side::Lend, "P2", 500.0, 0);
        filled.done_quantity = 500.0;
        filled.state = OrderState::Matched;
        let mut withdrawn = order(3, Side::Lend, "P2", 500.0, 1);
        withdrawn.state = OrderState::Withdrawn;
        let live = order(4, Side::Lend, "P2", 500.0, 2);

        for lend in [&filled, &withdrawn, &live] {
            matcher.insert(lend);
        }

        let incoming = order(1, Side::Borr, "P1", 500.0, 3);
        let result = matcher.match_order(&incoming, lookup_in(vec![filled, withdrawn, live]));

        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].lender.nid, 4);
    }

    #[test]
    fn test_fresh_quantity_prevents_overfill() {
        let mut matcher = Matcher::new();
        // Queued at 1000, but 600 already done in the projection.
        let mut lend = order(2, Side::Lend, "P2", 1000.0, 0);
        matcher.insert(&lend);
        lend.done_quantity = 600.0;
        lend.state = OrderState::PartiallyFilled;

        let incoming = order(1, Side::Borr, "P1", 1000.0, 1);
        let result = matcher.match_order(&incoming, lookup_in(vec![lend]));

        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].quantity, 400.0);
        assert_eq!(result.remaining, 600.0);
    }

    #[test]
    fn test_books_are_per_instrument() {
        let mut matcher = Matcher::new();
        let mut other = order(2, Side::Lend, "P2", 1000.0, 0);
        other.instrument_code = "INST-Y".into();
        matcher.insert(&other);

        let incoming = order(1, Side::Borr, "P1", 1000.0, 1);
        let result = matcher.match_order(&incoming, lookup_in(vec![other]));
        assert!(result.matches.is_empty());
        assert_eq!(matcher.depth("INST-Y"), (0, 1));
        assert_eq!(matcher.depth("INST-X"), (0, 0));
    }

    #[test]
    fn test_remove_from_book() {
        let mut matcher = Matcher::new();
        let lend = order(2, Side::Lend, "P2", 1000.0, 0);
        matcher.insert(&lend);
        assert!(matcher.remove(&lend));
        assert!(!matcher.remove(&lend));

        let incoming = order(1, Side::Borr, "P1", 1000.0, 1);
        let result = matcher.match_order(&incoming, lookup_in(vec![lend]));
        assert!(result.matches.is_empty());
    }
}

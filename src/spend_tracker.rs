//! Per-mandate daily and lifetime USDC spend accounting (spec `§4.3`).
//!
//! Updates must be compare-and-add, not read-then-add, or concurrent requests against the
//! same mandate could jointly exceed the daily cap (spec `§5`). Each mandate gets its own
//! `Mutex`-guarded counter entry in a `dashmap::DashMap`, so contention between unrelated
//! mandates never serializes.

use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Mutex;

#[derive(Debug, Default)]
struct MandateCounters {
    daily: chrono::NaiveDate,
    daily_spent: Decimal,
    lifetime_spent: Decimal,
}

pub struct SpendTracker {
    counters: DashMap<String, Mutex<MandateCounters>>,
}

impl SpendTracker {
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
        }
    }

    pub fn get_spent_today(&self, mandate_id: &str) -> Decimal {
        let today = chrono::Utc::now().date_naive();
        match self.counters.get(mandate_id) {
            Some(entry) => {
                let guard = entry.lock().expect("spend tracker lock poisoned");
                if guard.daily == today {
                    guard.daily_spent
                } else {
                    Decimal::ZERO
                }
            }
            None => Decimal::ZERO,
        }
    }

    pub fn get_lifetime_spent(&self, mandate_id: &str) -> Decimal {
        match self.counters.get(mandate_id) {
            Some(entry) => entry.lock().expect("spend tracker lock poisoned").lifetime_spent,
            None => Decimal::ZERO,
        }
    }

    /// Atomically checks `get_spent_today(mandate_id) + amount <= cap` and, if so, records
    /// `amount`. Returns `false` (no mutation) if the cap would be exceeded.
    pub fn try_record(&self, mandate_id: &str, amount: Decimal, daily_cap: Decimal) -> bool {
        let today = chrono::Utc::now().date_naive();
        let entry = self
            .counters
            .entry(mandate_id.to_string())
            .or_insert_with(|| Mutex::new(MandateCounters::default()));
        let mut guard = entry.lock().expect("spend tracker lock poisoned");
        if guard.daily != today {
            guard.daily = today;
            guard.daily_spent = Decimal::ZERO;
        }
        if guard.daily_spent + amount > daily_cap {
            return false;
        }
        guard.daily_spent += amount;
        guard.lifetime_spent += amount;
        true
    }
}

impl Default for SpendTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use std::sync::Arc;

    #[test]
    fn records_under_cap() {
        let tracker = SpendTracker::new();
        let cap = Decimal::from_str("10.00").unwrap();
        assert!(tracker.try_record("m1", Decimal::from_str("3.00").unwrap(), cap));
        assert_eq!(tracker.get_spent_today("m1"), Decimal::from_str("3.00").unwrap());
    }

    #[test]
    fn rejects_over_cap() {
        let tracker = SpendTracker::new();
        let cap = Decimal::from_str("5.00").unwrap();
        assert!(tracker.try_record("m1", Decimal::from_str("4.00").unwrap(), cap));
        assert!(!tracker.try_record("m1", Decimal::from_str("2.00").unwrap(), cap));
        assert_eq!(tracker.get_spent_today("m1"), Decimal::from_str("4.00").unwrap());
    }

    #[test]
    fn concurrent_writers_never_exceed_cap() {
        let tracker = Arc::new(SpendTracker::new());
        let cap = Decimal::from_str("10.00").unwrap();
        let handles: Vec<_> = (0..20)
            .map(|_| {
                let tracker = tracker.clone();
                std::thread::spawn(move || tracker.try_record("shared", Decimal::from_str("1.00").unwrap(), cap))
            })
            .collect();
        let admitted = handles.into_iter().map(|h| h.join().unwrap()).filter(|&ok| ok).count();
        assert_eq!(admitted, 10);
        assert_eq!(tracker.get_spent_today("shared"), cap);
    }
}

use std::cmp::Ordering;
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};
use std::sync::Arc;

/// Number of requests currently in flight, compared numerically across servers
#[derive(Debug, Clone, Default)]
pub struct ActiveMeasure {
    active: Arc<AtomicI64>,
}

impl ActiveMeasure {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) -> i64 {
        self.active.fetch_add(1, AtomicOrdering::SeqCst) + 1
    }

    pub fn dec(&self) -> i64 {
        self.active.fetch_sub(1, AtomicOrdering::SeqCst) - 1
    }

    pub fn value(&self) -> i64 {
        self.active.load(AtomicOrdering::SeqCst)
    }

    /// Clears drift below zero; requests still in flight keep their count so their
    /// completion brings the measure back to zero
    pub fn reset(&self) {
        self.active.fetch_max(0, AtomicOrdering::SeqCst);
    }
}

impl PartialEq for ActiveMeasure {
    fn eq(&self, other: &Self) -> bool {
        self.value() == other.value()
    }
}

impl Eq for ActiveMeasure {}

impl PartialOrd for ActiveMeasure {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ActiveMeasure {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value().cmp(&other.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_and_compares() {
        let busy = ActiveMeasure::new();
        let idle = ActiveMeasure::new();
        busy.inc();
        busy.inc();
        assert_eq!(busy.dec(), 1);
        assert!(idle < busy);

        let shared = busy.clone();
        assert_eq!(shared.dec(), 0);
        assert_eq!(idle, busy);
    }

    #[test]
    fn test_reset_keeps_inflight_requests() {
        let measure = ActiveMeasure::new();
        measure.inc();
        measure.reset();
        assert_eq!(measure.value(), 1);
        assert_eq!(measure.dec(), 0);

        measure.dec();
        measure.reset();
        assert_eq!(measure.value(), 0);
    }
}

use std::sync::Arc;
use std::sync::atomic::AtomicU64;

/// Minimal counters for operational visibility.
#[derive(Clone, Default)]
pub struct Counters {
    pub rides_created: Arc<AtomicU64>,
    pub rides_accepted: Arc<AtomicU64>,
    pub rides_completed: Arc<AtomicU64>,
    pub rides_cancelled: Arc<AtomicU64>,

    pub batches_matched: Arc<AtomicU64>,
    pub batch_unmatched: Arc<AtomicU64>,

    pub offers_sent: Arc<AtomicU64>,
    pub offers_expired: Arc<AtomicU64>,
    pub races_lost: Arc<AtomicU64>,
    pub dispatch_no_capacity: Arc<AtomicU64>,

    // sweepers
    pub requests_swept: Arc<AtomicU64>,
    pub holds_released: Arc<AtomicU64>,
    pub locations_pruned: Arc<AtomicU64>,
}

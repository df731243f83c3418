//! Batch collector: groups near-simultaneous requests of the same vehicle
//! class into short time-windowed batches.
//!
//! Locking: one mutex over the two index maps (batch id -> batch,
//! vehicle class -> open batch id); each batch carries its own mutex over
//! its request list so appenders and readers do not block the index.
//! The expiry handler always runs on a fresh task after every collector
//! lock has been released.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::time::now_ms;

/// One queued ride request, carrying everything the matcher needs.
#[derive(Clone, Debug)]
pub struct BatchRequest {
    pub ride_id: Uuid,
    pub rider_id: Uuid,
    pub vehicle_class: String,
    pub pickup_lat: f64,
    pub pickup_lon: f64,
    pub dropoff_lat: f64,
    pub dropoff_lon: f64,
    pub trip_distance_km: f64,
    pub fare_estimate: f64,
}

pub struct Batch {
    pub batch_id: Uuid,
    pub vehicle_class: String,
    pub created_at_ms: u64,
    pub expires_at_ms: u64,
    deadline: Instant,
    max_size: usize,
    requests: Mutex<Vec<BatchRequest>>,
    // Set once when the batch is handed to the handler, so the scanner
    // cannot fire it a second time during the deletion grace period.
    fired: AtomicBool,
}

impl Batch {
    fn new(vehicle_class: String, window_ms: u64, max_size: usize) -> Self {
        let created_at_ms = now_ms();
        Self {
            batch_id: Uuid::new_v4(),
            vehicle_class,
            created_at_ms,
            expires_at_ms: created_at_ms + window_ms,
            deadline: Instant::now() + Duration::from_millis(window_ms),
            max_size,
            requests: Mutex::new(Vec::new()),
            fired: AtomicBool::new(false),
        }
    }

    pub fn len(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.lock().is_empty()
    }

    fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    fn at_capacity(&self) -> bool {
        self.len() >= self.max_size
    }

    fn snapshot(&self) -> Vec<BatchRequest> {
        self.requests.lock().clone()
    }
}

/// Invoked on a dedicated task when a batch becomes ready (window expiry or
/// capacity). A failing or slow handler never affects collector state.
#[async_trait::async_trait]
pub trait BatchExpiryHandler: Send + Sync + 'static {
    async fn on_batch_ready(&self, batch_id: Uuid, requests: Vec<BatchRequest>);
}

#[derive(Default)]
struct Index {
    by_id: HashMap<Uuid, Arc<Batch>>,
    open_by_class: HashMap<String, Uuid>,
}

/// Cheap to clone; clones share the same batch index and handler slot.
#[derive(Clone)]
pub struct BatchCollector {
    window_ms: u64,
    max_batch_size: usize,
    scan_ms: u64,
    delete_grace_ms: u64,
    index: Arc<Mutex<Index>>,
    // Registered after construction; the handler re-enters the orchestrator,
    // so it cannot exist at collector construction time.
    handler: Arc<Mutex<Option<Arc<dyn BatchExpiryHandler>>>>,
}

impl BatchCollector {
    pub fn new(window_ms: u64, max_batch_size: usize, scan_ms: u64, delete_grace_ms: u64) -> Self {
        Self {
            window_ms,
            max_batch_size: max_batch_size.max(1),
            scan_ms: scan_ms.max(1),
            delete_grace_ms: delete_grace_ms.max(100),
            index: Arc::new(Mutex::new(Index::default())),
            handler: Arc::new(Mutex::new(None)),
        }
    }

    /// Explicit registration step, after both sides exist.
    pub fn set_expiry_callback(&self, handler: Arc<dyn BatchExpiryHandler>) {
        *self.handler.lock() = Some(handler);
    }

    /// Place a request into the open batch for its vehicle class, opening
    /// one if absent. Returns the batch id. Infallible absent resource
    /// exhaustion.
    pub fn add_request(&self, request: BatchRequest) -> Uuid {
        let batch = {
            let mut index = self.index.lock();

            let open = index
                .open_by_class
                .get(&request.vehicle_class)
                .and_then(|id| index.by_id.get(id))
                .filter(|b| !b.expired() && !b.at_capacity())
                .cloned();

            match open {
                Some(b) => b,
                None => {
                    let b = Arc::new(Batch::new(
                        request.vehicle_class.clone(),
                        self.window_ms,
                        self.max_batch_size,
                    ));
                    index.by_id.insert(b.batch_id, b.clone());
                    index.open_by_class.insert(b.vehicle_class.clone(), b.batch_id);
                    debug!(
                        batch_id = %b.batch_id,
                        vehicle_class = %b.vehicle_class,
                        "opened new batch"
                    );
                    b
                }
            }
        };

        // Index lock released; only the batch's own lock is held here.
        let batch_id = batch.batch_id;
        let full = {
            let mut requests = batch.requests.lock();
            requests.push(request);
            requests.len() >= self.max_batch_size
        };

        if full && !batch.fired.swap(true, Ordering::Relaxed) {
            // Capacity closes the batch immediately: unlink it as the open
            // batch and hand it to the handler without waiting for expiry.
            self.close_open_slot(&batch);
            self.fire_ready(batch);
        }

        batch_id
    }

    /// Snapshot copy of a batch's current requests.
    pub fn batch_requests(&self, batch_id: &Uuid) -> Vec<BatchRequest> {
        self.index
            .lock()
            .by_id
            .get(batch_id)
            .map(|b| b.snapshot())
            .unwrap_or_default()
    }

    /// True once a batch is past its window or at capacity.
    pub fn batch_ready(&self, batch_id: &Uuid) -> bool {
        self.index
            .lock()
            .by_id
            .get(batch_id)
            .is_some_and(|b| b.expired() || b.at_capacity())
    }

    /// Remove a batch and, if it is still the open one, its class slot.
    pub fn complete_batch(&self, batch_id: &Uuid) {
        let mut index = self.index.lock();
        if let Some(b) = index.by_id.remove(batch_id) {
            if index.open_by_class.get(&b.vehicle_class) == Some(batch_id) {
                index.open_by_class.remove(&b.vehicle_class);
            }
        }
    }

    pub fn open_batches(&self) -> usize {
        self.index.lock().by_id.len()
    }

    /// Background scan: every tick, collect expired batches, unlink their
    /// class slots, then dispatch each to the handler off-lock.
    pub fn spawn_expiry_scanner(&self) -> JoinHandle<()> {
        let collector = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(collector.scan_ms));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;

                let expired: Vec<Arc<Batch>> = {
                    let mut index = collector.index.lock();
                    let expired: Vec<Arc<Batch>> = index
                        .by_id
                        .values()
                        .filter(|b| b.expired() && !b.fired.load(Ordering::Relaxed))
                        .cloned()
                        .collect();
                    for b in &expired {
                        b.fired.store(true, Ordering::Relaxed);
                        if index.open_by_class.get(&b.vehicle_class) == Some(&b.batch_id) {
                            index.open_by_class.remove(&b.vehicle_class);
                        }
                    }
                    expired
                };

                for batch in expired {
                    collector.fire_ready(batch);
                }
            }
        })
    }

    /// Dispatch a ready batch to the handler on its own task, then delete
    /// the batch after the grace period.
    fn fire_ready(&self, batch: Arc<Batch>) {
        let handler = self.handler.lock().clone();
        let snapshot = batch.snapshot();
        let batch_id = batch.batch_id;

        info!(
            batch_id = %batch_id,
            vehicle_class = %batch.vehicle_class,
            size = snapshot.len(),
            "batch ready"
        );

        match handler {
            Some(h) => {
                tokio::spawn(async move {
                    h.on_batch_ready(batch_id, snapshot).await;
                });
            }
            None => warn!(batch_id = %batch_id, "batch ready with no expiry handler registered"),
        }

        let collector = self.clone();
        let grace = Duration::from_millis(self.delete_grace_ms);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            collector.complete_batch(&batch_id);
        });
    }

    fn close_open_slot(&self, batch: &Arc<Batch>) {
        let mut index = self.index.lock();
        if index.open_by_class.get(&batch.vehicle_class) == Some(&batch.batch_id) {
            index.open_by_class.remove(&batch.vehicle_class);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Notify;

    fn mk_request(class: &str) -> BatchRequest {
        BatchRequest {
            ride_id: Uuid::new_v4(),
            rider_id: Uuid::new_v4(),
            vehicle_class: class.to_string(),
            pickup_lat: 12.9716,
            pickup_lon: 77.5946,
            dropoff_lat: 12.9352,
            dropoff_lon: 77.6245,
            trip_distance_km: 5.2,
            fare_estimate: 9.8,
        }
    }

    #[derive(Default)]
    struct RecordingHandler {
        batches: Mutex<Vec<(Uuid, Vec<BatchRequest>)>>,
        fired: Notify,
    }

    #[async_trait::async_trait]
    impl BatchExpiryHandler for RecordingHandler {
        async fn on_batch_ready(&self, batch_id: Uuid, requests: Vec<BatchRequest>) {
            self.batches.lock().push((batch_id, requests));
            self.fired.notify_one();
        }
    }

    #[tokio::test]
    async fn same_class_requests_share_a_batch() {
        let collector = BatchCollector::new(10_000, 10, 1_000, 100);

        let a = collector.add_request(mk_request("economy"));
        let b = collector.add_request(mk_request("economy"));
        let c = collector.add_request(mk_request("premium"));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(collector.batch_requests(&a).len(), 2);
        assert_eq!(collector.batch_requests(&c).len(), 1);
    }

    #[tokio::test]
    async fn capacity_closes_the_batch_and_fires_handler() {
        let collector = BatchCollector::new(60_000, 2, 1_000, 100);
        let handler = Arc::new(RecordingHandler::default());
        collector.set_expiry_callback(handler.clone());

        let a = collector.add_request(mk_request("economy"));
        let b = collector.add_request(mk_request("economy"));
        assert_eq!(a, b);
        handler.fired.notified().await;

        {
            let batches = handler.batches.lock();
            assert_eq!(batches.len(), 1);
            assert_eq!(batches[0].0, a);
            assert_eq!(batches[0].1.len(), 2);
        }

        // The class slot is closed; the next request opens a fresh batch.
        let c = collector.add_request(mk_request("economy"));
        assert_ne!(a, c);
    }

    #[tokio::test(start_paused = true)]
    async fn window_expiry_fires_handler_and_deletes_after_grace() {
        let collector = BatchCollector::new(10_000, 10, 1_000, 100);
        let handler = Arc::new(RecordingHandler::default());
        collector.set_expiry_callback(handler.clone());
        let scanner = collector.spawn_expiry_scanner();

        let id = collector.add_request(mk_request("economy"));
        collector.add_request(mk_request("economy"));
        assert!(!collector.batch_ready(&id));

        // Run past the window plus one scan tick plus the grace period.
        tokio::time::sleep(Duration::from_millis(11_500)).await;

        {
            let batches = handler.batches.lock();
            assert_eq!(batches.len(), 1, "expiry fired exactly once");
            assert_eq!(batches[0].1.len(), 2);
        }
        assert_eq!(collector.open_batches(), 0, "batch deleted after grace");

        scanner.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn missing_handler_still_removes_expired_batches() {
        let collector = BatchCollector::new(5_000, 10, 1_000, 100);
        let scanner = collector.spawn_expiry_scanner();

        collector.add_request(mk_request("economy"));
        tokio::time::sleep(Duration::from_millis(6_500)).await;

        assert_eq!(collector.open_batches(), 0);

        // Collector remains usable afterwards.
        let id = collector.add_request(mk_request("economy"));
        assert_eq!(collector.batch_requests(&id).len(), 1);

        scanner.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn ready_by_expiry_is_observable() {
        let collector = BatchCollector::new(3_000, 10, 1_000, 100);
        let id = collector.add_request(mk_request("economy"));

        assert!(!collector.batch_ready(&id));
        tokio::time::sleep(Duration::from_millis(3_001)).await;
        assert!(collector.batch_ready(&id));
    }
}

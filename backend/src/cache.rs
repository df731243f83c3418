use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// Bounded TTL cache for dispatch markers.
///
/// Holds the `ride:active:{id}`, `driver:busy:{id}` and
/// `driver:active:ride:{id}` keys. Entries expire on read and on the
/// periodic purge, so a crash mid-ride cannot wedge a driver as busy
/// past the marker TTL.
pub struct MarkerCache {
    max_entries: usize,
    map: Mutex<HashMap<String, Entry>>,
}

struct Entry {
    value: String,
    expires_at_ms: u64,
}

pub fn active_ride_key(ride_id: &Uuid) -> String {
    format!("ride:active:{ride_id}")
}

pub fn driver_busy_key(driver_id: &Uuid) -> String {
    format!("driver:busy:{driver_id}")
}

pub fn driver_active_ride_key(driver_id: &Uuid) -> String {
    format!("driver:active:ride:{driver_id}")
}

impl MarkerCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            map: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }

    /// Insert or refresh a marker. When full, the entry closest to expiry
    /// is dropped first.
    pub fn put(&self, key: impl Into<String>, value: impl Into<String>, ttl_ms: u64, now_ms: u64) {
        let key = key.into();
        let mut map = self.map.lock();

        if !map.contains_key(&key) && map.len() >= self.max_entries {
            if let Some(victim) = map
                .iter()
                .min_by_key(|(_, e)| e.expires_at_ms)
                .map(|(k, _)| k.clone())
            {
                map.remove(&victim);
                debug!(evicted = %victim, "marker cache full; evicted soonest-expiring entry");
            }
        }

        map.insert(
            key,
            Entry {
                value: value.into(),
                expires_at_ms: now_ms.saturating_add(ttl_ms),
            },
        );
    }

    /// Fetch a marker; an expired entry is removed and reported absent.
    pub fn get(&self, key: &str, now_ms: u64) -> Option<String> {
        let mut map = self.map.lock();
        match map.get(key) {
            Some(e) if e.expires_at_ms > now_ms => Some(e.value.clone()),
            Some(_) => {
                map.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn remove(&self, key: &str) {
        self.map.lock().remove(key);
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn purge_expired(&self, now_ms: u64) -> usize {
        let mut map = self.map.lock();
        let before = map.len();
        map.retain(|_, e| e.expires_at_ms > now_ms);
        before - map.len()
    }
}

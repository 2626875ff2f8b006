//! Bounded in-memory store of pre-fetched audio segments
//!
//! Entries are keyed by segment path and removed by the consumer that reads
//! them. There is no age-based eviction: producers are throttled instead,
//! waiting until the store drops below its capacity before inserting.

use bytes::Bytes;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::trace;

/// Default number of segments held at once
pub const DEFAULT_SEGMENT_CACHE_CAPACITY: usize = 10;

/// Default interval between two capacity checks of a stalled producer
pub const DEFAULT_BACKPRESSURE_POLL: Duration = Duration::from_secs(1);

/// Capacity-limited segment store with read-means-delete semantics
#[derive(Debug)]
pub struct SegmentCache {
    entries: Mutex<HashMap<String, Bytes>>,
    capacity: usize,
    poll_interval: Duration,
}

impl Default for SegmentCache {
    fn default() -> Self {
        Self::new(DEFAULT_SEGMENT_CACHE_CAPACITY, DEFAULT_BACKPRESSURE_POLL)
    }
}

impl SegmentCache {
    /// Create a cache holding at most `capacity` segments (minimum 1)
    pub fn new(capacity: usize, poll_interval: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            poll_interval,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Store a segment, stalling while the cache is full
    ///
    /// Replacing an existing key never grows the cache and is applied
    /// immediately. The capacity check and the insertion happen under the
    /// same lock, so concurrent producers cannot overshoot the ceiling.
    ///
    /// `keep_waiting` is consulted each time the cache is found full; once
    /// it answers `false` the segment is dropped and `false` is returned.
    pub async fn put<F, Fut>(&self, path: &str, data: Bytes, mut keep_waiting: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let mut data = data;
        loop {
            match self.try_put(path, data).await {
                Ok(()) => return true,
                Err(rejected) => data = rejected,
            }
            if !keep_waiting().await {
                return false;
            }

            trace!(segment = %path, capacity = self.capacity, "Segment cache full, waiting");
            sleep(self.poll_interval).await;
        }
    }

    /// Store a segment if there is room, handing the data back otherwise
    pub async fn try_put(&self, path: &str, data: Bytes) -> Result<(), Bytes> {
        let mut entries = self.entries.lock().await;
        if entries.len() < self.capacity || entries.contains_key(path) {
            entries.insert(path.to_string(), data);
            Ok(())
        } else {
            Err(data)
        }
    }

    /// Remove and return a segment
    pub async fn take(&self, path: &str) -> Option<Bytes> {
        self.entries.lock().await.remove(path)
    }

    pub async fn contains(&self, path: &str) -> bool {
        self.entries.lock().await.contains_key(path)
    }

    /// True while another segment can be stored without stalling
    pub async fn has_room(&self) -> bool {
        self.entries.lock().await.len() < self.capacity
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::timeout;

    async fn forever() -> bool {
        true
    }

    fn segment(n: usize) -> (String, Bytes) {
        (
            format!("AAC_Data/octane/octane_256k_1_{:09}.aac", n),
            Bytes::from(vec![n as u8; 4]),
        )
    }

    #[tokio::test]
    async fn test_take_removes_entry() {
        let cache = SegmentCache::default();
        let (path, data) = segment(1);

        assert!(cache.put(&path, data.clone(), forever).await);
        assert!(cache.contains(&path).await);

        assert_eq!(cache.take(&path).await, Some(data));
        assert_eq!(cache.take(&path).await, None);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_put_stalls_until_consumer_frees_room() {
        let cache = Arc::new(SegmentCache::new(2, Duration::from_millis(5)));
        for n in 0..2 {
            let (path, data) = segment(n);
            cache.put(&path, data, forever).await;
        }
        assert!(!cache.has_room().await);

        let producer = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                let (path, data) = segment(2);
                cache.put(&path, data, forever).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!producer.is_finished(), "producer should be throttled");
        assert_eq!(cache.len().await, 2);

        cache.take(&segment(0).0).await;
        timeout(Duration::from_secs(1), producer)
            .await
            .expect("producer should resume once room is available")
            .unwrap();

        assert_eq!(cache.len().await, 2);
        assert!(cache.contains(&segment(2).0).await);
    }

    #[tokio::test]
    async fn test_replacing_existing_key_does_not_stall() {
        let cache = SegmentCache::new(1, Duration::from_secs(60));
        let (path, _) = segment(7);

        cache.put(&path, Bytes::from_static(b"old"), forever).await;
        timeout(
            Duration::from_millis(100),
            cache.put(&path, Bytes::from_static(b"new"), || async { false }),
        )
        .await
        .expect("replacement must not wait for room");

        assert_eq!(cache.take(&path).await, Some(Bytes::from_static(b"new")));
    }

    #[tokio::test]
    async fn test_put_gives_up_when_told_to_stop_waiting() {
        let cache = SegmentCache::new(1, Duration::from_millis(2));
        let (first, data) = segment(1);
        let (second, other) = segment(2);
        cache.put(&first, data, forever).await;

        let counter = AtomicUsize::new(0);
        let checks = &counter;
        let stored = timeout(
            Duration::from_secs(1),
            cache.put(&second, other, move || async move {
                checks.fetch_add(1, Ordering::SeqCst) < 2
            }),
        )
        .await
        .expect("put must return once waiting is abandoned");

        assert!(!stored);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert!(!cache.contains(&second).await);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_try_put_hands_data_back_when_full() {
        let cache = SegmentCache::new(1, Duration::from_secs(60));
        let (first, data) = segment(1);
        let (second, other) = segment(2);

        assert!(cache.try_put(&first, data).await.is_ok());
        assert_eq!(cache.try_put(&second, other.clone()).await, Err(other));
        assert!(!cache.contains(&second).await);
    }

    #[tokio::test]
    async fn test_concurrent_producers_never_exceed_capacity() {
        let cache = Arc::new(SegmentCache::new(3, Duration::from_millis(2)));

        let producers: Vec<_> = (0..12)
            .map(|n| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move {
                    let (path, data) = segment(n);
                    cache.put(&path, data, forever).await;
                })
            })
            .collect();

        let mut consumed = 0;
        while consumed < 12 {
            assert!(cache.len().await <= 3);
            for n in 0..12 {
                if cache.take(&segment(n).0).await.is_some() {
                    consumed += 1;
                }
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        for producer in producers {
            producer.await.unwrap();
        }
        assert!(cache.is_empty().await);
    }
}

//! Bounded playback buffer.
//!
//! Incoming audio must never stall the network reader, so a full queue
//! drops its oldest chunk instead of refusing the new one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Observer, RingBuffer};
use tokio::sync::Notify;
use tracing::debug;

pub struct PlaybackQueue {
    chunks: Mutex<HeapRb<Bytes>>,
    dropped: AtomicU64,
    ready: Notify,
}

impl PlaybackQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            chunks: Mutex::new(HeapRb::new(capacity.max(1))),
            dropped: AtomicU64::new(0),
            ready: Notify::new(),
        }
    }

    fn chunks(&self) -> MutexGuard<'_, HeapRb<Bytes>> {
        self.chunks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a chunk, evicting the oldest one when full.
    pub fn push(&self, chunk: Bytes) {
        if self.chunks().push_overwrite(chunk).is_some() {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(dropped, "Playback queue full, dropped oldest chunk.");
        }
        self.ready.notify_one();
    }

    pub fn pop(&self) -> Option<Bytes> {
        self.chunks().try_pop()
    }

    /// Empties the queue, returning how many chunks were discarded.
    pub fn clear(&self) -> usize {
        self.chunks().clear()
    }

    pub fn len(&self) -> usize {
        self.chunks().occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks().is_empty()
    }

    /// Total chunks evicted by overflow.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Waits until a chunk has been pushed since the last wakeup.
    pub async fn ready(&self) {
        self.ready.notified().await
    }
}

//! Bounded reordering sink between synthesis and playback.
//!
//! Synthesis workers finish out of order; playback must not. Workers
//! `publish` results keyed by sequence id, and the playback worker only
//! ever receives the item whose id is the next one expected.
//!
//! # Capacity
//!
//! At most `capacity` items are held, except that the item playback is
//! waiting for is always let in. Without that bypass, later ids could fill
//! every slot while the worker holding the missing id waits forever.
//!
//! # Gaps
//!
//! Ids that will never arrive (rejected at admission) are marked with
//! [`skip`](ReorderSink::skip). After the last producer leaves, whatever
//! remains is released in ascending order regardless of gaps, then
//! [`take_next_in_order`](ReorderSink::take_next_in_order) returns `None`.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::types::SinkItem;

#[derive(Debug, Default)]
struct SinkState {
    heap: BinaryHeap<Reverse<SinkItem>>,
    /// Never a skipped id: every change is followed by `skip_gaps`.
    next_expected: u64,
    skipped: BTreeSet<u64>,
    producers: usize,
    closed: bool,
    /// Bumped by `reset`; guards from an earlier run no longer count.
    generation: u64,
}

impl SinkState {
    fn skip_gaps(&mut self) {
        while self.skipped.remove(&self.next_expected) {
            self.next_expected += 1;
        }
    }

    fn pop_in_order(&mut self) -> Option<SinkItem> {
        let ready = self
            .heap
            .peek()
            .is_some_and(|Reverse(item)| item.sequence_id() <= self.next_expected);
        if ready || self.closed {
            let Reverse(item) = self.heap.pop()?;
            self.next_expected = self.next_expected.max(item.sequence_id() + 1);
            self.skip_gaps();
            return Some(item);
        }
        None
    }
}

/// Ordered hand-off from the synthesis pool to the playback worker.
#[derive(Debug)]
pub struct ReorderSink {
    state: Mutex<SinkState>,
    capacity: usize,
    changed: Notify,
}

impl ReorderSink {
    /// Create a sink holding at most `capacity` out-of-order items.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(SinkState::default()),
            capacity: capacity.max(1),
            changed: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert `item`, waiting while the sink is full.
    ///
    /// Never drops the item. Every `log_interval` spent waiting is logged
    /// as a warning; cancellation is up to the caller.
    pub async fn publish(&self, item: SinkItem, log_interval: Duration) {
        let sequence_id = item.sequence_id();
        let mut waited = Duration::ZERO;
        loop {
            let changed = self.changed.notified();
            {
                let mut state = self.lock();
                if sequence_id < state.next_expected {
                    debug!(sequence_id, "Discarding result for an already released slot");
                    return;
                }
                if state.heap.len() < self.capacity || sequence_id == state.next_expected {
                    state.heap.push(Reverse(item));
                    drop(state);
                    self.changed.notify_waiters();
                    return;
                }
            }

            if tokio::time::timeout(log_interval, changed).await.is_err() {
                waited += log_interval;
                warn!(
                    sequence_id,
                    waited_secs = waited.as_secs(),
                    "Reordering sink full, synthesis worker still waiting"
                );
            }
        }
    }

    /// Wait for the next item in sequence order.
    ///
    /// Returns `None` once every producer has left and nothing remains.
    pub async fn take_next_in_order(&self) -> Option<SinkItem> {
        loop {
            let changed = self.changed.notified();
            {
                let mut state = self.lock();
                if let Some(item) = state.pop_in_order() {
                    drop(state);
                    self.changed.notify_waiters();
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }
            changed.await;
        }
    }

    /// Mark `sequence_id` as never arriving.
    pub fn skip(&self, sequence_id: u64) {
        {
            let mut state = self.lock();
            if sequence_id < state.next_expected {
                return;
            }
            state.skipped.insert(sequence_id);
            // A publisher waiting on the new head must see it and bypass the cap.
            state.skip_gaps();
        }
        self.changed.notify_waiters();
    }

    /// Register a producer. The sink closes when every guard is dropped.
    #[must_use]
    pub fn register_producer(self: &Arc<Self>) -> ProducerGuard {
        let mut state = self.lock();
        state.producers += 1;
        ProducerGuard {
            sink: Arc::clone(self),
            generation: state.generation,
        }
    }

    /// Close the sink immediately; remaining items drain in order.
    pub fn close(&self) {
        self.lock().closed = true;
        self.changed.notify_waiters();
    }

    /// Discard everything and re-arm the sink for a new run starting at
    /// `next_sequence`.
    pub fn reset(&self, next_sequence: u64) {
        {
            let mut state = self.lock();
            *state = SinkState {
                next_expected: next_sequence,
                generation: state.generation + 1,
                ..SinkState::default()
            };
        }
        self.changed.notify_waiters();
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items currently held.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.lock().heap.len()
    }

    /// The id playback is waiting for.
    #[must_use]
    pub fn next_expected(&self) -> u64 {
        self.lock().next_expected
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

/// Keeps the sink open while a synthesis worker is alive.
#[derive(Debug)]
pub struct ProducerGuard {
    sink: Arc<ReorderSink>,
    generation: u64,
}

impl Drop for ProducerGuard {
    fn drop(&mut self) {
        let last = {
            let mut state = self.sink.lock();
            if state.generation != self.generation {
                return;
            }
            state.producers = state.producers.saturating_sub(1);
            if state.producers == 0 {
                state.closed = true;
            }
            state.closed
        };
        if last {
            self.sink.changed.notify_waiters();
        }
    }
}

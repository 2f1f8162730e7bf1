//! Aggregate pipeline statistics.
//!
//! One lock-guarded [`PipelineStats`] is created with the controller and
//! handed to every stage as a [`StatsHandle`]. It is the only state that
//! more than one stage mutates. The lock is a `std::sync::Mutex` and is
//! never held across an `.await`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;

/// Point-in-time statistics snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Utterances admitted into the text channel.
    pub text_received: u64,
    /// Utterances rejected at admission.
    pub text_dropped: u64,
    /// Utterances synthesized successfully.
    pub audio_generated: u64,
    /// Utterances whose synthesis failed on every attempt.
    pub audio_failed: u64,
    /// Segments played to completion.
    pub audio_played: u64,
    /// Segments whose playback failed or timed out.
    pub audio_play_failed: u64,
    /// Synthesis attempts beyond the first.
    pub synthesis_retries: u64,
    /// Failed slots surfaced as text instead of audio.
    pub fallbacks: u64,
    pub total_generation_time: Duration,
    pub total_playback_time: Duration,
    /// Utterances waiting in the text channel.
    pub text_queue_depth: usize,
    /// Items waiting in the reordering sink.
    pub audio_queue_depth: usize,
    /// Admitted but not yet played or resolved as failed.
    pub in_flight: usize,
    /// Worker tasks (synthesis + playback) still running.
    pub workers_alive: usize,
    /// A segment is sounding right now.
    pub is_playing: bool,
}

impl PipelineStats {
    /// Everything admitted has been spoken (or surfaced) and nothing is
    /// sounding.
    ///
    /// Empty conduits alone are not enough: the last segment may still be
    /// playing after it left the reordering sink.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.text_queue_depth == 0
            && self.audio_queue_depth == 0
            && self.in_flight == 0
            && !self.is_playing
    }
}

/// Shared, cloneable handle to the aggregate statistics.
#[derive(Debug, Clone, Default)]
pub struct StatsHandle {
    inner: Arc<Mutex<PipelineStats>>,
}

impl StatsHandle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PipelineStats> {
        // Counters stay meaningful even if a holder panicked mid-update.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clone the counters out of the lock.
    #[must_use]
    pub fn snapshot(&self) -> PipelineStats {
        self.lock().clone()
    }

    /// Reserve an in-flight slot, or count a drop when the cap is reached.
    pub fn try_reserve_slot(&self, max_in_flight: usize) -> bool {
        let mut stats = self.lock();
        if stats.in_flight >= max_in_flight {
            stats.text_dropped += 1;
            return false;
        }
        stats.in_flight += 1;
        true
    }

    /// The reserved slot was admitted into the text channel.
    pub fn record_admitted(&self) {
        self.lock().text_received += 1;
    }

    /// The reserved slot could not be admitted; give it back and count a drop.
    pub fn release_rejected(&self) {
        let mut stats = self.lock();
        stats.in_flight = stats.in_flight.saturating_sub(1);
        stats.text_dropped += 1;
    }

    pub fn record_retry(&self) {
        self.lock().synthesis_retries += 1;
    }

    pub fn record_generated(&self, elapsed: Duration) {
        let mut stats = self.lock();
        stats.audio_generated += 1;
        stats.total_generation_time += elapsed;
    }

    pub fn record_synthesis_failed(&self) {
        self.lock().audio_failed += 1;
    }

    /// Raise `is_playing` just before the device starts.
    pub fn begin_playback(&self) {
        self.lock().is_playing = true;
    }

    /// Lower `is_playing`, count the outcome, and resolve the in-flight slot
    /// in one critical section so no snapshot sees the slot gone while
    /// the flag is still meaningful.
    pub fn finish_playback(&self, success: bool, elapsed: Duration) {
        let mut stats = self.lock();
        stats.is_playing = false;
        if success {
            stats.audio_played += 1;
        } else {
            stats.audio_play_failed += 1;
        }
        stats.total_playback_time += elapsed;
        stats.in_flight = stats.in_flight.saturating_sub(1);
    }

    /// A failed slot was surfaced as text; resolve its in-flight slot.
    pub fn record_fallback(&self) {
        let mut stats = self.lock();
        stats.fallbacks += 1;
        stats.in_flight = stats.in_flight.saturating_sub(1);
    }

    /// Conduits were emptied by a restart; nothing is in flight any more.
    pub fn clear_in_flight(&self) {
        let mut stats = self.lock();
        stats.in_flight = 0;
        stats.is_playing = false;
    }
}

//! Lifecycle states and events emitted to the application layer.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Rejection;

// ── Pipeline state machine ─────────────────────────────────────────

/// Lifecycle state of the controller.
///
/// ```text
///   Idle → Running → Stopping → Stopped
///             ▲                    │
///             └────────────────────┘   (start again)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Constructed, never started.
    #[default]
    Idle,

    /// Workers running; `feed`/`flush` accepted.
    Running,

    /// `stop()` in progress; admissions refused.
    Stopping,

    /// Workers gone. `start()` may be called again.
    Stopped,
}

// ── Events emitted by the pipeline ─────────────────────────────────

/// Events emitted by the pipeline to the UI / application layer.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// Controller state changed.
    StateChanged(PipelineState),

    /// An utterance entered the text channel.
    UtteranceAdmitted { sequence_id: u64 },

    /// An utterance was refused at admission.
    UtteranceDropped {
        sequence_id: u64,
        reason: Rejection,
    },

    /// Synthesis for an utterance succeeded.
    SegmentSynthesized {
        sequence_id: u64,
        bytes: usize,
        elapsed: Duration,
    },

    /// A segment started playing.
    PlaybackStarted { sequence_id: u64, text: String },

    /// A segment finished playing (or failed to).
    PlaybackFinished { sequence_id: u64, success: bool },

    /// Synthesis permanently failed; the text is surfaced instead of audio.
    Fallback { sequence_id: u64, text: String },
}

/// Events buffered for a slow receiver before new ones are dropped.
pub const EVENT_CAPACITY: usize = 1024;

/// Best-effort event sender shared by every stage.
///
/// The channel is bounded: a receiver that is kept but never drained costs
/// at most [`EVENT_CAPACITY`] events, and stages never wait on it.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<PipelineEvent>,
}

impl EventSender {
    /// Create a sender and the receiver handed to the application.
    #[must_use]
    pub fn channel() -> (Self, mpsc::Receiver<PipelineEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
        (Self { tx }, rx)
    }

    /// Emit an event. Dropped if the receiver is full or gone.
    pub fn emit(&self, event: PipelineEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::trace!(event = ?event, "Pipeline event receiver full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::trace!("Pipeline event receiver dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undrained_receiver_caps_buffered_events() {
        let (events, mut rx) = EventSender::channel();
        for sequence_id in 0..(EVENT_CAPACITY as u64 + 10) {
            events.emit(PipelineEvent::UtteranceAdmitted { sequence_id });
        }

        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, EVENT_CAPACITY);

        events.emit(PipelineEvent::UtteranceAdmitted { sequence_id: 0 });
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn emit_after_receiver_dropped_is_harmless() {
        let (events, rx) = EventSender::channel();
        drop(rx);
        events.emit(PipelineEvent::StateChanged(PipelineState::Running));
    }
}

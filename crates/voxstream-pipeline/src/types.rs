//! Values flowing between pipeline stages.

use std::cmp::Ordering;
use std::time::{Duration, Instant};

use bytes::Bytes;

/// Pause after a full sentence (`. ! ?`).
pub const SENTENCE_PAUSE: Duration = Duration::from_millis(800);

/// Pause after a clause mark (`, ;`).
pub const CLAUSE_PAUSE: Duration = Duration::from_millis(400);

/// Pause after anything else (force-cuts, flushed remainders).
pub const SHORT_PAUSE: Duration = Duration::from_millis(200);

/// A complete, boundary-delimited unit of text ready for synthesis.
#[derive(Debug, Clone)]
pub struct Utterance {
    /// Assigned once by the segmenter; strictly increasing.
    pub sequence_id: u64,
    pub text: String,
    pub enqueued_at: Instant,
}

impl Utterance {
    pub(crate) fn new(sequence_id: u64, text: String) -> Self {
        Self {
            sequence_id,
            text,
            enqueued_at: Instant::now(),
        }
    }

    /// How long playback should rest after this utterance.
    #[must_use]
    pub fn pause_hint(&self) -> Duration {
        pause_for(&self.text)
    }
}

/// Derive the pause hint from how a chunk of text ends.
#[must_use]
pub fn pause_for(text: &str) -> Duration {
    match text.trim_end().chars().next_back() {
        Some('.' | '!' | '?' | '。' | '！' | '？') => SENTENCE_PAUSE,
        Some(',' | ';' | '，' | '；') => CLAUSE_PAUSE,
        _ => SHORT_PAUSE,
    }
}

/// Synthesized audio for one utterance.
///
/// Equality and ordering look only at `sequence_id`; that is what lets the
/// reordering sink hand segments to playback in utterance order.
#[derive(Debug, Clone)]
pub struct AudioSegment {
    pub sequence_id: u64,
    pub text: String,
    /// Opaque, engine-defined audio bytes.
    pub payload: Bytes,
    pub synth_duration: Duration,
    pub enqueued_at: Instant,
    pub pause_after: Duration,
}

impl PartialEq for AudioSegment {
    fn eq(&self, other: &Self) -> bool {
        self.sequence_id == other.sequence_id
    }
}

impl Eq for AudioSegment {}

impl PartialOrd for AudioSegment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AudioSegment {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sequence_id.cmp(&other.sequence_id)
    }
}

/// What a synthesis worker publishes for a slot.
#[derive(Debug, Clone)]
pub enum SinkItem {
    /// Synthesis succeeded.
    Audio(AudioSegment),

    /// Every attempt failed; playback surfaces `text` instead of audio.
    Failed {
        sequence_id: u64,
        text: String,
        error: String,
    },
}

impl SinkItem {
    /// The slot this item resolves.
    #[must_use]
    pub const fn sequence_id(&self) -> u64 {
        match self {
            Self::Audio(segment) => segment.sequence_id,
            Self::Failed { sequence_id, .. } => *sequence_id,
        }
    }
}

impl PartialEq for SinkItem {
    fn eq(&self, other: &Self) -> bool {
        self.sequence_id() == other.sequence_id()
    }
}

impl Eq for SinkItem {}

impl PartialOrd for SinkItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SinkItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sequence_id().cmp(&other.sequence_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(sequence_id: u64, text: &str) -> AudioSegment {
        AudioSegment {
            sequence_id,
            text: text.to_string(),
            payload: Bytes::from_static(b"pcm"),
            synth_duration: Duration::ZERO,
            enqueued_at: Instant::now(),
            pause_after: SHORT_PAUSE,
        }
    }

    #[test]
    fn audio_segments_order_by_sequence_only() {
        let early = segment(1, "zzz");
        let late = segment(2, "aaa");
        assert!(early < late);
        assert_eq!(segment(7, "one"), segment(7, "two"));
    }

    #[test]
    fn failure_marker_orders_with_audio() {
        let failed = SinkItem::Failed {
            sequence_id: 3,
            text: "lost".to_string(),
            error: "boom".to_string(),
        };
        let audio = SinkItem::Audio(segment(4, "kept"));
        assert!(failed < audio);
        assert_eq!(failed.sequence_id(), 3);
    }

    #[test]
    fn pause_hint_follows_punctuation() {
        assert_eq!(pause_for("Done."), SENTENCE_PAUSE);
        assert_eq!(pause_for("真的吗？"), SENTENCE_PAUSE);
        assert_eq!(pause_for("first part,"), CLAUSE_PAUSE);
        assert_eq!(pause_for("no punctuation"), SHORT_PAUSE);
    }
}

//! Engine-agnostic interfaces for synthesis and playback.
//!
//! The pipeline holds trait objects (`Arc<dyn SynthesisEngine>`,
//! `Arc<dyn PlaybackDevice>`) so backends can be swapped without touching
//! pipeline logic. No concrete backend lives in this crate.

use bytes::Bytes;

use crate::error::PipelineError;

// ── Synthesis engine ───────────────────────────────────────────────

/// Backend-agnostic text-to-speech engine.
///
/// Implementations must be `Send + Sync`: several synthesis workers call
/// the same engine concurrently.
///
/// The pipeline races every call against `generation_timeout` and drops
/// the future when the timer wins, so implementations must tolerate being
/// cancelled at any `.await` point. Blocking engines should run their work
/// on `tokio::task::spawn_blocking`.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait SynthesisEngine: Send + Sync {
    /// Synthesize one utterance into an opaque audio payload.
    ///
    /// # Arguments
    /// * `text` - A single cleaned utterance (the pipeline handles
    ///   segmentation).
    async fn synthesize(&self, text: &str) -> Result<Bytes, PipelineError>;
}

// ── Playback device ────────────────────────────────────────────────

/// Serially-accessed audio output.
///
/// Only the single playback worker calls [`play`](Self::play), so an
/// implementation never sees overlapping playback.
#[async_trait::async_trait]
pub trait PlaybackDevice: Send + Sync {
    /// Play `payload` and resolve once the audio has finished.
    async fn play(&self, payload: &[u8]) -> Result<(), PipelineError>;

    /// Force any in-progress playback to end immediately.
    ///
    /// Called on playback timeout and on `stop()`. Must not block.
    fn stop(&self);
}

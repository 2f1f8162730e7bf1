//! Pipeline error types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Errors that can occur in the streaming pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The configuration failed validation at `start()`.
    #[error("Invalid pipeline configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// Pipeline is already running.
    #[error("Pipeline is already running")]
    AlreadyRunning,

    /// Pipeline is not running.
    #[error("Pipeline is not running")]
    NotRunning,

    /// The synthesis engine reported an error.
    #[error("Speech synthesis failed: {0}")]
    Synthesis(String),

    /// The synthesis engine did not answer within the generation timeout.
    #[error("Speech synthesis timed out after {0:?}")]
    SynthesisTimeout(Duration),

    /// The playback device reported an error.
    #[error("Audio playback failed: {0}")]
    Playback(String),

    /// Playback did not finish within the playback timeout.
    #[error("Audio playback timed out after {0:?}")]
    PlaybackTimeout(Duration),

    /// Operation was cancelled by a pipeline stop.
    #[error("Pipeline operation cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Convenience constructor for engine adapters.
    pub fn synthesis(msg: impl Into<String>) -> Self {
        Self::Synthesis(msg.into())
    }

    /// Convenience constructor for device adapters.
    pub fn playback(msg: impl Into<String>) -> Self {
        Self::Playback(msg.into())
    }
}

/// Why an utterance was refused at admission.
///
/// Admission failures are never fatal: they are counted in
/// [`PipelineStats::text_dropped`](crate::stats::PipelineStats::text_dropped)
/// and reported back to the caller so it can retry or accept the loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    /// `max_in_flight` utterances are already admitted and unresolved.
    #[error("in-flight limit reached")]
    InFlightLimit,

    /// The text channel stayed full for the whole admission timeout.
    #[error("text channel full")]
    ChannelFull,

    /// The text channel is closed (pipeline stopping).
    #[error("text channel closed")]
    Closed,
}

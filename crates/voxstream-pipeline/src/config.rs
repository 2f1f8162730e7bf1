//! Pipeline configuration and validation.
//!
//! All knobs are plain numbers, durations, or booleans. Loading them from a
//! file or the environment is the caller's business; the pipeline only
//! validates them when [`start`](crate::StreamingPipeline::start) is called.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Upper bound on the synthesis worker pool.
pub const MAX_SYNTHESIS_WORKERS: usize = 64;

/// Upper bound on synthesis retries per utterance.
pub const MAX_RETRY_COUNT: u32 = 10;

/// Streaming pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Capacity of the text channel between segmenter and synthesis.
    pub text_capacity: usize,

    /// Capacity of the reordering sink between synthesis and playback.
    pub audio_capacity: usize,

    /// Maximum utterances admitted but not yet played or failed.
    pub max_in_flight: usize,

    /// Number of concurrent synthesis workers.
    pub synthesis_workers: usize,

    /// Hard limit for a single synthesis attempt.
    pub generation_timeout: Duration,

    /// Hard limit for playing a single segment.
    pub playback_timeout: Duration,

    /// How long `feed`/`flush` wait for room in the text channel.
    pub admission_timeout: Duration,

    /// Utterances shorter than this are merged with the next sentence.
    pub min_utterance_chars: usize,

    /// Text without a boundary is force-cut at this many characters.
    pub max_utterance_chars: usize,

    /// Extra synthesis attempts after the first failure.
    pub retry_count: u32,

    /// Delay between synthesis attempts.
    pub retry_delay: Duration,

    /// How often a worker blocked on a full reordering sink logs a warning.
    pub sink_wait_log_interval: Duration,

    /// Sleep for each utterance's pause hint after playing it.
    pub sentence_pauses: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            text_capacity: 3,
            audio_capacity: 2,
            max_in_flight: 10,
            synthesis_workers: 1,
            generation_timeout: Duration::from_secs(10),
            playback_timeout: Duration::from_secs(30),
            admission_timeout: Duration::from_secs(5),
            min_utterance_chars: 10,
            max_utterance_chars: 100,
            retry_count: 2,
            retry_delay: Duration::from_millis(500),
            sink_wait_log_interval: Duration::from_secs(30),
            sentence_pauses: false,
        }
    }
}

impl PipelineConfig {
    /// Total synthesis attempts per utterance (first try plus retries).
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.retry_count + 1
    }

    /// Validate every bound. Called by `start()`; the only fatal error path.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.text_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("text_capacity"));
        }
        if self.audio_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("audio_capacity"));
        }
        if self.max_in_flight == 0 {
            return Err(ConfigError::ZeroCapacity("max_in_flight"));
        }
        if !(1..=MAX_SYNTHESIS_WORKERS).contains(&self.synthesis_workers) {
            return Err(ConfigError::InvalidWorkerCount(self.synthesis_workers));
        }
        if self.generation_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout("generation_timeout"));
        }
        if self.playback_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout("playback_timeout"));
        }
        if self.sink_wait_log_interval.is_zero() {
            return Err(ConfigError::ZeroTimeout("sink_wait_log_interval"));
        }
        if self.max_utterance_chars == 0 {
            return Err(ConfigError::ZeroCapacity("max_utterance_chars"));
        }
        if self.min_utterance_chars > self.max_utterance_chars {
            return Err(ConfigError::UtteranceBounds {
                min: self.min_utterance_chars,
                max: self.max_utterance_chars,
            });
        }
        if self.retry_count > MAX_RETRY_COUNT {
            return Err(ConfigError::TooManyRetries(self.retry_count));
        }
        Ok(())
    }
}

/// Configuration validation error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be at least 1")]
    ZeroCapacity(&'static str),

    #[error("Synthesis worker count must be between 1 and {MAX_SYNTHESIS_WORKERS}, got {0}")]
    InvalidWorkerCount(usize),

    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),

    #[error("min_utterance_chars ({min}) exceeds max_utterance_chars ({max})")]
    UtteranceBounds { min: usize, max: usize },

    #[error("Retry count must be at most {MAX_RETRY_COUNT}, got {0}")]
    TooManyRetries(u32),
}

//! Streaming text-to-speech pipeline.
//!
//! Turns an incrementally arriving text stream (typically LLM output) into
//! continuously playing speech: text is cut into utterances as soon as a
//! boundary is known, synthesized by a bounded worker pool, reassembled in
//! order, and played one segment at a time. Synthesis engines and playback
//! devices are plugged in through [`SynthesisEngine`] and [`PlaybackDevice`].
#![deny(unused_crate_dependencies)]

pub mod backend;
pub mod channel;
pub mod config;
pub mod error;
pub mod events;
pub mod normalize;
pub mod pipeline;
mod playback;
pub mod reorder;
pub mod segmenter;
pub mod stats;
mod synthesis;
pub mod types;

// Re-export key types for convenience
pub use backend::{PlaybackDevice, SynthesisEngine};
pub use config::{ConfigError, PipelineConfig};
pub use error::{PipelineError, Rejection};
pub use events::{EVENT_CAPACITY, PipelineEvent, PipelineState};
pub use pipeline::{AdmissionReport, StreamingPipeline};
pub use segmenter::Segmenter;
pub use stats::PipelineStats;
pub use synthesis::{RetryPolicy, synthesize_with_retry};
pub use types::{AudioSegment, SinkItem, Utterance};

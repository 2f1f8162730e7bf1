//! Command-line arguments.
//!
//! Every pipeline knob has a flag and a `VOXSTREAM_*` environment fallback,
//! so a `.env` file can carry a standing configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use voxstream_pipeline::PipelineConfig;

/// Replay text through the streaming speech pipeline.
#[derive(Parser, Debug)]
#[command(name = "voxstream")]
#[command(about = "Replay text as a token stream through the streaming TTS pipeline")]
#[command(version)]
pub struct Cli {
    /// Text file to speak (reads stdin when omitted or "-")
    pub input: Option<PathBuf>,

    /// Enable verbose/debug output
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    // ── Token stream simulation ────────────────────────────────────
    /// Characters per simulated token fragment
    #[arg(long, env = "VOXSTREAM_CHUNK_CHARS", default_value_t = 6)]
    pub chunk_chars: usize,

    /// Delay between fragments in milliseconds
    #[arg(long, env = "VOXSTREAM_CHUNK_DELAY_MS", default_value_t = 25)]
    pub chunk_delay_ms: u64,

    /// Give up waiting for speech to finish after this many seconds
    #[arg(long, env = "VOXSTREAM_FINISH_TIMEOUT_SECS", default_value_t = 300)]
    pub finish_timeout_secs: u64,

    // ── Simulated backends ─────────────────────────────────────────
    /// Simulated synthesis cost per character in milliseconds
    #[arg(long, env = "VOXSTREAM_SYNTH_MS_PER_CHAR", default_value_t = 3)]
    pub synth_ms_per_char: u64,

    /// Make every Nth synthesis call fail
    #[arg(long, env = "VOXSTREAM_FAIL_EVERY")]
    pub fail_every: Option<u64>,

    /// Simulated speaking time per character in milliseconds
    #[arg(long, env = "VOXSTREAM_SPEAK_MS_PER_CHAR", default_value_t = 50)]
    pub speak_ms_per_char: u64,

    // ── Pipeline configuration ─────────────────────────────────────
    /// Text channel capacity
    #[arg(long, env = "VOXSTREAM_TEXT_CAPACITY", default_value_t = 3)]
    pub text_capacity: usize,

    /// Reordering sink capacity
    #[arg(long, env = "VOXSTREAM_AUDIO_CAPACITY", default_value_t = 2)]
    pub audio_capacity: usize,

    /// Maximum utterances admitted but not yet spoken
    #[arg(long, env = "VOXSTREAM_MAX_IN_FLIGHT", default_value_t = 10)]
    pub max_in_flight: usize,

    /// Concurrent synthesis workers
    #[arg(long, env = "VOXSTREAM_WORKERS", default_value_t = 1)]
    pub workers: usize,

    /// Per-attempt synthesis timeout in milliseconds
    #[arg(long, env = "VOXSTREAM_GENERATION_TIMEOUT_MS", default_value_t = 10_000)]
    pub generation_timeout_ms: u64,

    /// Per-segment playback timeout in milliseconds
    #[arg(long, env = "VOXSTREAM_PLAYBACK_TIMEOUT_MS", default_value_t = 30_000)]
    pub playback_timeout_ms: u64,

    /// How long an utterance may wait for room in the text channel
    #[arg(long, env = "VOXSTREAM_ADMISSION_TIMEOUT_MS", default_value_t = 5_000)]
    pub admission_timeout_ms: u64,

    /// Shorter utterances merge with the next sentence
    #[arg(long, env = "VOXSTREAM_MIN_CHARS", default_value_t = 10)]
    pub min_chars: usize,

    /// Text without a boundary is cut at this length
    #[arg(long, env = "VOXSTREAM_MAX_CHARS", default_value_t = 100)]
    pub max_chars: usize,

    /// Synthesis retries after the first failure
    #[arg(long, env = "VOXSTREAM_RETRY_COUNT", default_value_t = 2)]
    pub retry_count: u32,

    /// Delay between synthesis retries in milliseconds
    #[arg(long, env = "VOXSTREAM_RETRY_DELAY_MS", default_value_t = 500)]
    pub retry_delay_ms: u64,

    /// Warn every this many seconds while a worker waits on a full sink
    #[arg(long, env = "VOXSTREAM_SINK_WAIT_LOG_SECS", default_value_t = 30)]
    pub sink_wait_log_secs: u64,

    /// Pause between sentences according to their punctuation
    #[arg(long, env = "VOXSTREAM_SENTENCE_PAUSES")]
    pub sentence_pauses: bool,
}

impl Cli {
    /// Build the pipeline configuration from the parsed flags.
    #[must_use]
    pub const fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            text_capacity: self.text_capacity,
            audio_capacity: self.audio_capacity,
            max_in_flight: self.max_in_flight,
            synthesis_workers: self.workers,
            generation_timeout: Duration::from_millis(self.generation_timeout_ms),
            playback_timeout: Duration::from_millis(self.playback_timeout_ms),
            admission_timeout: Duration::from_millis(self.admission_timeout_ms),
            min_utterance_chars: self.min_chars,
            max_utterance_chars: self.max_chars,
            retry_count: self.retry_count,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            sink_wait_log_interval: Duration::from_secs(self.sink_wait_log_secs),
            sentence_pauses: self.sentence_pauses,
        }
    }

    /// Read the input text from the file argument or stdin.
    pub fn read_input(&self) -> std::io::Result<String> {
        match &self.input {
            Some(path) if path.as_os_str() != "-" => std::fs::read_to_string(path),
            _ => std::io::read_to_string(std::io::stdin()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parser_builds() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults_match_pipeline_defaults() {
        let cli = Cli::parse_from(["voxstream"]);
        assert_eq!(cli.pipeline_config(), PipelineConfig::default());
        assert!(cli.input.is_none());
    }

    #[test]
    fn test_flags_map_onto_config() {
        let cli = Cli::parse_from([
            "voxstream",
            "notes.md",
            "--workers",
            "4",
            "--retry-count",
            "0",
            "--generation-timeout-ms",
            "250",
            "--sentence-pauses",
        ]);
        let config = cli.pipeline_config();
        assert_eq!(cli.input, Some(PathBuf::from("notes.md")));
        assert_eq!(config.synthesis_workers, 4);
        assert_eq!(config.retry_count, 0);
        assert_eq!(config.generation_timeout, Duration::from_millis(250));
        assert!(config.sentence_pauses);
    }
}

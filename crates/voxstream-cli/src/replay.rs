//! Replay a text as a simulated token stream.

use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc::Receiver;
use tracing::{debug, info, warn};
use voxstream_pipeline::{AdmissionReport, PipelineEvent, PipelineStats, StreamingPipeline};

/// How long `stop` may take to drain once speech is reported finished.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Split `text` into fragments of at most `chunk_chars` characters.
#[must_use]
pub fn fragments(text: &str, chunk_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(chunk_chars.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}

/// Feed `text` into a started pipeline one fragment at a time, then flush,
/// wait for speech to finish and stop.
pub async fn replay(
    pipeline: &mut StreamingPipeline,
    text: &str,
    chunk_chars: usize,
    chunk_delay: Duration,
    finish_timeout: Duration,
) -> anyhow::Result<PipelineStats> {
    let mut total = AdmissionReport::default();

    for fragment in fragments(text, chunk_chars) {
        let report = pipeline
            .feed(&fragment)
            .await
            .context("Failed to feed text fragment")?;
        total.admitted += report.admitted;
        total.dropped += report.dropped;
        if !chunk_delay.is_zero() {
            tokio::time::sleep(chunk_delay).await;
        }
    }

    let report = pipeline.flush().await.context("Failed to flush pipeline")?;
    total.admitted += report.admitted;
    total.dropped += report.dropped;
    info!(
        admitted = total.admitted,
        dropped = total.dropped,
        "Input stream complete"
    );

    if !pipeline.wait_until_finished(finish_timeout).await {
        warn!(
            timeout_secs = finish_timeout.as_secs(),
            "Speech did not finish in time"
        );
    }

    Ok(pipeline.stop(true, STOP_TIMEOUT).await)
}

/// Print fallbacks to stdout and log everything else.
pub async fn report_events(mut events: Receiver<PipelineEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            PipelineEvent::Fallback { sequence_id, text } => {
                println!("📝 [{sequence_id}] {text}");
            }
            PipelineEvent::UtteranceDropped {
                sequence_id,
                reason,
            } => {
                println!("⚠️  [{sequence_id}] dropped: {reason}");
            }
            other => debug!(event = ?other, "Pipeline event"),
        }
    }
}

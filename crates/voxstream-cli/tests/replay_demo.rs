//! End-to-end run of the demo replay with the simulated backends.

use std::sync::Arc;
use std::time::Duration;

use voxstream_cli::{ConsoleDevice, SimulatedEngine, replay};
use voxstream_pipeline::{PipelineConfig, PipelineState, StreamingPipeline};

const TEXT: &str = "## Status\n\
    The **build** finished. Tests ran for 3.5 seconds! \
    Deployment waits for review; nothing else is pending";

#[tokio::test]
async fn replays_markdown_through_simulated_backends() {
    let config = PipelineConfig {
        synthesis_workers: 2,
        retry_delay: Duration::from_millis(1),
        ..PipelineConfig::default()
    };
    let (mut pipeline, _events) = StreamingPipeline::new(
        config,
        Arc::new(SimulatedEngine::new(0, None)),
        Arc::new(ConsoleDevice::new(0)),
    );
    pipeline.start().unwrap();

    let stats = replay::replay(
        &mut pipeline,
        TEXT,
        5,
        Duration::ZERO,
        Duration::from_secs(10),
    )
    .await
    .unwrap();

    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert_eq!(stats.text_dropped, 0);
    assert!(stats.text_received >= 3);
    assert_eq!(stats.audio_played, stats.text_received);
    assert!(stats.is_finished());
}

#[tokio::test]
async fn simulated_failures_become_fallbacks() {
    let config = PipelineConfig {
        retry_count: 0,
        min_utterance_chars: 1,
        ..PipelineConfig::default()
    };
    let (mut pipeline, _events) = StreamingPipeline::new(
        config,
        Arc::new(SimulatedEngine::new(0, Some(2))),
        Arc::new(ConsoleDevice::new(0)),
    );
    pipeline.start().unwrap();

    let stats = replay::replay(
        &mut pipeline,
        "One. Two. Three. Four.",
        64,
        Duration::ZERO,
        Duration::from_secs(10),
    )
    .await
    .unwrap();

    assert_eq!(stats.text_received, 4);
    assert_eq!(stats.audio_failed, 2);
    assert_eq!(stats.fallbacks, 2);
    assert_eq!(stats.audio_played, 2);
}

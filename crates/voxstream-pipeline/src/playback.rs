//! Sequential playback worker.
//!
//! A single task drains the reordering sink in sequence order and plays
//! each segment to completion, bounded by `playback_timeout`. Failure
//! markers are surfaced as text instead of audio.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::PlaybackDevice;
use crate::events::{EventSender, PipelineEvent};
use crate::reorder::ReorderSink;
use crate::stats::StatsHandle;
use crate::types::{AudioSegment, SinkItem};

pub(crate) struct PlaybackWorker {
    pub device: Arc<dyn PlaybackDevice>,
    pub sink: Arc<ReorderSink>,
    pub stats: StatsHandle,
    pub events: EventSender,
    pub playback_timeout: Duration,
    pub sentence_pauses: bool,
    pub cancel: CancellationToken,
}

/// Whether the worker should keep going after a segment.
enum Flow {
    Continue,
    Stop,
}

impl PlaybackWorker {
    pub(crate) async fn run(self) {
        debug!("Playback worker started");

        loop {
            let next = tokio::select! {
                biased;

                () = self.cancel.cancelled() => break,

                item = self.sink.take_next_in_order() => item,
            };
            let Some(item) = next else {
                break;
            };

            match item {
                SinkItem::Audio(segment) => {
                    if matches!(self.play(segment).await, Flow::Stop) {
                        break;
                    }
                }
                SinkItem::Failed {
                    sequence_id,
                    text,
                    error,
                } => {
                    warn!(sequence_id, error = %error, text = %text, "No audio for utterance, surfacing text");
                    self.stats.record_fallback();
                    self.events
                        .emit(PipelineEvent::Fallback { sequence_id, text });
                }
            }
        }

        debug!("Playback worker exiting");
    }

    async fn play(&self, segment: AudioSegment) -> Flow {
        let sequence_id = segment.sequence_id;
        self.stats.begin_playback();
        self.events.emit(PipelineEvent::PlaybackStarted {
            sequence_id,
            text: segment.text.clone(),
        });
        debug!(
            sequence_id,
            queued_ms = segment.enqueued_at.elapsed().as_millis(),
            "Playing segment"
        );

        let started = Instant::now();
        let outcome = tokio::select! {
            biased;

            // Stats belong to the controller once cancelled; a restart may
            // already have reset them.
            () = self.cancel.cancelled() => {
                self.device.stop();
                debug!(sequence_id, "Playback interrupted by stop");
                return Flow::Stop;
            }

            outcome = tokio::time::timeout(self.playback_timeout, self.device.play(&segment.payload)) => outcome,
        };

        let success = match outcome {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(sequence_id, error = %e, "Playback failed");
                false
            }
            Err(_) => {
                self.device.stop();
                warn!(
                    sequence_id,
                    timeout_ms = self.playback_timeout.as_millis(),
                    "Playback timed out, device stopped"
                );
                false
            }
        };

        let elapsed = started.elapsed();
        self.stats.finish_playback(success, elapsed);
        self.events
            .emit(PipelineEvent::PlaybackFinished { sequence_id, success });
        debug!(sequence_id, success, elapsed_ms = elapsed.as_millis(), "Segment done");

        if self.sentence_pauses && !segment.pause_after.is_zero() {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => return Flow::Stop,

                () = tokio::time::sleep(segment.pause_after) => {}
            }
        }

        Flow::Continue
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bytes::Bytes;

    use super::*;
    use crate::error::PipelineError;
    use crate::types::SHORT_PAUSE;

    /// Records payloads; `b"stall"` never finishes, `b"bad"` errors.
    #[derive(Default)]
    struct RecordingDevice {
        played: Mutex<Vec<Vec<u8>>>,
        stops: Mutex<usize>,
    }

    #[async_trait::async_trait]
    impl PlaybackDevice for RecordingDevice {
        async fn play(&self, payload: &[u8]) -> Result<(), PipelineError> {
            self.played.lock().unwrap().push(payload.to_vec());
            match payload {
                b"stall" => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                }
                b"bad" => Err(PipelineError::playback("device unplugged")),
                _ => Ok(()),
            }
        }

        fn stop(&self) {
            *self.stops.lock().unwrap() += 1;
        }
    }

    fn audio(sequence_id: u64, payload: &'static [u8]) -> SinkItem {
        SinkItem::Audio(AudioSegment {
            sequence_id,
            text: format!("segment {sequence_id}"),
            payload: Bytes::from_static(payload),
            synth_duration: Duration::ZERO,
            enqueued_at: Instant::now(),
            pause_after: SHORT_PAUSE,
        })
    }

    fn worker(
        device: Arc<RecordingDevice>,
        sink: Arc<ReorderSink>,
        stats: StatsHandle,
        events: EventSender,
    ) -> PlaybackWorker {
        PlaybackWorker {
            device,
            sink,
            stats,
            events,
            playback_timeout: Duration::from_millis(50),
            sentence_pauses: false,
            cancel: CancellationToken::new(),
        }
    }

    fn admit(stats: &StatsHandle, n: usize) {
        for _ in 0..n {
            assert!(stats.try_reserve_slot(100));
            stats.record_admitted();
        }
    }

    #[tokio::test]
    async fn plays_in_order_and_records_outcomes() {
        let device = Arc::new(RecordingDevice::default());
        let sink = Arc::new(ReorderSink::new(4));
        let stats = StatsHandle::new();
        let (events, mut event_rx) = EventSender::channel();
        admit(&stats, 3);

        let log_every = Duration::from_secs(30);
        sink.publish(audio(2, b"two"), log_every).await;
        sink.publish(audio(1, b"bad"), log_every).await;
        sink.publish(audio(0, b"zero"), log_every).await;
        sink.close();

        worker(Arc::clone(&device), sink, stats.clone(), events)
            .run()
            .await;

        let played = device.played.lock().unwrap().clone();
        assert_eq!(played, vec![b"zero".to_vec(), b"bad".to_vec(), b"two".to_vec()]);

        let snap = stats.snapshot();
        assert_eq!(snap.audio_played, 2);
        assert_eq!(snap.audio_play_failed, 1);
        assert_eq!(snap.in_flight, 0);
        assert!(!snap.is_playing);

        let mut finished = Vec::new();
        while let Ok(event) = event_rx.try_recv() {
            if let PipelineEvent::PlaybackFinished { sequence_id, success } = event {
                finished.push((sequence_id, success));
            }
        }
        assert_eq!(finished, vec![(0, true), (1, false), (2, true)]);
    }

    #[tokio::test]
    async fn timeout_forces_device_stop() {
        let device = Arc::new(RecordingDevice::default());
        let sink = Arc::new(ReorderSink::new(2));
        let stats = StatsHandle::new();
        let (events, _event_rx) = EventSender::channel();
        admit(&stats, 2);

        sink.publish(audio(0, b"stall"), Duration::from_secs(30)).await;
        sink.publish(audio(1, b"one"), Duration::from_secs(30)).await;
        sink.close();

        worker(Arc::clone(&device), sink, stats.clone(), events)
            .run()
            .await;

        assert_eq!(*device.stops.lock().unwrap(), 1);
        let snap = stats.snapshot();
        assert_eq!(snap.audio_play_failed, 1);
        assert_eq!(snap.audio_played, 1);
    }

    #[tokio::test]
    async fn failure_marker_surfaces_text() {
        let device = Arc::new(RecordingDevice::default());
        let sink = Arc::new(ReorderSink::new(2));
        let stats = StatsHandle::new();
        let (events, mut event_rx) = EventSender::channel();
        admit(&stats, 1);

        sink.publish(
            SinkItem::Failed {
                sequence_id: 0,
                text: "Read this instead.".to_string(),
                error: "engine down".to_string(),
            },
            Duration::from_secs(30),
        )
        .await;
        sink.close();

        worker(Arc::clone(&device), sink, stats.clone(), events)
            .run()
            .await;

        assert!(device.played.lock().unwrap().is_empty());
        let snap = stats.snapshot();
        assert_eq!(snap.fallbacks, 1);
        assert_eq!(snap.in_flight, 0);
        assert!(matches!(
            event_rx.try_recv(),
            Ok(PipelineEvent::Fallback { sequence_id: 0, ref text }) if text == "Read this instead."
        ));
    }

    #[tokio::test]
    async fn pause_after_segment_when_enabled() {
        let device = Arc::new(RecordingDevice::default());
        let sink = Arc::new(ReorderSink::new(2));
        let stats = StatsHandle::new();
        let (events, _event_rx) = EventSender::channel();
        admit(&stats, 1);

        sink.publish(audio(0, b"zero"), Duration::from_secs(30)).await;
        sink.close();

        let mut worker = worker(device, sink, stats, events);
        worker.sentence_pauses = true;
        let started = Instant::now();
        worker.run().await;
        assert!(started.elapsed() >= SHORT_PAUSE);
    }
}

//! Synthesis worker pool.
//!
//! `synthesis_workers` tasks share one text receiver. Each takes an
//! utterance, calls the engine under `generation_timeout`, retries on
//! failure, and publishes exactly one [`SinkItem`] for the slot: audio on
//! success, a failure marker once every attempt has failed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::backend::SynthesisEngine;
use crate::channel::SharedTextReceiver;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::events::{EventSender, PipelineEvent};
use crate::reorder::{ProducerGuard, ReorderSink};
use crate::stats::StatsHandle;
use crate::types::{AudioSegment, SinkItem, Utterance};

/// Timeout and retry knobs a worker needs, copied out of the config.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub generation_timeout: Duration,
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl From<&PipelineConfig> for RetryPolicy {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            generation_timeout: config.generation_timeout,
            max_attempts: config.max_attempts(),
            retry_delay: config.retry_delay,
        }
    }
}

/// Run `engine.synthesize(text)` under the policy's timeout, retrying
/// until it succeeds or attempts run out.
///
/// Returns the payload and the duration of the successful attempt, or the
/// last attempt's error.
pub async fn synthesize_with_retry(
    engine: &dyn SynthesisEngine,
    text: &str,
    policy: RetryPolicy,
    stats: &StatsHandle,
) -> Result<(Bytes, Duration), PipelineError> {
    let mut attempt = 1;
    loop {
        let started = Instant::now();
        let error = match tokio::time::timeout(policy.generation_timeout, engine.synthesize(text))
            .await
        {
            Ok(Ok(payload)) => return Ok((payload, started.elapsed())),
            Ok(Err(e)) => e,
            Err(_) => PipelineError::SynthesisTimeout(policy.generation_timeout),
        };

        if attempt >= policy.max_attempts {
            return Err(error);
        }

        warn!(attempt, max_attempts = policy.max_attempts, error = %error, "Synthesis attempt failed, retrying");
        stats.record_retry();
        attempt += 1;
        tokio::time::sleep(policy.retry_delay).await;
    }
}

/// One synthesis task. Holds a producer registration on the sink for as
/// long as it runs.
pub(crate) struct SynthesisWorker {
    pub worker_id: usize,
    pub engine: Arc<dyn SynthesisEngine>,
    pub receiver: SharedTextReceiver,
    pub sink: Arc<ReorderSink>,
    pub producer: ProducerGuard,
    pub stats: StatsHandle,
    pub events: EventSender,
    pub policy: RetryPolicy,
    pub sink_wait_log_interval: Duration,
    pub cancel: CancellationToken,
}

impl SynthesisWorker {
    pub(crate) async fn run(self) {
        debug!(worker_id = self.worker_id, "Synthesis worker started");

        loop {
            let next = tokio::select! {
                biased;

                () = self.cancel.cancelled() => break,

                utterance = recv(&self.receiver) => utterance,
            };
            let Some(utterance) = next else {
                break;
            };

            let sequence_id = utterance.sequence_id;
            let item = tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    debug!(sequence_id, "Abandoning synthesis on stop");
                    break;
                }

                item = self.process(utterance) => item,
            };

            tokio::select! {
                biased;

                () = self.cancel.cancelled() => break,

                () = self.sink.publish(item, self.sink_wait_log_interval) => {}
            }
        }

        debug!(worker_id = self.worker_id, "Synthesis worker exiting");
        drop(self.producer);
    }

    async fn process(&self, utterance: Utterance) -> SinkItem {
        let sequence_id = utterance.sequence_id;
        debug!(sequence_id, worker_id = self.worker_id, "Synthesizing utterance");

        match synthesize_with_retry(self.engine.as_ref(), &utterance.text, self.policy, &self.stats)
            .await
        {
            Ok((payload, elapsed)) => {
                self.stats.record_generated(elapsed);
                self.events.emit(PipelineEvent::SegmentSynthesized {
                    sequence_id,
                    bytes: payload.len(),
                    elapsed,
                });
                debug!(
                    sequence_id,
                    bytes = payload.len(),
                    elapsed_ms = elapsed.as_millis(),
                    "Utterance synthesized"
                );
                let pause_after = utterance.pause_hint();
                SinkItem::Audio(AudioSegment {
                    sequence_id,
                    text: utterance.text,
                    payload,
                    synth_duration: elapsed,
                    enqueued_at: utterance.enqueued_at,
                    pause_after,
                })
            }
            Err(e) => {
                self.stats.record_synthesis_failed();
                error!(
                    sequence_id,
                    attempts = self.policy.max_attempts,
                    error = %e,
                    "Synthesis failed on every attempt"
                );
                SinkItem::Failed {
                    sequence_id,
                    text: utterance.text,
                    error: e.to_string(),
                }
            }
        }
    }
}

async fn recv(receiver: &SharedTextReceiver) -> Option<Utterance> {
    receiver.lock().await.recv().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockSynthesisEngine;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            generation_timeout: Duration::from_millis(50),
            max_attempts,
            retry_delay: Duration::from_millis(1),
        }
    }

    struct StalledEngine;

    #[async_trait::async_trait]
    impl SynthesisEngine for StalledEngine {
        async fn synthesize(&self, _text: &str) -> Result<Bytes, PipelineError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Bytes::new())
        }
    }

    #[tokio::test]
    async fn first_success_needs_no_retry() {
        let mut engine = MockSynthesisEngine::new();
        engine
            .expect_synthesize()
            .times(1)
            .returning(|text| Ok(Bytes::copy_from_slice(text.as_bytes())));
        let stats = StatsHandle::new();

        let (payload, _) = synthesize_with_retry(&engine, "hello", policy(3), &stats)
            .await
            .unwrap();
        assert_eq!(&payload[..], b"hello");
        assert_eq!(stats.snapshot().synthesis_retries, 0);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let mut engine = MockSynthesisEngine::new();
        let mut seq = mockall::Sequence::new();
        engine
            .expect_synthesize()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Err(PipelineError::synthesis("engine busy")));
        engine
            .expect_synthesize()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(Bytes::from_static(b"pcm")));
        let stats = StatsHandle::new();

        let result = synthesize_with_retry(&engine, "hello", policy(3), &stats).await;
        assert!(result.is_ok());
        assert_eq!(stats.snapshot().synthesis_retries, 2);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let mut engine = MockSynthesisEngine::new();
        engine
            .expect_synthesize()
            .times(3)
            .returning(|_| Err(PipelineError::synthesis("no voice loaded")));
        let stats = StatsHandle::new();

        let err = synthesize_with_retry(&engine, "hello", policy(3), &stats)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Synthesis(ref m) if m == "no voice loaded"));
        assert_eq!(stats.snapshot().synthesis_retries, 2);
    }

    #[tokio::test]
    async fn stalled_engine_times_out() {
        let stats = StatsHandle::new();
        let started = Instant::now();

        let err = synthesize_with_retry(&StalledEngine, "hello", policy(2), &stats)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::SynthesisTimeout(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(stats.snapshot().synthesis_retries, 1);
    }

    #[tokio::test]
    async fn worker_publishes_failure_marker_and_closes_sink() {
        let mut engine = MockSynthesisEngine::new();
        engine
            .expect_synthesize()
            .returning(|_| Err(PipelineError::synthesis("boom")));

        let stats = StatsHandle::new();
        let (events, mut event_rx) = EventSender::channel();
        let sink = Arc::new(ReorderSink::new(2));
        let (tx, rx) = tokio::sync::mpsc::channel(2);
        let worker = SynthesisWorker {
            worker_id: 0,
            engine: Arc::new(engine),
            receiver: Arc::new(tokio::sync::Mutex::new(rx)),
            producer: sink.register_producer(),
            sink: Arc::clone(&sink),
            stats: stats.clone(),
            events,
            policy: policy(2),
            sink_wait_log_interval: Duration::from_secs(30),
            cancel: CancellationToken::new(),
        };

        tx.send(Utterance::new(0, "Lost words.".to_string()))
            .await
            .unwrap();
        drop(tx);
        worker.run().await;

        match sink.take_next_in_order().await {
            Some(SinkItem::Failed { sequence_id, text, .. }) => {
                assert_eq!(sequence_id, 0);
                assert_eq!(text, "Lost words.");
            }
            other => panic!("expected failure marker, got {other:?}"),
        }
        assert!(sink.take_next_in_order().await.is_none());
        assert_eq!(stats.snapshot().audio_failed, 1);
        assert!(event_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancelled_worker_exits_without_publishing() {
        let sink = Arc::new(ReorderSink::new(2));
        let (events, _event_rx) = EventSender::channel();
        let (tx, rx) = tokio::sync::mpsc::channel(2);
        let cancel = CancellationToken::new();
        let worker = SynthesisWorker {
            worker_id: 0,
            engine: Arc::new(StalledEngine),
            receiver: Arc::new(tokio::sync::Mutex::new(rx)),
            producer: sink.register_producer(),
            sink: Arc::clone(&sink),
            stats: StatsHandle::new(),
            events,
            policy: RetryPolicy {
                generation_timeout: Duration::from_secs(60),
                max_attempts: 1,
                retry_delay: Duration::ZERO,
            },
            sink_wait_log_interval: Duration::from_secs(30),
            cancel: cancel.clone(),
        };

        tx.send(Utterance::new(0, "Never spoken.".to_string()))
            .await
            .unwrap();
        let handle = tokio::spawn(worker.run());
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker should stop promptly")
            .unwrap();
        assert_eq!(sink.depth(), 0);
        assert!(sink.is_closed());
    }
}

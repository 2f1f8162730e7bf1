//! Streaming pipeline controller. Owns the segmenter and the conduits,
//! and spawns the worker tasks.
//!
//! ```text
//!   feed ─▶ Segmenter ─▶ TextChannel ─▶ SynthesisWorker × N
//!                                            │ (any order)
//!                                            ▼
//!                         PlaybackWorker ◀─ ReorderSink (in order)
//! ```
//!
//! The controller is driven through `&mut self`; only the workers run
//! concurrently, and they never see the controller itself. They share the
//! conduits, the stats handle, the event sender and a cancellation token.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::{PlaybackDevice, SynthesisEngine};
use crate::channel::{TextChannel, text_channel};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Rejection};
use crate::events::{EventSender, PipelineEvent, PipelineState};
use crate::playback::PlaybackWorker;
use crate::reorder::ReorderSink;
use crate::segmenter::Segmenter;
use crate::stats::{PipelineStats, StatsHandle};
use crate::synthesis::{RetryPolicy, SynthesisWorker};
use crate::types::Utterance;

/// How often [`StreamingPipeline::wait_until_finished`] re-checks.
const FINISH_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Outcome of a `feed` or `flush` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AdmissionReport {
    /// Utterances that entered the text channel.
    pub admitted: usize,
    /// Utterances refused by admission control.
    pub dropped: usize,
}

impl AdmissionReport {
    /// Utterances produced by the segmenter for this call.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.admitted + self.dropped
    }
}

/// The streaming text-to-speech pipeline.
pub struct StreamingPipeline {
    config: PipelineConfig,
    state: PipelineState,

    engine: Arc<dyn SynthesisEngine>,
    device: Arc<dyn PlaybackDevice>,

    segmenter: Segmenter,
    /// Present only while running; dropping it lets the workers drain.
    channel: Option<TextChannel>,
    sink: Arc<ReorderSink>,

    stats: StatsHandle,
    events: EventSender,

    workers: Vec<JoinHandle<()>>,
    cancel: CancellationToken,

    /// Raised when a worker task is found dead while running.
    worker_failed: AtomicBool,
}

impl StreamingPipeline {
    /// Create a pipeline in the `Idle` state.
    ///
    /// Returns the pipeline and a receiver for [`PipelineEvent`]s. Once
    /// [`EVENT_CAPACITY`](crate::events::EVENT_CAPACITY) events sit
    /// undrained, new ones are dropped.
    #[must_use]
    pub fn new(
        config: PipelineConfig,
        engine: Arc<dyn SynthesisEngine>,
        device: Arc<dyn PlaybackDevice>,
    ) -> (Self, mpsc::Receiver<PipelineEvent>) {
        let (events, event_rx) = EventSender::channel();
        let pipeline = Self {
            segmenter: Segmenter::new(config.min_utterance_chars, config.max_utterance_chars),
            sink: Arc::new(ReorderSink::new(config.audio_capacity)),
            config,
            state: PipelineState::Idle,
            engine,
            device,
            channel: None,
            stats: StatsHandle::new(),
            events,
            workers: Vec::new(),
            cancel: CancellationToken::new(),
            worker_failed: AtomicBool::new(false),
        };
        (pipeline, event_rx)
    }

    #[must_use]
    pub const fn state(&self) -> PipelineState {
        self.state
    }

    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Replace the configuration used by the next `start()`.
    pub fn reconfigure(&mut self, config: PipelineConfig) -> Result<(), PipelineError> {
        if self.state == PipelineState::Running {
            return Err(PipelineError::AlreadyRunning);
        }
        config.validate()?;
        self.config = config;
        Ok(())
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Validate the configuration, reset every conduit and spawn the
    /// workers.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        if matches!(self.state, PipelineState::Running | PipelineState::Stopping) {
            return Err(PipelineError::AlreadyRunning);
        }
        self.config.validate()?;

        info!(
            workers = self.config.synthesis_workers,
            text_capacity = self.config.text_capacity,
            audio_capacity = self.config.audio_capacity,
            max_in_flight = self.config.max_in_flight,
            "Starting streaming pipeline"
        );

        // Nothing from an earlier run may leak into this one.
        self.segmenter.reset();
        self.segmenter
            .set_bounds(self.config.min_utterance_chars, self.config.max_utterance_chars);
        self.stats.clear_in_flight();
        if self.sink_capacity_changed() {
            self.sink = Arc::new(ReorderSink::new(self.config.audio_capacity));
        }
        self.sink.reset(self.segmenter.next_sequence());
        self.cancel = CancellationToken::new();
        self.worker_failed.store(false, Ordering::SeqCst);

        let (channel, receiver) = text_channel(
            self.config.text_capacity,
            self.config.max_in_flight,
            self.stats.clone(),
        );
        self.channel = Some(channel);

        let policy = RetryPolicy::from(&self.config);
        self.workers = (0..self.config.synthesis_workers)
            .map(|worker_id| {
                let worker = SynthesisWorker {
                    worker_id,
                    engine: Arc::clone(&self.engine),
                    receiver: Arc::clone(&receiver),
                    sink: Arc::clone(&self.sink),
                    producer: self.sink.register_producer(),
                    stats: self.stats.clone(),
                    events: self.events.clone(),
                    policy,
                    sink_wait_log_interval: self.config.sink_wait_log_interval,
                    cancel: self.cancel.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        let playback = PlaybackWorker {
            device: Arc::clone(&self.device),
            sink: Arc::clone(&self.sink),
            stats: self.stats.clone(),
            events: self.events.clone(),
            playback_timeout: self.config.playback_timeout,
            sentence_pauses: self.config.sentence_pauses,
            cancel: self.cancel.clone(),
        };
        self.workers.push(tokio::spawn(playback.run()));

        self.set_state(PipelineState::Running);
        info!("Streaming pipeline started");
        Ok(())
    }

    /// Stop the pipeline and return the final statistics.
    ///
    /// Any residual text is flushed first. With `wait`, the workers get up
    /// to `timeout` to speak everything already admitted. Without `wait`
    /// (or once the timeout expires) in-flight work is abandoned and the
    /// device is stopped. Calling `stop` on a pipeline that is not running
    /// just returns the current statistics.
    pub async fn stop(&mut self, wait: bool, timeout: Duration) -> PipelineStats {
        if self.state != PipelineState::Running {
            return self.stats();
        }

        info!(wait, timeout_ms = timeout.as_millis(), "Stopping streaming pipeline");

        let flush_timeout = if wait {
            self.config.admission_timeout
        } else {
            Duration::ZERO
        };
        if let Some(utterance) = self.segmenter.flush() {
            self.admit(utterance, flush_timeout).await;
        }

        self.set_state(PipelineState::Stopping);
        // Closing the text channel lets every synthesis worker drain and exit.
        self.channel = None;

        let mut workers = std::mem::take(&mut self.workers);
        let drained = wait
            && tokio::time::timeout(timeout, async {
                for handle in &mut workers {
                    if let Err(e) = handle.await {
                        error!(error = %e, "Pipeline worker panicked");
                    }
                }
            })
            .await
            .is_ok();

        if !drained {
            if wait {
                warn!(
                    timeout_ms = timeout.as_millis(),
                    "Pipeline did not drain in time, abandoning in-flight work"
                );
            }
            self.cancel.cancel();
            self.device.stop();
            let abandoned = self.stats.snapshot().in_flight;
            if abandoned > 0 {
                info!(abandoned, "Discarding unspoken utterances");
            }
            self.stats.clear_in_flight();
        }

        self.set_state(PipelineState::Stopped);

        let stats = self.stats();
        info!(
            received = stats.text_received,
            dropped = stats.text_dropped,
            generated = stats.audio_generated,
            failed = stats.audio_failed,
            played = stats.audio_played,
            play_failed = stats.audio_play_failed,
            retries = stats.synthesis_retries,
            fallbacks = stats.fallbacks,
            generation_ms = stats.total_generation_time.as_millis(),
            playback_ms = stats.total_playback_time.as_millis(),
            "Streaming pipeline stopped"
        );
        stats
    }

    // ── Input ──────────────────────────────────────────────────────

    /// Feed a raw text fragment (e.g. one LLM token batch).
    ///
    /// Every utterance the fragment completes is offered to the text
    /// channel, waiting up to `admission_timeout` for each.
    pub async fn feed(&mut self, text: &str) -> Result<AdmissionReport, PipelineError> {
        self.ensure_running()?;

        let mut report = AdmissionReport::default();
        for utterance in self.segmenter.feed(text) {
            self.admit_into(&mut report, utterance).await;
        }
        Ok(report)
    }

    /// Force any buffered partial sentence out as a final utterance.
    ///
    /// Call once per logical input stream, after the last `feed`.
    pub async fn flush(&mut self) -> Result<AdmissionReport, PipelineError> {
        self.ensure_running()?;

        let mut report = AdmissionReport::default();
        if let Some(utterance) = self.segmenter.flush() {
            self.admit_into(&mut report, utterance).await;
        }
        Ok(report)
    }

    // ── Observability ──────────────────────────────────────────────

    /// Statistics snapshot with live conduit depths.
    #[must_use]
    pub fn stats(&self) -> PipelineStats {
        let mut stats = self.stats.snapshot();
        stats.text_queue_depth = self.channel.as_ref().map_or(0, TextChannel::depth);
        stats.audio_queue_depth = self.sink.depth();
        stats.workers_alive = self.check_workers();
        stats
    }

    /// A segment is sounding right now.
    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.stats.snapshot().is_playing
    }

    /// Everything admitted has been spoken (or surfaced as text) and the
    /// device is idle.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.stats().is_finished()
    }

    /// Poll until [`is_finished`](Self::is_finished) or `timeout` elapses.
    ///
    /// Returns `true` if the pipeline finished in time.
    pub async fn wait_until_finished(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.is_finished() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(FINISH_POLL_INTERVAL).await;
        }
    }

    /// Whether a worker task died while the pipeline was running.
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.check_workers();
        self.worker_failed.load(Ordering::SeqCst)
    }

    // ── Internal helpers ───────────────────────────────────────────

    fn ensure_running(&self) -> Result<(), PipelineError> {
        if self.state == PipelineState::Running {
            Ok(())
        } else {
            Err(PipelineError::NotRunning)
        }
    }

    async fn admit_into(&self, report: &mut AdmissionReport, utterance: Utterance) {
        if self.admit(utterance, self.config.admission_timeout).await {
            report.admitted += 1;
        } else {
            report.dropped += 1;
        }
    }

    /// Offer one utterance to the text channel. A rejected id is skipped
    /// in the sink so playback never waits for it.
    async fn admit(&self, utterance: Utterance, timeout: Duration) -> bool {
        let sequence_id = utterance.sequence_id;
        let Some(channel) = self.channel.as_ref() else {
            self.reject(sequence_id, Rejection::Closed);
            return false;
        };

        match channel.try_admit(utterance, timeout).await {
            Ok(()) => {
                debug!(sequence_id, "Utterance admitted");
                self.events
                    .emit(PipelineEvent::UtteranceAdmitted { sequence_id });
                true
            }
            Err(reason) => {
                self.reject(sequence_id, reason);
                false
            }
        }
    }

    fn reject(&self, sequence_id: u64, reason: Rejection) {
        warn!(sequence_id, reason = %reason, "Utterance dropped at admission");
        self.sink.skip(sequence_id);
        self.events
            .emit(PipelineEvent::UtteranceDropped { sequence_id, reason });
    }

    /// Count live workers; raise the error flag if one died while running.
    fn check_workers(&self) -> usize {
        let alive = self.workers.iter().filter(|h| !h.is_finished()).count();
        if self.state == PipelineState::Running
            && alive < self.workers.len()
            && !self.worker_failed.swap(true, Ordering::SeqCst)
        {
            error!(
                alive,
                spawned = self.workers.len(),
                "Pipeline worker exited while running"
            );
        }
        alive
    }

    fn sink_capacity_changed(&self) -> bool {
        // The sink is reused across runs; only a new capacity needs a new one.
        self.sink.capacity() != self.config.audio_capacity
    }

    /// Transition to a new state and emit a state-change event.
    fn set_state(&mut self, new_state: PipelineState) {
        if self.state != new_state {
            debug!(old = ?self.state, new = ?new_state, "Pipeline state transition");
            self.state = new_state;
            self.events.emit(PipelineEvent::StateChanged(new_state));
        }
    }
}

impl Drop for StreamingPipeline {
    fn drop(&mut self) {
        self.cancel.cancel();
        if self.state == PipelineState::Running {
            self.device.stop();
        }
    }
}

//! Simulated backends for the demo binary.
//!
//! Neither touches real audio: the engine "synthesizes" by sleeping and
//! echoing the text back as the payload, and the device prints the text and
//! sleeps for roughly as long as it would take to say it.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;
use voxstream_pipeline::{PipelineError, PlaybackDevice, SynthesisEngine};

/// Fixed cost of every synthesis call, on top of the per-character cost.
const SYNTH_BASE_LATENCY: Duration = Duration::from_millis(20);

// ── Simulated engine ───────────────────────────────────────────────

/// Engine whose latency grows with text length.
#[derive(Debug)]
pub struct SimulatedEngine {
    ms_per_char: u64,
    fail_every: Option<u64>,
    calls: AtomicU64,
}

impl SimulatedEngine {
    /// `fail_every = Some(n)` makes every nth call fail (n ≥ 1).
    #[must_use]
    pub const fn new(ms_per_char: u64, fail_every: Option<u64>) -> Self {
        Self {
            ms_per_char,
            fail_every,
            calls: AtomicU64::new(0),
        }
    }

    fn latency(&self, text: &str) -> Duration {
        let chars = text.chars().count() as u64;
        SYNTH_BASE_LATENCY + Duration::from_millis(chars * self.ms_per_char)
    }
}

#[async_trait]
impl SynthesisEngine for SimulatedEngine {
    async fn synthesize(&self, text: &str) -> Result<Bytes, PipelineError> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        tokio::time::sleep(self.latency(text)).await;

        if let Some(n) = self.fail_every.filter(|&n| n > 0)
            && call % n == 0
        {
            return Err(PipelineError::synthesis(format!(
                "simulated failure on call {call}"
            )));
        }
        Ok(Bytes::copy_from_slice(text.as_bytes()))
    }
}

// ── Console device ─────────────────────────────────────────────────

/// "Speaker" that writes each segment to stdout.
#[derive(Debug)]
pub struct ConsoleDevice {
    ms_per_char: u64,
    interrupt: Notify,
}

impl ConsoleDevice {
    #[must_use]
    pub fn new(ms_per_char: u64) -> Self {
        Self {
            ms_per_char,
            interrupt: Notify::new(),
        }
    }

    fn speaking_time(&self, text: &str) -> Duration {
        Duration::from_millis(text.chars().count() as u64 * self.ms_per_char)
    }
}

#[async_trait]
impl PlaybackDevice for ConsoleDevice {
    async fn play(&self, payload: &[u8]) -> Result<(), PipelineError> {
        let text = String::from_utf8_lossy(payload);
        let interrupted = self.interrupt.notified();

        {
            let mut out = std::io::stdout().lock();
            writeln!(out, "🔊 {text}")
                .and_then(|()| out.flush())
                .map_err(|e| PipelineError::playback(e.to_string()))?;
        }

        tokio::select! {
            () = tokio::time::sleep(self.speaking_time(&text)) => Ok(()),
            () = interrupted => Err(PipelineError::playback("interrupted")),
        }
    }

    fn stop(&self) {
        self.interrupt.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn every_nth_call_fails() {
        let engine = SimulatedEngine::new(0, Some(3));
        let outcomes: Vec<bool> = (0..6)
            .map(|_| tokio_test::block_on(engine.synthesize("hi")).is_ok())
            .collect();
        assert_eq!(outcomes, vec![true, true, false, true, true, false]);
    }

    #[test]
    fn engine_echoes_text() {
        let engine = SimulatedEngine::new(0, None);
        let payload = tokio_test::block_on(engine.synthesize("Hello there.")).unwrap();
        assert_eq!(&payload[..], b"Hello there.");
    }

    #[test]
    fn latency_grows_with_length() {
        let engine = SimulatedEngine::new(2, None);
        assert!(engine.latency("a longer sentence") > engine.latency("short"));
    }

    #[tokio::test]
    async fn stop_interrupts_playback() {
        let device = Arc::new(ConsoleDevice::new(10_000));
        let playing = {
            let device = Arc::clone(&device);
            tokio::spawn(async move { device.play(b"a very long sentence").await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        device.stop();

        let result = tokio::time::timeout(Duration::from_secs(1), playing)
            .await
            .expect("stop should end playback")
            .unwrap();
        assert!(result.is_err());
    }
}

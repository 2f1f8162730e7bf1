//! Bounded text channel with admission control.
//!
//! Two gates stand between the segmenter and the synthesis workers:
//!
//! 1. A global in-flight cap (`max_in_flight`): admitted-but-unresolved
//!    utterances are counted across the whole pipeline, so total memory
//!    (text plus synthesized audio) stays bounded no matter how fast the
//!    individual stages drain.
//! 2. The channel capacity (`text_capacity`): on full, admission waits up
//!    to the caller's timeout and then drops the utterance instead of
//!    buffering it.
//!
//! Dropping is deliberate. Under sustained overload the newest sentences
//! are shed and the upstream producer is never blocked indefinitely.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};

use crate::error::Rejection;
use crate::stats::StatsHandle;
use crate::types::Utterance;

/// Receiving end shared by all synthesis workers.
pub type SharedTextReceiver = Arc<Mutex<mpsc::Receiver<Utterance>>>;

/// Sending end of the text channel, owned by the controller.
#[derive(Debug)]
pub struct TextChannel {
    tx: mpsc::Sender<Utterance>,
    stats: StatsHandle,
    max_in_flight: usize,
}

/// Create a text channel and the receiver the synthesis pool will share.
#[must_use]
pub fn text_channel(
    capacity: usize,
    max_in_flight: usize,
    stats: StatsHandle,
) -> (TextChannel, SharedTextReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let channel = TextChannel {
        tx,
        stats,
        max_in_flight,
    };
    (channel, Arc::new(Mutex::new(rx)))
}

impl TextChannel {
    /// Try to admit an utterance, waiting at most `timeout` for room.
    ///
    /// The in-flight slot is reserved before waiting so concurrent callers
    /// can never overshoot the cap; it is handed back on rejection.
    pub async fn try_admit(
        &self,
        utterance: Utterance,
        timeout: Duration,
    ) -> Result<(), Rejection> {
        if !self.stats.try_reserve_slot(self.max_in_flight) {
            return Err(Rejection::InFlightLimit);
        }

        match self.tx.send_timeout(utterance, timeout).await {
            Ok(()) => {
                self.stats.record_admitted();
                Ok(())
            }
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => {
                self.stats.release_rejected();
                Err(Rejection::ChannelFull)
            }
            Err(mpsc::error::SendTimeoutError::Closed(_)) => {
                self.stats.release_rejected();
                Err(Rejection::Closed)
            }
        }
    }

    /// Utterances currently queued.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utterance(sequence_id: u64) -> Utterance {
        Utterance::new(sequence_id, format!("Sentence number {sequence_id}."))
    }

    #[tokio::test]
    async fn admits_until_full_then_drops() {
        let stats = StatsHandle::new();
        let (channel, _rx) = text_channel(2, 100, stats.clone());
        let timeout = Duration::from_millis(10);

        assert_eq!(channel.try_admit(utterance(0), timeout).await, Ok(()));
        assert_eq!(channel.try_admit(utterance(1), timeout).await, Ok(()));
        assert_eq!(
            channel.try_admit(utterance(2), timeout).await,
            Err(Rejection::ChannelFull)
        );
        assert_eq!(channel.depth(), 2);

        let snap = stats.snapshot();
        assert_eq!(snap.text_received, 2);
        assert_eq!(snap.text_dropped, 1);
        assert_eq!(snap.in_flight, 2);
    }

    #[tokio::test]
    async fn in_flight_cap_rejects_without_waiting() {
        let stats = StatsHandle::new();
        let (channel, rx) = text_channel(8, 1, stats.clone());

        assert!(channel.try_admit(utterance(0), Duration::ZERO).await.is_ok());
        // Draining the channel does not free the slot: it is still in flight.
        assert!(rx.lock().await.recv().await.is_some());
        assert_eq!(
            channel.try_admit(utterance(1), Duration::from_secs(60)).await,
            Err(Rejection::InFlightLimit)
        );
        assert_eq!(stats.snapshot().text_dropped, 1);
    }

    #[tokio::test]
    async fn closed_channel_rejects() {
        let stats = StatsHandle::new();
        let (channel, rx) = text_channel(2, 10, stats.clone());
        drop(rx);

        assert_eq!(
            channel.try_admit(utterance(0), Duration::ZERO).await,
            Err(Rejection::Closed)
        );
        assert_eq!(stats.snapshot().in_flight, 0);
    }

    #[tokio::test]
    async fn waiting_admission_succeeds_when_space_frees() {
        let stats = StatsHandle::new();
        let (channel, rx) = text_channel(1, 10, stats);
        assert!(channel.try_admit(utterance(0), Duration::ZERO).await.is_ok());

        let consumer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            rx.lock().await.recv().await.map(|u| u.sequence_id)
        });

        assert!(
            channel
                .try_admit(utterance(1), Duration::from_secs(5))
                .await
                .is_ok()
        );
        assert_eq!(consumer.await.unwrap(), Some(0));
    }
}

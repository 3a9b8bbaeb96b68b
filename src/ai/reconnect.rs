//! Exponential backoff reconnect with resume token and inbound-audio replay
//! (§4.6).

use crate::{
    config::{AiConfig, ReconnectConfig},
    error::{BridgeError, BridgeResult},
};
use std::collections::VecDeque;
use tracing::{info, instrument, warn};

use super::client::{self, AiReceiver, AiSender};

/// Why a reconnect is being attempted, distinguishing a voluntary handoff
/// (uncounted) from an actual failure (counted against the attempt budget).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectReason {
    TransientFailure,
    Handoff,
}

/// Bounded ring of recently-sent inbound audio, replayed to a freshly
/// (re)connected AI socket to cover any gap (§4.6, §5: ≈1 s retained).
pub struct ReplayRing {
    frames: VecDeque<Vec<u8>>,
    capacity: usize,
}

impl ReplayRing {
    pub fn new(capacity_frames: usize) -> Self {
        Self { frames: VecDeque::with_capacity(capacity_frames), capacity: capacity_frames }
    }

    pub fn push(&mut self, pcm16_le: Vec<u8>) {
        if self.frames.len() >= self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(pcm16_le);
    }

    pub fn drain(&mut self) -> Vec<Vec<u8>> {
        self.frames.drain(..).collect()
    }
}

/// Tracks the attempt budget and drives reconnect-with-backoff. Does not own
/// the socket itself; callers swap in the returned client.
pub struct ReconnectSupervisor {
    config: ReconnectConfig,
    attempts: u32,
}

impl ReconnectSupervisor {
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config, attempts: 0 }
    }

    /// `session_handoff` never counts against the failure budget (§4.6).
    pub fn reset_for_handoff(&mut self) {
        self.attempts = 0;
    }

    #[instrument(skip(self, ai_config, replay))]
    pub async fn reconnect(
        &mut self,
        ai_config: &AiConfig,
        call_id: &str,
        reason: ReconnectReason,
        replay: &mut ReplayRing,
    ) -> BridgeResult<(AiSender, AiReceiver)> {
        if reason == ReconnectReason::TransientFailure {
            self.attempts += 1;
            if self.attempts > self.config.max_attempts {
                return Err(BridgeError::ReconnectExhausted(self.config.max_attempts));
            }
        }

        if reason == ReconnectReason::Handoff {
            info!("Reconnecting to AI immediately for handoff, no backoff");
        } else {
            let delay = self.config.base_delay * 2u32.pow(self.attempts.saturating_sub(1));
            info!("Reconnecting to AI in {delay:?} (attempt {}/{})", self.attempts, self.config.max_attempts);
            tokio::time::sleep(delay).await;
        }

        let (mut sender, receiver) = client::connect(ai_config).await?;
        sender.send_init(call_id, None, None, true).await?;

        let pending = replay.drain();
        for frame in pending {
            if let Err(e) = sender.send_audio(&frame).await {
                warn!("failed to replay buffered inbound audio after reconnect: {e}");
                break;
            }
        }

        Ok((sender, receiver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_ring_drops_oldest_past_capacity() {
        let mut ring = ReplayRing::new(2);
        ring.push(vec![1]);
        ring.push(vec![2]);
        ring.push(vec![3]);
        let drained = ring.drain();
        assert_eq!(drained, vec![vec![2], vec![3]]);
    }

    #[test]
    fn drain_empties_the_ring() {
        let mut ring = ReplayRing::new(4);
        ring.push(vec![9]);
        let _ = ring.drain();
        assert!(ring.drain().is_empty());
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts() {
        let mut supervisor = ReconnectSupervisor::new(ReconnectConfig {
            max_attempts: 2,
            base_delay: std::time::Duration::from_millis(1),
        });
        let mut replay = ReplayRing::new(10);
        let ai_config = AiConfig { ws_url: "ws://127.0.0.1:1".to_owned(), api_key: "x".to_owned(), ..Default::default() };

        // Both attempts will fail to connect (nothing listening), but we only
        // care that the budget is enforced before a third attempt is made.
        for _ in 0..2 {
            let _ = supervisor.reconnect(&ai_config, "ast-1", ReconnectReason::TransientFailure, &mut replay).await;
        }
        let result = supervisor.reconnect(&ai_config, "ast-1", ReconnectReason::TransientFailure, &mut replay).await;
        assert!(matches!(result, Err(BridgeError::ReconnectExhausted(2))));
    }

    #[test]
    fn handoff_resets_attempt_counter() {
        let mut supervisor = ReconnectSupervisor::new(ReconnectConfig { max_attempts: 1, base_delay: std::time::Duration::from_millis(1) });
        supervisor.attempts = 1;
        supervisor.reset_for_handoff();
        assert_eq!(supervisor.attempts, 0);
    }
}

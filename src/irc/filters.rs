/// Message-flow filters — helpers that sit between two message channels.
use tokio::sync::mpsc;
use tokio::time::{interval_at, Duration, Instant};

use super::message::Message;

/// Settings for [`rate_limit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    /// Quota available before the first refresh.
    pub init: usize,
    /// Ceiling the quota refreshes up to.
    pub max: usize,
    /// How often one unit of quota is restored.
    pub refresh: Duration,
}

impl Default for RateLimit {
    fn default() -> Self {
        // Enough burst for a client joining a handful of channels, then
        // roughly one message per second.
        RateLimit {
            init: 8,
            max: 8,
            refresh: Duration::from_secs(1),
        }
    }
}

/// Copy messages from `src` to `dst`, rate-limiting the flow.
///
/// A quota starts at `limit.init` and is restored by 1 every
/// `limit.refresh`, up to `limit.max`. Each copied message costs 1; at
/// zero the flow stalls until the next refresh. When `src` closes, `dst`
/// is closed (by drop) and the task returns.
pub async fn rate_limit(mut src: mpsc::Receiver<Message>, dst: mpsc::Sender<Message>, limit: RateLimit) {
    let mut left = limit.init.min(limit.max);
    let mut ticker = interval_at(Instant::now() + limit.refresh, limit.refresh);
    loop {
        let msg = tokio::select! {
            _ = dst.closed() => return,
            _ = ticker.tick() => {
                left = (left + 1).min(limit.max);
                continue;
            }
            msg = src.recv() => msg,
        };
        let Some(msg) = msg else { return };
        if dst.send(msg).await.is_err() {
            return;
        }
        left = left.saturating_sub(1);
        if left == 0 {
            // Out of quota: stall everything until the next refresh.
            ticker.tick().await;
            left = 1;
        }
    }
}

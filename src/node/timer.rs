use std::time::Duration;

use rand::Rng;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::config::{MAX_TIMEOUT_MS, MIN_TIMEOUT_MS, TICKER_INTERVAL_MS};

/// Generates a random heartbeat/election timeout, scaled by the
/// performance multiplier.
pub(super) fn random_timeout(performance: u64) -> Duration {
    let mut rng = rand::thread_rng();
    let timeout_ms = rng.gen_range(MIN_TIMEOUT_MS * performance..=MAX_TIMEOUT_MS * performance);
    Duration::from_millis(timeout_ms)
}

/// Creates the periodic ticker used by leaders (heartbeats) and candidates
/// (vote request retransmission). The first tick fires one full period
/// after creation.
pub(super) fn message_ticker(performance: u64) -> Interval {
    let period = Duration::from_millis(TICKER_INTERVAL_MS * performance);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

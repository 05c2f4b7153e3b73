//! Rate-limit pause applied by workers before each download.

use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Fallback seed; xorshift never leaves the all-zero state.
const ZERO_SEED: u64 = 0x9E37_79B9_7F4A_7C15;

/// Fixed delay plus uniform jitter in `[0, jitter]`.
///
/// Shared by all workers; the generator state advances atomically.
#[derive(Debug)]
pub struct Sleeper {
    delay: Duration,
    jitter: Duration,
    state: AtomicU64,
}

impl Sleeper {
    pub fn new(delay: Duration, jitter: Duration) -> Self {
        Self::with_seed(delay, jitter, RandomState::new().hash_one(0u8))
    }

    pub fn with_seed(delay: Duration, jitter: Duration, seed: u64) -> Self {
        let seed = if seed == 0 { ZERO_SEED } else { seed };
        Self {
            delay,
            jitter,
            state: AtomicU64::new(seed),
        }
    }

    /// A sleeper that never waits.
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn next_delay(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.delay;
        }
        self.delay + Duration::from_millis(self.next_u64() % (jitter_ms + 1))
    }

    pub async fn pause(&self) {
        let delay = self.next_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn next_u64(&self) -> u64 {
        let previous = match self
            .state
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |x| Some(xorshift(x)))
        {
            Ok(x) | Err(x) => x,
        };
        xorshift(previous)
    }
}

fn xorshift(mut x: u64) -> u64 {
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x
}

//! Randomized replication delay.
//!
//! Secondaries wait a random amount of time before storing a replicated
//! entry, which makes replication lag observable. The random source belongs
//! to the node and is seeded once at startup.

use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::JitterConfig;

/// Per-node source of replication delays
#[derive(Debug)]
pub struct Jitter {
    config: JitterConfig,
    rng: Mutex<StdRng>,
}

impl Jitter {
    /// Jitter seeded from OS entropy
    pub fn new(config: JitterConfig) -> Self {
        Self {
            config,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Jitter with a fixed seed, for reproducible delays
    pub fn seeded(config: JitterConfig, seed: u64) -> Self {
        Self {
            config,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Draw the next delay, uniformly from the configured bounds
    pub fn next_delay(&self) -> Duration {
        let min = millis(self.config.min);
        let max = millis(self.config.max);
        if min >= max {
            return self.config.min;
        }

        Duration::from_millis(self.rng.lock().gen_range(min..=max))
    }

    /// Sleep for the next delay without holding a worker thread
    pub async fn wait(&self) -> Duration {
        let delay = self.next_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        delay
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_stays_in_bounds() {
        let config = JitterConfig {
            min: Duration::from_millis(100),
            max: Duration::from_millis(300),
        };
        let jitter = Jitter::new(config);
        for _ in 0..500 {
            let d = jitter.next_delay();
            assert!(d >= config.min && d <= config.max, "{:?} out of bounds", d);
        }
    }

    #[test]
    fn test_seeded_is_reproducible() {
        let config = JitterConfig::default();
        let a = Jitter::seeded(config, 42);
        let b = Jitter::seeded(config, 42);
        let xs: Vec<_> = (0..16).map(|_| a.next_delay()).collect();
        let ys: Vec<_> = (0..16).map(|_| b.next_delay()).collect();
        assert_eq!(xs, ys);
    }

    #[tokio::test]
    async fn test_no_jitter_returns_immediately() {
        let jitter = Jitter::new(JitterConfig::none());
        assert_eq!(jitter.wait().await, Duration::ZERO);
    }
}

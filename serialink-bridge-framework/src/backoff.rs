//! Exponential backoff with jitter for reconnect and retry loops.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Backoff policy settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// First delay in milliseconds.
    #[serde(default = "default_initial_ms")]
    pub initial_ms: u64,

    /// Upper bound for any delay in milliseconds (jitter included).
    #[serde(default = "default_max_ms")]
    pub max_ms: u64,

    /// Growth factor applied after each attempt.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Random fraction of the delay added on top (0.0 disables jitter).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_initial_ms() -> u64 {
    1000
}

fn default_max_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.2
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: default_initial_ms(),
            max_ms: default_max_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

impl BackoffConfig {
    /// A policy with fixed delays and no jitter.
    pub fn fixed(delay: Duration) -> Self {
        let ms = delay.as_millis() as u64;
        Self {
            initial_ms: ms,
            max_ms: ms,
            multiplier: 1.0,
            jitter: 0.0,
        }
    }

    /// Start a fresh backoff sequence.
    pub fn start(&self) -> Backoff {
        Backoff::new(self.clone())
    }
}

/// Stateful backoff sequence. Call [`next_delay`](Self::next_delay) after
/// each failure and [`reset`](Self::reset) after a success.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    /// Create a sequence from a policy.
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Number of delays handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Forget previous failures.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Delay before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.base_delay_ms(self.attempt);
        self.attempt = self.attempt.saturating_add(1);

        let jitter = if self.config.jitter > 0.0 && base > 0.0 {
            rand::rng().random_range(0.0..=base * self.config.jitter)
        } else {
            0.0
        };

        let capped = (base + jitter).min(self.config.max_ms as f64);
        Duration::from_millis(capped as u64)
    }

    fn base_delay_ms(&self, attempt: u32) -> f64 {
        let growth = self.config.multiplier.max(1.0).powi(attempt.min(64) as i32);
        (self.config.initial_ms as f64 * growth).min(self.config.max_ms as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> BackoffConfig {
        BackoffConfig {
            initial_ms: 1000,
            max_ms: 30_000,
            multiplier: 2.0,
            jitter: 0.0,
        }
    }

    #[test]
    fn test_exponential_growth_until_cap() {
        let mut backoff = no_jitter().start();
        let delays: Vec<u64> = (0..7)
            .map(|_| backoff.next_delay().as_millis() as u64)
            .collect();

        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16_000, 30_000, 30_000]);
    }

    #[test]
    fn test_reset() {
        let mut backoff = no_jitter().start();
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempt(), 2);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let mut backoff = BackoffConfig::default().start();

        for attempt in 0..20 {
            let base = (1000.0 * 2f64.powi(attempt)).min(30_000.0);
            let delay = backoff.next_delay().as_millis() as f64;
            assert!(delay >= base.floor(), "delay {delay} below base {base}");
            assert!(delay <= 30_000.0, "delay {delay} above cap");
        }
    }

    #[test]
    fn test_fixed() {
        let mut backoff = BackoffConfig::fixed(Duration::from_millis(50)).start();
        assert_eq!(backoff.next_delay(), Duration::from_millis(50));
        assert_eq!(backoff.next_delay(), Duration::from_millis(50));
    }

    #[test]
    fn test_deserialize_defaults() {
        let config: BackoffConfig = json5::from_str("{ initial_ms: 250 }").unwrap();
        assert_eq!(config.initial_ms, 250);
        assert_eq!(config.max_ms, 30_000);
        assert_eq!(config.multiplier, 2.0);
    }
}

use std::time::Duration;

use tokio::time::Instant;

/// Exponential retry policy applied to every task wrapper.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    /// Give up once this much time has passed since the first failure.
    /// `None` retries forever.
    pub max_elapsed: Option<Duration>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(15),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            max_elapsed: None,
        }
    }
}

/// Per-wrapper backoff state.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    current: Duration,
    started: Option<Instant>,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            current: policy.initial,
            started: None,
        }
    }

    /// Delay before the next attempt, or `None` once the policy says stop.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let started = *self.started.get_or_insert_with(Instant::now);
        if let Some(limit) = self.policy.max_elapsed {
            if started.elapsed() >= limit {
                return None;
            }
        }
        let delay = self.current.min(self.policy.max);
        let next = self.current.mul_f64(self.policy.multiplier.max(1.0));
        self.current = next.min(self.policy.max);
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_to_cap() {
        let mut backoff = Backoff::new(BackoffPolicy::default());
        let delays: Vec<u64> = (0..5)
            .map(|_| backoff.next_delay().unwrap().as_secs())
            .collect();
        assert_eq!(delays, vec![15, 30, 60, 60, 60]);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_after_max_elapsed() {
        let mut backoff = Backoff::new(BackoffPolicy {
            max_elapsed: Some(Duration::from_secs(20)),
            ..BackoffPolicy::default()
        });
        assert!(backoff.next_delay().is_some());
        tokio::time::advance(Duration::from_secs(21)).await;
        assert_eq!(backoff.next_delay(), None);
    }
}

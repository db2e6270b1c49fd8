//! Adaptive Backoff
//!
//! A process-wide "backoff level" raised whenever a provider throttles us and
//! decayed one step per quiet interval. The rate limiter consults it to widen
//! the spacing between consecutive provider calls:
//! `spacing = base_interval * 2^level` (plus a little jitter).

use rand::Rng;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct BackoffSettings {
    pub max_level: u32,
    /// Quiet time after which the level drops by one
    pub decay_interval: Duration,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            max_level: 6,
            decay_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct LevelState {
    level: u32,
    changed_at: Instant,
}

pub struct AdaptiveBackoff {
    settings: BackoffSettings,
    state: Mutex<LevelState>,
}

impl AdaptiveBackoff {
    pub fn new(settings: BackoffSettings) -> Self {
        Self {
            settings,
            state: Mutex::new(LevelState {
                level: 0,
                changed_at: Instant::now(),
            }),
        }
    }

    /// Current level after applying time decay
    pub fn level(&self) -> u32 {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.decay(&mut state);
        state.level
    }

    pub fn set_level(&self, level: u32) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.level = level.min(self.settings.max_level);
        state.changed_at = Instant::now();
    }

    /// Called on a provider throttling signal
    pub fn raise(&self) -> u32 {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.decay(&mut state);
        state.level = (state.level + 1).min(self.settings.max_level);
        state.changed_at = Instant::now();
        warn!(level = state.level, "Provider throttling, raising backoff level");
        state.level
    }

    /// Multiplier applied to the base spacing
    pub fn multiplier(&self) -> u32 {
        1u32 << self.level().min(16)
    }

    fn decay(&self, state: &mut LevelState) {
        if state.level == 0 || self.settings.decay_interval.is_zero() {
            return;
        }
        let elapsed = state.changed_at.elapsed();
        let steps = (elapsed.as_millis() / self.settings.decay_interval.as_millis().max(1)) as u32;
        if steps > 0 {
            let new_level = state.level.saturating_sub(steps);
            debug!(from = state.level, to = new_level, "Backoff level decayed");
            state.level = new_level;
            state.changed_at += self.settings.decay_interval * steps;
        }
    }
}

impl Default for AdaptiveBackoff {
    fn default() -> Self {
        Self::new(BackoffSettings::default())
    }
}

/// Spaces provider calls according to the current backoff level
pub struct RateLimiter {
    base_interval: Duration,
    backoff: Arc<AdaptiveBackoff>,
    next_slot: tokio::sync::Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(base_interval: Duration, backoff: Arc<AdaptiveBackoff>) -> Self {
        Self {
            base_interval,
            backoff,
            next_slot: tokio::sync::Mutex::new(Instant::now()),
        }
    }

    pub fn backoff(&self) -> &Arc<AdaptiveBackoff> {
        &self.backoff
    }

    /// Current spacing between calls, without jitter
    pub fn spacing(&self) -> Duration {
        self.base_interval * self.backoff.multiplier()
    }

    /// Wait for the next call slot
    pub async fn acquire(&self) {
        let spacing = self.spacing();
        let jitter = if spacing.is_zero() {
            Duration::ZERO
        } else {
            let max_jitter = (spacing.as_millis() as u64 / 10).max(1);
            Duration::from_millis(rand::thread_rng().gen_range(0..=max_jitter))
        };

        let wait_until = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = if *next > now { *next } else { now };
            *next = slot + spacing + jitter;
            slot
        };

        if wait_until > Instant::now() {
            tokio::time::sleep_until(wait_until).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raise_is_capped() {
        let backoff = AdaptiveBackoff::new(BackoffSettings {
            max_level: 2,
            decay_interval: Duration::from_secs(600),
        });
        backoff.raise();
        backoff.raise();
        backoff.raise();
        assert_eq!(backoff.level(), 2);
        assert_eq!(backoff.multiplier(), 4);
    }

    #[tokio::test]
    async fn test_level_decays_over_time() {
        let backoff = AdaptiveBackoff::new(BackoffSettings {
            max_level: 5,
            decay_interval: Duration::from_millis(20),
        });
        backoff.set_level(3);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(backoff.level() <= 1);
    }

    #[tokio::test]
    async fn test_spacing_widens_with_level() {
        let backoff = Arc::new(AdaptiveBackoff::default());
        let limiter = RateLimiter::new(Duration::from_millis(10), Arc::clone(&backoff));
        assert_eq!(limiter.spacing(), Duration::from_millis(10));
        backoff.set_level(2);
        assert_eq!(limiter.spacing(), Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_acquire_spaces_calls() {
        let limiter = RateLimiter::new(Duration::from_millis(100), Arc::new(AdaptiveBackoff::default()));
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(200));
    }
}

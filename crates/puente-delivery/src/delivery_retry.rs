use std::time::Duration;

pub const DEFAULT_MAX_DELIVERY_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;

const MAX_BACKOFF_SHIFT: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Bounded exponential backoff for webhook delivery.
///
/// After failed attempt `n` (1-based) the sender waits `base_delay * 2^n`,
/// so the defaults wait 2s after the first failure and 4s after the second.
pub struct DeliveryRetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl DeliveryRetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Attempts actually allowed; a zero budget still makes one attempt.
    pub fn effective_max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt < self.effective_max_attempts()
    }

    pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
        let multiplier = 1_u32 << attempt.min(MAX_BACKOFF_SHIFT);
        self.base_delay.saturating_mul(multiplier)
    }
}

impl Default for DeliveryRetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_DELIVERY_ATTEMPTS,
            Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
        )
    }
}

/// Exponential retry backoff for transient failures.
///
/// The n-th consecutive failure waits `base * 2^(n-1)`, capped at `max`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_secs: u64,
    pub max_secs: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self { base_secs: 24 * 60 * 60, max_secs: 7 * 24 * 60 * 60 }
    }
}

impl BackoffPolicy {
    pub fn delay_seconds(&self, failure_count: u32) -> u64 {
        if failure_count == 0 {
            return 0;
        }
        let shift = (failure_count - 1).min(63);
        self.base_secs.saturating_mul(1u64 << shift).min(self.max_secs)
    }

    pub fn retry_at(&self, now_unix: i64, failure_count: u32) -> i64 {
        let delay = i64::try_from(self.delay_seconds(failure_count)).unwrap_or(i64::MAX);
        now_unix.saturating_add(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_from_base_and_caps() {
        let p = BackoffPolicy { base_secs: 60, max_secs: 600 };
        assert_eq!(p.delay_seconds(0), 0);
        assert_eq!(p.delay_seconds(1), 60);
        assert_eq!(p.delay_seconds(2), 120);
        assert_eq!(p.delay_seconds(4), 480);
        assert_eq!(p.delay_seconds(5), 600);
        assert_eq!(p.delay_seconds(200), 600);
    }

    #[test]
    fn default_is_one_day_capped_at_a_week() {
        let p = BackoffPolicy::default();
        assert_eq!(p.delay_seconds(1), 86_400);
        assert_eq!(p.delay_seconds(4), 604_800);
        assert_eq!(p.retry_at(1_000, 1), 87_400);
    }
}

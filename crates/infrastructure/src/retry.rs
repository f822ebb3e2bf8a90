use std::time::Duration;

use rand::Rng;

/// 重连等待策略
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Backoff {
    /// 指数增长，封顶 `max`
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    pub fn exponential(base: Duration, max: Duration) -> Self {
        Backoff::Exponential {
            base,
            max: max.max(base),
        }
    }

    /// 第 `attempt` 次重试前的等待时间（从 1 开始）
    pub fn delay_at(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Exponential { base, max } => {
                let exp = std::cmp::min(attempt.saturating_sub(1), 20);
                let factor = 1u32 << exp;
                base.saturating_mul(factor).min(*max)
            }
        }
    }

    /// 在 `delay_at` 基础上随机取 50%~100%，避免大量客户端同时重连
    pub fn jittered_delay_at(&self, attempt: u32) -> Duration {
        let delay = self.delay_at(attempt);
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        if millis < 2 {
            return delay;
        }
        Duration::from_millis(rand::rng().random_range(millis / 2..=millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_until_capped() {
        let backoff = Backoff::exponential(Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(backoff.delay_at(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_at(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_at(4), Duration::from_millis(800));
        assert_eq!(backoff.delay_at(5), Duration::from_secs(1));
        assert_eq!(backoff.delay_at(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn test_max_never_below_base() {
        let backoff = Backoff::exponential(Duration::from_secs(2), Duration::from_secs(1));
        assert_eq!(backoff.delay_at(1), Duration::from_secs(2));
    }

    #[test]
    fn test_jitter_stays_within_half_to_full() {
        let backoff = Backoff::exponential(Duration::from_millis(400), Duration::from_secs(10));
        for _ in 0..50 {
            let delay = backoff.jittered_delay_at(2);
            assert!(delay >= Duration::from_millis(400));
            assert!(delay <= Duration::from_millis(800));
        }
    }
}

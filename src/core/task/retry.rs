use std::time::Duration;
use crate::core::error::DownloadError;

/// 重试策略
#[derive(Debug, Clone, PartialEq)]
pub struct RetryStrategy {
    /// 同一子区间允许的失败次数，第 `max_retries` 次失败后放弃
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64, // 抖动因子，避免多个分段同时重试
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryStrategy {
    /// 不等待的策略，测试里使用
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    /// 已经失败 `failures` 次后是否还有预算
    pub fn has_budget(&self, failures: u32) -> bool {
        failures < self.max_retries
    }

    /// `retry_count` 是这次失败之前已经重试的次数
    pub fn should_retry(&self, error: &DownloadError, retry_count: u32) -> bool {
        self.has_budget(retry_count + 1) && error.is_retryable()
    }

    /// 第 `retry_count` 次重试前的等待时间（指数退避加抖动）
    pub fn get_delay(&self, retry_count: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let delay_secs = self.base_delay.as_secs_f64()
            * self.backoff_multiplier.powi(retry_count.saturating_sub(1) as i32);

        let jitter = delay_secs * self.jitter_factor * (rand::random::<f64>() - 0.5);
        let final_delay = (delay_secs + jitter).max(0.1); // 最小延迟100ms

        Duration::from_secs_f64(final_delay).min(self.max_delay)
    }
}

/// 重试上下文，每个分段各自持有一份
#[derive(Debug)]
pub struct RetryContext {
    pub strategy: RetryStrategy,
    pub retry_count: u32,
    pub last_error: Option<DownloadError>,
    pub total_retry_time: Duration,
}

impl RetryContext {
    pub fn new(strategy: RetryStrategy) -> Self {
        Self {
            strategy,
            retry_count: 0,
            last_error: None,
            total_retry_time: Duration::ZERO,
        }
    }

    pub fn should_retry(&self, error: &DownloadError) -> bool {
        self.strategy.should_retry(error, self.retry_count)
    }

    /// 算上当前这次，已经失败的次数
    pub fn failures(&self) -> u32 {
        self.retry_count + 1
    }

    /// 记录一次失败，返回下一次重试前的等待时间
    pub fn increment_retry(&mut self, error: DownloadError) -> Duration {
        self.retry_count += 1;
        self.last_error = Some(error);

        let delay = self.strategy.get_delay(self.retry_count);
        self.total_retry_time += delay;
        delay
    }

    pub fn reset(&mut self) {
        self.retry_count = 0;
        self.last_error = None;
        self.total_retry_time = Duration::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_budget() {
        let strategy = RetryStrategy::default();
        let err = DownloadError::Network("reset".into());
        // 预算 3：第一、二次失败后重试，第三次失败放弃
        assert!(strategy.should_retry(&err, 0));
        assert!(strategy.should_retry(&err, 1));
        assert!(!strategy.should_retry(&err, 2));
        assert!(!strategy.should_retry(&DownloadError::Status(404), 0));
        assert!(strategy.has_budget(2));
        assert!(!strategy.has_budget(3));
    }

    #[test]
    fn test_delay_is_bounded() {
        let strategy = RetryStrategy {
            max_delay: Duration::from_secs(5),
            ..RetryStrategy::default()
        };
        let first = strategy.get_delay(1);
        assert!(first >= Duration::from_millis(900) && first <= Duration::from_millis(1100));
        assert_eq!(strategy.get_delay(10), Duration::from_secs(5));
        assert_eq!(RetryStrategy::immediate(3).get_delay(2), Duration::ZERO);
    }

    #[test]
    fn test_retry_context() {
        let mut ctx = RetryContext::new(RetryStrategy::immediate(3));
        let err = DownloadError::Timeout;
        assert!(ctx.should_retry(&err));
        ctx.increment_retry(err.clone());
        assert!(ctx.should_retry(&err));
        ctx.increment_retry(err.clone());
        assert!(!ctx.should_retry(&err));
        assert_eq!(ctx.failures(), 3);
        assert_eq!(ctx.last_error, Some(DownloadError::Timeout));
        ctx.reset();
        assert_eq!(ctx.retry_count, 0);
    }
}

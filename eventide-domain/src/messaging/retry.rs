//! 重试调度（RetryPolicy / RetryScheduler）
//!
//! 处理失败后由调度器显式重投：等待退避时长，把 `x-retry-count` 加一后
//! 直接发布回订阅自己的队列，再确认原投递。不依赖中间件的 requeue 语义。
//!
use super::message::Message;
use super::transport::{Connection, DEFAULT_EXCHANGE, DeliveryMode};
use crate::error::DomainResult as Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 指数退避：`delay(n) = min(initial_delay * multiplier^n, max_delay)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { next_count: u32, delay: Duration },
    DeadLetter,
}

impl RetryPolicy {
    /// 第 `retry_count` 次失败后的等待时长
    pub fn delay(&self, retry_count: u32) -> Duration {
        let exponent = i32::try_from(retry_count).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        match Duration::try_from_secs_f64(secs) {
            Ok(delay) => delay.min(self.max_delay),
            Err(_) => self.max_delay,
        }
    }

    pub fn decide(&self, retry_count: u32) -> RetryDecision {
        if retry_count < self.max_retries {
            RetryDecision::Retry {
                next_count: retry_count + 1,
                delay: self.delay(retry_count),
            }
        } else {
            RetryDecision::DeadLetter
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetryScheduler {
    policy: RetryPolicy,
}

impl RetryScheduler {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn decide(&self, retry_count: u32) -> RetryDecision {
        self.policy.decide(retry_count)
    }

    /// 以新的重试次数重新发布到订阅队列（默认交换机直达）
    pub async fn redeliver(
        &self,
        conn: &dyn Connection,
        queue: &str,
        message: &Message,
        next_count: u32,
    ) -> Result<()> {
        let body = message.clone().with_retry_count(next_count).to_bytes()?;
        conn.publish(DEFAULT_EXCHANGE, queue, &body, DeliveryMode::Persistent)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_sequence_doubles_until_capped() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (0..5).map(|n| policy.delay(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16]);
        assert_eq!(policy.delay(5), Duration::from_secs(30));
        assert_eq!(policy.delay(40), Duration::from_secs(30));
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn decide_stops_at_max_retries() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(0),
            RetryDecision::Retry {
                next_count: 1,
                delay: Duration::from_secs(1)
            }
        );
        assert_eq!(
            policy.decide(2),
            RetryDecision::Retry {
                next_count: 3,
                delay: Duration::from_secs(4)
            }
        );
        assert_eq!(policy.decide(3), RetryDecision::DeadLetter);
        assert_eq!(policy.decide(7), RetryDecision::DeadLetter);

        let none = RetryPolicy {
            max_retries: 0,
            ..RetryPolicy::default()
        };
        assert_eq!(none.decide(0), RetryDecision::DeadLetter);
    }

    #[test]
    fn policy_deserializes_with_defaults() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"max_retries": 5}"#).unwrap();
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.initial_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
    }
}

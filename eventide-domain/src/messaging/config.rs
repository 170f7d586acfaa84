use super::retry::RetryPolicy;
use bon::Builder;
use serde::Deserialize;
use std::time::Duration;

/// 消息客户端配置
#[derive(Debug, Clone, PartialEq, Builder, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// 逻辑命名空间：交换机名与队列名前缀
    #[builder(into, default = "eventide".to_string())]
    pub namespace: String,
    #[builder(default)]
    pub retry: RetryPolicy,
    /// 两次重连尝试之间的固定间隔
    #[builder(default = Duration::from_secs(5))]
    pub reconnect_delay: Duration,
    #[builder(default = 10)]
    pub max_reconnect_attempts: u32,
    #[builder(default = Duration::from_secs(30))]
    pub health_check_interval: Duration,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

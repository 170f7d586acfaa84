//! 消息处理器（MessageHandler）
//!
//! 订阅方实现的消费逻辑。处理器可能被多次调用（至少一次投递），需保证幂等。
//!
use super::message::Message;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// 单次投递的上下文
#[derive(Debug, Clone)]
pub struct DeliveryContext {
    topic: String,
    queue: String,
    retry_count: u32,
    redelivered: bool,
    cancellation: CancellationToken,
}

impl DeliveryContext {
    pub fn new(
        topic: impl Into<String>,
        queue: impl Into<String>,
        retry_count: u32,
        redelivered: bool,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            topic: topic.into(),
            queue: queue.into(),
            retry_count,
            redelivered,
            cancellation,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// 已经历的重试次数，首次投递为 0
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// 中间件因连接断开而重新投递
    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    /// 投递所在连接关闭时取消；需要限时的处理器可据此提前结束
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// 处理器名称（用于日志与死信诊断）
    fn handler_name(&self) -> &str;

    async fn handle(&self, ctx: &DeliveryContext, message: &Message) -> anyhow::Result<()>;
}

//! 死信路由（DeadLetterRouter）
//!
//! 重试耗尽或无法解析的消息发布到保留主题 `dead_letter`，附带处理错误与
//! 原始投递信息。命名空间内的持久队列 `{namespace}.dead_letter` 始终绑定该主题。
//!
use super::message::{
    DEAD_LETTERED_AT_HEADER, ERROR_HEADER, Message, ORIGINAL_TOPIC_HEADER, QUEUE_HEADER,
};
use super::transport::{Connection, DeliveryMode};
use crate::error::DomainResult as Result;
use chrono::Utc;

pub const DEAD_LETTER_TOPIC: &str = "dead_letter";

#[derive(Debug, Clone)]
pub struct DeadLetterRouter {
    exchange: String,
}

impl DeadLetterRouter {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            exchange: namespace.into(),
        }
    }

    pub fn queue_name(&self) -> String {
        format!("{}.{DEAD_LETTER_TOPIC}", self.exchange)
    }

    /// 保留原消息的 id、类型、载荷与头部，追加诊断信息
    pub fn dead_letter_message(
        &self,
        original: &Message,
        topic: &str,
        queue: &str,
        error: &str,
    ) -> Message {
        original
            .clone()
            .with_header(ERROR_HEADER, error)
            .with_header(ORIGINAL_TOPIC_HEADER, topic)
            .with_header(QUEUE_HEADER, queue)
            .with_header(DEAD_LETTERED_AT_HEADER, Utc::now().to_rfc3339())
    }

    pub async fn route(
        &self,
        conn: &dyn Connection,
        original: &Message,
        topic: &str,
        queue: &str,
        error: &str,
    ) -> Result<()> {
        let message = self.dead_letter_message(original, topic, queue, error);
        let body = message.to_bytes()?;
        conn.publish(&self.exchange, DEAD_LETTER_TOPIC, &body, DeliveryMode::Persistent)
            .await?;

        tracing::warn!(
            message_id = message.id(),
            message_type = message.message_type(),
            topic,
            retries = message.retry_count(),
            error,
            "message dead-lettered"
        );
        Ok(())
    }
}

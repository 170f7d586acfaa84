use crate::error::DomainResult;
use serde_json::Value;
use std::fmt;

/// 领域事件载荷需要满足的通用能力边界
///
/// 事件类型标签（`event_type`）随事件一起持久化，读取时由
/// [`EventDecoders`](crate::event_decoder::EventDecoders) 按标签选择解码器。
pub trait DomainEvent: Clone + fmt::Debug + Send + Sync + 'static {
    /// 事件类型标签（形如 `order.created`），需稳定、不随重构变化
    fn event_type(&self) -> &'static str;

    /// 将事件载荷编码为 JSON
    fn to_payload(&self) -> DomainResult<Value>;
}

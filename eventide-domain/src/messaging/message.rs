//! 消息（Message）线格式
//!
//! 投递到主题上的传输单元，JSON 形如 `{id, type, timestamp, payload, headers}`。
//! 头部携带重试次数与来源信息；消息与事件生命周期相互独立：
//! 事件存储是权威记录，消息只是一次投递。
//!
use crate::error::DomainResult as Result;
use crate::persist::SerializedEvent;
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use ulid::Ulid;

pub const RETRY_COUNT_HEADER: &str = "x-retry-count";
pub const SOURCE_HEADER: &str = "x-source";
pub const ORIGINAL_TOPIC_HEADER: &str = "x-original-topic";
pub const ERROR_HEADER: &str = "x-error";
pub const DEAD_LETTERED_AT_HEADER: &str = "x-dead-lettered-at";
pub const QUEUE_HEADER: &str = "x-queue";
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";
pub const EVENT_ID_HEADER: &str = "x-event-id";
pub const AGGREGATE_ID_HEADER: &str = "x-aggregate-id";
pub const AGGREGATE_VERSION_HEADER: &str = "x-aggregate-version";

/// 无法解析的消息体在死信中使用的类型标签
pub const UNDECODABLE_TYPE: &str = "undecodable";

#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
pub struct Message {
    #[builder(default = Ulid::new().to_string())]
    id: String,
    #[serde(rename = "type")]
    message_type: String,
    #[builder(default = Utc::now())]
    timestamp: DateTime<Utc>,
    payload: Value,
    #[serde(default)]
    #[builder(default)]
    headers: BTreeMap<String, Value>,
}

impl Message {
    pub fn new(message_type: impl Into<String>, payload: Value) -> Self {
        Message::builder()
            .message_type(message_type.into())
            .payload(payload)
            .build()
    }

    /// 将已提交事件包装为消息：类型即事件类型，来源写入头部
    pub fn from_event(event: &SerializedEvent) -> Self {
        let mut message = Message::new(event.event_type(), event.payload().clone())
            .with_header(SOURCE_HEADER, event.aggregate_type())
            .with_header(EVENT_ID_HEADER, event.event_id())
            .with_header(AGGREGATE_ID_HEADER, event.aggregate_id())
            .with_header(AGGREGATE_VERSION_HEADER, event.aggregate_version());

        if let Some(correlation_id) = event
            .metadata()
            .get("correlation_id")
            .and_then(Value::as_str)
        {
            message = message.with_header(CORRELATION_ID_HEADER, correlation_id);
        }
        message
    }

    /// 原始字节无法解析时，以有损字符串形式保留，便于死信排查
    pub fn undecodable(body: &[u8]) -> Self {
        Message::new(
            UNDECODABLE_TYPE,
            Value::String(String::from_utf8_lossy(body).into_owned()),
        )
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn headers(&self) -> &BTreeMap<String, Value> {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&Value> {
        self.headers.get(name)
    }

    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(Value::as_str)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// 缺失或无法识别为非负整数时视为 0
    pub fn retry_count(&self) -> u32 {
        self.headers
            .get(RETRY_COUNT_HEADER)
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(0)
    }

    pub fn with_retry_count(self, count: u32) -> Self {
        self.with_header(RETRY_COUNT_HEADER, count)
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.header_str(CORRELATION_ID_HEADER)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_slice(body: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_event::BusinessContext;
    use serde_json::json;

    #[test]
    fn wire_format_uses_type_field() {
        let message = Message::new("order.created", json!({"order_id": "o-1"}))
            .with_retry_count(2);
        let value: Value = serde_json::from_slice(&message.to_bytes().unwrap()).unwrap();

        assert_eq!(value["type"], "order.created");
        assert_eq!(value["payload"]["order_id"], "o-1");
        assert_eq!(value["headers"]["x-retry-count"], 2);
        assert!(value.get("message_type").is_none());
        assert!(value["id"].is_string());
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn retry_count_defaults_to_zero() {
        let raw = json!({
            "id": "m-1",
            "type": "ping",
            "timestamp": "2024-01-01T00:00:00Z",
            "payload": null
        });
        let message = Message::from_slice(raw.to_string().as_bytes()).unwrap();
        assert_eq!(message.retry_count(), 0);
        assert!(message.headers().is_empty());

        let bogus = message.with_header(RETRY_COUNT_HEADER, "three");
        assert_eq!(bogus.retry_count(), 0);
    }

    #[test]
    fn from_event_carries_provenance() {
        let biz = BusinessContext::builder()
            .correlation_id("cor-9".to_string())
            .build();
        let event = SerializedEvent::builder()
            .event_id("evt-1".to_string())
            .event_type("order.created".to_string())
            .aggregate_id("o-1".to_string())
            .aggregate_type("order".to_string())
            .aggregate_version(1)
            .occurred_at(Utc::now())
            .payload(json!({"order_id": "o-1", "total": 30}))
            .metadata(biz.to_value())
            .build();

        let message = Message::from_event(&event);
        assert_eq!(message.message_type(), "order.created");
        assert_eq!(message.payload()["total"], 30);
        assert_ne!(message.id(), "evt-1");
        assert_eq!(message.header_str(EVENT_ID_HEADER), Some("evt-1"));
        assert_eq!(message.header_str(SOURCE_HEADER), Some("order"));
        assert_eq!(message.header(AGGREGATE_VERSION_HEADER), Some(&json!(1)));
        assert_eq!(message.correlation_id(), Some("cor-9"));
        assert_eq!(message.retry_count(), 0);
    }

    #[test]
    fn undecodable_body_is_kept_lossily() {
        let message = Message::undecodable(b"not json \xff");
        assert_eq!(message.message_type(), UNDECODABLE_TYPE);
        assert!(message.payload().as_str().unwrap().starts_with("not json"));
        assert!(Message::from_slice(b"not json").is_err());
    }
}

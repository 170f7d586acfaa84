//! 事件持久化模型
//!
//! `SerializedEvent` 是已提交事件在存储层的标准形态（版本已分配）；
//! `NewEvent` 是待追加、尚未分配版本的事件；`AppendBatch` 将同一聚合的
//! 一组待追加事件与调用方期望的当前版本绑定在一起。
//!
use crate::{
    domain_event::{BusinessContext, DomainEvent},
    error::DomainResult,
};
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
pub struct SerializedEvent {
    /// 事件唯一标识符
    event_id: String,
    /// 事件类型标签，读取时据此选择解码器
    event_type: String,
    /// 全局事件位点，由存储层在持久化时赋值
    sequence_number: Option<i64>,
    /// 聚合 ID，标识事件所属的聚合根实例
    aggregate_id: String,
    /// 聚合类型，用于区分不同的聚合根
    aggregate_type: String,
    /// 聚合版本，由存储层在追加时分配，同一聚合内严格递增
    aggregate_version: usize,
    /// 事件发生时间
    occurred_at: DateTime<Utc>,
    /// 事件负载，存储事件的具体数据
    payload: Value,
    /// 业务上下文信息（关联/因果/主体）
    metadata: Value,
}

impl SerializedEvent {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn sequence_number(&self) -> Option<i64> {
        self.sequence_number
    }

    pub fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn aggregate_version(&self) -> usize {
        self.aggregate_version
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn metadata(&self) -> &Value {
        &self.metadata
    }

    /// 以存储分配的版本与位点提交一条待追加事件
    pub(crate) fn commit(
        event: NewEvent,
        aggregate_id: &str,
        aggregate_type: &str,
        aggregate_version: usize,
        sequence_number: Option<i64>,
    ) -> Self {
        Self {
            event_id: event.event_id,
            event_type: event.event_type,
            sequence_number,
            aggregate_id: aggregate_id.to_string(),
            aggregate_type: aggregate_type.to_string(),
            aggregate_version,
            occurred_at: event.occurred_at,
            payload: event.payload,
            metadata: event.metadata,
        }
    }
}

/// 待追加的事件（版本由存储分配）
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
pub struct NewEvent {
    #[builder(default = Ulid::new().to_string())]
    event_id: String,
    event_type: String,
    #[builder(default = Utc::now())]
    occurred_at: DateTime<Utc>,
    payload: Value,
    #[builder(default = Value::Object(Default::default()))]
    metadata: Value,
}

impl NewEvent {
    /// 从领域事件构造，`context` 作为 metadata 一并保存
    pub fn from_domain_event<E>(event: &E, context: &BusinessContext) -> DomainResult<Self>
    where
        E: DomainEvent,
    {
        Ok(NewEvent::builder()
            .event_type(event.event_type().to_string())
            .payload(event.to_payload()?)
            .metadata(context.to_value())
            .build())
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn metadata(&self) -> &Value {
        &self.metadata
    }
}

/// 同一聚合的一组待追加事件及乐观并发所需的期望版本
#[derive(Debug, Clone, PartialEq)]
pub struct AppendBatch {
    pub aggregate_id: String,
    pub aggregate_type: String,
    /// 调用方观察到的当前版本；新聚合为 0
    pub expected_version: usize,
    pub events: Vec<NewEvent>,
}

impl AppendBatch {
    pub fn new(
        aggregate_id: impl Into<String>,
        aggregate_type: impl Into<String>,
        expected_version: usize,
        events: Vec<NewEvent>,
    ) -> Self {
        Self {
            aggregate_id: aggregate_id.into(),
            aggregate_type: aggregate_type.into(),
            expected_version,
            events,
        }
    }

    /// 追加成功后该聚合的版本
    pub fn next_version(&self) -> usize {
        self.expected_version + self.events.len()
    }
}

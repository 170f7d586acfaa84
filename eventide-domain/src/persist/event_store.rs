//! 事件存储协议（EventStore）
//!
//! 按聚合维护只追加的事件日志：
//! - `append`：可同时包含多个聚合的批次，整体原子提交或整体失败；
//! - 乐观并发：批次携带期望版本，与存储中的当前版本不一致时返回
//!   `VersionConflict`，且不写入任何事件；
//! - `load_events`：按版本升序返回 `version > from_version` 的事件。
//!
use crate::{
    error::DomainResult as Result,
    persist::{AppendBatch, SerializedEvent},
};
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait EventStore: Send + Sync {
    /// 原子追加；返回已分配版本的事件（按批次顺序）
    async fn append(&self, batches: Vec<AppendBatch>) -> Result<Vec<SerializedEvent>>;

    /// 读取版本大于 `from_version` 的事件，按版本升序
    async fn load_events(&self, aggregate_id: &str, from_version: usize)
    -> Result<Vec<SerializedEvent>>;

    /// 聚合当前的最高版本；无事件时为 0
    async fn current_version(&self, aggregate_id: &str) -> Result<usize>;
}

#[async_trait]
impl<T> EventStore for Arc<T>
where
    T: EventStore + ?Sized,
{
    async fn append(&self, batches: Vec<AppendBatch>) -> Result<Vec<SerializedEvent>> {
        (**self).append(batches).await
    }

    async fn load_events(
        &self,
        aggregate_id: &str,
        from_version: usize,
    ) -> Result<Vec<SerializedEvent>> {
        (**self).load_events(aggregate_id, from_version).await
    }

    async fn current_version(&self, aggregate_id: &str) -> Result<usize> {
        (**self).current_version(aggregate_id).await
    }
}

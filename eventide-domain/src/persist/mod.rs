//! 持久化与事件溯源（persist）
//!
//! 定义事件存储、快照存储及其通用组合实现，支持：
//! - 按聚合的只追加事件日志与乐观并发（`EventStore`）；
//! - 快照读写与策略（`SnapshotStore`/`SnapshotPolicy`）；
//! - 快照 + 增量事件重建聚合（`rebuild`、`EventSourcedRepository`）；
//! - 内存实现（`InMemoryEventStore`）与 Postgres 实现（`infra-sqlx` 特性）。
//!
mod aggregate_repository;
mod event_store;
mod inmemory;
#[cfg(feature = "infra-sqlx")]
mod postgres;
mod serialized_event;
mod serialized_snapshot;
mod snapshot_store;

pub use aggregate_repository::{EventSourcedRepository, rebuild};
pub use event_store::EventStore;
pub use inmemory::InMemoryEventStore;
#[cfg(feature = "infra-sqlx")]
pub use postgres::{PgEventStore, SCHEMA};
pub use serialized_event::{AppendBatch, NewEvent, SerializedEvent};
pub use serialized_snapshot::SerializedSnapshot;
pub use snapshot_store::{SnapshotPolicy, SnapshotStore};

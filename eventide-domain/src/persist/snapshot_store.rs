//! 快照存储协议与策略
//!
//! 定义聚合快照读写接口（按聚合 ID 覆盖写入）与简单的落盘策略（按版本间隔）。
//!
use crate::{error::DomainResult as Result, persist::SerializedSnapshot};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// 读取聚合的最新快照
    async fn load_snapshot(&self, aggregate_id: &str) -> Result<Option<SerializedSnapshot>>;

    /// 覆盖写入快照；版本超过该聚合已追加的最高版本时返回 `InvalidSnapshot`
    async fn save_snapshot(&self, snapshot: SerializedSnapshot) -> Result<()>;
}

#[async_trait]
impl<T> SnapshotStore for Arc<T>
where
    T: SnapshotStore + ?Sized,
{
    async fn load_snapshot(&self, aggregate_id: &str) -> Result<Option<SerializedSnapshot>> {
        (**self).load_snapshot(aggregate_id).await
    }

    async fn save_snapshot(&self, snapshot: SerializedSnapshot) -> Result<()> {
        (**self).save_snapshot(snapshot).await
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotPolicy {
    #[default]
    Never,
    Every(usize),
}

impl SnapshotPolicy {
    pub fn should_snapshot(&self, version: usize) -> bool {
        match self {
            SnapshotPolicy::Never => false,
            SnapshotPolicy::Every(interval) => {
                let interval = (*interval).max(1);
                version > 0 && version.is_multiple_of(interval)
            }
        }
    }

    /// 一次提交跨越多个版本时，只要区间 (from, to] 内存在快照点即落盘
    pub fn crosses_snapshot_point(&self, from: usize, to: usize) -> bool {
        match self {
            SnapshotPolicy::Never => false,
            SnapshotPolicy::Every(interval) => {
                let interval = (*interval).max(1);
                to > from && to / interval > from / interval
            }
        }
    }
}

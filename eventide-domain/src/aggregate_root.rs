//! 聚合根编排器（AggregateRoot）
//!
//! 封装从“加载聚合 → 执行命令 → 追加事件 → 应用事件 → 按策略快照”的标准流程，
//! 以仓储实现（`EventSourcedRepository`）为依赖，便于在应用层直接调用。
//!
use crate::{
    aggregate::{Aggregate, VersionedAggregate},
    domain_event::BusinessContext,
    persist::{EventSourcedRepository, SerializedEvent},
};
use std::sync::Arc;

/// 面向应用层的聚合根编排器。
pub struct AggregateRoot<A>
where
    A: Aggregate,
{
    repo: Arc<EventSourcedRepository<A>>,
}

impl<A> Clone for AggregateRoot<A>
where
    A: Aggregate,
{
    fn clone(&self) -> Self {
        Self {
            repo: self.repo.clone(),
        }
    }
}

impl<A> AggregateRoot<A>
where
    A: Aggregate,
{
    /// 创建编排器实例
    pub fn new(repo: Arc<EventSourcedRepository<A>>) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &EventSourcedRepository<A> {
        &self.repo
    }

    /// 执行聚合命令：
    /// 1. 若不存在则以新聚合（版本 0）起步；
    /// 2. 执行命令得到新事件；
    /// 3. 以加载时的版本为期望版本追加事件（并发写入时返回 `VersionConflict`）；
    /// 4. 应用已提交事件并按策略落盘快照；
    /// 5. 返回已提交事件。
    ///
    /// 快照失败不影响命令结果：事件已提交，下次加载时仍可由事件重放得到状态。
    pub async fn execute(
        &self,
        aggregate_id: &str,
        command: A::Command,
        context: BusinessContext,
    ) -> Result<Vec<SerializedEvent>, A::Error> {
        let mut aggregate = match self.repo.load(aggregate_id).await? {
            Some(aggregate) => aggregate,
            None => VersionedAggregate::new(aggregate_id),
        };
        let previous_version = aggregate.version();

        let events = aggregate.state().execute(command)?;
        if events.is_empty() {
            return Ok(vec![]);
        }

        let committed = self.repo.append(&aggregate, &events, &context).await?;

        for (stored, event) in committed.iter().zip(&events) {
            aggregate.apply_committed(stored.aggregate_version(), event)?;
        }

        if let Err(err) = self.repo.snapshot_if_due(&aggregate, previous_version).await {
            tracing::warn!(
                aggregate_type = A::TYPE,
                aggregate_id,
                version = aggregate.version(),
                error = %err,
                "snapshot write failed"
            );
        }

        tracing::debug!(
            aggregate_type = A::TYPE,
            aggregate_id,
            version = aggregate.version(),
            events = committed.len(),
            "events committed"
        );

        Ok(committed)
    }
}

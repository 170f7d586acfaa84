//! 聚合仓储组合实现
//!
//! 基于事件存储（EventStore）与快照（SnapshotStore）的通用聚合仓储：
//! 重建 = 最新快照（若有）+ 按版本升序重放快照版本之后的事件。
//!
use crate::{
    aggregate::{Aggregate, VersionedAggregate},
    domain_event::BusinessContext,
    error::DomainResult as Result,
    event_decoder::EventDecoders,
    persist::{
        AppendBatch, EventStore, NewEvent, SerializedEvent, SerializedSnapshot, SnapshotPolicy,
        SnapshotStore,
    },
};
use std::sync::Arc;

/// 由快照与事件序列重建聚合。
///
/// 纯函数：只调用 `Aggregate::apply`，不读写任何外部状态。版本不大于起点
/// 的事件被跳过，因此对同一输入重复重放结果一致。
pub fn rebuild<A>(
    aggregate_id: &str,
    snapshot: Option<&SerializedSnapshot>,
    events: &[SerializedEvent],
    decoders: &EventDecoders<A::Event>,
) -> Result<VersionedAggregate<A>>
where
    A: Aggregate,
{
    let mut aggregate = match snapshot {
        Some(snapshot) => snapshot.to_aggregate::<A>()?,
        None => VersionedAggregate::new(aggregate_id),
    };

    for event in events {
        if event.aggregate_version() <= aggregate.version() {
            continue;
        }
        let payload = decoders.decode(event.event_type(), event.payload())?;
        aggregate.apply_committed(event.aggregate_version(), &payload)?;
    }

    Ok(aggregate)
}

/// 事件溯源聚合仓储
pub struct EventSourcedRepository<A>
where
    A: Aggregate,
{
    events: Arc<dyn EventStore>,
    snapshots: Arc<dyn SnapshotStore>,
    decoders: Arc<EventDecoders<A::Event>>,
    policy: SnapshotPolicy,
}

impl<A> EventSourcedRepository<A>
where
    A: Aggregate,
{
    pub fn new(
        events: Arc<dyn EventStore>,
        snapshots: Arc<dyn SnapshotStore>,
        decoders: Arc<EventDecoders<A::Event>>,
    ) -> Self {
        Self {
            events,
            snapshots,
            decoders,
            policy: SnapshotPolicy::Never,
        }
    }

    pub fn with_snapshot_policy(mut self, policy: SnapshotPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn decoders(&self) -> &EventDecoders<A::Event> {
        &self.decoders
    }

    /// 加载聚合；既无快照也无事件时返回 `None`
    pub async fn load(&self, aggregate_id: &str) -> Result<Option<VersionedAggregate<A>>> {
        let snapshot = self.snapshots.load_snapshot(aggregate_id).await?;
        let from_version = snapshot
            .as_ref()
            .map(SerializedSnapshot::aggregate_version)
            .unwrap_or(0);

        let events = self.events.load_events(aggregate_id, from_version).await?;
        if snapshot.is_none() && events.is_empty() {
            return Ok(None);
        }

        rebuild(aggregate_id, snapshot.as_ref(), &events, &self.decoders).map(Some)
    }

    /// 以聚合当前版本作为期望版本追加事件
    pub async fn append(
        &self,
        aggregate: &VersionedAggregate<A>,
        events: &[A::Event],
        context: &BusinessContext,
    ) -> Result<Vec<SerializedEvent>> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        let new_events = events
            .iter()
            .map(|e| NewEvent::from_domain_event(e, context))
            .collect::<Result<Vec<_>>>()?;

        self.events
            .append(vec![AppendBatch::new(
                aggregate.id(),
                A::TYPE,
                aggregate.version(),
                new_events,
            )])
            .await
    }

    /// 版本从 `previous_version` 推进到当前版本的过程中越过快照点时落盘快照
    pub async fn snapshot_if_due(
        &self,
        aggregate: &VersionedAggregate<A>,
        previous_version: usize,
    ) -> Result<bool> {
        if !self
            .policy
            .crosses_snapshot_point(previous_version, aggregate.version())
        {
            return Ok(false);
        }

        let snapshot = SerializedSnapshot::from_aggregate(aggregate)?;
        self.snapshots.save_snapshot(snapshot).await?;
        Ok(true)
    }
}

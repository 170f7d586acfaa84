//! 内存版事件存储（InMemoryEventStore）
//!
//! 同时实现 `EventStore` 与 `SnapshotStore`，所有状态由一把读写锁保护：
//! - 追加先整体校验所有批次的期望版本，再统一提交，保证原子性；
//! - 同一聚合的并发追加通过版本校验串行化，后到者得到 `VersionConflict`；
//! - 典型用途：测试环境、示例与本地开发。
//!
use crate::error::{DomainError, DomainResult as Result};
use crate::persist::{
    AppendBatch, EventStore, SerializedEvent, SerializedSnapshot, SnapshotStore,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct StoreState {
    streams: HashMap<String, Vec<SerializedEvent>>,
    snapshots: HashMap<String, SerializedSnapshot>,
    sequence: i64,
}

impl StoreState {
    fn head(&self, aggregate_id: &str) -> usize {
        self.streams
            .get(aggregate_id)
            .and_then(|s| s.last())
            .map(SerializedEvent::aggregate_version)
            .unwrap_or(0)
    }
}

#[derive(Default)]
pub struct InMemoryEventStore {
    state: RwLock<StoreState>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreState>> {
        self.state
            .read()
            .map_err(|_| DomainError::event_store("event store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreState>> {
        self.state
            .write()
            .map_err(|_| DomainError::event_store("event store lock poisoned"))
    }

    /// 已提交事件总数（跨聚合）
    pub fn event_count(&self) -> Result<usize> {
        Ok(self.read()?.streams.values().map(Vec::len).sum())
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, batches: Vec<AppendBatch>) -> Result<Vec<SerializedEvent>> {
        let mut state = self.write()?;

        // 第一阶段：校验。同一调用内可多次出现同一聚合，只要版本首尾相接
        let mut projected: HashMap<&str, usize> = HashMap::new();
        for batch in &batches {
            let current = match projected.get(batch.aggregate_id.as_str()) {
                Some(v) => *v,
                None => state.head(&batch.aggregate_id),
            };
            if current != batch.expected_version {
                return Err(DomainError::VersionConflict {
                    aggregate_id: batch.aggregate_id.clone(),
                    expected: batch.expected_version,
                    actual: current,
                });
            }
            projected.insert(batch.aggregate_id.as_str(), batch.next_version());
        }

        // 第二阶段：提交
        let mut committed = Vec::new();
        for batch in batches {
            let AppendBatch {
                aggregate_id,
                aggregate_type,
                expected_version,
                events,
            } = batch;

            let mut stream_events = Vec::with_capacity(events.len());
            for (offset, event) in events.into_iter().enumerate() {
                state.sequence += 1;
                stream_events.push(SerializedEvent::commit(
                    event,
                    &aggregate_id,
                    &aggregate_type,
                    expected_version + offset + 1,
                    Some(state.sequence),
                ));
            }

            committed.extend(stream_events.iter().cloned());
            state
                .streams
                .entry(aggregate_id)
                .or_default()
                .extend(stream_events);
        }

        Ok(committed)
    }

    async fn load_events(
        &self,
        aggregate_id: &str,
        from_version: usize,
    ) -> Result<Vec<SerializedEvent>> {
        let state = self.read()?;
        Ok(state
            .streams
            .get(aggregate_id)
            .map(|stream| {
                stream
                    .iter()
                    .filter(|e| e.aggregate_version() > from_version)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn current_version(&self, aggregate_id: &str) -> Result<usize> {
        Ok(self.read()?.head(aggregate_id))
    }
}

#[async_trait]
impl SnapshotStore for InMemoryEventStore {
    async fn load_snapshot(&self, aggregate_id: &str) -> Result<Option<SerializedSnapshot>> {
        Ok(self.read()?.snapshots.get(aggregate_id).cloned())
    }

    async fn save_snapshot(&self, snapshot: SerializedSnapshot) -> Result<()> {
        let mut state = self.write()?;
        let head = state.head(snapshot.aggregate_id());
        if snapshot.aggregate_version() > head {
            return Err(DomainError::InvalidSnapshot {
                aggregate_id: snapshot.aggregate_id().to_string(),
                snapshot_version: snapshot.aggregate_version(),
                head,
            });
        }

        state
            .snapshots
            .insert(snapshot.aggregate_id().to_string(), snapshot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::NewEvent;
    use serde_json::json;
    use std::sync::Arc;

    fn new_event(n: usize) -> NewEvent {
        NewEvent::builder()
            .event_type("counter.added".to_string())
            .payload(json!({ "amount": n }))
            .build()
    }

    fn batch(id: &str, expected: usize, count: usize) -> AppendBatch {
        AppendBatch::new(id, "counter", expected, (0..count).map(new_event).collect())
    }

    #[tokio::test]
    async fn versions_are_assigned_sequentially() {
        let store = InMemoryEventStore::new();
        let committed = store.append(vec![batch("c-1", 0, 3)]).await.unwrap();
        let versions: Vec<usize> = committed.iter().map(|e| e.aggregate_version()).collect();
        assert_eq!(versions, vec![1, 2, 3]);
        assert_eq!(store.current_version("c-1").await.unwrap(), 3);

        let tail = store.load_events("c-1", 1).await.unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].aggregate_version(), 2);
    }

    #[tokio::test]
    async fn multi_aggregate_append_is_all_or_nothing() {
        let store = InMemoryEventStore::new();
        store.append(vec![batch("b", 0, 1)]).await.unwrap();

        // "a" 合法，"b" 期望版本过期 -> 整体失败
        let err = store
            .append(vec![batch("a", 0, 2), batch("b", 0, 1)])
            .await
            .unwrap_err();
        match err {
            DomainError::VersionConflict {
                aggregate_id,
                expected,
                actual,
            } => {
                assert_eq!(aggregate_id, "b");
                assert_eq!(expected, 0);
                assert_eq!(actual, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(store.load_events("a", 0).await.unwrap().is_empty());
        assert_eq!(store.event_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn same_aggregate_twice_in_one_call_must_chain() {
        let store = InMemoryEventStore::new();
        store
            .append(vec![batch("c", 0, 2), batch("c", 2, 1)])
            .await
            .unwrap();
        assert_eq!(store.current_version("c").await.unwrap(), 3);

        let err = store
            .append(vec![batch("c", 3, 1), batch("c", 3, 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::VersionConflict { .. }));
        assert_eq!(store.current_version("c").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn snapshot_beyond_head_is_rejected() {
        let store = InMemoryEventStore::new();
        store.append(vec![batch("c", 0, 2)]).await.unwrap();

        let snap = |v: usize| {
            SerializedSnapshot::builder()
                .aggregate_id("c".to_string())
                .aggregate_type("counter".to_string())
                .aggregate_version(v)
                .payload(json!({"value": v}))
                .build()
        };

        let err = store.save_snapshot(snap(3)).await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidSnapshot { head: 2, .. }));

        store.save_snapshot(snap(1)).await.unwrap();
        store.save_snapshot(snap(2)).await.unwrap();
        let loaded = store.load_snapshot("c").await.unwrap().unwrap();
        assert_eq!(loaded.aggregate_version(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_to_one_aggregate_serialize() {
        let store = Arc::new(InMemoryEventStore::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.append(vec![batch("hot", 0, 1)]).await
            }));
        }

        let mut ok = 0;
        let mut conflicts = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => ok += 1,
                Err(DomainError::VersionConflict { .. }) => conflicts += 1,
                Err(other) => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(conflicts, 15);
        assert_eq!(store.load_events("hot", 0).await.unwrap().len(), 1);
    }
}

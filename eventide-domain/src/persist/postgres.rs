//! Postgres 事件存储（`infra-sqlx` 特性）
//!
//! - `events` 表以 `(aggregate_id, aggregate_version)` 唯一约束兜底并发写入；
//! - 追加在单个事务内完成：读取当前版本、比对期望版本、插入事件；
//! - 并发事务在提交时触发唯一约束冲突（23505），统一映射为 `VersionConflict`；
//! - `snapshots` 表按 `aggregate_id` 唯一，`ON CONFLICT` 覆盖写入。
//!
use crate::error::{DomainError, DomainResult as Result};
use crate::persist::{
    AppendBatch, EventStore, SerializedEvent, SerializedSnapshot, SnapshotStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use std::collections::HashMap;

/// 事件与快照表结构
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    sequence_number   BIGSERIAL PRIMARY KEY,
    event_id          TEXT        NOT NULL UNIQUE,
    event_type        TEXT        NOT NULL,
    aggregate_id      TEXT        NOT NULL,
    aggregate_type    TEXT        NOT NULL,
    aggregate_version BIGINT      NOT NULL CHECK (aggregate_version > 0),
    occurred_at       TIMESTAMPTZ NOT NULL,
    payload           JSONB       NOT NULL,
    metadata          JSONB       NOT NULL DEFAULT '{}'::jsonb,
    created_at        TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (aggregate_id, aggregate_version)
);
CREATE INDEX IF NOT EXISTS idx_events_event_type ON events (event_type);
CREATE INDEX IF NOT EXISTS idx_events_created_at ON events (created_at);

CREATE TABLE IF NOT EXISTS snapshots (
    aggregate_id      TEXT        PRIMARY KEY,
    aggregate_type    TEXT        NOT NULL,
    aggregate_version BIGINT      NOT NULL,
    payload           JSONB       NOT NULL,
    created_at        TIMESTAMPTZ NOT NULL
);
"#;

#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 幂等地创建表与索引
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    async fn head_in_tx(tx: &mut Transaction<'_, Postgres>, aggregate_id: &str) -> Result<usize> {
        let row = sqlx::query(
            "SELECT COALESCE(MAX(aggregate_version), 0) AS head FROM events WHERE aggregate_id = $1",
        )
        .bind(aggregate_id)
        .fetch_one(&mut **tx)
        .await?;
        to_version(row.try_get::<i64, _>("head")?)
    }
}

fn to_version(v: i64) -> Result<usize> {
    usize::try_from(v).map_err(|_| DomainError::Database {
        reason: format!("negative aggregate version: {v}"),
    })
}

fn to_db_version(v: usize) -> Result<i64> {
    i64::try_from(v).map_err(|_| DomainError::Database {
        reason: format!("aggregate version overflow: {v}"),
    })
}

fn row_to_event(row: &PgRow) -> Result<SerializedEvent> {
    Ok(SerializedEvent::builder()
        .event_id(row.try_get::<String, _>("event_id")?)
        .event_type(row.try_get::<String, _>("event_type")?)
        .sequence_number(row.try_get::<i64, _>("sequence_number")?)
        .aggregate_id(row.try_get::<String, _>("aggregate_id")?)
        .aggregate_type(row.try_get::<String, _>("aggregate_type")?)
        .aggregate_version(to_version(row.try_get::<i64, _>("aggregate_version")?)?)
        .occurred_at(row.try_get::<DateTime<Utc>, _>("occurred_at")?)
        .payload(row.try_get::<Value, _>("payload")?)
        .metadata(row.try_get::<Value, _>("metadata")?)
        .build())
}

/// 唯一约束冲突说明另一事务抢先提交了同一版本
fn map_append_error(err: sqlx::Error, aggregate_id: &str, expected: usize) -> DomainError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => DomainError::VersionConflict {
            aggregate_id: aggregate_id.to_string(),
            expected,
            actual: expected + 1,
        },
        _ => err.into(),
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn append(&self, batches: Vec<AppendBatch>) -> Result<Vec<SerializedEvent>> {
        let mut tx = self.pool.begin().await?;
        let mut projected: HashMap<String, usize> = HashMap::new();
        let mut committed = Vec::new();

        for batch in batches {
            let current = match projected.get(&batch.aggregate_id) {
                Some(v) => *v,
                None => Self::head_in_tx(&mut tx, &batch.aggregate_id).await?,
            };
            if current != batch.expected_version {
                tx.rollback().await?;
                return Err(DomainError::VersionConflict {
                    aggregate_id: batch.aggregate_id,
                    expected: batch.expected_version,
                    actual: current,
                });
            }
            projected.insert(batch.aggregate_id.clone(), batch.next_version());

            for (offset, event) in batch.events.into_iter().enumerate() {
                let version = batch.expected_version + offset + 1;
                let row = sqlx::query(
                    r#"
                    INSERT INTO events (
                        event_id, event_type, aggregate_id, aggregate_type,
                        aggregate_version, occurred_at, payload, metadata
                    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    RETURNING sequence_number
                    "#,
                )
                .bind(event.event_id())
                .bind(event.event_type())
                .bind(&batch.aggregate_id)
                .bind(&batch.aggregate_type)
                .bind(to_db_version(version)?)
                .bind(event.occurred_at())
                .bind(event.payload())
                .bind(event.metadata())
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| map_append_error(e, &batch.aggregate_id, batch.expected_version))?;

                let sequence = row.try_get::<i64, _>("sequence_number")?;
                committed.push(SerializedEvent::commit(
                    event,
                    &batch.aggregate_id,
                    &batch.aggregate_type,
                    version,
                    Some(sequence),
                ));
            }
        }

        // 提交阶段同样可能遇到并发写入
        tx.commit().await.map_err(|e| match committed.first() {
            Some(first) => map_append_error(e, first.aggregate_id(), first.aggregate_version() - 1),
            None => e.into(),
        })?;

        tracing::debug!(events = committed.len(), "events appended");
        Ok(committed)
    }

    async fn load_events(
        &self,
        aggregate_id: &str,
        from_version: usize,
    ) -> Result<Vec<SerializedEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT event_id, event_type, sequence_number, aggregate_id, aggregate_type,
                   aggregate_version, occurred_at, payload, metadata
            FROM events
            WHERE aggregate_id = $1 AND aggregate_version > $2
            ORDER BY aggregate_version ASC
            "#,
        )
        .bind(aggregate_id)
        .bind(to_db_version(from_version)?)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_event).collect()
    }

    async fn current_version(&self, aggregate_id: &str) -> Result<usize> {
        let row = sqlx::query(
            "SELECT COALESCE(MAX(aggregate_version), 0) AS head FROM events WHERE aggregate_id = $1",
        )
        .bind(aggregate_id)
        .fetch_one(&self.pool)
        .await?;
        to_version(row.try_get::<i64, _>("head")?)
    }
}

#[async_trait]
impl SnapshotStore for PgEventStore {
    async fn load_snapshot(&self, aggregate_id: &str) -> Result<Option<SerializedSnapshot>> {
        let row = sqlx::query(
            r#"
            SELECT aggregate_id, aggregate_type, aggregate_version, payload, created_at
            FROM snapshots
            WHERE aggregate_id = $1
            "#,
        )
        .bind(aggregate_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(SerializedSnapshot::builder()
                .aggregate_id(row.try_get::<String, _>("aggregate_id")?)
                .aggregate_type(row.try_get::<String, _>("aggregate_type")?)
                .aggregate_version(to_version(row.try_get::<i64, _>("aggregate_version")?)?)
                .payload(row.try_get::<Value, _>("payload")?)
                .created_at(row.try_get::<DateTime<Utc>, _>("created_at")?)
                .build())
        })
        .transpose()
    }

    async fn save_snapshot(&self, snapshot: SerializedSnapshot) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let head = Self::head_in_tx(&mut tx, snapshot.aggregate_id()).await?;
        if snapshot.aggregate_version() > head {
            tx.rollback().await?;
            return Err(DomainError::InvalidSnapshot {
                aggregate_id: snapshot.aggregate_id().to_string(),
                snapshot_version: snapshot.aggregate_version(),
                head,
            });
        }

        sqlx::query(
            r#"
            INSERT INTO snapshots (aggregate_id, aggregate_type, aggregate_version, payload, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (aggregate_id) DO UPDATE SET
                aggregate_type = EXCLUDED.aggregate_type,
                aggregate_version = EXCLUDED.aggregate_version,
                payload = EXCLUDED.payload,
                created_at = EXCLUDED.created_at
            "#,
        )
        .bind(snapshot.aggregate_id())
        .bind(snapshot.aggregate_type())
        .bind(to_db_version(snapshot.aggregate_version())?)
        .bind(snapshot.payload())
        .bind(snapshot.created_at())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

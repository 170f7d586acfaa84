use crate::{
    aggregate::{Aggregate, VersionedAggregate},
    error::{DomainError, DomainResult as Result},
};
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 聚合快照：截至 `aggregate_version` 的完整状态，每个聚合仅保留一份
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
pub struct SerializedSnapshot {
    aggregate_id: String,
    aggregate_type: String,
    aggregate_version: usize,
    payload: Value,
    #[builder(default = Utc::now())]
    created_at: DateTime<Utc>,
}

impl SerializedSnapshot {
    pub fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn aggregate_version(&self) -> usize {
        self.aggregate_version
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// 将快照反序列化为聚合实例
    pub fn to_aggregate<A>(&self) -> Result<VersionedAggregate<A>>
    where
        A: Aggregate,
    {
        if A::TYPE != self.aggregate_type {
            return Err(DomainError::TypeMismatch {
                expected: A::TYPE.to_string(),
                found: self.aggregate_type.clone(),
            });
        }

        let state: A = serde_json::from_value(self.payload.clone())?;
        Ok(VersionedAggregate::from_parts(
            self.aggregate_id.clone(),
            self.aggregate_version,
            state,
        ))
    }

    /// 从聚合实例创建快照
    pub fn from_aggregate<A>(aggregate: &VersionedAggregate<A>) -> Result<Self>
    where
        A: Aggregate,
    {
        Ok(Self {
            aggregate_id: aggregate.id().to_string(),
            aggregate_type: A::TYPE.to_string(),
            aggregate_version: aggregate.version(),
            payload: serde_json::to_value(aggregate.state())?,
            created_at: Utc::now(),
        })
    }
}

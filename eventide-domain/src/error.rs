//! 领域层统一错误定义
//!
//! 聚焦序列化/解码、事件存储、消息传输、命令与状态校验等最小必要集合，
//! 便于在各实现层统一转换为 `DomainError`。
//!
use thiserror::Error;

/// 统一错误类型（基础库最小必要集）
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DomainError {
    // --- 序列化/事件解码 ---
    #[error("serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },
    #[error("unknown event type: {event_type}")]
    UnknownEventType { event_type: String },
    #[error("type mismatch: expected={expected}, found={found}")]
    TypeMismatch { expected: String, found: String },

    // --- 事件存储/快照 ---
    #[error("version conflict: aggregate={aggregate_id}, expected={expected}, actual={actual}")]
    VersionConflict {
        aggregate_id: String,
        expected: usize,
        actual: usize,
    },
    #[error(
        "invalid snapshot: aggregate={aggregate_id}, snapshot_version={snapshot_version}, head={head}"
    )]
    InvalidSnapshot {
        aggregate_id: String,
        snapshot_version: usize,
        head: usize,
    },
    #[error("event store error: {reason}")]
    EventStore { reason: String },
    #[error("database error: {reason}")]
    Database { reason: String },

    // --- 消息系统 ---
    #[error("publish error: {reason}")]
    Publish { reason: String },
    #[error("connection error: {reason}")]
    Connection { reason: String },
    #[error("transport error: {reason}")]
    Transport { reason: String },

    // --- 领域规则/命令与状态 ---
    #[error("invalid command: {reason}")]
    InvalidCommand { reason: String },
    #[error("invalid state: {reason}")]
    InvalidState { reason: String },
    #[error("not found: {reason}")]
    NotFound { reason: String },
}

impl DomainError {
    pub fn event_store(reason: impl Into<String>) -> Self {
        DomainError::EventStore {
            reason: reason.into(),
        }
    }

    pub fn publish(reason: impl Into<String>) -> Self {
        DomainError::Publish {
            reason: reason.into(),
        }
    }

    pub fn connection(reason: impl Into<String>) -> Self {
        DomainError::Connection {
            reason: reason.into(),
        }
    }

    pub fn transport(reason: impl Into<String>) -> Self {
        DomainError::Transport {
            reason: reason.into(),
        }
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        DomainError::InvalidState {
            reason: reason.into(),
        }
    }

    /// 传输层的瞬时故障：由重连监督器在内部恢复，调用方可在更高层重试
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DomainError::Publish { .. }
                | DomainError::Connection { .. }
                | DomainError::Transport { .. }
        )
    }
}

/// 统一 Result 类型别名
pub type DomainResult<T> = Result<T, DomainError>;

// ---- Cross-crate conversions for infrastructure convenience ----
// 允许在基础设施层直接使用 `?` 将 sqlx 错误转换为 DomainError

#[cfg(feature = "infra-sqlx")]
impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DomainError::NotFound {
                reason: "row not found".to_string(),
            },
            other => DomainError::Database {
                reason: other.to_string(),
            },
        }
    }
}

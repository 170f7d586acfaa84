use eventide_domain::error::DomainError;

#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("domain: {0}")]
    Domain(#[from] DomainError),

    #[error("validation: {0}")]
    Validation(String),

    #[error("authorization: {0}")]
    Authorization(String),

    #[error("infra: {0}")]
    Infra(String),

    #[error("handler not found: {0}")]
    HandlerNotFound(&'static str),

    #[error("aggregate not found: {0}")]
    AggregateNotFound(String),

    #[error("handler already registered: {kind}={name}")]
    DuplicateHandler {
        kind: &'static str,
        name: &'static str,
    },

    #[error("invalid {kind} handler name: must not be blank")]
    InvalidHandlerName { kind: &'static str },

    #[error("type mismatch: expected={expected}, found={found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
}

impl AppError {
    /// 处理器从未被调用：校验失败或注册表配置错误，调用方可放心重试或修正后重提
    ///
    /// 其余错误意味着处理器已经开始执行，副作用未知，调用方需按至少一次语义处理。
    pub fn never_executed(&self) -> bool {
        matches!(
            self,
            AppError::Validation(_)
                | AppError::HandlerNotFound(_)
                | AppError::DuplicateHandler { .. }
                | AppError::InvalidHandlerName { .. }
                | AppError::TypeMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinguishes_never_executed_from_unknown_effect() {
        assert!(AppError::Validation("empty".into()).never_executed());
        assert!(AppError::HandlerNotFound("CreateOrder").never_executed());
        assert!(
            AppError::DuplicateHandler {
                kind: "command",
                name: "CreateOrder"
            }
            .never_executed()
        );

        let conflict: AppError = DomainError::VersionConflict {
            aggregate_id: "o-1".into(),
            expected: 0,
            actual: 1,
        }
        .into();
        assert!(!conflict.never_executed());
        assert!(!AppError::Infra("broker down".into()).never_executed());
    }
}

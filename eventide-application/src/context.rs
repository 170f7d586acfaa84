use eventide_domain::domain_event::BusinessContext;

/// 应用层上下文（Application Context）
///
/// 承载一次命令/查询调用的横切信息：
/// - 业务语境（`BusinessContext`）：`correlation_id`、`causation_id`、执行者类型/ID，
///   处理器追加事件时原样写入事件元数据；
/// - 幂等键（`idempotency_key`）：由上层决定是否参与幂等。
///
/// ```rust
/// use eventide_application::context::AppContext;
/// use eventide_domain::domain_event::BusinessContext;
///
/// let ctx = AppContext {
///     biz: BusinessContext::builder()
///         .correlation_id("cor-123".to_string())
///         .actor_id("u-1".to_string())
///         .build(),
///     idempotency_key: Some("idem-xyz".into()),
/// };
/// assert_eq!(ctx.correlation_id(), Some("cor-123"));
/// ```
#[derive(Clone, Debug, Default)]
pub struct AppContext {
    pub biz: BusinessContext,
    pub idempotency_key: Option<String>,
}

impl AppContext {
    pub fn new(biz: BusinessContext) -> Self {
        Self {
            biz,
            idempotency_key: None,
        }
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.biz.correlation_id()
    }
}

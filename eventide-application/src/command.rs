use crate::context::AppContext;
use crate::error::AppError;
use chrono::{DateTime, Utc};
use ulid::Ulid;

/// 应用层命令（Command）
///
/// 表达“意图”的写操作请求，通常会修改领域状态。
/// - 不返回业务数据，仅表达执行结果（成功/失败）；
/// - 建议使用“动宾结构”命名，如 `CreateOrder`、`CloseOrder`。
///
/// 关联常量：
/// - `NAME`：命令的稳定名称，作为注册表的键，也用于日志与追踪。避免依赖 `type_name::<T>()`。
pub trait Command: Send + Sync + 'static {
    const NAME: &'static str;

    /// 载荷自身的形状校验；失败的命令不会到达处理器
    fn validate(&self) -> Result<(), AppError> {
        Ok(())
    }
}

/// 命令信封：为载荷附加标识、签发时间与签发人
///
/// 创建后不可变，仅暴露只读访问。
#[derive(Debug, Clone)]
pub struct CommandEnvelope<C> {
    id: String,
    issued_at: DateTime<Utc>,
    issued_by: Option<String>,
    payload: C,
}

impl<C: Command> CommandEnvelope<C> {
    pub fn new(payload: C) -> Self {
        Self {
            id: Ulid::new().to_string(),
            issued_at: Utc::now(),
            issued_by: None,
            payload,
        }
    }

    /// 以上下文中的执行者作为签发人
    pub fn from_context(ctx: &AppContext, payload: C) -> Self {
        Self {
            issued_by: ctx.biz.actor_id().map(str::to_string),
            ..Self::new(payload)
        }
    }

    /// 使用调用方提供的标识（如接口层的幂等请求号）
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &'static str {
        C::NAME
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn issued_by(&self) -> Option<&str> {
        self.issued_by.as_deref()
    }

    pub fn payload(&self) -> &C {
        &self.payload
    }

    pub fn into_payload(self) -> C {
        self.payload
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.id.trim().is_empty() {
            return Err(AppError::Validation(format!(
                "{}: command id must not be empty",
                C::NAME
            )));
        }
        self.payload.validate()
    }
}

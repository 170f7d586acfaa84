use crate::{context::AppContext, error::AppError, query::Query};
use async_trait::async_trait;

/// 查询总线（Query Bus）
///
/// - 按 `Query::NAME` 路由到唯一的处理器，总是同步等待结果；
/// - 错误规则与命令总线一致（校验、未注册、类型不匹配）。
#[async_trait]
pub trait QueryBus: Send + Sync {
    async fn dispatch<Q>(&self, ctx: &AppContext, q: Q) -> Result<Q::Dto, AppError>
    where
        Q: Query;
}

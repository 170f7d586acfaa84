use crate::dto::Dto;
use crate::error::AppError;

/// 应用层查询（Query）
///
/// 表达只读意图，不改变领域状态，也不写入事件存储。
/// - 结果返回 [`Dto`](crate::dto::Dto)；
/// - 校验规则与命令一致：失败的查询不会到达处理器。
pub trait Query: Send + Sync + 'static {
    /// 查询的稳定名称，作为注册表的键
    const NAME: &'static str;

    type Dto: Dto;

    fn validate(&self) -> Result<(), AppError> {
        Ok(())
    }
}

use crate::{
    command::{Command, CommandEnvelope},
    context::AppContext,
    error::AppError,
};
use async_trait::async_trait;

/// 命令总线（Command Bus）
///
/// - 先校验命令，再按 `Command::NAME` 查找处理器；
/// - 校验失败或未注册时处理器不会被调用（见 [`AppError::never_executed`]）；
/// - 该 trait 带有泛型方法，通常以具体实现类型注入使用。
#[async_trait]
pub trait CommandBus: Send + Sync {
    /// 同步分发：等待处理器执行完毕，原样返回其错误
    async fn dispatch<C>(&self, ctx: &AppContext, cmd: CommandEnvelope<C>) -> Result<(), AppError>
    where
        C: Command;

    /// 分离分发：校验与查找同步完成，处理器在独立任务中执行
    ///
    /// 返回命令标识；执行结果交由观察者上报，不保证完成顺序。
    async fn dispatch_detached<C>(
        &self,
        ctx: &AppContext,
        cmd: CommandEnvelope<C>,
    ) -> Result<String, AppError>
    where
        C: Command;
}

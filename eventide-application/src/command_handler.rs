use crate::{
    command::{Command, CommandEnvelope},
    context::AppContext,
    error::AppError,
};
use async_trait::async_trait;

/// 命令处理器：每个命令名称恰好绑定一个
#[async_trait]
pub trait CommandHandler<C>: Send + Sync
where
    C: Command,
{
    async fn handle(&self, ctx: &AppContext, cmd: CommandEnvelope<C>) -> Result<(), AppError>;
}

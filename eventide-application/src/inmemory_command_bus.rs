use crate::{
    command::{Command, CommandEnvelope},
    command_bus::CommandBus,
    command_handler::CommandHandler,
    context::AppContext,
    error::AppError,
    observer::{DispatchObserver, TracingObserver},
    registry::HandlerRegistry,
};
use async_trait::async_trait;
use std::any::{Any, TypeId, type_name};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

type CmdHandlerFuture = Pin<Box<dyn Future<Output = Result<(), AppError>> + Send>>;

type CmdHandlerFn = Arc<dyn Fn(Box<dyn Any + Send>, AppContext) -> CmdHandlerFuture + Send + Sync>;

#[derive(Clone)]
struct CommandEntry {
    type_id: TypeId,
    type_name: &'static str,
    call: CmdHandlerFn,
}

/// 基于内存的 CommandBus 实现
/// - 以 `Command::NAME` 为键注册处理器，重复注册失败；
/// - 运行时以类型擦除（Any）方式调度，名称冲突但类型不同时返回 `TypeMismatch`；
/// - 分离分发的结果交给注入的 [`DispatchObserver`]。
pub struct InMemoryCommandBus {
    handlers: HandlerRegistry<CommandEntry>,
    observer: Arc<dyn DispatchObserver>,
}

impl Default for InMemoryCommandBus {
    fn default() -> Self {
        Self {
            handlers: HandlerRegistry::new("command"),
            observer: Arc::new(TracingObserver),
        }
    }
}

impl InMemoryCommandBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_observer(mut self, observer: Arc<dyn DispatchObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// 注册命令处理器
    pub fn register<C, H>(&self, handler: Arc<H>) -> Result<(), AppError>
    where
        C: Command,
        H: CommandHandler<C> + 'static,
    {
        let call: CmdHandlerFn = Arc::new(move |boxed_cmd, ctx| {
            let handler = handler.clone();

            Box::pin(async move {
                // 键与闭包同属一个 C，正常情况下 downcast 不会失败
                match boxed_cmd.downcast::<CommandEnvelope<C>>() {
                    Ok(cmd) => handler.handle(&ctx, *cmd).await,
                    Err(_) => Err(AppError::TypeMismatch {
                        expected: type_name::<C>(),
                        found: "unknown",
                    }),
                }
            })
        });

        self.handlers.register(
            C::NAME,
            CommandEntry {
                type_id: TypeId::of::<C>(),
                type_name: type_name::<C>(),
                call,
            },
        )
    }

    /// 获取已注册的命令名列表（只读视图）
    pub fn registered_commands(&self) -> Vec<&'static str> {
        self.handlers.names()
    }

    /// 校验并解析处理器；任一步失败时处理器都不会被调用
    fn resolve<C: Command>(&self, cmd: &CommandEnvelope<C>) -> Result<CmdHandlerFn, AppError> {
        cmd.validate()?;

        let entry = self
            .handlers
            .lookup(C::NAME)
            .ok_or(AppError::HandlerNotFound(C::NAME))?;

        if entry.type_id != TypeId::of::<C>() {
            return Err(AppError::TypeMismatch {
                expected: type_name::<C>(),
                found: entry.type_name,
            });
        }

        Ok(entry.call)
    }
}

#[async_trait]
impl CommandBus for InMemoryCommandBus {
    async fn dispatch<C: Command>(
        &self,
        ctx: &AppContext,
        cmd: CommandEnvelope<C>,
    ) -> Result<(), AppError> {
        let call = self.resolve(&cmd)?;
        tracing::debug!(command = C::NAME, command_id = cmd.id(), "dispatching command");

        (call)(Box::new(cmd), ctx.clone()).await
    }

    async fn dispatch_detached<C: Command>(
        &self,
        ctx: &AppContext,
        cmd: CommandEnvelope<C>,
    ) -> Result<String, AppError> {
        let call = self.resolve(&cmd)?;
        let command_id = cmd.id().to_string();
        let observer = self.observer.clone();
        let ctx = ctx.clone();

        tracing::debug!(command = C::NAME, command_id = %command_id, "dispatching detached command");
        let id = command_id.clone();
        tokio::spawn(async move {
            let result = (call)(Box::new(cmd), ctx).await;
            observer.on_completed(C::NAME, &id, &result);
        });

        Ok(command_id)
    }
}

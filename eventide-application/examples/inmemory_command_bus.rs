use async_trait::async_trait;
use eventide_application::InMemoryCommandBus;
use eventide_application::command::{Command, CommandEnvelope};
use eventide_application::command_bus::CommandBus;
use eventide_application::command_handler::CommandHandler;
use eventide_application::context::AppContext;
use eventide_application::error::AppError;
use eventide_domain::domain_event::BusinessContext;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
struct CreateUser {
    name: String,
}

impl Command for CreateUser {
    const NAME: &'static str = "CreateUser";

    fn validate(&self) -> Result<(), AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::Validation("name is required".into()));
        }
        Ok(())
    }
}

struct CreateUserHandler;

#[async_trait]
impl CommandHandler<CreateUser> for CreateUserHandler {
    async fn handle(&self, _ctx: &AppContext, cmd: CommandEnvelope<CreateUser>) -> Result<(), AppError> {
        println!(
            "CreateUser: id={} name={} by={:?}",
            cmd.id(),
            cmd.payload().name,
            cmd.issued_by()
        );
        Ok(())
    }
}

#[derive(Debug)]
struct DeleteUser {
    id: u32,
}

impl Command for DeleteUser {
    const NAME: &'static str = "DeleteUser";
}

struct DeleteUserHandler;

#[async_trait]
impl CommandHandler<DeleteUser> for DeleteUserHandler {
    async fn handle(&self, _ctx: &AppContext, cmd: CommandEnvelope<DeleteUser>) -> Result<(), AppError> {
        if cmd.payload().id == 0 {
            return Err(AppError::AggregateNotFound("user-0".into()));
        }
        println!("DeleteUser: id={}", cmd.payload().id);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let bus = InMemoryCommandBus::new();
    bus.register::<CreateUser, _>(Arc::new(CreateUserHandler))?;
    bus.register::<DeleteUser, _>(Arc::new(DeleteUserHandler))?;
    println!("registered: {:?}", bus.registered_commands());

    // 重复注册 -> DuplicateHandler，先注册者保持生效
    if let Err(err) = bus.register::<CreateUser, _>(Arc::new(CreateUserHandler)) {
        eprintln!("{err}");
    }

    let ctx = AppContext {
        biz: BusinessContext::builder()
            .correlation_id("cor-1".to_string())
            .actor_type("user".to_string())
            .actor_id("u-1".to_string())
            .build(),
        idempotency_key: Some("idem-1".into()),
    };

    let create = CommandEnvelope::from_context(&ctx, CreateUser { name: "Alice".into() });
    bus.dispatch(&ctx, create).await?;

    // 校验失败的命令不会到达处理器
    let err = bus
        .dispatch(&ctx, CommandEnvelope::new(CreateUser { name: " ".into() }))
        .await
        .unwrap_err();
    eprintln!("rejected: {err} (never executed: {})", err.never_executed());

    // 分离分发：立即返回命令标识，失败由观察者记录
    let id = bus
        .dispatch_detached(&ctx, CommandEnvelope::new(DeleteUser { id: 0 }))
        .await?;
    println!("DeleteUser dispatched in background: {id}");
    tokio::time::sleep(Duration::from_millis(50)).await;

    // 未注册的命令 -> HandlerNotFound
    #[allow(dead_code)]
    #[derive(Debug)]
    struct UpdateUser {
        id: u32,
    }

    impl Command for UpdateUser {
        const NAME: &'static str = "UpdateUser";
    }

    if let Err(AppError::HandlerNotFound(name)) = bus
        .dispatch(&ctx, CommandEnvelope::new(UpdateUser { id: 7 }))
        .await
    {
        eprintln!("HandlerNotFound as expected for command: {name}");
    }
    Ok(())
}

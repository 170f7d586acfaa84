/// 事件存储示例
/// 演示以 AggregateRoot 执行命令、按类型标签解码事件、快照与增量重放
use anyhow::Result as AnyResult;
use eventide_domain::aggregate::Aggregate;
use eventide_domain::aggregate_root::AggregateRoot;
use eventide_domain::domain_event::{BusinessContext, DomainEvent, EventEnvelope};
use eventide_domain::error::{DomainError, DomainResult};
use eventide_domain::event_decoder::EventDecoders;
use eventide_domain::persist::{
    EventSourcedRepository, EventStore, InMemoryEventStore, SnapshotPolicy, SnapshotStore,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

// ============================================================================
// 领域模型定义
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct BankAccount {
    balance: i64,
    is_locked: bool,
}

#[derive(Debug)]
enum BankAccountCommand {
    Deposit { amount: i64 },
    Withdraw { amount: i64 },
    Lock,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Deposited {
    amount: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Withdrawn {
    amount: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Locked {
    reason: String,
}

#[derive(Debug, Clone, PartialEq)]
enum BankAccountEvent {
    Deposited(Deposited),
    Withdrawn(Withdrawn),
    Locked(Locked),
}

impl From<Deposited> for BankAccountEvent {
    fn from(e: Deposited) -> Self {
        Self::Deposited(e)
    }
}

impl From<Withdrawn> for BankAccountEvent {
    fn from(e: Withdrawn) -> Self {
        Self::Withdrawn(e)
    }
}

impl From<Locked> for BankAccountEvent {
    fn from(e: Locked) -> Self {
        Self::Locked(e)
    }
}

impl DomainEvent for BankAccountEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::Deposited(_) => "bank_account.deposited",
            Self::Withdrawn(_) => "bank_account.withdrawn",
            Self::Locked(_) => "bank_account.locked",
        }
    }

    fn to_payload(&self) -> DomainResult<Value> {
        Ok(match self {
            Self::Deposited(e) => serde_json::to_value(e)?,
            Self::Withdrawn(e) => serde_json::to_value(e)?,
            Self::Locked(e) => serde_json::to_value(e)?,
        })
    }
}

impl Aggregate for BankAccount {
    const TYPE: &'static str = "bank_account";
    type Command = BankAccountCommand;
    type Event = BankAccountEvent;
    type Error = DomainError;

    fn execute(&self, command: Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        if self.is_locked {
            return Err(DomainError::InvalidState {
                reason: "account is locked".to_string(),
            });
        }

        match command {
            BankAccountCommand::Deposit { amount } | BankAccountCommand::Withdraw { amount }
                if amount <= 0 =>
            {
                Err(DomainError::InvalidCommand {
                    reason: "amount must be positive".to_string(),
                })
            }
            BankAccountCommand::Deposit { amount } => Ok(vec![Deposited { amount }.into()]),
            BankAccountCommand::Withdraw { amount } => {
                if self.balance < amount {
                    return Err(DomainError::InvalidState {
                        reason: "insufficient balance".to_string(),
                    });
                }
                Ok(vec![Withdrawn { amount }.into()])
            }
            BankAccountCommand::Lock => Ok(vec![
                Locked {
                    reason: "manual lock".to_string(),
                }
                .into(),
            ]),
        }
    }

    fn apply(&mut self, event: &Self::Event) {
        match event {
            BankAccountEvent::Deposited(e) => self.balance += e.amount,
            BankAccountEvent::Withdrawn(e) => self.balance -= e.amount,
            BankAccountEvent::Locked(_) => self.is_locked = true,
        }
    }
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    println!("=== 事件存储示例（AggregateRoot + 快照）===\n");

    let store = Arc::new(InMemoryEventStore::new());
    let decoders = Arc::new(
        EventDecoders::new()
            .with_serde::<Deposited>("bank_account.deposited")
            .with_serde::<Withdrawn>("bank_account.withdrawn")
            .with_serde::<Locked>("bank_account.locked"),
    );
    let repo = Arc::new(
        EventSourcedRepository::<BankAccount>::new(store.clone(), store.clone(), decoders.clone())
            .with_snapshot_policy(SnapshotPolicy::Every(2)),
    );
    let root = AggregateRoot::new(repo.clone());

    let account_id = "acc-001";
    let ctx = BusinessContext::builder()
        .correlation_id("cor-demo".to_string())
        .actor_type("user".to_string())
        .actor_id("u-1".to_string())
        .build();

    println!("--- 使用 AggregateRoot 执行命令 ---");
    for command in [
        BankAccountCommand::Deposit { amount: 1000 },
        BankAccountCommand::Withdraw { amount: 300 },
        BankAccountCommand::Deposit { amount: 50 },
        BankAccountCommand::Lock,
    ] {
        let label = format!("{command:?}");
        let events = root.execute(account_id, command, ctx.clone()).await?;
        println!("✅ {label} -> {} 个事件", events.len());
    }

    match root
        .execute(account_id, BankAccountCommand::Deposit { amount: 1 }, ctx.clone())
        .await
    {
        Err(err) => println!("❌ 锁定后存款被拒绝: {err}\n"),
        Ok(_) => println!("⚠️ 锁定后存款意外成功\n"),
    }

    println!("--- 按类型标签解码事件 ---");
    for event in store.load_events(account_id, 0).await? {
        let envelope = EventEnvelope::<BankAccount>::decode(&decoders, &event)?;
        println!(
            "  v{} [{}] {:?} correlation={:?}",
            envelope.metadata.aggregate_version(),
            event.event_type(),
            envelope.payload,
            envelope.context.correlation_id(),
        );
    }

    println!("\n--- 快照 + 增量重放 ---");
    if let Some(snapshot) = store.load_snapshot(account_id).await? {
        let tail = store.load_events(account_id, snapshot.aggregate_version()).await?;
        println!(
            "快照版本 {}，其后 {} 个增量事件",
            snapshot.aggregate_version(),
            tail.len()
        );
    }

    if let Some(account) = repo.load(account_id).await? {
        println!(
            "重建结果: version={} balance={} locked={}",
            account.version(),
            account.state().balance,
            account.state().is_locked
        );
    }

    Ok(())
}

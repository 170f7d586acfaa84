//! 聚合（Aggregate）抽象
//!
//! 约束一个聚合的核心行为：
//! - `execute` 将命令转换为事件（不改变状态）；
//! - `apply` 将事件投影到状态（纯状态迁移，无副作用）；
//! - 标识与版本由 `VersionedAggregate` 承载，版本号由事件存储在追加时分配。
//!
use crate::domain_event::DomainEvent;
use crate::error::{DomainError, DomainResult};
use serde::{Serialize, de::DeserializeOwned};
use std::error::Error;

/// 聚合根接口
pub trait Aggregate:
    Default + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const TYPE: &'static str;

    /// 该聚合支持的命令类型
    type Command: Send;
    /// 该聚合产生的领域事件类型
    type Event: DomainEvent;
    /// 命令执行或持久化环节的错误类型
    type Error: Error + From<DomainError> + Send + Sync + 'static;

    /// 执行命令，返回产生的事件列表
    fn execute(&self, command: Self::Command) -> Result<Vec<Self::Event>, Self::Error>;

    /// 应用事件，更新聚合状态
    fn apply(&mut self, event: &Self::Event);
}

/// 带标识与版本的聚合状态
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedAggregate<A> {
    id: String,
    version: usize,
    state: A,
}

impl<A> VersionedAggregate<A>
where
    A: Aggregate,
{
    /// 尚未产生任何事件的新聚合（版本 0）
    pub fn new(id: impl Into<String>) -> Self {
        Self::from_parts(id, 0, A::default())
    }

    pub fn from_parts(id: impl Into<String>, version: usize, state: A) -> Self {
        Self {
            id: id.into(),
            version,
            state,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn version(&self) -> usize {
        self.version
    }

    pub fn state(&self) -> &A {
        &self.state
    }

    pub fn into_state(self) -> A {
        self.state
    }

    pub fn is_new(&self) -> bool {
        self.version == 0
    }

    /// 应用一条已提交事件。
    ///
    /// 版本不大于当前版本的事件视为已应用并跳过（重放幂等）；
    /// 版本出现空洞时返回 `InvalidState`。返回值表示是否真正应用。
    pub fn apply_committed(&mut self, version: usize, event: &A::Event) -> DomainResult<bool> {
        if version <= self.version {
            return Ok(false);
        }

        if version != self.version + 1 {
            return Err(DomainError::invalid_state(format!(
                "event version gap for {}: current={}, next={version}",
                self.id, self.version
            )));
        }

        self.state.apply(event);
        self.version = version;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::Value;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Counter {
        value: i32,
    }

    #[derive(Debug)]
    enum CounterCommand {
        Add { amount: i32 },
        Sub { amount: i32 },
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    enum CounterEvent {
        Added { amount: i32 },
        Subtracted { amount: i32 },
    }

    impl DomainEvent for CounterEvent {
        fn event_type(&self) -> &'static str {
            match self {
                CounterEvent::Added { .. } => "counter.added",
                CounterEvent::Subtracted { .. } => "counter.subtracted",
            }
        }

        fn to_payload(&self) -> DomainResult<Value> {
            Ok(serde_json::to_value(self)?)
        }
    }

    impl Aggregate for Counter {
        const TYPE: &'static str = "counter";
        type Command = CounterCommand;
        type Event = CounterEvent;
        type Error = DomainError;

        fn execute(&self, command: Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
            match command {
                CounterCommand::Add { amount } => {
                    if amount <= 0 {
                        return Err(DomainError::InvalidCommand {
                            reason: "amount must be > 0".into(),
                        });
                    }
                    Ok(vec![CounterEvent::Added { amount }])
                }
                CounterCommand::Sub { amount } => {
                    if self.value < amount {
                        return Err(DomainError::InvalidState {
                            reason: "insufficient".into(),
                        });
                    }
                    Ok(vec![CounterEvent::Subtracted { amount }])
                }
            }
        }

        fn apply(&mut self, event: &Self::Event) {
            match event {
                CounterEvent::Added { amount } => self.value += *amount,
                CounterEvent::Subtracted { amount } => self.value -= *amount,
            }
        }
    }

    #[test]
    fn execute_then_apply_advances_version() {
        let mut agg = VersionedAggregate::<Counter>::new("c-1");
        assert!(agg.is_new());

        let events = agg.state().execute(CounterCommand::Add { amount: 3 }).unwrap();
        assert_eq!(events, vec![CounterEvent::Added { amount: 3 }]);
        assert!(agg.apply_committed(1, &events[0]).unwrap());

        let events = agg.state().execute(CounterCommand::Sub { amount: 1 }).unwrap();
        assert!(agg.apply_committed(2, &events[0]).unwrap());

        assert_eq!(agg.version(), 2);
        assert_eq!(agg.state().value, 2);
    }

    #[test]
    fn already_applied_versions_are_skipped() {
        let mut agg = VersionedAggregate::<Counter>::new("c-1");
        let e = CounterEvent::Added { amount: 5 };
        assert!(agg.apply_committed(1, &e).unwrap());
        assert!(!agg.apply_committed(1, &e).unwrap());
        assert_eq!(agg.state().value, 5);
    }

    #[test]
    fn version_gap_is_rejected() {
        let mut agg = VersionedAggregate::<Counter>::new("c-1");
        let err = agg
            .apply_committed(2, &CounterEvent::Added { amount: 1 })
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState { .. }));
        assert_eq!(agg.version(), 0);
    }

    #[test]
    fn invalid_commands_should_error() {
        let agg = VersionedAggregate::<Counter>::new("c-2");
        let err = agg
            .state()
            .execute(CounterCommand::Sub { amount: 1 })
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState { .. }));

        let err = agg
            .state()
            .execute(CounterCommand::Add { amount: 0 })
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidCommand { .. }));
    }
}

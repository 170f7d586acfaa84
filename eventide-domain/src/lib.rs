//! 事件溯源核心库（eventide-domain）
//!
//! 提供命令/查询分发之下的领域层构件：
//! - 聚合（`aggregate`）与编排器（`aggregate_root`）
//! - 领域事件（`domain_event`）与按类型标签解码（`event_decoder`）
//! - 只追加事件日志、乐观并发与快照（`persist`）
//! - 基于外部中间件的可靠消息（`messaging`）：重连、重试与死信
//!
//! 本 crate 不绑定具体存储与中间件：内存实现用于测试与本地开发，
//! Postgres 存储由 `infra-sqlx` 特性提供，中间件通过 `messaging::Transport` 适配。
//!
//! 典型用法：
//! 1. 定义聚合、命令与事件，实现 `Aggregate` 的 `execute/apply`；
//! 2. 为事件类型注册解码器（`EventDecoders`），组装 `EventSourcedRepository`；
//! 3. 通过 `AggregateRoot` 完成“加载 → 执行 → 追加 → 快照”；
//! 4. 将已提交事件包装为 `Message` 经 `BrokerClient` 发布给订阅方。
//!
pub mod aggregate;
pub mod aggregate_root;
pub mod domain_event;
pub mod error;
pub mod event_decoder;
#[cfg(feature = "messaging")]
pub mod messaging;
pub mod persist;

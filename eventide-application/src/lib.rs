//! eventide 应用层
//!
//! 命令/查询的注册与分发：
//! - `HandlerRegistry`：名称到唯一处理器的并发注册表；
//! - `InMemoryCommandBus`：校验、查找并执行命令，支持同步与分离（后台任务）两种分发；
//! - `InMemoryQueryBus`：同步查询分发，返回强类型 DTO；
//! - `AppError`：区分“从未执行”与“已执行、效果未知”的错误。
//!
pub mod command;
pub mod command_bus;
pub mod command_handler;
pub mod context;
pub mod dto;
pub mod error;
pub mod inmemory_command_bus;
pub mod inmemory_query_bus;
pub mod observer;
pub mod query;
pub mod query_bus;
pub mod query_handler;
pub mod registry;

pub use inmemory_command_bus::InMemoryCommandBus;
pub use inmemory_query_bus::InMemoryQueryBus;

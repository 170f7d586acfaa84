//! 消息子系统（messaging）
//!
//! 通过外部中间件发布/订阅主题消息：
//! - `Transport`/`Connection`：AMQP 风格的传输协议，`InMemoryBroker` 为进程内实现；
//! - `BrokerClient`：连接生命周期、发布、订阅与停止；内置重连监督与健康检查；
//! - `RetryScheduler`：指数退避的显式重投；
//! - `DeadLetterRouter`：重试耗尽的消息转入 `dead_letter` 主题。
//!
//! 投递语义为至少一次：确认只发生在处理成功或最终处置之后。
//!
mod broker_inmemory;
mod client;
mod config;
mod dead_letter;
mod handler;
mod message;
mod retry;
mod transport;

pub use broker_inmemory::{InMemoryBroker, InMemoryConnection, PublishRecord};
pub use client::{BrokerClient, ConnectionState};
pub use config::MessagingConfig;
pub use dead_letter::{DEAD_LETTER_TOPIC, DeadLetterRouter};
pub use handler::{DeliveryContext, MessageHandler};
pub use message::{
    AGGREGATE_ID_HEADER, AGGREGATE_VERSION_HEADER, CORRELATION_ID_HEADER,
    DEAD_LETTERED_AT_HEADER, ERROR_HEADER, EVENT_ID_HEADER, Message, ORIGINAL_TOPIC_HEADER,
    QUEUE_HEADER, RETRY_COUNT_HEADER, SOURCE_HEADER, UNDECODABLE_TYPE,
};
pub use retry::{RetryDecision, RetryPolicy, RetryScheduler};
pub use transport::{
    Acker, Connection, DEFAULT_EXCHANGE, Delivery, DeliveryMode, DeliveryStream, Transport,
};

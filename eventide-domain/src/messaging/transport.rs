//! 传输层协议（Transport / Connection）
//!
//! 以 AMQP 风格抽象外部消息中间件：交换机、持久队列、按路由键绑定、
//! 持久化发布、手动确认消费，以及连接关闭信号。客户端只依赖这里的协议，
//! 具体中间件由实现方适配。
//!
use crate::error::DomainResult as Result;
use async_trait::async_trait;
use futures_core::stream::BoxStream;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 默认交换机：路由键即目标队列名
pub const DEFAULT_EXCHANGE: &str = "";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    Transient,
    /// 中间件重启后仍保留
    Persistent,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn Connection>>;
}

#[async_trait]
pub trait Connection: Send + Sync {
    /// 声明主题交换机（幂等）
    async fn declare_exchange(&self, exchange: &str) -> Result<()>;

    /// 声明持久队列（幂等）
    async fn declare_queue(&self, queue: &str) -> Result<()>;

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()>;

    async fn delete_queue(&self, queue: &str) -> Result<()>;

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        mode: DeliveryMode,
    ) -> Result<()>;

    /// 以手动确认模式开始消费；连接关闭或队列删除时流结束
    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream>;

    /// 心跳探测，失败说明连接已不可用
    async fn heartbeat(&self) -> Result<()>;

    async fn close(&self);

    fn is_open(&self) -> bool;

    /// 连接关闭时被取消
    fn closed(&self) -> CancellationToken;
}

pub type DeliveryStream = BoxStream<'static, Delivery>;

/// 对单次投递进行确认或拒绝
#[async_trait]
pub trait Acker: Send + Sync {
    async fn ack(&self, delivery_tag: u64) -> Result<()>;
    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<()>;
}

/// 一次投递：未确认前由中间件保管，连接断开后重新入队
pub struct Delivery {
    delivery_tag: u64,
    body: Vec<u8>,
    redelivered: bool,
    acker: Arc<dyn Acker>,
}

impl Delivery {
    pub fn new(delivery_tag: u64, body: Vec<u8>, redelivered: bool, acker: Arc<dyn Acker>) -> Self {
        Self {
            delivery_tag,
            body,
            redelivered,
            acker,
        }
    }

    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    pub async fn ack(&self) -> Result<()> {
        self.acker.ack(self.delivery_tag).await
    }

    pub async fn nack(&self, requeue: bool) -> Result<()> {
        self.acker.nack(self.delivery_tag, requeue).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("body_len", &self.body.len())
            .field("redelivered", &self.redelivered)
            .finish()
    }
}

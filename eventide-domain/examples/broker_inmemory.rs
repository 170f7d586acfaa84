/// 消息客户端示例
/// 演示订阅、发布、处理失败后的重试与死信，以及断线后的自动恢复
use anyhow::Result as AnyResult;
use async_trait::async_trait;
use eventide_domain::messaging::{
    BrokerClient, ConnectionState, DEAD_LETTER_TOPIC, DeliveryContext, ERROR_HEADER,
    InMemoryBroker, Message, MessageHandler, MessagingConfig, RetryPolicy,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

struct PrintHandler;

#[async_trait]
impl MessageHandler for PrintHandler {
    fn handler_name(&self) -> &str {
        "print"
    }

    async fn handle(&self, ctx: &DeliveryContext, message: &Message) -> anyhow::Result<()> {
        println!(
            "📨 [{}] {} {}",
            ctx.topic(),
            message.message_type(),
            message.payload()
        );
        Ok(())
    }
}

/// 拒绝所有 `order.cancelled` 消息
struct PickyHandler;

#[async_trait]
impl MessageHandler for PickyHandler {
    fn handler_name(&self) -> &str {
        "picky"
    }

    async fn handle(&self, ctx: &DeliveryContext, message: &Message) -> anyhow::Result<()> {
        if message.message_type() == "order.cancelled" {
            println!("  ↻ 第 {} 次尝试失败", ctx.retry_count() + 1);
            anyhow::bail!("cancellations are not supported");
        }
        Ok(())
    }
}

struct DeadLetterHandler;

#[async_trait]
impl MessageHandler for DeadLetterHandler {
    fn handler_name(&self) -> &str {
        "dead-letter-audit"
    }

    async fn handle(&self, _ctx: &DeliveryContext, message: &Message) -> anyhow::Result<()> {
        println!(
            "☠️ 死信: {} error={:?}",
            message.message_type(),
            message.header_str(ERROR_HEADER)
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    println!("=== 内存中间件示例 ===\n");

    let broker = InMemoryBroker::new();
    let config = MessagingConfig::builder()
        .namespace("demo")
        .retry(RetryPolicy {
            max_retries: 2,
            initial_delay: Duration::from_millis(50),
            multiplier: 2.0,
            max_delay: Duration::from_millis(200),
        })
        .reconnect_delay(Duration::from_millis(100))
        .build();
    let client = BrokerClient::new(Arc::new(broker.clone()), config);
    client.start().await?;

    client.subscribe("order.events", Arc::new(PrintHandler)).await?;
    client.subscribe("order.events", Arc::new(PickyHandler)).await?;
    client
        .subscribe(DEAD_LETTER_TOPIC, Arc::new(DeadLetterHandler))
        .await?;

    println!("--- 发布 ---");
    client
        .publish(
            "order.events",
            &Message::new("order.created", json!({"order_id": "o-1", "total": 30})),
        )
        .await?;
    client
        .publish(
            "order.events",
            &Message::new("order.cancelled", json!({"order_id": "o-1"})),
        )
        .await?;
    tokio::time::sleep(Duration::from_millis(500)).await;

    println!("\n--- 模拟断线 ---");
    let mut state = client.watch_state();
    broker.sever_connections();
    state
        .wait_for(|s| *s == ConnectionState::Connected && broker.connection_count() == 1)
        .await?;
    println!("🔌 已重连，订阅自动恢复: {:?}", client.active_topics().await);

    client
        .publish(
            "order.events",
            &Message::new("order.shipped", json!({"order_id": "o-1"})),
        )
        .await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    client.stop().await?;
    println!("\n死信队列深度: {:?}", broker.queue_depth(&client.dead_letter_queue()));
    Ok(())
}

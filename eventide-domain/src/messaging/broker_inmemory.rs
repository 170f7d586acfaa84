//! 内存版消息中间件（InMemoryBroker）
//!
//! 在进程内实现 `Transport`/`Connection` 协议，语义贴近 AMQP：
//! - 主题交换机按路由键（支持 `*`/`#` 通配）路由到绑定队列，默认交换机直达同名队列；
//! - 队列持久存在，不随连接断开而消失；
//! - 投递后在确认前处于未确认状态，所属连接关闭时重新入队并标记 redelivered；
//! - `sever_connections`/`set_reachable` 用于模拟网络故障。
//!
//! 典型用途：测试环境、示例与本地开发。
//!
use super::transport::{
    Acker, Connection, DEFAULT_EXCHANGE, Delivery, DeliveryMode, DeliveryStream, Transport,
};
use crate::error::{DomainError, DomainResult as Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

/// 发布记录（按发布顺序保留，便于断言）
#[derive(Debug, Clone, PartialEq)]
pub struct PublishRecord {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub mode: DeliveryMode,
}

#[derive(Debug, Clone)]
struct QueuedMessage {
    body: Vec<u8>,
    redelivered: bool,
}

struct Consumer {
    connection_id: u64,
    tag: String,
    tx: mpsc::UnboundedSender<Delivery>,
}

#[derive(Default)]
struct Queue {
    ready: VecDeque<QueuedMessage>,
    consumers: Vec<Consumer>,
    unacked: HashMap<u64, (u64, QueuedMessage)>,
    next_consumer: usize,
}

struct Binding {
    exchange: String,
    routing_key: String,
    queue: String,
}

struct BrokerState {
    reachable: bool,
    exchanges: HashSet<String>,
    queues: HashMap<String, Queue>,
    bindings: Vec<Binding>,
    connections: HashMap<u64, CancellationToken>,
    next_connection_id: u64,
    next_delivery_tag: u64,
    published: Vec<PublishRecord>,
    acked: usize,
}

impl Default for BrokerState {
    fn default() -> Self {
        Self {
            reachable: true,
            exchanges: HashSet::new(),
            queues: HashMap::new(),
            bindings: Vec::new(),
            connections: HashMap::new(),
            next_connection_id: 0,
            next_delivery_tag: 0,
            published: Vec::new(),
            acked: 0,
        }
    }
}

#[derive(Default)]
struct BrokerInner {
    state: Mutex<BrokerState>,
}

impl BrokerInner {
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 不可达时新的 `connect` 调用失败，已有连接不受影响
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.lock().reachable = reachable;
    }

    /// 断开全部连接，未确认投递重新入队
    pub fn sever_connections(&self) {
        let mut state = self.inner.lock();
        let ids: Vec<u64> = state.connections.keys().copied().collect();
        for id in ids {
            drop_connection(&self.inner, &mut state, id);
        }
    }

    pub fn connection_count(&self) -> usize {
        self.inner.lock().connections.len()
    }

    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.lock().queues.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn queue_exists(&self, queue: &str) -> bool {
        self.inner.lock().queues.contains_key(queue)
    }

    /// 待投递消息数
    pub fn queue_depth(&self, queue: &str) -> Option<usize> {
        self.inner.lock().queues.get(queue).map(|q| q.ready.len())
    }

    pub fn unacked_count(&self, queue: &str) -> Option<usize> {
        self.inner.lock().queues.get(queue).map(|q| q.unacked.len())
    }

    /// 队列中待投递消息的原始字节（不出队）
    pub fn ready_messages(&self, queue: &str) -> Vec<Vec<u8>> {
        self.inner
            .lock()
            .queues
            .get(queue)
            .map(|q| q.ready.iter().map(|m| m.body.clone()).collect())
            .unwrap_or_default()
    }

    pub fn published(&self) -> Vec<PublishRecord> {
        self.inner.lock().published.clone()
    }

    pub fn ack_count(&self) -> usize {
        self.inner.lock().acked
    }
}

#[async_trait]
impl Transport for InMemoryBroker {
    async fn connect(&self) -> Result<Arc<dyn Connection>> {
        let mut state = self.inner.lock();
        if !state.reachable {
            return Err(DomainError::connection("broker unreachable"));
        }

        state.next_connection_id += 1;
        let id = state.next_connection_id;
        let closed = CancellationToken::new();
        state.connections.insert(id, closed.clone());

        Ok(Arc::new(InMemoryConnection {
            id,
            inner: self.inner.clone(),
            closed,
        }))
    }
}

pub struct InMemoryConnection {
    id: u64,
    inner: Arc<BrokerInner>,
    closed: CancellationToken,
}

impl InMemoryConnection {
    fn open_state(&self) -> Result<MutexGuard<'_, BrokerState>> {
        let state = self.inner.lock();
        if !state.connections.contains_key(&self.id) {
            return Err(DomainError::transport("connection closed"));
        }
        Ok(state)
    }
}

#[async_trait]
impl Connection for InMemoryConnection {
    async fn declare_exchange(&self, exchange: &str) -> Result<()> {
        self.open_state()?.exchanges.insert(exchange.to_string());
        Ok(())
    }

    async fn declare_queue(&self, queue: &str) -> Result<()> {
        self.open_state()?
            .queues
            .entry(queue.to_string())
            .or_default();
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        let mut state = self.open_state()?;
        if !state.queues.contains_key(queue) {
            return Err(DomainError::transport(format!("no queue '{queue}'")));
        }
        if !state.exchanges.contains(exchange) {
            return Err(DomainError::transport(format!("no exchange '{exchange}'")));
        }

        let exists = state.bindings.iter().any(|b| {
            b.queue == queue && b.exchange == exchange && b.routing_key == routing_key
        });
        if !exists {
            state.bindings.push(Binding {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                queue: queue.to_string(),
            });
        }
        Ok(())
    }

    async fn delete_queue(&self, queue: &str) -> Result<()> {
        let mut state = self.open_state()?;
        state.queues.remove(queue);
        state.bindings.retain(|b| b.queue != queue);
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        mode: DeliveryMode,
    ) -> Result<()> {
        let mut state = self.open_state()?;

        let targets: Vec<String> = if exchange == DEFAULT_EXCHANGE {
            state
                .queues
                .contains_key(routing_key)
                .then(|| routing_key.to_string())
                .into_iter()
                .collect()
        } else {
            if !state.exchanges.contains(exchange) {
                return Err(DomainError::transport(format!("no exchange '{exchange}'")));
            }
            let mut targets: Vec<String> = state
                .bindings
                .iter()
                .filter(|b| b.exchange == exchange && topic_matches(&b.routing_key, routing_key))
                .map(|b| b.queue.clone())
                .collect();
            targets.sort();
            targets.dedup();
            targets
        };

        state.published.push(PublishRecord {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            body: body.to_vec(),
            mode,
        });

        for name in &targets {
            if let Some(queue) = state.queues.get_mut(name) {
                queue.ready.push_back(QueuedMessage {
                    body: body.to_vec(),
                    redelivered: false,
                });
            }
            pump(&self.inner, &mut state, name);
        }
        Ok(())
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream> {
        let mut state = self.open_state()?;
        let (tx, rx) = mpsc::unbounded_channel();
        match state.queues.get_mut(queue) {
            Some(q) => q.consumers.push(Consumer {
                connection_id: self.id,
                tag: consumer_tag.to_string(),
                tx,
            }),
            None => return Err(DomainError::transport(format!("no queue '{queue}'"))),
        }
        pump(&self.inner, &mut state, queue);
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn heartbeat(&self) -> Result<()> {
        self.open_state().map(|_| ())
    }

    async fn close(&self) {
        let mut state = self.inner.lock();
        drop_connection(&self.inner, &mut state, self.id);
    }

    fn is_open(&self) -> bool {
        !self.closed.is_cancelled()
    }

    fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }
}

struct InMemoryAcker {
    inner: Weak<BrokerInner>,
    connection_id: u64,
    queue: String,
}

impl InMemoryAcker {
    fn settle(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        let inner = self
            .inner
            .upgrade()
            .ok_or_else(|| DomainError::transport("broker dropped"))?;
        let mut state = inner.lock();
        if !state.connections.contains_key(&self.connection_id) {
            return Err(DomainError::transport("connection closed"));
        }

        // 队列已删除时确认视为无操作
        let Some(queue) = state.queues.get_mut(&self.queue) else {
            return Ok(());
        };
        let Some((_, mut message)) = queue.unacked.remove(&delivery_tag) else {
            return Ok(());
        };

        if requeue {
            message.redelivered = true;
            queue.ready.push_front(message);
            pump(&inner, &mut state, &self.queue);
        } else {
            state.acked += 1;
        }
        Ok(())
    }
}

#[async_trait]
impl Acker for InMemoryAcker {
    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        self.settle(delivery_tag, false)
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        self.settle(delivery_tag, requeue)
    }
}

/// 将就绪消息轮询分发给在线消费者
fn pump(inner: &Arc<BrokerInner>, state: &mut BrokerState, queue_name: &str) {
    let BrokerState {
        queues,
        next_delivery_tag,
        ..
    } = state;
    let Some(queue) = queues.get_mut(queue_name) else {
        return;
    };

    while !queue.consumers.is_empty() {
        let Some(message) = queue.ready.pop_front() else {
            break;
        };

        let idx = queue.next_consumer % queue.consumers.len();
        let connection_id = queue.consumers[idx].connection_id;
        *next_delivery_tag += 1;
        let tag = *next_delivery_tag;

        let acker = Arc::new(InMemoryAcker {
            inner: Arc::downgrade(inner),
            connection_id,
            queue: queue_name.to_string(),
        });
        let delivery = Delivery::new(tag, message.body.clone(), message.redelivered, acker);

        if queue.consumers[idx].tx.send(delivery).is_err() {
            // 消费端已丢弃
            tracing::trace!(
                queue = queue_name,
                consumer = %queue.consumers[idx].tag,
                "dropping closed consumer"
            );
            queue.consumers.remove(idx);
            queue.ready.push_front(message);
            continue;
        }

        queue.unacked.insert(tag, (connection_id, message));
        queue.next_consumer = idx + 1;
    }
}

fn drop_connection(inner: &Arc<BrokerInner>, state: &mut BrokerState, connection_id: u64) {
    let Some(closed) = state.connections.remove(&connection_id) else {
        return;
    };
    closed.cancel();

    let names: Vec<String> = state.queues.keys().cloned().collect();
    for name in &names {
        if let Some(queue) = state.queues.get_mut(name) {
            queue.consumers.retain(|c| c.connection_id != connection_id);

            let mut tags: Vec<u64> = queue
                .unacked
                .iter()
                .filter(|(_, (owner, _))| *owner == connection_id)
                .map(|(tag, _)| *tag)
                .collect();
            tags.sort_unstable();

            // 逆序压回队首，保持原始投递顺序
            for tag in tags.into_iter().rev() {
                if let Some((_, mut message)) = queue.unacked.remove(&tag) {
                    message.redelivered = true;
                    queue.ready.push_front(message);
                }
            }
        }
        pump(inner, state, name);
    }
}

/// AMQP 主题匹配：`*` 匹配一个段，`#` 匹配零个或多个段
fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    segments_match(&pattern, &key)
}

fn segments_match(pattern: &[&str], key: &[&str]) -> bool {
    match (pattern.first(), key.first()) {
        (None, None) => true,
        (Some(&"#"), _) => {
            segments_match(&pattern[1..], key)
                || (!key.is_empty() && segments_match(pattern, &key[1..]))
        }
        (Some(&"*"), Some(_)) => segments_match(&pattern[1..], &key[1..]),
        (Some(p), Some(k)) if p == k => segments_match(&pattern[1..], &key[1..]),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::time::Duration;

    async fn next(stream: &mut DeliveryStream) -> Delivery {
        tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("delivery timed out")
            .expect("stream ended")
    }

    #[test]
    fn topic_patterns() {
        assert!(topic_matches("order.events", "order.events"));
        assert!(!topic_matches("order.events", "order.created"));
        assert!(topic_matches("order.*", "order.created"));
        assert!(!topic_matches("order.*", "order.created.v2"));
        assert!(topic_matches("order.#", "order"));
        assert!(topic_matches("order.#", "order.created.v2"));
        assert!(topic_matches("#", "anything.at.all"));
        assert!(!topic_matches("*", "two.parts"));
    }

    #[tokio::test]
    async fn routes_by_binding_and_default_exchange() {
        let broker = InMemoryBroker::new();
        let conn = broker.connect().await.unwrap();
        conn.declare_exchange("ns").await.unwrap();
        conn.declare_queue("q1").await.unwrap();
        conn.declare_queue("q2").await.unwrap();
        conn.bind_queue("q1", "ns", "order.events").await.unwrap();

        conn.publish("ns", "order.events", b"a", DeliveryMode::Persistent)
            .await
            .unwrap();
        conn.publish("ns", "nobody.listens", b"b", DeliveryMode::Persistent)
            .await
            .unwrap();
        conn.publish(DEFAULT_EXCHANGE, "q2", b"c", DeliveryMode::Persistent)
            .await
            .unwrap();

        assert_eq!(broker.ready_messages("q1"), vec![b"a".to_vec()]);
        assert_eq!(broker.ready_messages("q2"), vec![b"c".to_vec()]);
        assert_eq!(broker.published().len(), 3);

        let err = conn
            .publish("missing", "k", b"x", DeliveryMode::Transient)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Transport { .. }));
    }

    #[tokio::test]
    async fn unacked_deliveries_requeue_when_connection_closes() {
        let broker = InMemoryBroker::new();
        let conn = broker.connect().await.unwrap();
        conn.declare_queue("q").await.unwrap();
        for body in [b"1", b"2"] {
            conn.publish(DEFAULT_EXCHANGE, "q", body, DeliveryMode::Persistent)
                .await
                .unwrap();
        }

        let mut stream = conn.consume("q", "c-1").await.unwrap();
        let first = next(&mut stream).await;
        let second = next(&mut stream).await;
        assert!(!first.redelivered());
        first.ack().await.unwrap();
        assert_eq!(broker.unacked_count("q"), Some(1));

        broker.sever_connections();
        assert!(!conn.is_open());
        assert!(conn.closed().is_cancelled());
        assert!(second.ack().await.is_err());
        assert!(stream.next().await.is_none());

        // 持久队列仍在，未确认的消息回到队首
        assert_eq!(broker.queue_depth("q"), Some(1));
        let conn = broker.connect().await.unwrap();
        let mut stream = conn.consume("q", "c-2").await.unwrap();
        let again = next(&mut stream).await;
        assert_eq!(again.body(), b"2");
        assert!(again.redelivered());
        again.ack().await.unwrap();
        assert_eq!(broker.ack_count(), 2);
    }

    #[tokio::test]
    async fn unreachable_broker_refuses_connections() {
        let broker = InMemoryBroker::new();
        let conn = broker.connect().await.unwrap();
        broker.set_reachable(false);

        let err = broker.connect().await.err().unwrap();
        assert!(matches!(err, DomainError::Connection { .. }));
        assert!(conn.heartbeat().await.is_ok());

        conn.close().await;
        assert!(conn.heartbeat().await.is_err());
        assert_eq!(broker.connection_count(), 0);
    }

    #[tokio::test]
    async fn nack_with_requeue_redelivers() {
        let broker = InMemoryBroker::new();
        let conn = broker.connect().await.unwrap();
        conn.declare_queue("q").await.unwrap();
        let mut stream = conn.consume("q", "c").await.unwrap();
        conn.publish(DEFAULT_EXCHANGE, "q", b"x", DeliveryMode::Persistent)
            .await
            .unwrap();

        next(&mut stream).await.nack(true).await.unwrap();
        let again = next(&mut stream).await;
        assert!(again.redelivered());
    }

    #[tokio::test]
    async fn delete_queue_ends_consumers() {
        let broker = InMemoryBroker::new();
        let conn = broker.connect().await.unwrap();
        conn.declare_queue("q").await.unwrap();
        let mut stream = conn.consume("q", "c").await.unwrap();

        conn.delete_queue("q").await.unwrap();
        assert!(!broker.queue_exists("q"));
        assert!(stream.next().await.is_none());
    }
}

//! 消息客户端（BrokerClient）
//!
//! 统一管理与中间件的连接生命周期：
//! - `start` 建立连接、声明拓扑，并启动重连监督与周期健康检查；
//! - `publish` 仅在已连接时发送，否则立即失败；
//! - `subscribe` 为每次订阅创建唯一持久队列，每条投递独立成任务处理，
//!   处理成功或重试/死信处置完成后才确认；
//! - 连接断开后由监督任务重连、重新声明拓扑并恢复全部订阅；
//! - `stop` 协作式取消并等待在途投递完成确认后关闭连接。
//!
//! 锁顺序：订阅表先于连接句柄；监督任务持有连接写锁期间不获取订阅表。
//!
use super::config::MessagingConfig;
use super::dead_letter::{DEAD_LETTER_TOPIC, DeadLetterRouter};
use super::handler::{DeliveryContext, MessageHandler};
use super::message::Message;
use super::retry::{RetryDecision, RetryScheduler};
use super::transport::{Connection, Delivery, DeliveryMode, DeliveryStream, Transport};
use crate::error::{DomainError, DomainResult as Result};
use futures_util::StreamExt;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use ulid::Ulid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Reconnecting,
    /// 重连次数耗尽，需要外部重新 `start`
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Clone)]
struct Subscription {
    topic: String,
    queue: String,
    handler: Arc<dyn MessageHandler>,
    token: CancellationToken,
}

struct ClientInner {
    transport: Arc<dyn Transport>,
    config: MessagingConfig,
    link: RwLock<Option<Arc<dyn Connection>>>,
    subscriptions: RwLock<HashMap<String, Vec<Subscription>>>,
    state: watch::Sender<ConnectionState>,
    started: AtomicBool,
    /// 串行化 `start`：检查、连接与登记在同一临界区内完成
    starting: Mutex<()>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    retry: RetryScheduler,
    dead_letter: DeadLetterRouter,
}

#[derive(Clone)]
pub struct BrokerClient {
    inner: Arc<ClientInner>,
}

impl BrokerClient {
    pub fn new(transport: Arc<dyn Transport>, config: MessagingConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let retry = RetryScheduler::new(config.retry.clone());
        let dead_letter = DeadLetterRouter::new(config.namespace.clone());

        Self {
            inner: Arc::new(ClientInner {
                transport,
                config,
                link: RwLock::new(None),
                subscriptions: RwLock::new(HashMap::new()),
                state,
                started: AtomicBool::new(false),
                starting: Mutex::new(()),
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
                retry,
                dead_letter,
            }),
        }
    }

    pub fn config(&self) -> &MessagingConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn dead_letter_queue(&self) -> String {
        self.inner.dead_letter.queue_name()
    }

    /// 建立连接并声明拓扑；首次连接失败直接返回 `Connection` 错误。
    ///
    /// 进入 `Failed` 后可再次调用以重新建立连接并恢复订阅。
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        let _starting = inner.starting.lock().await;
        if inner.shutdown.is_cancelled() {
            return Err(DomainError::invalid_state("broker client stopped"));
        }

        let state = self.state();
        if inner.started.load(Ordering::SeqCst) && state != ConnectionState::Failed {
            return Err(DomainError::invalid_state(format!(
                "broker client already started ({state})"
            )));
        }

        let conn = inner
            .transport
            .connect()
            .await
            .map_err(|e| DomainError::connection(e.to_string()))?;
        if let Err(err) = inner.restore(&conn).await {
            conn.close().await;
            return Err(DomainError::connection(err.to_string()));
        }

        *inner.link.write().await = Some(conn.clone());
        let first_start = !inner.started.swap(true, Ordering::SeqCst);
        inner.set_state(ConnectionState::Connected);

        // 进入 Failed 时监督任务已退出，健康检查仍在运行
        inner
            .tracker
            .spawn(ClientInner::supervise(inner.clone(), conn.closed()));
        if first_start {
            inner.spawn_health_check();
        }

        tracing::info!(namespace = %inner.config.namespace, "broker client started");
        Ok(())
    }

    /// 以持久化模式发布到主题；未连接时立即返回 `Publish` 错误
    pub async fn publish(&self, topic: &str, message: &Message) -> Result<()> {
        let state = self.state();
        if state != ConnectionState::Connected {
            return Err(DomainError::publish(format!("broker {state}")));
        }

        let conn = self
            .inner
            .current_connection()
            .await
            .ok_or_else(|| DomainError::publish("no live connection"))?;
        let body = message.to_bytes()?;

        conn.publish(
            &self.inner.config.namespace,
            topic,
            &body,
            DeliveryMode::Persistent,
        )
        .await
        .map_err(|e| DomainError::publish(e.to_string()))?;

        tracing::debug!(
            topic,
            message_id = message.id(),
            message_type = message.message_type(),
            "message published"
        );
        Ok(())
    }

    /// 订阅主题，返回创建的队列名 `{namespace}.{topic}.{random}`
    pub async fn subscribe(&self, topic: &str, handler: Arc<dyn MessageHandler>) -> Result<String> {
        if topic.trim().is_empty() {
            return Err(DomainError::InvalidCommand {
                reason: "topic must not be empty".to_string(),
            });
        }
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return Err(DomainError::invalid_state("broker client stopped"));
        }

        let mut subscriptions = inner.subscriptions.write().await;
        let conn = inner
            .current_connection()
            .await
            .ok_or_else(|| DomainError::connection(format!("broker {}", self.state())))?;

        let subscription = Subscription {
            topic: topic.to_string(),
            queue: format!(
                "{}.{topic}.{}",
                inner.config.namespace,
                Ulid::new().to_string().to_lowercase()
            ),
            handler,
            token: inner.shutdown.child_token(),
        };
        inner.start_consumer(&conn, &subscription).await?;

        let queue = subscription.queue.clone();
        tracing::info!(
            topic,
            queue = %queue,
            handler = subscription.handler.handler_name(),
            "subscribed"
        );
        subscriptions
            .entry(topic.to_string())
            .or_default()
            .push(subscription);
        Ok(queue)
    }

    /// 取消该主题的全部订阅并删除其队列；无订阅时返回 `false`
    ///
    /// 未连接时返回 `Connection` 错误且订阅保持不变，连接恢复后可重试。
    /// 队列删除成功后才移除对应订阅，部分失败时剩余订阅仍由重连恢复。
    pub async fn unsubscribe(&self, topic: &str) -> Result<bool> {
        let inner = &self.inner;
        let mut subscriptions = inner.subscriptions.write().await;
        let Some(entries) = subscriptions.get_mut(topic) else {
            return Ok(false);
        };

        let conn = inner
            .current_connection()
            .await
            .ok_or_else(|| DomainError::connection(format!("broker {}", self.state())))?;

        while let Some(queue) = entries.last().map(|s| s.queue.clone()) {
            conn.delete_queue(&queue).await?;
            if let Some(subscription) = entries.pop() {
                subscription.token.cancel();
            }
        }
        subscriptions.remove(topic);

        tracing::info!(topic, "unsubscribed");
        Ok(true)
    }

    /// 当前有订阅的主题（升序）
    pub async fn active_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .inner
            .subscriptions
            .read()
            .await
            .keys()
            .cloned()
            .collect();
        topics.sort();
        topics
    }

    /// 停止客户端：取消投递循环，等待在途投递完成处置与确认，再关闭连接。
    ///
    /// 等待中的重试会立即重新发布，不再等待退避时长。
    pub async fn stop(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return Ok(());
        }

        inner.shutdown.cancel();
        inner.tracker.close();
        inner.tracker.wait().await;

        inner.subscriptions.write().await.clear();
        let conn = inner.link.write().await.take();
        if let Some(conn) = conn {
            conn.close().await;
        }

        inner.set_state(ConnectionState::Disconnected);
        tracing::info!(namespace = %inner.config.namespace, "broker client stopped");
        Ok(())
    }
}

impl ClientInner {
    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::info!(from = %previous, to = %next, "broker connection state changed");
        }
    }

    async fn current_connection(&self) -> Option<Arc<dyn Connection>> {
        self.link
            .read()
            .await
            .as_ref()
            .filter(|conn| conn.is_open())
            .cloned()
    }

    async fn declare_topology(&self, conn: &Arc<dyn Connection>) -> Result<()> {
        let exchange = &self.config.namespace;
        let dead_letter_queue = self.dead_letter.queue_name();

        conn.declare_exchange(exchange).await?;
        conn.declare_queue(&dead_letter_queue).await?;
        conn.bind_queue(&dead_letter_queue, exchange, DEAD_LETTER_TOPIC)
            .await
    }

    /// 声明拓扑并在该连接上恢复全部订阅
    async fn restore(self: &Arc<Self>, conn: &Arc<dyn Connection>) -> Result<()> {
        self.declare_topology(conn).await?;

        let subscriptions = self.subscriptions.read().await;
        for subscription in subscriptions.values().flatten() {
            self.start_consumer(conn, subscription).await?;
        }
        Ok(())
    }

    async fn start_consumer(
        self: &Arc<Self>,
        conn: &Arc<dyn Connection>,
        subscription: &Subscription,
    ) -> Result<()> {
        conn.declare_queue(&subscription.queue).await?;
        conn.bind_queue(
            &subscription.queue,
            &self.config.namespace,
            &subscription.topic,
        )
        .await?;

        let consumer_tag = format!("{}#{}", subscription.queue, Ulid::new());
        let stream = conn.consume(&subscription.queue, &consumer_tag).await?;

        self.tracker.spawn(Self::consume_loop(
            self.clone(),
            subscription.clone(),
            conn.clone(),
            stream,
        ));
        Ok(())
    }

    async fn consume_loop(
        self: Arc<Self>,
        subscription: Subscription,
        conn: Arc<dyn Connection>,
        mut stream: DeliveryStream,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = subscription.token.cancelled() => break,
                next = stream.next() => match next {
                    Some(delivery) => {
                        self.tracker.spawn(Self::process_delivery(
                            self.clone(),
                            subscription.clone(),
                            conn.clone(),
                            delivery,
                        ));
                    }
                    // 连接关闭或队列被删除；恢复由监督任务负责
                    None => break,
                },
            }
        }
        tracing::debug!(queue = %subscription.queue, "consumer loop finished");
    }

    async fn process_delivery(
        self: Arc<Self>,
        subscription: Subscription,
        conn: Arc<dyn Connection>,
        delivery: Delivery,
    ) {
        let Subscription {
            topic,
            queue,
            handler,
            ..
        } = &subscription;

        let message = match Message::from_slice(delivery.body()) {
            Ok(message) => message,
            Err(err) => {
                let message = Message::undecodable(delivery.body());
                let reason = format!("undecodable message body: {err}");
                self.route_dead_letter(&conn, &delivery, &message, topic, queue, &reason)
                    .await;
                return;
            }
        };

        let retry_count = message.retry_count();
        let ctx = DeliveryContext::new(
            topic.as_str(),
            queue.as_str(),
            retry_count,
            delivery.redelivered(),
            conn.closed().child_token(),
        );

        let err = match handler.handle(&ctx, &message).await {
            Ok(()) => {
                Self::ack(&delivery, queue).await;
                return;
            }
            Err(err) => err,
        };

        let reason = format!("{err:#}");
        match self.retry.decide(retry_count) {
            RetryDecision::Retry { next_count, delay } => {
                tracing::warn!(
                    handler = handler.handler_name(),
                    topic = %topic,
                    message_id = message.id(),
                    retry = next_count,
                    delay_ms = delay.as_millis() as u64,
                    error = %reason,
                    "message handler failed; scheduling retry"
                );

                tokio::select! {
                    _ = time::sleep(delay) => {}
                    _ = self.shutdown.cancelled() => {}
                    // 连接已断开，原投递已由中间件重新入队
                    _ = ctx.cancellation().cancelled() => return,
                }

                match self
                    .retry
                    .redeliver(conn.as_ref(), queue, &message, next_count)
                    .await
                {
                    Ok(()) => Self::ack(&delivery, queue).await,
                    Err(err) => tracing::warn!(
                        queue = %queue,
                        message_id = message.id(),
                        error = %err,
                        "retry publish failed; delivery left unacknowledged"
                    ),
                }
            }
            RetryDecision::DeadLetter if topic == DEAD_LETTER_TOPIC => {
                // 死信订阅自身失败不再回流到死信主题，原消息仍保留在死信队列
                tracing::error!(
                    handler = handler.handler_name(),
                    message_id = message.id(),
                    error = %reason,
                    "dead-letter handler exhausted retries; dropping delivery"
                );
                Self::ack(&delivery, queue).await;
            }
            RetryDecision::DeadLetter => {
                self.route_dead_letter(&conn, &delivery, &message, topic, queue, &reason)
                    .await;
            }
        }
    }

    async fn route_dead_letter(
        &self,
        conn: &Arc<dyn Connection>,
        delivery: &Delivery,
        message: &Message,
        topic: &str,
        queue: &str,
        reason: &str,
    ) {
        match self
            .dead_letter
            .route(conn.as_ref(), message, topic, queue, reason)
            .await
        {
            Ok(()) => Self::ack(delivery, queue).await,
            Err(err) => tracing::warn!(
                queue,
                message_id = message.id(),
                error = %err,
                "dead-letter publish failed; delivery left unacknowledged"
            ),
        }
    }

    async fn ack(delivery: &Delivery, queue: &str) {
        if let Err(err) = delivery.ack().await {
            tracing::warn!(
                queue,
                delivery_tag = delivery.delivery_tag(),
                error = %err,
                "ack failed; broker will redeliver"
            );
        }
    }

    /// 等待连接关闭信号并驱动重连，直到停止或进入 `Failed`
    async fn supervise(self: Arc<Self>, mut closed: CancellationToken) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = closed.cancelled() => {}
            }
            if self.shutdown.is_cancelled() {
                return;
            }

            match self.reconnect().await {
                Some(next) => closed = next,
                None => return,
            }
        }
    }

    async fn reconnect(self: &Arc<Self>) -> Option<CancellationToken> {
        self.set_state(ConnectionState::Reconnecting);
        *self.link.write().await = None;

        let max_attempts = self.config.max_reconnect_attempts;
        for attempt in 1..=max_attempts {
            if attempt > 1 {
                tokio::select! {
                    _ = self.shutdown.cancelled() => return None,
                    _ = time::sleep(self.config.reconnect_delay) => {}
                }
            }

            let conn = match self.transport.connect().await {
                Ok(conn) => conn,
                Err(err) => {
                    tracing::warn!(attempt, max_attempts, error = %err, "reconnect attempt failed");
                    continue;
                }
            };

            if let Err(err) = self.restore(&conn).await {
                tracing::warn!(attempt, max_attempts, error = %err, "topology restore failed");
                conn.close().await;
                continue;
            }

            if self.shutdown.is_cancelled() {
                conn.close().await;
                return None;
            }

            *self.link.write().await = Some(conn.clone());
            self.set_state(ConnectionState::Connected);
            tracing::info!(attempt, "broker connection re-established");
            return Some(conn.closed());
        }

        self.set_state(ConnectionState::Failed);
        tracing::error!(max_attempts, "broker reconnection attempts exhausted");
        None
    }

    fn spawn_health_check(self: &Arc<Self>) {
        let inner = self.clone();
        self.spawn_periodic(self.config.health_check_interval, move || {
            let inner = inner.clone();
            async move {
                let connected = *inner.state.borrow() == ConnectionState::Connected;
                if !connected {
                    return;
                }
                let Some(conn) = inner.current_connection().await else {
                    return;
                };
                if let Err(err) = conn.heartbeat().await {
                    tracing::warn!(error = %err, "broker health check failed; closing connection");
                    // 关闭信号交由监督任务处理
                    conn.close().await;
                }
            }
        });
    }

    fn spawn_periodic<F, Fut>(&self, interval: Duration, mut f: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let token = self.shutdown.clone();
        self.tracker.spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => f().await,
                }
            }
        });
    }
}

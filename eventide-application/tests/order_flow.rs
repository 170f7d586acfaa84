use anyhow::Result as AnyResult;
use async_trait::async_trait;
use eventide_application::InMemoryCommandBus;
use eventide_application::command::{Command, CommandEnvelope};
use eventide_application::command_bus::CommandBus;
use eventide_application::command_handler::CommandHandler;
use eventide_application::context::AppContext;
use eventide_application::error::AppError;
use eventide_domain::aggregate::Aggregate;
use eventide_domain::aggregate_root::AggregateRoot;
use eventide_domain::domain_event::{BusinessContext, DomainEvent};
use eventide_domain::error::{DomainError, DomainResult};
use eventide_domain::event_decoder::EventDecoders;
use eventide_domain::messaging::{
    AGGREGATE_VERSION_HEADER, BrokerClient, CORRELATION_ID_HEADER, DeliveryContext,
    InMemoryBroker, Message, MessageHandler, MessagingConfig,
};
use eventide_domain::persist::{EventSourcedRepository, EventStore, InMemoryEventStore};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const ORDER_TOPIC: &str = "order.events";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LineItem {
    sku: String,
    quantity: u32,
    unit_price: i64,
}

#[derive(Debug)]
struct CreateOrder {
    order_id: String,
    customer_id: String,
    items: Vec<LineItem>,
}

impl Command for CreateOrder {
    const NAME: &'static str = "CreateOrder";

    fn validate(&self) -> Result<(), AppError> {
        if self.customer_id.is_empty() {
            return Err(AppError::Validation("customer is required".into()));
        }
        if self.items.is_empty() || self.items.iter().any(|i| i.quantity == 0) {
            return Err(AppError::Validation("at least one non-empty line item".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Order {
    customer_id: String,
    total: i64,
    created: bool,
}

#[derive(Debug)]
enum OrderCommand {
    Create {
        order_id: String,
        customer_id: String,
        items: Vec<LineItem>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct OrderCreated {
    order_id: String,
    customer_id: String,
    total: i64,
}

#[derive(Debug, Clone, PartialEq)]
enum OrderEvent {
    Created(OrderCreated),
}

impl From<OrderCreated> for OrderEvent {
    fn from(e: OrderCreated) -> Self {
        OrderEvent::Created(e)
    }
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::Created(_) => "order.created",
        }
    }

    fn to_payload(&self) -> DomainResult<Value> {
        match self {
            OrderEvent::Created(e) => Ok(serde_json::to_value(e)?),
        }
    }
}

impl Aggregate for Order {
    const TYPE: &'static str = "order";
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn execute(&self, command: Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::Create { .. } if self.created => Err(DomainError::InvalidState {
                reason: "order already exists".into(),
            }),
            OrderCommand::Create {
                order_id,
                customer_id,
                items,
            } => {
                let total = items
                    .iter()
                    .map(|i| i64::from(i.quantity) * i.unit_price)
                    .sum();
                Ok(vec![
                    OrderCreated {
                        order_id,
                        customer_id,
                        total,
                    }
                    .into(),
                ])
            }
        }
    }

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::Created(e) => {
                self.customer_id = e.customer_id.clone();
                self.total = e.total;
                self.created = true;
            }
        }
    }
}

/// 追加事件后发布到订单主题
struct CreateOrderHandler {
    orders: AggregateRoot<Order>,
    broker: BrokerClient,
}

#[async_trait]
impl CommandHandler<CreateOrder> for CreateOrderHandler {
    async fn handle(&self, ctx: &AppContext, cmd: CommandEnvelope<CreateOrder>) -> Result<(), AppError> {
        let biz = ctx.biz.caused_by(cmd.id());
        let CreateOrder {
            order_id,
            customer_id,
            items,
        } = cmd.into_payload();

        let committed = self
            .orders
            .execute(
                &order_id,
                OrderCommand::Create {
                    order_id: order_id.clone(),
                    customer_id,
                    items,
                },
                biz,
            )
            .await?;

        for event in &committed {
            self.broker
                .publish(ORDER_TOPIC, &Message::from_event(event))
                .await?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct OrderSubscriber {
    received: Mutex<Vec<Message>>,
}

#[async_trait]
impl MessageHandler for OrderSubscriber {
    fn handler_name(&self) -> &str {
        "order-projection"
    }

    async fn handle(&self, _ctx: &DeliveryContext, message: &Message) -> anyhow::Result<()> {
        self.received.lock().unwrap().push(message.clone());
        Ok(())
    }
}

struct Fixture {
    bus: InMemoryCommandBus,
    store: Arc<InMemoryEventStore>,
    broker: BrokerClient,
    subscriber: Arc<OrderSubscriber>,
}

async fn fixture() -> AnyResult<Fixture> {
    let store = Arc::new(InMemoryEventStore::new());
    let decoders = Arc::new(EventDecoders::new().with_serde::<OrderCreated>("order.created"));
    let repo = Arc::new(EventSourcedRepository::<Order>::new(
        store.clone(),
        store.clone(),
        decoders,
    ));

    let config = MessagingConfig::builder().namespace("shop").build();
    let broker = BrokerClient::new(Arc::new(InMemoryBroker::new()), config);
    broker.start().await?;

    let subscriber = Arc::new(OrderSubscriber::default());
    broker.subscribe(ORDER_TOPIC, subscriber.clone()).await?;

    let bus = InMemoryCommandBus::new();
    bus.register::<CreateOrder, _>(Arc::new(CreateOrderHandler {
        orders: AggregateRoot::new(repo),
        broker: broker.clone(),
    }))?;

    Ok(Fixture {
        bus,
        store,
        broker,
        subscriber,
    })
}

fn create_order(order_id: &str) -> CreateOrder {
    CreateOrder {
        order_id: order_id.to_string(),
        customer_id: "cust-42".to_string(),
        items: vec![
            LineItem {
                sku: "book".into(),
                quantity: 2,
                unit_price: 1250,
            },
            LineItem {
                sku: "pen".into(),
                quantity: 3,
                unit_price: 150,
            },
        ],
    }
}

async fn wait_for_messages(subscriber: &OrderSubscriber, n: usize) -> Vec<Message> {
    let _ = tokio::time::timeout(Duration::from_secs(3), async {
        while subscriber.received.lock().unwrap().len() < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    subscriber.received.lock().unwrap().clone()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn create_order_appends_publishes_and_notifies_subscriber() -> AnyResult<()> {
    let f = fixture().await?;
    let ctx = AppContext::new(
        BusinessContext::builder()
            .correlation_id("cor-order".to_string())
            .actor_id("u-1".to_string())
            .build(),
    );

    let cmd = CommandEnvelope::from_context(&ctx, create_order("o-1"));
    f.bus.dispatch(&ctx, cmd).await?;

    let events = f.store.load_events("o-1", 0).await?;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type(), "order.created");
    assert_eq!(events[0].aggregate_version(), 1);

    let received = wait_for_messages(&f.subscriber, 1).await;
    assert_eq!(received.len(), 1);
    let message = &received[0];
    assert_eq!(message.message_type(), "order.created");
    assert_eq!(message.payload()["order_id"], json!("o-1"));
    assert_eq!(message.payload()["total"], json!(2 * 1250 + 3 * 150));
    assert_eq!(message.header(AGGREGATE_VERSION_HEADER), Some(&json!(1)));
    assert_eq!(message.header_str(CORRELATION_ID_HEADER), Some("cor-order"));

    // 没有重复投递
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(f.subscriber.received.lock().unwrap().len(), 1);

    f.broker.stop().await?;
    Ok(())
}

#[tokio::test]
async fn invalid_order_is_rejected_before_any_side_effect() -> AnyResult<()> {
    let f = fixture().await?;
    let mut order = create_order("o-2");
    order.items.clear();

    let err = f
        .bus
        .dispatch(&AppContext::default(), CommandEnvelope::new(order))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert!(err.never_executed());
    assert_eq!(f.store.event_count()?, 0);

    f.broker.stop().await?;
    assert!(f.subscriber.received.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn second_create_for_same_order_surfaces_domain_error() -> AnyResult<()> {
    let f = fixture().await?;
    let ctx = AppContext::default();

    f.bus
        .dispatch(&ctx, CommandEnvelope::new(create_order("o-3")))
        .await?;
    let err = f
        .bus
        .dispatch(&ctx, CommandEnvelope::new(create_order("o-3")))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AppError::Domain(DomainError::InvalidState { .. })
    ));
    assert!(!err.never_executed());
    assert_eq!(f.store.current_version("o-3").await?, 1);

    f.broker.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn publish_failure_after_append_is_reported_as_executed() -> AnyResult<()> {
    let f = fixture().await?;
    f.broker.stop().await?;

    let err = f
        .bus
        .dispatch(&AppContext::default(), CommandEnvelope::new(create_order("o-4")))
        .await
        .unwrap_err();

    // 事件已落库，但发布失败：调用方需按至少一次语义处理
    assert!(matches!(err, AppError::Domain(DomainError::Publish { .. })));
    assert!(!err.never_executed());
    assert_eq!(f.store.current_version("o-4").await?, 1);
    Ok(())
}

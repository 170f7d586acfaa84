/// 查询总线示例
/// 从事件存储中读取订单事件并汇总为只读 DTO
use async_trait::async_trait;
use eventide_application::InMemoryQueryBus;
use eventide_application::context::AppContext;
use eventide_application::dto::Dto;
use eventide_application::error::AppError;
use eventide_application::query::Query;
use eventide_application::query_bus::QueryBus;
use eventide_application::query_handler::QueryHandler;
use eventide_domain::domain_event::BusinessContext;
use eventide_domain::persist::{AppendBatch, EventStore, InMemoryEventStore, NewEvent};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;

#[derive(Debug)]
struct GetOrderSummary {
    order_id: String,
}

#[derive(Debug, Serialize)]
struct OrderSummary {
    order_id: String,
    version: usize,
    total: i64,
    status: &'static str,
}

impl Dto for OrderSummary {}

impl Query for GetOrderSummary {
    const NAME: &'static str = "GetOrderSummary";
    type Dto = OrderSummary;

    fn validate(&self) -> Result<(), AppError> {
        if !self.order_id.starts_with("o-") {
            return Err(AppError::Validation(format!(
                "malformed order id: {:?}",
                self.order_id
            )));
        }
        Ok(())
    }
}

/// 每次查询都从事件日志折叠出当前视图
struct OrderSummaryProjector {
    store: Arc<InMemoryEventStore>,
}

#[async_trait]
impl QueryHandler<GetOrderSummary> for OrderSummaryProjector {
    async fn handle(&self, _ctx: &AppContext, q: GetOrderSummary) -> Result<OrderSummary, AppError> {
        let events = self.store.load_events(&q.order_id, 0).await?;
        if events.is_empty() {
            return Err(AppError::AggregateNotFound(q.order_id));
        }

        let mut summary = OrderSummary {
            order_id: q.order_id,
            version: 0,
            total: 0,
            status: "open",
        };
        for event in &events {
            let amount = event.payload().get("amount").and_then(Value::as_i64);
            match event.event_type() {
                "order.created" | "order.item_added" => summary.total += amount.unwrap_or(0),
                "order.cancelled" => summary.status = "cancelled",
                _ => {}
            }
            summary.version = event.aggregate_version();
        }
        Ok(summary)
    }
}

fn order_event(event_type: &str, payload: Value) -> NewEvent {
    NewEvent::builder()
        .event_type(event_type.to_string())
        .payload(payload)
        .build()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(InMemoryEventStore::new());
    store
        .append(vec![
            AppendBatch::new(
                "o-1",
                "order",
                0,
                vec![
                    order_event("order.created", json!({"amount": 2500})),
                    order_event("order.item_added", json!({"amount": 450})),
                ],
            ),
            AppendBatch::new(
                "o-2",
                "order",
                0,
                vec![
                    order_event("order.created", json!({"amount": 900})),
                    order_event("order.cancelled", json!({})),
                ],
            ),
        ])
        .await?;

    let bus = InMemoryQueryBus::new();
    bus.register::<GetOrderSummary, _>(Arc::new(OrderSummaryProjector {
        store: store.clone(),
    }))?;

    // 同名查询只能绑定一个处理器
    if let Err(err) = bus.register::<GetOrderSummary, _>(Arc::new(OrderSummaryProjector {
        store: store.clone(),
    })) {
        eprintln!("{err}");
    }
    println!("registered: {:?}", bus.registered_queries());

    let ctx = AppContext::new(
        BusinessContext::builder()
            .correlation_id("cor-report".to_string())
            .build(),
    );
    for order_id in ["o-1", "o-2"] {
        let summary = bus
            .dispatch(
                &ctx,
                GetOrderSummary {
                    order_id: order_id.into(),
                },
            )
            .await?;
        println!("{}", serde_json::to_string(&summary)?);
    }

    for order_id in ["o-404", "42"] {
        match bus
            .dispatch(
                &ctx,
                GetOrderSummary {
                    order_id: order_id.into(),
                },
            )
            .await
        {
            Err(err) => eprintln!("{order_id}: {err} (never executed: {})", err.never_executed()),
            Ok(summary) => println!("unexpected summary: {summary:?}"),
        }
    }
    Ok(())
}

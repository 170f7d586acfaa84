use crate::{
    context::AppContext, error::AppError, query::Query, query_bus::QueryBus,
    query_handler::QueryHandler, registry::HandlerRegistry,
};
use async_trait::async_trait;
use std::any::{Any, TypeId, type_name};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

type BoxAnySend = Box<dyn Any + Send>;

type QueryHandlerFuture<'a> =
    Pin<Box<dyn Future<Output = Result<BoxAnySend, AppError>> + Send + 'a>>;

type QueryHandlerFn =
    Arc<dyn for<'a> Fn(BoxAnySend, &'a AppContext) -> QueryHandlerFuture<'a> + Send + Sync>;

#[derive(Clone)]
struct QueryEntry {
    type_id: TypeId,
    type_name: &'static str,
    call: QueryHandlerFn,
}

/// 基于内存的 QueryBus 实现
/// - 以 `Query::NAME` 为键注册处理器，重复注册失败；
/// - 以类型擦除方式调度，并在调用端还原 DTO。
pub struct InMemoryQueryBus {
    handlers: HandlerRegistry<QueryEntry>,
}

impl Default for InMemoryQueryBus {
    fn default() -> Self {
        Self {
            handlers: HandlerRegistry::new("query"),
        }
    }
}

impl InMemoryQueryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册查询处理器
    pub fn register<Q, H>(&self, handler: Arc<H>) -> Result<(), AppError>
    where
        Q: Query,
        H: QueryHandler<Q> + 'static,
    {
        let call: QueryHandlerFn = Arc::new(move |boxed_q, ctx| {
            let handler = handler.clone();

            Box::pin(async move {
                match boxed_q.downcast::<Q>() {
                    Ok(q) => {
                        let dto = handler.handle(ctx, *q).await?;
                        Ok(Box::new(dto) as BoxAnySend)
                    }
                    Err(_) => Err(AppError::TypeMismatch {
                        expected: type_name::<Q>(),
                        found: "unknown",
                    }),
                }
            })
        });

        self.handlers.register(
            Q::NAME,
            QueryEntry {
                type_id: TypeId::of::<Q>(),
                type_name: type_name::<Q>(),
                call,
            },
        )
    }

    /// 获取已注册的查询名列表（只读视图）
    pub fn registered_queries(&self) -> Vec<&'static str> {
        self.handlers.names()
    }
}

#[async_trait]
impl QueryBus for InMemoryQueryBus {
    async fn dispatch<Q: Query>(&self, ctx: &AppContext, q: Q) -> Result<Q::Dto, AppError> {
        q.validate()?;

        let entry = self
            .handlers
            .lookup(Q::NAME)
            .ok_or(AppError::HandlerNotFound(Q::NAME))?;
        if entry.type_id != TypeId::of::<Q>() {
            return Err(AppError::TypeMismatch {
                expected: type_name::<Q>(),
                found: entry.type_name,
            });
        }

        let out = (entry.call)(Box::new(q), ctx).await?;

        match out.downcast::<Q::Dto>() {
            Ok(dto) => Ok(*dto),
            Err(_) => Err(AppError::TypeMismatch {
                expected: type_name::<Q::Dto>(),
                found: "unknown",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::Dto;
    use serde::Serialize;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::task::JoinSet;

    #[derive(Debug)]
    struct Get {
        key: String,
    }

    impl Query for Get {
        const NAME: &'static str = "Get";
        type Dto = NumDto;

        fn validate(&self) -> Result<(), AppError> {
            if self.key.is_empty() {
                return Err(AppError::Validation("key is required".into()));
            }
            Ok(())
        }
    }

    fn get() -> Get {
        Get { key: "k".into() }
    }

    #[derive(Debug, Serialize)]
    struct NumDto(pub usize);

    impl Dto for NumDto {}

    #[derive(Debug, Serialize)]
    struct WrongDto;

    impl Dto for WrongDto {}

    struct GetHandler {
        counter: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl QueryHandler<Get> for GetHandler {
        async fn handle(&self, _ctx: &AppContext, _q: Get) -> Result<NumDto, AppError> {
            let v = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(NumDto(v))
        }
    }

    fn handler() -> (Arc<GetHandler>, Arc<AtomicUsize>) {
        let counter = Arc::new(AtomicUsize::new(0));
        (
            Arc::new(GetHandler {
                counter: counter.clone(),
            }),
            counter,
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn register_and_dispatch_works() {
        let bus = InMemoryQueryBus::new();
        let (h, _) = handler();
        bus.register::<Get, _>(h).unwrap();

        let NumDto(n) = bus.dispatch(&AppContext::default(), get()).await.unwrap();
        assert_eq!(n, 1);
        assert_eq!(bus.registered_queries(), vec!["Get"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn not_found_error_when_unregistered() {
        let bus = InMemoryQueryBus::new();
        let err = bus.dispatch(&AppContext::default(), get()).await.unwrap_err();
        match err {
            AppError::HandlerNotFound(name) => assert_eq!(name, "Get"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_query_never_reaches_handler() {
        let bus = InMemoryQueryBus::new();
        let (h, counter) = handler();
        bus.register::<Get, _>(h).unwrap();

        let err = bus
            .dispatch(&AppContext::default(), Get { key: String::new() })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn duplicate_registration_fails() {
        let bus = InMemoryQueryBus::new();
        let (first, first_counter) = handler();
        let (second, second_counter) = handler();
        bus.register::<Get, _>(first).unwrap();
        assert!(matches!(
            bus.register::<Get, _>(second),
            Err(AppError::DuplicateHandler { kind: "query", name: "Get" })
        ));

        bus.dispatch(&AppContext::default(), get()).await.unwrap();
        assert_eq!(first_counter.load(Ordering::SeqCst), 1);
        assert_eq!(second_counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn type_mismatch_error_when_result_downcast_fails() {
        let bus = InMemoryQueryBus::new();
        // 手动注册一个错误的条目：键是 Get，但闭包返回 WrongDto 而非 NumDto
        let call: QueryHandlerFn =
            Arc::new(|_boxed_q, _ctx| Box::pin(async move { Ok(Box::new(WrongDto) as BoxAnySend) }));
        bus.handlers
            .register(
                Get::NAME,
                QueryEntry {
                    type_id: TypeId::of::<Get>(),
                    type_name: type_name::<Get>(),
                    call,
                },
            )
            .unwrap();

        let err = bus.dispatch(&AppContext::default(), get()).await.unwrap_err();
        match err {
            AppError::TypeMismatch { expected, .. } => assert!(expected.contains("NumDto")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_dispatch_is_safe() {
        let bus = Arc::new(InMemoryQueryBus::new());
        let (h, _) = handler();
        bus.register::<Get, _>(h).unwrap();

        let mut set = JoinSet::new();
        let ctx = AppContext::default();
        for _ in 0..100 {
            let bus = bus.clone();
            let ctx = ctx.clone();
            set.spawn(async move { bus.dispatch(&ctx, get()).await.unwrap() });
        }
        let mut results = Vec::new();
        while let Some(res) = set.join_next().await {
            results.push(res.unwrap().0);
        }
        results.sort_unstable();
        assert_eq!(results.len(), 100);
        assert_eq!(results[0], 1);
        assert_eq!(results[99], 100);
    }
}

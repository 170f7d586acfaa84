use crate::aggregate::Aggregate;
use crate::error::DomainResult;
use crate::event_decoder::EventDecoders;
use crate::persist::SerializedEvent;

use super::business_context::BusinessContext;
use super::metadata::Metadata;

/// 事件信封，包含解码后的事件载荷、元数据与业务上下文
#[derive(Debug, Clone)]
pub struct EventEnvelope<A>
where
    A: Aggregate,
{
    pub metadata: Metadata,
    pub payload: A::Event,
    pub context: BusinessContext,
}

impl<A> EventEnvelope<A>
where
    A: Aggregate,
{
    /// 按事件类型标签选择解码器，将持久化形态还原为强类型事件
    pub fn decode(
        decoders: &EventDecoders<A::Event>,
        event: &SerializedEvent,
    ) -> DomainResult<Self> {
        let payload = decoders.decode(event.event_type(), event.payload())?;

        let metadata = Metadata::builder()
            .event_id(event.event_id().to_string())
            .aggregate_id(event.aggregate_id().to_string())
            .aggregate_type(event.aggregate_type().to_string())
            .aggregate_version(event.aggregate_version())
            .occurred_at(event.occurred_at())
            .build();

        Ok(Self {
            metadata,
            payload,
            context: BusinessContext::from_value(event.metadata()),
        })
    }
}

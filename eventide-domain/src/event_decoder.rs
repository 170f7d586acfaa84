//! 事件解码（Event Decoding）
//!
//! 持久化事件只保存类型标签与 JSON 载荷；读取路径通过 `EventDecoders`
//! 按标签选择解码器还原为聚合的事件类型。未注册的标签直接报错
//! （`UnknownEventType`），不会静默丢弃数据。
//!
use crate::error::{DomainError, DomainResult as Result};
use crate::persist::SerializedEvent;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type DecodeFn<E> = Arc<dyn Fn(&Value) -> Result<E> + Send + Sync>;

/// 事件类型标签 → 解码器 的映射
pub struct EventDecoders<E> {
    decoders: HashMap<String, DecodeFn<E>>,
}

impl<E> Default for EventDecoders<E> {
    fn default() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }
}

impl<E> Clone for EventDecoders<E> {
    fn clone(&self) -> Self {
        Self {
            decoders: self.decoders.clone(),
        }
    }
}

impl<E> fmt::Debug for EventDecoders<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<&str> = self.decoders.keys().map(String::as_str).collect();
        tags.sort_unstable();
        f.debug_struct("EventDecoders").field("tags", &tags).finish()
    }
}

impl<E> EventDecoders<E>
where
    E: 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册自定义解码器；同一标签重复注册时以后者为准
    pub fn register<F>(&mut self, event_type: impl Into<String>, decoder: F) -> &mut Self
    where
        F: Fn(&Value) -> Result<E> + Send + Sync + 'static,
    {
        self.decoders.insert(event_type.into(), Arc::new(decoder));
        self
    }

    /// 注册基于 serde 的解码器：载荷反序列化为 `T` 后转换为聚合事件
    pub fn with_serde<T>(mut self, event_type: impl Into<String>) -> Self
    where
        T: DeserializeOwned + Into<E>,
    {
        self.register(event_type, |payload| {
            let typed: T = serde_json::from_value(payload.clone())?;
            Ok(typed.into())
        });
        self
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.decoders.contains_key(event_type)
    }

    pub fn event_types(&self) -> Vec<&str> {
        self.decoders.keys().map(String::as_str).collect()
    }

    pub fn decode(&self, event_type: &str, payload: &Value) -> Result<E> {
        let Some(decoder) = self.decoders.get(event_type) else {
            return Err(DomainError::UnknownEventType {
                event_type: event_type.to_string(),
            });
        };

        decoder(payload)
    }

    /// 解码一批持久化事件，任一失败即整体失败
    pub fn decode_all(&self, events: &[SerializedEvent]) -> Result<Vec<E>> {
        events
            .iter()
            .map(|e| self.decode(e.event_type(), e.payload()))
            .collect()
    }
}

use bon::Builder;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 业务上下文信息（随事件一同落库的 metadata）
#[derive(Builder, Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessContext {
    /// 关联ID
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
    /// 因果ID
    #[serde(skip_serializing_if = "Option::is_none")]
    causation_id: Option<String>,
    /// 触发事件的主体类型（如用户、系统等）
    #[serde(skip_serializing_if = "Option::is_none")]
    actor_type: Option<String>,
    /// 触发事件的主体ID
    #[serde(skip_serializing_if = "Option::is_none")]
    actor_id: Option<String>,
}

impl BusinessContext {
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn causation_id(&self) -> Option<&str> {
        self.causation_id.as_deref()
    }

    pub fn actor_type(&self) -> Option<&str> {
        self.actor_type.as_deref()
    }

    pub fn actor_id(&self) -> Option<&str> {
        self.actor_id.as_deref()
    }

    /// 派生一个以 `cause_id`（通常是命令ID）为因果来源的上下文，关联ID保持不变
    pub fn caused_by(&self, cause_id: impl Into<String>) -> Self {
        Self {
            causation_id: Some(cause_id.into()),
            ..self.clone()
        }
    }

    pub fn to_value(&self) -> Value {
        // 仅包含字符串字段，序列化不会失败
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// 从事件 metadata 还原；缺失或形状不符时返回空上下文
    pub fn from_value(value: &Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_value_roundtrip_skips_empty_fields() {
        let biz = BusinessContext::builder()
            .correlation_id("cor-1".to_string())
            .actor_id("u-1".to_string())
            .build();

        let value = biz.to_value();
        assert_eq!(
            value,
            serde_json::json!({"correlation_id": "cor-1", "actor_id": "u-1"})
        );
        assert_eq!(BusinessContext::from_value(&value), biz);
        assert_eq!(
            BusinessContext::from_value(&Value::Null),
            BusinessContext::default()
        );
    }

    #[test]
    fn caused_by_keeps_correlation() {
        let biz = BusinessContext::builder()
            .correlation_id("cor-1".to_string())
            .build();
        let next = biz.caused_by("cmd-9");
        assert_eq!(next.correlation_id(), Some("cor-1"));
        assert_eq!(next.causation_id(), Some("cmd-9"));
    }
}

use serde::Serialize;

/// 查询结果的数据传输对象
///
/// 与领域模型解耦，保持只读、序列化友好；需显式实现，不做 blanket impl。
pub trait Dto: Serialize + Send + Sync + 'static {}

//! 处理器注册表
//!
//! 名称到处理器条目的并发映射，命令与查询总线共用。
//! 基于 `DashMap` 分片读写锁：查找走共享锁，注册通过 entry API 原子地“检查并插入”。
use crate::error::AppError;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

pub struct HandlerRegistry<F> {
    kind: &'static str,
    entries: DashMap<&'static str, F>,
}

impl<F: Clone> HandlerRegistry<F> {
    /// `kind` 仅用于错误信息（如 "command"、"query"）
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: DashMap::new(),
        }
    }

    /// 绑定名称；名称已被占用时失败，先注册者保持生效
    pub fn register(&self, name: &'static str, entry: F) -> Result<(), AppError> {
        if name.trim().is_empty() {
            return Err(AppError::InvalidHandlerName { kind: self.kind });
        }

        match self.entries.entry(name) {
            Entry::Occupied(_) => Err(AppError::DuplicateHandler {
                kind: self.kind,
                name,
            }),
            Entry::Vacant(slot) => {
                slot.insert(entry);
                tracing::debug!(kind = self.kind, name, "handler registered");
                Ok(())
            }
        }
    }

    pub fn lookup(&self, name: &str) -> Option<F> {
        self.entries.get(name).map(|e| e.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// 已注册名称（排序后返回）
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.entries.iter().map(|e| *e.key()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

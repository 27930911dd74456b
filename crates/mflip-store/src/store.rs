//! The store abstraction everything else persists through.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::StoreResult;

/// One buffered write in a [`Pipeline`].
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOp {
    Set {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    Del {
        key: String,
    },
    ZAdd {
        key: String,
        member: String,
        score: f64,
    },
    ZRem {
        key: String,
        member: String,
    },
    SAdd {
        key: String,
        member: String,
    },
    SRem {
        key: String,
        member: String,
    },
    RPush {
        key: String,
        value: String,
    },
}

/// A batch of writes committed together by [`Store::exec`].
///
/// Commands run in order as one round trip. There is no rollback if one of
/// them fails part-way.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    ops: Vec<PipelineOp>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.ops.push(PipelineOp::Set {
            key: key.into(),
            value: value.into(),
            ttl: None,
        });
        self
    }

    pub fn set_ex(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
        ttl: Duration,
    ) -> &mut Self {
        self.ops.push(PipelineOp::Set {
            key: key.into(),
            value: value.into(),
            ttl: Some(ttl),
        });
        self
    }

    pub fn del(&mut self, key: impl Into<String>) -> &mut Self {
        self.ops.push(PipelineOp::Del { key: key.into() });
        self
    }

    pub fn zadd(&mut self, key: impl Into<String>, member: impl Into<String>, score: f64) -> &mut Self {
        self.ops.push(PipelineOp::ZAdd {
            key: key.into(),
            member: member.into(),
            score,
        });
        self
    }

    pub fn zrem(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.ops.push(PipelineOp::ZRem {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    pub fn sadd(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.ops.push(PipelineOp::SAdd {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    pub fn srem(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.ops.push(PipelineOp::SRem {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    pub fn rpush(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.ops.push(PipelineOp::RPush {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[PipelineOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<PipelineOp> {
        self.ops
    }
}

/// Key-value store with list, set and sorted-set operations.
///
/// Missing keys read as empty: `None`, an empty collection or zero.
/// Ranges use Redis index semantics (inclusive, negative counts from the end).
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn mget(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()>;

    async fn zrange(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>>;

    async fn zrevrange(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>>;

    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool>;

    async fn zcard(&self, key: &str) -> StoreResult<u64>;

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<bool>;

    async fn srem(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// One page of a set scan. A returned cursor of 0 means the scan is done.
    async fn sscan(
        &self,
        key: &str,
        cursor: u64,
        pattern: Option<&str>,
        count: usize,
    ) -> StoreResult<(u64, Vec<String>)>;

    /// Returns the new list length.
    async fn rpush(&self, key: &str, value: &str) -> StoreResult<u64>;

    async fn lpop(&self, key: &str) -> StoreResult<Option<String>>;

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>>;

    /// Remove up to `count` occurrences of `value` (all when 0). Returns how many went.
    async fn lrem(&self, key: &str, count: isize, value: &str) -> StoreResult<u64>;

    async fn llen(&self, key: &str) -> StoreResult<u64>;

    async fn exec(&self, pipeline: Pipeline) -> StoreResult<()>;
}

/// Escape glob metacharacters so `text` matches literally in a scan pattern.
pub fn escape_glob(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

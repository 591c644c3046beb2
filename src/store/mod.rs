//! Typed access to the key-value store backing the queue.
//!
//! [`Store`] exposes the handful of hash, sorted-set and counter primitives the
//! queue needs. [`RedisStore`] is the production backend; [`MemoryStore`] keeps
//! everything in process for tests and local development.

mod memory;
mod redis_store;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;

/// A sorted-set entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMember {
    pub member: String,
    pub score: f64,
}

/// A write that can be grouped with others in [`Store::apply`].
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    HashSet { key: String, fields: Vec<(String, String)> },
    SortedAdd { key: String, member: String, score: f64 },
    SortedRemove { key: String, member: String },
    Incr { key: String },
}

impl StoreOp {
    pub fn hset(key: impl Into<String>, fields: Vec<(String, String)>) -> Self {
        StoreOp::HashSet { key: key.into(), fields }
    }

    pub fn zadd(key: impl Into<String>, member: impl Into<String>, score: f64) -> Self {
        StoreOp::SortedAdd {
            key: key.into(),
            member: member.into(),
            score,
        }
    }

    pub fn zrem(key: impl Into<String>, member: impl Into<String>) -> Self {
        StoreOp::SortedRemove {
            key: key.into(),
            member: member.into(),
        }
    }

    pub fn incr(key: impl Into<String>) -> Self {
        StoreOp::Incr { key: key.into() }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn hset_multiple(&self, key: &str, fields: &[(String, String)]) -> Result<()>;

    /// All fields of a hash; empty when the key does not exist.
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()>;

    /// Returns whether the member was present.
    async fn zrem(&self, key: &str, member: &str) -> Result<bool>;

    async fn zcard(&self, key: &str) -> Result<u64>;

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>>;

    /// Members with `min <= score <= max`, lowest score first.
    async fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<Vec<ScoredMember>>;

    /// Atomically pops the highest-scored member of `src` and adds it to `dst`
    /// with `score`. Two callers never receive the same member.
    async fn zmove_max(&self, src: &str, dst: &str, score: f64) -> Result<Option<ScoredMember>>;

    /// Atomically moves `member` from `src` to `dst`, only if it was still in
    /// `src`, and in the same step sets `stamp` on the hash at `stamp_key`.
    /// Returns whether the move happened; nothing is written otherwise.
    async fn zmove(
        &self,
        src: &str,
        dst: &str,
        member: &str,
        score: f64,
        stamp_key: &str,
        stamp: &[(String, String)],
    ) -> Result<bool>;

    async fn incr(&self, key: &str) -> Result<i64>;

    /// Counter value; a missing key reads as zero.
    async fn get_counter(&self, key: &str) -> Result<i64>;

    /// Executes every op or none of them.
    async fn apply(&self, ops: Vec<StoreOp>) -> Result<()>;

    async fn ping(&self) -> Result<()>;
}

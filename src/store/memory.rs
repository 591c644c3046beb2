use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{ScoredMember, Store, StoreOp};
use crate::error::Result;

/// In-process [`Store`] for development and testing.
///
/// Every call takes a single lock, so each primitive is atomic with respect to
/// the others. Not durable.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    hashes: HashMap<String, HashMap<String, String>>,
    sorted: HashMap<String, HashMap<String, f64>>,
    counters: HashMap<String, i64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryState {
    fn zadd(&mut self, key: &str, member: &str, score: f64) {
        self.sorted
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
    }

    fn zrem(&mut self, key: &str, member: &str) -> bool {
        self.sorted
            .get_mut(key)
            .map(|set| set.remove(member).is_some())
            .unwrap_or(false)
    }

    fn hset(&mut self, key: &str, fields: &[(String, String)]) {
        let hash = self.hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert(field.clone(), value.clone());
        }
    }

    fn incr(&mut self, key: &str) -> i64 {
        let counter = self.counters.entry(key.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    // Ties resolve to the lexicographically greatest member, as ZPOPMAX does.
    fn pop_max(&mut self, key: &str) -> Option<ScoredMember> {
        let set = self.sorted.get_mut(key)?;
        let (member, score) = set
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1).then_with(|| a.0.cmp(b.0)))
            .map(|(m, s)| (m.clone(), *s))?;
        set.remove(&member);
        Some(ScoredMember { member, score })
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn hset_multiple(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        self.state.lock().await.hset(key, fields);
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let state = self.state.lock().await;
        Ok(state.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        self.state.lock().await.zadd(key, member, score);
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool> {
        Ok(self.state.lock().await.zrem(key, member))
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        let state = self.state.lock().await;
        Ok(state.sorted.get(key).map(|s| s.len() as u64).unwrap_or(0))
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>> {
        let state = self.state.lock().await;
        Ok(state.sorted.get(key).and_then(|s| s.get(member).copied()))
    }

    async fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<Vec<ScoredMember>> {
        let state = self.state.lock().await;
        let mut members: Vec<ScoredMember> = state
            .sorted
            .get(key)
            .into_iter()
            .flat_map(|set| set.iter())
            .filter(|(_, score)| **score >= min && **score <= max)
            .map(|(member, score)| ScoredMember {
                member: member.clone(),
                score: *score,
            })
            .collect();
        members.sort_by(|a, b| a.score.total_cmp(&b.score).then_with(|| a.member.cmp(&b.member)));
        Ok(members)
    }

    async fn zmove_max(&self, src: &str, dst: &str, score: f64) -> Result<Option<ScoredMember>> {
        let mut state = self.state.lock().await;
        let popped = state.pop_max(src);
        if let Some(entry) = &popped {
            state.zadd(dst, &entry.member, score);
        }
        Ok(popped)
    }

    async fn zmove(
        &self,
        src: &str,
        dst: &str,
        member: &str,
        score: f64,
        stamp_key: &str,
        stamp: &[(String, String)],
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        if !state.zrem(src, member) {
            return Ok(false);
        }
        state.zadd(dst, member, score);
        if !stamp.is_empty() {
            state.hset(stamp_key, stamp);
        }
        Ok(true)
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        Ok(self.state.lock().await.incr(key))
    }

    async fn get_counter(&self, key: &str) -> Result<i64> {
        let state = self.state.lock().await;
        Ok(state.counters.get(key).copied().unwrap_or(0))
    }

    async fn apply(&self, ops: Vec<StoreOp>) -> Result<()> {
        let mut state = self.state.lock().await;
        for op in ops {
            match op {
                StoreOp::HashSet { key, fields } => state.hset(&key, &fields),
                StoreOp::SortedAdd { key, member, score } => state.zadd(&key, &member, score),
                StoreOp::SortedRemove { key, member } => {
                    state.zrem(&key, &member);
                }
                StoreOp::Incr { key } => {
                    state.incr(&key);
                }
            }
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

use std::collections::HashMap;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client, Script, Value};
use tracing::info;

use super::{ScoredMember, Store, StoreOp};
use crate::config::QueueConfig;
use crate::error::{QueueError, Result};
use crate::utils::constants::REDIS_URL_ENV;

// Pops the max member of KEYS[1] and adds it to KEYS[2] with score ARGV[1].
static ZMOVE_MAX: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
local popped = redis.call('ZPOPMAX', KEYS[1])
if #popped == 0 then
  return popped
end
redis.call('ZADD', KEYS[2], ARGV[1], popped[1])
return popped
"#,
    )
});

// Moves ARGV[1] from KEYS[1] to KEYS[2] with score ARGV[2] if still present,
// then sets the field/value pairs in ARGV[3..] on hash KEYS[3].
static ZMOVE: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
if redis.call('ZREM', KEYS[1], ARGV[1]) == 1 then
  redis.call('ZADD', KEYS[2], ARGV[2], ARGV[1])
  if #ARGV > 2 then
    redis.call('HSET', KEYS[3], unpack(ARGV, 3))
  end
  return 1
end
return 0
"#,
    )
});

/// [`Store`] backed by a multiplexed Redis connection. Cloning shares the
/// connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        // Client::open handles rediss:// when the TLS feature is enabled
        let client = Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!("connected to queue store");
        Ok(Self { conn })
    }

    /// Connects using the configured URL, failing fast when there is none.
    pub async fn from_config(config: &QueueConfig) -> Result<Self> {
        match config.redis_url.as_deref() {
            Some(url) if !url.trim().is_empty() => Self::connect(url).await,
            _ => Err(QueueError::NotConfigured(REDIS_URL_ENV)),
        }
    }
}

/// Normalizes a flat `[member, score, member, score, ...]` reply.
pub(crate) fn parse_scored_pairs(value: Value) -> Result<Vec<ScoredMember>> {
    let items = match value {
        Value::Nil => return Ok(Vec::new()),
        Value::Bulk(items) => items,
        other => return Err(QueueError::UnexpectedReply(format!("{other:?}"))),
    };
    if items.len() % 2 != 0 {
        return Err(QueueError::UnexpectedReply(format!(
            "odd number of elements in scored reply: {}",
            items.len()
        )));
    }

    let mut pairs = Vec::with_capacity(items.len() / 2);
    for chunk in items.chunks(2) {
        let member = match &chunk[0] {
            Value::Data(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            other => return Err(QueueError::UnexpectedReply(format!("member {other:?}"))),
        };
        let score = match &chunk[1] {
            Value::Data(bytes) => String::from_utf8_lossy(bytes)
                .parse::<f64>()
                .map_err(|_| QueueError::UnexpectedReply(format!("score for '{member}'")))?,
            Value::Int(n) => *n as f64,
            other => return Err(QueueError::UnexpectedReply(format!("score {other:?}"))),
        };
        pairs.push(ScoredMember { member, score });
    }
    Ok(pairs)
}

#[async_trait]
impl Store for RedisStore {
    async fn hset_multiple(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.hset_multiple::<_, _, _, ()>(key, fields).await?;
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        Ok(conn.hgetall(key).await?)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.zadd::<_, _, _, ()>(key, member, score).await?;
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.zrem(key, member).await?;
        Ok(removed > 0)
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        Ok(conn.zcard(key).await?)
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>> {
        let mut conn = self.conn.clone();
        Ok(conn.zscore(key, member).await?)
    }

    async fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<Vec<ScoredMember>> {
        let mut conn = self.conn.clone();
        let entries: Vec<(String, f64)> = conn.zrangebyscore_withscores(key, min, max).await?;
        Ok(entries
            .into_iter()
            .map(|(member, score)| ScoredMember { member, score })
            .collect())
    }

    async fn zmove_max(&self, src: &str, dst: &str, score: f64) -> Result<Option<ScoredMember>> {
        let mut conn = self.conn.clone();
        let reply: Value = ZMOVE_MAX
            .key(src)
            .key(dst)
            .arg(score)
            .invoke_async(&mut conn)
            .await?;
        Ok(parse_scored_pairs(reply)?.into_iter().next())
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
        let mut conn = self.conn.clone();
        let mut invocation = ZMOVE.key(src);
        invocation.key(dst).key(stamp_key).arg(member).arg(score);
        for (field, value) in stamp {
            invocation.arg(field).arg(value);
        }
        let moved: i64 = invocation.invoke_async(&mut conn).await?;
        Ok(moved == 1)
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        Ok(conn.incr(key, 1).await?)
    }

    async fn get_counter(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        let value: Option<i64> = conn.get(key).await?;
        Ok(value.unwrap_or(0))
    }

    async fn apply(&self, ops: Vec<StoreOp>) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in &ops {
            match op {
                StoreOp::HashSet { key, fields } => {
                    pipe.hset_multiple(key, fields.as_slice()).ignore();
                }
                StoreOp::SortedAdd { key, member, score } => {
                    pipe.zadd(key, member, *score).ignore();
                }
                StoreOp::SortedRemove { key, member } => {
                    pipe.zrem(key, member).ignore();
                }
                StoreOp::Incr { key } => {
                    pipe.incr(key, 1).ignore();
                }
            }
        }
        let mut conn = self.conn.clone();
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(s: &str) -> Value {
        Value::Data(s.as_bytes().to_vec())
    }

    #[test]
    fn parses_pop_reply() {
        let reply = Value::Bulk(vec![data("1700000000000-abc"), data("5")]);
        let pairs = parse_scored_pairs(reply).unwrap();
        assert_eq!(
            pairs,
            vec![ScoredMember {
                member: "1700000000000-abc".into(),
                score: 5.0
            }]
        );
    }

    #[test]
    fn empty_reply_has_no_pairs() {
        assert!(parse_scored_pairs(Value::Bulk(vec![])).unwrap().is_empty());
        assert!(parse_scored_pairs(Value::Nil).unwrap().is_empty());
    }

    #[test]
    fn malformed_replies_are_errors() {
        assert!(parse_scored_pairs(Value::Bulk(vec![data("only-member")])).is_err());
        assert!(parse_scored_pairs(Value::Bulk(vec![data("m"), data("not-a-score")])).is_err());
        assert!(parse_scored_pairs(Value::Okay).is_err());
    }

    #[tokio::test]
    async fn from_config_without_url_fails_fast() {
        let config = QueueConfig::default();
        assert!(matches!(
            RedisStore::from_config(&config).await,
            Err(QueueError::NotConfigured(_))
        ));
    }

    #[tokio::test]
    #[ignore = "needs a running redis at REDIS_URL"]
    async fn scripted_moves_against_live_redis() {
        let url = std::env::var(REDIS_URL_ENV).unwrap();
        let store = RedisStore::connect(&url).await.unwrap();
        let src = "linkqueue:test:src";
        let dst = "linkqueue:test:dst";
        store.apply(vec![StoreOp::zrem(src, "a"), StoreOp::zrem(dst, "a")]).await.unwrap();

        store.zadd(src, "a", 3.0).await.unwrap();
        let moved = store.zmove_max(src, dst, 99.0).await.unwrap().unwrap();
        assert_eq!(moved.member, "a");
        assert_eq!(moved.score, 3.0);
        assert_eq!(store.zscore(dst, "a").await.unwrap(), Some(99.0));

        let stamp = vec![("status".to_string(), "pending".to_string())];
        assert!(store.zmove(dst, src, "a", 1.0, "linkqueue:test:h", &stamp).await.unwrap());
        assert!(!store.zmove(dst, src, "a", 1.0, "linkqueue:test:h", &stamp).await.unwrap());
        store.zrem(src, "a").await.unwrap();
    }

    #[tokio::test]
    #[ignore = "needs a running redis at REDIS_URL"]
    async fn concurrent_pops_against_live_redis_never_repeat() {
        let url = std::env::var(REDIS_URL_ENV).unwrap();
        let store = RedisStore::connect(&url).await.unwrap();
        let src = "linkqueue:test:claim:src";
        let dst = "linkqueue:test:claim:dst";
        let members: Vec<String> = (0..200).map(|i| format!("job-{i}")).collect();
        let mut reset: Vec<StoreOp> = members
            .iter()
            .flat_map(|m| [StoreOp::zrem(src, m), StoreOp::zrem(dst, m)])
            .collect();
        store.apply(reset.clone()).await.unwrap();
        for (i, member) in members.iter().enumerate() {
            store.zadd(src, member, (i % 7) as f64).await.unwrap();
        }

        let workers: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    let mut claimed = Vec::new();
                    while let Some(entry) = store.zmove_max(src, dst, 1.0).await.unwrap() {
                        claimed.push(entry.member);
                    }
                    claimed
                })
            })
            .collect();

        let mut seen = std::collections::HashSet::new();
        for worker in workers {
            for member in worker.await.unwrap() {
                assert!(seen.insert(member), "member claimed twice");
            }
        }
        assert_eq!(seen.len(), members.len());
        assert_eq!(store.zcard(src).await.unwrap(), 0);
        assert_eq!(store.zcard(dst).await.unwrap(), members.len() as u64);

        reset.retain(|op| matches!(op, StoreOp::SortedRemove { key, .. } if key == dst));
        store.apply(reset).await.unwrap();
    }
}

//! Redis-backed store.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::store::{Pipeline, PipelineOp, Store};

/// Store over a multiplexed async Redis connection. Cheap to clone.
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
}

impl RedisStore {
    /// Open a client and establish the shared connection.
    pub async fn connect(redis_url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| StoreError::connection_failed(format!("{}: {}", redis_url, e)))?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!("Connected to Redis");
        Ok(Self { conn })
    }

    /// Round-trip a PING.
    pub async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    fn conn(&self) -> MultiplexedConnection {
        self.conn.clone()
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    ttl.as_millis().max(1) as u64
}

#[async_trait]
impl Store for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn();
        Ok(redis::cmd("GET").arg(key).query_async(&mut conn).await?)
    }

    async fn mget(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn();
        Ok(redis::cmd("MGET").arg(keys).query_async(&mut conn).await?)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut conn = self.conn();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        cmd.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn();
        let removed: u64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn();
        let count: u64 = redis::cmd("EXISTS").arg(key).query_async(&mut conn).await?;
        Ok(count > 0)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        let mut conn = self.conn();
        redis::cmd("ZADD")
            .arg(key)
            .arg(score)
            .arg(member)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn zrange(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
        let mut conn = self.conn();
        Ok(redis::cmd("ZRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async(&mut conn)
            .await?)
    }

    async fn zrevrange(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
        let mut conn = self.conn();
        Ok(redis::cmd("ZREVRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async(&mut conn)
            .await?)
    }

    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.conn();
        let removed: u64 = redis::cmd("ZREM").arg(key).arg(member).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.conn();
        Ok(redis::cmd("ZCARD").arg(key).query_async(&mut conn).await?)
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.conn();
        let added: u64 = redis::cmd("SADD").arg(key).arg(member).query_async(&mut conn).await?;
        Ok(added > 0)
    }

    async fn srem(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.conn();
        let removed: u64 = redis::cmd("SREM").arg(key).arg(member).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    async fn sscan(
        &self,
        key: &str,
        cursor: u64,
        pattern: Option<&str>,
        count: usize,
    ) -> StoreResult<(u64, Vec<String>)> {
        let mut conn = self.conn();
        let mut cmd = redis::cmd("SSCAN");
        cmd.arg(key).arg(cursor);
        if let Some(pattern) = pattern {
            cmd.arg("MATCH").arg(pattern);
        }
        cmd.arg("COUNT").arg(count);
        Ok(cmd.query_async(&mut conn).await?)
    }

    async fn rpush(&self, key: &str, value: &str) -> StoreResult<u64> {
        let mut conn = self.conn();
        Ok(redis::cmd("RPUSH").arg(key).arg(value).query_async(&mut conn).await?)
    }

    async fn lpop(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn();
        Ok(redis::cmd("LPOP").arg(key).query_async(&mut conn).await?)
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
        let mut conn = self.conn();
        Ok(redis::cmd("LRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async(&mut conn)
            .await?)
    }

    async fn lrem(&self, key: &str, count: isize, value: &str) -> StoreResult<u64> {
        let mut conn = self.conn();
        Ok(redis::cmd("LREM")
            .arg(key)
            .arg(count)
            .arg(value)
            .query_async(&mut conn)
            .await?)
    }

    async fn llen(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.conn();
        Ok(redis::cmd("LLEN").arg(key).query_async(&mut conn).await?)
    }

    async fn exec(&self, pipeline: Pipeline) -> StoreResult<()> {
        if pipeline.is_empty() {
            return Ok(());
        }
        let count = pipeline.len();
        let mut pipe = redis::pipe();
        for op in pipeline.into_ops() {
            match op {
                PipelineOp::Set { key, value, ttl } => {
                    let cmd = pipe.cmd("SET").arg(key).arg(value);
                    if let Some(ttl) = ttl {
                        cmd.arg("PX").arg(ttl_millis(ttl));
                    }
                    cmd.ignore();
                }
                PipelineOp::Del { key } => {
                    pipe.cmd("DEL").arg(key).ignore();
                }
                PipelineOp::ZAdd { key, member, score } => {
                    pipe.cmd("ZADD").arg(key).arg(score).arg(member).ignore();
                }
                PipelineOp::ZRem { key, member } => {
                    pipe.cmd("ZREM").arg(key).arg(member).ignore();
                }
                PipelineOp::SAdd { key, member } => {
                    pipe.cmd("SADD").arg(key).arg(member).ignore();
                }
                PipelineOp::SRem { key, member } => {
                    pipe.cmd("SREM").arg(key).arg(member).ignore();
                }
                PipelineOp::RPush { key, value } => {
                    pipe.cmd("RPUSH").arg(key).arg(value).ignore();
                }
            }
        }

        let mut conn = self.conn();
        pipe.query_async::<()>(&mut conn).await?;
        debug!(commands = count, "Committed pipeline");
        Ok(())
    }
}

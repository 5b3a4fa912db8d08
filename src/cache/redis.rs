use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::trace;

use super::connection::RedisConnector;
use super::traits::KvCache;
use crate::errors::Result;

/// INCR，键尚无 TTL 时设置 TTL
const INCR_WITH_TTL: &str = r#"
local v = redis.call('INCR', KEYS[1])
local ttl = tonumber(ARGV[1])
if ttl > 0 and redis.call('TTL', KEYS[1]) == -1 then
    redis.call('EXPIRE', KEYS[1], ttl)
end
return v
"#;

/// SADD，集合尚无 TTL 时设置 TTL
const SADD_WITH_TTL: &str = r#"
local added = redis.call('SADD', KEYS[1], ARGV[1])
local ttl = tonumber(ARGV[2])
if ttl > 0 and redis.call('TTL', KEYS[1]) == -1 then
    redis.call('EXPIRE', KEYS[1], ttl)
end
return added
"#;

const SCAN_BATCH: usize = 500;

pub struct RedisCache {
    connector: RedisConnector,
    incr_script: redis::Script,
    sadd_script: redis::Script,
}

impl RedisCache {
    pub fn new(connector: RedisConnector) -> Self {
        Self {
            connector,
            incr_script: redis::Script::new(INCR_WITH_TTL),
            sadd_script: redis::Script::new(SADD_WITH_TTL),
        }
    }

    pub fn connector(&self) -> &RedisConnector {
        &self.connector
    }
}

/// 转义 glob 元字符，使前缀可直接用于 `MATCH`
pub(crate) fn escape_glob(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[async_trait]
impl KvCache for RedisCache {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let redis_key = self.connector.make_key(key);
        let mut conn = match self.connector.get_connection().await {
            Ok(c) => c,
            Err(e) => return Err(self.connector.fail("connect", key, e).await),
        };

        let result: redis::RedisResult<()> = if ttl.is_zero() {
            conn.set(&redis_key, value).await
        } else {
            conn.set_ex(&redis_key, value, ttl.as_secs().max(1)).await
        };
        match result {
            Ok(()) => {
                trace!("Cached key: {}", key);
                Ok(())
            }
            Err(e) => Err(self.connector.fail("SET", key, e).await),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let redis_key = self.connector.make_key(key);
        let mut conn = match self.connector.get_connection().await {
            Ok(c) => c,
            Err(e) => return Err(self.connector.fail("connect", key, e).await),
        };

        match conn.get::<_, Option<String>>(&redis_key).await {
            Ok(value) => Ok(value),
            Err(e) => Err(self.connector.fail("GET", key, e).await),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let redis_key = self.connector.make_key(key);
        let mut conn = match self.connector.get_connection().await {
            Ok(c) => c,
            Err(e) => return Err(self.connector.fail("connect", key, e).await),
        };

        match conn.exists::<_, bool>(&redis_key).await {
            Ok(found) => Ok(found),
            Err(e) => Err(self.connector.fail("EXISTS", key, e).await),
        }
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64> {
        let redis_key = self.connector.make_key(key);
        let mut conn = match self.connector.get_connection().await {
            Ok(c) => c,
            Err(e) => return Err(self.connector.fail("connect", key, e).await),
        };

        match self
            .incr_script
            .key(&redis_key)
            .arg(ttl.as_secs())
            .invoke_async::<i64>(&mut conn)
            .await
        {
            Ok(v) => Ok(v),
            Err(e) => Err(self.connector.fail("INCR", key, e).await),
        }
    }

    async fn sadd(&self, key: &str, member: &str, ttl: Duration) -> Result<bool> {
        let redis_key = self.connector.make_key(key);
        let mut conn = match self.connector.get_connection().await {
            Ok(c) => c,
            Err(e) => return Err(self.connector.fail("connect", key, e).await),
        };

        match self
            .sadd_script
            .key(&redis_key)
            .arg(member)
            .arg(ttl.as_secs())
            .invoke_async::<i64>(&mut conn)
            .await
        {
            Ok(added) => Ok(added > 0),
            Err(e) => Err(self.connector.fail("SADD", key, e).await),
        }
    }

    async fn scard(&self, key: &str) -> Result<u64> {
        let redis_key = self.connector.make_key(key);
        let mut conn = match self.connector.get_connection().await {
            Ok(c) => c,
            Err(e) => return Err(self.connector.fail("connect", key, e).await),
        };

        match conn.scard::<_, u64>(&redis_key).await {
            Ok(n) => Ok(n),
            Err(e) => Err(self.connector.fail("SCARD", key, e).await),
        }
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let namespace = self.connector.key_prefix();
        let pattern = format!("{}*", escape_glob(&self.connector.make_key(prefix)));
        let mut conn = match self.connector.get_connection().await {
            Ok(c) => c,
            Err(e) => return Err(self.connector.fail("connect", prefix, e).await),
        };

        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch) = match redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async::<(u64, Vec<String>)>(&mut conn)
                .await
            {
                Ok(page) => page,
                Err(e) => return Err(self.connector.fail("SCAN", prefix, e).await),
            };

            keys.extend(
                batch
                    .into_iter()
                    .filter_map(|k| k.strip_prefix(namespace).map(str::to_string)),
            );

            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN 可能重复返回同一个键
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let redis_key = self.connector.make_key(key);
        let mut conn = match self.connector.get_connection().await {
            Ok(c) => c,
            Err(e) => return Err(self.connector.fail("connect", key, e).await),
        };

        match conn.del::<_, i64>(&redis_key).await {
            Ok(removed) => Ok(removed > 0),
            Err(e) => Err(self.connector.fail("DEL", key, e).await),
        }
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

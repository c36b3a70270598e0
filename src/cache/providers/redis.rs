//! Redis cache provider
//!
//! Uses `redis::aio::ConnectionManager` for async multiplexed connections.
//! Requires the `cache-redis` feature flag.
//!
//! Each entry is a Redis hash with an expiry set by `PEXPIRE`, so storage
//! and TTL are owned by the server:
//!
//! ```text
//! {namespace}:{type}:{content}:{options}
//!   payload           JSON result
//!   content_hash      fingerprint of the analysed content ("" if unknown)
//!   created_at        epoch millis
//!   last_accessed_at  epoch millis
//!   access_count      reads since insertion
//!   size_bytes        payload length
//! ```
//!
//! Prefix invalidation uses `SCAN MATCH` + batched `DEL`. Invalidation by
//! content hash, age or access count cannot use an index: it scans every key
//! in the namespace and inspects each hash, which is O(total keys) rather
//! than O(matching keys). That is acceptable for maintenance and user-driven
//! purges, not for hot-path invalidation.

use crate::cache::entry::{CacheValue, EntryView, InvalidationFilter};
use crate::cache::errors::{CacheError, CacheResult};
use crate::cache::traits::CacheBackend;
use crate::clock::SharedClock;
use crate::config::RedisConfig;
use crate::fingerprint::ContentFingerprint;
use crate::logging::redact_url;
use crate::metrics::{CacheMetrics, CacheMetricsSnapshot, CacheStats};
use crate::types::CacheKey;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use serde_json::Value;
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const SCAN_BATCH: usize = 100;

/// Reads the payload and bumps access bookkeeping in one round trip.
/// Missing keys are left untouched so no TTL-less hash is created.
const GET_AND_TOUCH_SCRIPT: &str = r#"
local payload = redis.call('HGET', KEYS[1], 'payload')
if payload then
  redis.call('HINCRBY', KEYS[1], 'access_count', 1)
  redis.call('HSET', KEYS[1], 'last_accessed_at', ARGV[1])
end
return payload
"#;

fn get_and_touch_script() -> &'static redis::Script {
    static SCRIPT: OnceLock<redis::Script> = OnceLock::new();
    SCRIPT.get_or_init(|| redis::Script::new(GET_AND_TOUCH_SCRIPT))
}

/// Redis-backed cache service using ConnectionManager
///
/// Provides async multiplexed connections with automatic reconnection.
/// Uses SCAN for every key enumeration to avoid blocking the server.
#[derive(Clone)]
pub struct RedisCacheBackend {
    connection_manager: ConnectionManager,
    namespace: String,
    default_ttl: Duration,
    metrics: Arc<CacheMetrics>,
    clock: SharedClock,
}

impl std::fmt::Debug for RedisCacheBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCacheBackend")
            .field("connection_manager", &"ConnectionManager")
            .field("namespace", &self.namespace)
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl RedisCacheBackend {
    /// Connect using configuration
    pub async fn from_config(
        config: &RedisConfig,
        namespace: &str,
        default_ttl: Duration,
        clock: SharedClock,
    ) -> CacheResult<Self> {
        let client = redis::Client::open(config.url.as_str()).map_err(|e| {
            CacheError::ConnectionError(format!("Failed to create Redis client: {}", e))
        })?;

        let connection_manager = ConnectionManager::new(client).await.map_err(|e| {
            CacheError::ConnectionError(format!("Failed to connect to Redis: {}", e))
        })?;

        debug!(url = %redact_url(&config.url), namespace = namespace, "Redis cache backend connected");

        Ok(Self {
            connection_manager,
            namespace: namespace.to_string(),
            default_ttl,
            metrics: Arc::new(CacheMetrics::new()),
            clock,
        })
    }

    /// Periodically copy the server's own memory and latency figures into
    /// the metrics
    ///
    /// The task holds a weak reference to the metrics and stops once every
    /// clone of this backend is dropped.
    pub fn start_metrics_sampler(&self, period: Duration) -> JoinHandle<()> {
        let weak: Weak<CacheMetrics> = Arc::downgrade(&self.metrics);
        let connection = self.connection_manager.clone();

        info!(
            sample_interval_seconds = period.as_secs(),
            "Redis metrics sampler started"
        );

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let Some(metrics) = weak.upgrade() else {
                    break;
                };
                if let Err(e) = Self::sample_into(connection.clone(), &metrics).await {
                    warn!(error = %e, "Failed to sample Redis metrics");
                }
            }
        })
    }

    /// Take one metrics sample now
    pub async fn sample_metrics(&self) -> CacheResult<()> {
        Self::sample_into(self.connection_manager.clone(), &self.metrics).await
    }

    async fn sample_into(mut conn: ConnectionManager, metrics: &CacheMetrics) -> CacheResult<()> {
        let memory_info: String = redis::cmd("INFO")
            .arg("memory")
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error("INFO memory"))?;
        let command_info: String = redis::cmd("INFO")
            .arg("commandstats")
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error("INFO commandstats"))?;

        let used_memory = parse_used_memory(&memory_info).unwrap_or(0);
        let latency = parse_average_command_latency(&command_info).unwrap_or(Duration::ZERO);
        metrics.record_backend_sample(used_memory, latency);

        debug!(
            used_memory = used_memory,
            average_latency_us = latency.as_micros() as u64,
            "Redis metrics sampled"
        );
        Ok(())
    }

    fn conn(&self) -> ConnectionManager {
        self.connection_manager.clone()
    }

    fn namespace_pattern(&self) -> String {
        format!("{}*", escape_glob(&CacheKey::namespace_prefix(&self.namespace)))
    }

    /// Iterate keys matching a glob, one SCAN page at a time
    async fn scan_page(
        &self,
        conn: &mut ConnectionManager,
        cursor: u64,
        pattern: &str,
    ) -> CacheResult<(u64, Vec<String>)> {
        redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(SCAN_BATCH)
            .query_async(conn)
            .await
            .map_err(map_redis_error("SCAN"))
    }

    async fn delete_keys(&self, conn: &mut ConnectionManager, keys: &[String]) -> CacheResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        redis::cmd("DEL")
            .arg(keys)
            .query_async(conn)
            .await
            .map_err(map_redis_error("DEL (batch)"))
    }

    /// Fetch filter-relevant metadata for a batch of keys
    async fn read_metadata(
        &self,
        conn: &mut ConnectionManager,
        keys: &[String],
    ) -> CacheResult<Vec<StoredMetadata>> {
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.cmd("HMGET")
                .arg(key)
                .arg("content_hash")
                .arg("created_at")
                .arg("access_count")
                .arg("size_bytes");
        }
        let rows: Vec<(Option<String>, Option<i64>, Option<u64>, Option<u64>)> = pipe
            .query_async(conn)
            .await
            .map_err(map_redis_error("HMGET (batch)"))?;

        Ok(rows
            .into_iter()
            .map(|(content_hash, created_at, access_count, size_bytes)| StoredMetadata {
                content_hash: content_hash
                    .filter(|h| !h.is_empty())
                    .map(ContentFingerprint::from_hex),
                created_at: created_at.and_then(DateTime::<Utc>::from_timestamp_millis),
                access_count: access_count.unwrap_or(0),
                size_bytes: size_bytes.unwrap_or(0),
            })
            .collect())
    }
}

/// Metadata of one stored hash; `created_at` is `None` when the key expired
/// between SCAN and HMGET
#[derive(Debug)]
struct StoredMetadata {
    content_hash: Option<ContentFingerprint>,
    created_at: Option<DateTime<Utc>>,
    access_count: u64,
    size_bytes: u64,
}

impl CacheBackend for RedisCacheBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<Value>> {
        let started = Instant::now();
        let mut conn = self.conn();
        let now_ms = self.clock.now().timestamp_millis();

        let result: Option<String> = get_and_touch_script()
            .key(key)
            .arg(now_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(map_redis_error("GET"))?;
        self.metrics.record_response_time(started.elapsed());

        match result {
            Some(json) => {
                self.metrics.record_hit();
                debug!(key = key, "Cache HIT (redis)");
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => {
                self.metrics.record_miss();
                debug!(key = key, "Cache MISS (redis)");
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: &CacheValue, ttl: Option<Duration>) -> CacheResult<()> {
        let started = Instant::now();
        let mut conn = self.conn();
        let payload = serde_json::to_string(&value.payload)?;
        let now_ms = self.clock.now().timestamp_millis();
        let ttl = ttl.unwrap_or(self.default_ttl);
        let ttl_ms = (ttl.as_millis() as u64).max(1);
        let content_hash = value
            .content_hash
            .as_ref()
            .map(|h| h.as_str().to_string())
            .unwrap_or_default();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("DEL")
            .arg(key)
            .ignore()
            .cmd("HSET")
            .arg(key)
            .arg("payload")
            .arg(&payload)
            .arg("content_hash")
            .arg(&content_hash)
            .arg("created_at")
            .arg(now_ms)
            .arg("last_accessed_at")
            .arg(now_ms)
            .arg("access_count")
            .arg(0)
            .arg("size_bytes")
            .arg(payload.len())
            .ignore()
            .cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_ms)
            .ignore();

        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error("HSET/PEXPIRE"))?;

        self.metrics.record_set();
        self.metrics.record_response_time(started.elapsed());
        debug!(key = key, ttl_ms = ttl_ms, "Cache SET (redis)");
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.conn();
        let removed: u64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error("DEL"))?;

        self.metrics.record_deletes(removed);
        debug!(key = key, existed = removed > 0, "Cache DEL (redis)");
        Ok(removed > 0)
    }

    async fn invalidate_by_pattern(&self, prefix: &str) -> CacheResult<u64> {
        let started = Instant::now();
        let mut conn = self.conn();
        let pattern = format!("{}*", escape_glob(prefix));
        let mut deleted: u64 = 0;
        let mut cursor: u64 = 0;

        // Use SCAN to iterate without blocking the server
        loop {
            let (next_cursor, keys) = self.scan_page(&mut conn, cursor, &pattern).await?;
            deleted += self.delete_keys(&mut conn, &keys).await?;

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        self.metrics.record_deletes(deleted);
        self.metrics.record_response_time(started.elapsed());
        debug!(pattern = %pattern, deleted = deleted, "Cache pattern DEL (redis)");
        Ok(deleted)
    }

    async fn invalidate_by_content_hash(&self, content_hash: &ContentFingerprint) -> CacheResult<u64> {
        self.invalidate_matching(&InvalidationFilter::content_hash(content_hash.clone()))
            .await
    }

    async fn invalidate_matching(&self, filter: &InvalidationFilter) -> CacheResult<u64> {
        if filter.is_prefix_only() {
            let prefix = filter
                .key_prefix
                .clone()
                .unwrap_or_else(|| CacheKey::namespace_prefix(&self.namespace));
            return self.invalidate_by_pattern(&prefix).await;
        }

        let started = Instant::now();
        let mut conn = self.conn();
        let now = self.clock.now();
        let pattern = match &filter.key_prefix {
            Some(prefix) => format!("{}*", escape_glob(prefix)),
            None => self.namespace_pattern(),
        };
        let mut scanned: u64 = 0;
        let mut deleted: u64 = 0;
        let mut cursor: u64 = 0;

        // Slow path: every key in scope is inspected individually
        loop {
            let (next_cursor, keys) = self.scan_page(&mut conn, cursor, &pattern).await?;
            scanned += keys.len() as u64;

            if !keys.is_empty() {
                let metadata = self.read_metadata(&mut conn, &keys).await?;
                let doomed: Vec<String> = keys
                    .into_iter()
                    .zip(metadata)
                    .filter_map(|(key, meta)| {
                        let created_at = meta.created_at?;
                        let view = EntryView {
                            key: &key,
                            content_hash: meta.content_hash.as_ref(),
                            created_at,
                            access_count: meta.access_count,
                        };
                        filter.matches(&view, now).then_some(key)
                    })
                    .collect();
                deleted += self.delete_keys(&mut conn, &doomed).await?;
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        self.metrics.record_deletes(deleted);
        self.metrics.record_response_time(started.elapsed());
        debug!(
            pattern = %pattern,
            scanned = scanned,
            deleted = deleted,
            "Cache filtered DEL (redis, full scan)"
        );
        Ok(deleted)
    }

    async fn ttl_remaining(&self, key: &str) -> CacheResult<Option<Duration>> {
        let mut conn = self.conn();
        let pttl: i64 = redis::cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error("PTTL"))?;

        // -2: missing key, -1: no expiry (never written by this backend)
        Ok((pttl >= 0).then(|| Duration::from_millis(pttl as u64)))
    }

    /// Entry figures come from a full namespace scan (O(total keys))
    async fn stats(&self) -> CacheResult<CacheStats> {
        let mut conn = self.conn();
        let pattern = self.namespace_pattern();
        let mut entry_count = 0u64;
        let mut total_size = 0u64;
        let mut oldest: Option<DateTime<Utc>> = None;
        let mut newest: Option<DateTime<Utc>> = None;
        let mut cursor: u64 = 0;

        loop {
            let (next_cursor, keys) = self.scan_page(&mut conn, cursor, &pattern).await?;
            if !keys.is_empty() {
                for meta in self.read_metadata(&mut conn, &keys).await? {
                    let Some(created_at) = meta.created_at else {
                        continue;
                    };
                    entry_count += 1;
                    total_size += meta.size_bytes;
                    oldest = Some(oldest.map_or(created_at, |t| t.min(created_at)));
                    newest = Some(newest.map_or(created_at, |t| t.max(created_at)));
                }
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        Ok(CacheStats::from_parts(
            self.provider_name(),
            entry_count,
            total_size,
            oldest,
            newest,
            &self.metrics.snapshot(),
        ))
    }

    fn metrics(&self) -> CacheMetricsSnapshot {
        self.metrics.snapshot()
    }

    async fn health_check(&self) -> CacheResult<bool> {
        let mut conn = self.conn();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error("PING"))?;

        Ok(pong == "PONG")
    }

    fn provider_name(&self) -> &'static str {
        "redis"
    }

    fn is_distributed(&self) -> bool {
        // State is shared across all instances; invalidations propagate, but
        // every operation is a network round trip
        true
    }
}

fn map_redis_error(operation: &'static str) -> impl Fn(redis::RedisError) -> CacheError {
    move |e| {
        if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
            CacheError::ConnectionError(format!("Redis {operation} failed: {e}"))
        } else if e.is_timeout() {
            CacheError::Timeout(format!("Redis {operation} timed out: {e}"))
        } else {
            CacheError::BackendError(format!("Redis {operation} failed: {e}"))
        }
    }
}

/// Escape glob metacharacters so a literal prefix can be used in MATCH
fn escape_glob(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// `used_memory` from `INFO memory`
fn parse_used_memory(info: &str) -> Option<u64> {
    info.lines()
        .find_map(|line| line.trim().strip_prefix("used_memory:"))
        .and_then(|v| v.trim().parse().ok())
}

/// Call-weighted mean of `usec` across `INFO commandstats`
fn parse_average_command_latency(info: &str) -> Option<Duration> {
    let mut calls_total: u64 = 0;
    let mut usec_total: u64 = 0;

    for line in info.lines() {
        let Some((_, stats)) = line.trim().split_once(':') else {
            continue;
        };
        if !line.starts_with("cmdstat_") {
            continue;
        }
        let mut calls = None;
        let mut usec = None;
        for field in stats.split(',') {
            match field.split_once('=') {
                Some(("calls", v)) => calls = v.parse::<u64>().ok(),
                Some(("usec", v)) => usec = v.parse::<u64>().ok(),
                _ => {}
            }
        }
        if let (Some(c), Some(u)) = (calls, usec) {
            calls_total += c;
            usec_total += u;
        }
    }

    (calls_total > 0).then(|| Duration::from_micros(usec_total / calls_total))
}

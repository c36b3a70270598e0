//! Stored cache entries and the filters used to purge them.

use crate::cache::errors::{CacheError, CacheResult};
use crate::fingerprint::ContentFingerprint;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{Read, Write};
use std::time::Duration;

/// Value handed to a backend for storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheValue {
    /// Opaque analysis result
    pub payload: Value,
    /// Fingerprint of the content the result was computed from
    pub content_hash: Option<ContentFingerprint>,
}

impl CacheValue {
    pub fn new(payload: Value, content_hash: Option<ContentFingerprint>) -> Self {
        Self {
            payload,
            content_hash,
        }
    }
}

/// One stored entry with its bookkeeping
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    /// Serialized payload, gzip-compressed when `compressed` is set
    pub data: Vec<u8>,
    pub content_hash: Option<ContentFingerprint>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub access_count: u64,
    pub last_accessed_at: DateTime<Utc>,
    /// Byte length of `data`, fixed at insertion
    pub size_bytes: u64,
    pub compressed: bool,
}

impl CacheEntry {
    /// Encode a value into a fresh entry
    ///
    /// Payloads whose JSON form exceeds `compression_threshold` bytes are
    /// stored gzip-compressed. The TTL is clamped to at least one millisecond
    /// so `expires_at` is always after `created_at`.
    pub fn encode(
        key: &str,
        value: &CacheValue,
        ttl: Duration,
        now: DateTime<Utc>,
        compression_threshold: Option<usize>,
    ) -> CacheResult<Self> {
        let json = serde_json::to_vec(&value.payload)?;
        let (data, compressed) = match compression_threshold {
            Some(threshold) if json.len() > threshold => (gzip(&json)?, true),
            _ => (json, false),
        };

        let ttl = ChronoDuration::from_std(ttl)
            .unwrap_or_else(|_| ChronoDuration::days(36_500))
            .max(ChronoDuration::milliseconds(1));

        Ok(Self {
            key: key.to_string(),
            size_bytes: data.len() as u64,
            data,
            content_hash: value.content_hash.clone(),
            created_at: now,
            expires_at: now + ttl,
            access_count: 0,
            last_accessed_at: now,
            compressed,
        })
    }

    /// Decode the stored payload
    pub fn decode(&self) -> CacheResult<Value> {
        if self.compressed {
            let raw = gunzip(&self.data)?;
            Ok(serde_json::from_slice(&raw)?)
        } else {
            Ok(serde_json::from_slice(&self.data)?)
        }
    }

    /// Expired entries are logically absent
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> Option<Duration> {
        (self.expires_at - now).to_std().ok()
    }

    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.access_count += 1;
        self.last_accessed_at = now;
    }

    pub fn view(&self) -> EntryView<'_> {
        EntryView {
            key: &self.key,
            content_hash: self.content_hash.as_ref(),
            created_at: self.created_at,
            access_count: self.access_count,
        }
    }
}

fn gzip(bytes: &[u8]) -> CacheResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder
        .write_all(bytes)
        .and_then(|_| encoder.finish())
        .map_err(|e| CacheError::SerializationError(format!("gzip failed: {e}")))
}

fn gunzip(bytes: &[u8]) -> CacheResult<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(bytes)
        .read_to_end(&mut out)
        .map_err(|e| CacheError::SerializationError(format!("gunzip failed: {e}")))?;
    Ok(out)
}

/// The metadata a filter inspects, independent of how a backend stores it
#[derive(Debug, Clone, Copy)]
pub struct EntryView<'a> {
    pub key: &'a str,
    pub content_hash: Option<&'a ContentFingerprint>,
    pub created_at: DateTime<Utc>,
    pub access_count: u64,
}

/// Selection criteria for bulk invalidation; every set field must match
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvalidationFilter {
    pub key_prefix: Option<String>,
    pub content_hash: Option<ContentFingerprint>,
    /// Only entries at least this old
    pub min_age: Option<Duration>,
    /// Only entries read at most this many times
    pub max_access_count: Option<u64>,
}

impl InvalidationFilter {
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            key_prefix: Some(prefix.into()),
            ..Self::default()
        }
    }

    pub fn content_hash(hash: ContentFingerprint) -> Self {
        Self {
            content_hash: Some(hash),
            ..Self::default()
        }
    }

    pub fn with_min_age(mut self, age: Duration) -> Self {
        self.min_age = Some(age);
        self
    }

    pub fn with_max_access_count(mut self, count: u64) -> Self {
        self.max_access_count = Some(count);
        self
    }

    /// Whether only the key is inspected, letting backends skip metadata reads
    pub fn is_prefix_only(&self) -> bool {
        self.content_hash.is_none() && self.min_age.is_none() && self.max_access_count.is_none()
    }

    pub fn matches(&self, entry: &EntryView<'_>, now: DateTime<Utc>) -> bool {
        if let Some(prefix) = &self.key_prefix {
            if !entry.key.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(hash) = &self.content_hash {
            if entry.content_hash != Some(hash) {
                return false;
            }
        }
        if let Some(min_age) = self.min_age {
            let age = (now - entry.created_at).to_std().unwrap_or(Duration::ZERO);
            if age < min_age {
                return false;
            }
        }
        if let Some(max_access) = self.max_access_count {
            if entry.access_count > max_access {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn value(payload: Value) -> CacheValue {
        CacheValue::new(payload, Some(ContentFingerprint::of("content")))
    }

    #[test]
    fn test_encode_decode_plain() {
        let now = Utc::now();
        let entry = CacheEntry::encode(
            "k",
            &value(json!(["hello", "world"])),
            Duration::from_secs(60),
            now,
            None,
        )
        .unwrap();

        assert!(!entry.compressed);
        assert_eq!(entry.size_bytes, entry.data.len() as u64);
        assert!(entry.expires_at > entry.created_at);
        assert_eq!(entry.decode().unwrap(), json!(["hello", "world"]));
    }

    #[test]
    fn test_large_payload_is_compressed() {
        let now = Utc::now();
        let big = json!({"text": "a".repeat(4096)});
        let entry = CacheEntry::encode("k", &value(big.clone()), Duration::from_secs(60), now, Some(1024))
            .unwrap();

        assert!(entry.compressed);
        assert!(entry.size_bytes < 4096);
        assert_eq!(entry.decode().unwrap(), big);
    }

    #[test]
    fn test_zero_ttl_still_expires_after_creation() {
        let now = Utc::now();
        let entry = CacheEntry::encode("k", &value(json!(1)), Duration::ZERO, now, None).unwrap();
        assert!(entry.expires_at > entry.created_at);
        assert!(!entry.is_expired(now));
        assert!(entry.is_expired(now + ChronoDuration::milliseconds(1)));
    }

    #[test]
    fn test_filter_matching() {
        let now = Utc::now();
        let hash = ContentFingerprint::of("content");
        let other = ContentFingerprint::of("other");
        let view = EntryView {
            key: "analysis:sentiment:abc",
            content_hash: Some(&hash),
            created_at: now - ChronoDuration::hours(2),
            access_count: 3,
        };

        assert!(InvalidationFilter::prefix("analysis:sentiment:").matches(&view, now));
        assert!(!InvalidationFilter::prefix("analysis:keywords:").matches(&view, now));
        assert!(InvalidationFilter::content_hash(hash.clone()).matches(&view, now));
        assert!(!InvalidationFilter::content_hash(other).matches(&view, now));
        assert!(InvalidationFilter::default()
            .with_min_age(Duration::from_secs(3600))
            .matches(&view, now));
        assert!(!InvalidationFilter::default()
            .with_min_age(Duration::from_secs(3 * 3600))
            .matches(&view, now));
        assert!(!InvalidationFilter::default()
            .with_max_access_count(2)
            .matches(&view, now));
        assert!(InvalidationFilter::prefix("analysis:")
            .with_max_access_count(3)
            .matches(&view, now));
    }

    #[test]
    fn test_prefix_only_detection() {
        assert!(InvalidationFilter::prefix("a:").is_prefix_only());
        assert!(!InvalidationFilter::prefix("a:")
            .with_min_age(Duration::from_secs(1))
            .is_prefix_only());
    }
}

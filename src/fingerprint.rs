//! # Content Fingerprinting
//!
//! Deterministic SHA-256 digests over a canonical form of the analysed content.
//! The digest is the content-addressing component of every cache key.
//!
//! Canonicalization:
//!
//! - **Text** is hashed verbatim.
//! - **Bytes** are decoded to their UTF-8 text representation (invalid
//!   sequences become U+FFFD) and the decoded text is hashed. Two byte
//!   sequences that differ only in invalid bytes therefore share a digest;
//!   this keeps binary fingerprints stable regardless of how the bytes
//!   reached the cache.
//! - **Structured** values are serialized as JSON with object keys sorted
//!   at every level, so key insertion order never changes the digest.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::fmt;

/// Content submitted for analysis
#[derive(Debug, Clone, Copy)]
pub enum Content<'a> {
    Text(&'a str),
    Bytes(&'a [u8]),
    Structured(&'a Value),
}

impl<'a> From<&'a str> for Content<'a> {
    fn from(text: &'a str) -> Self {
        Content::Text(text)
    }
}

impl<'a> From<&'a String> for Content<'a> {
    fn from(text: &'a String) -> Self {
        Content::Text(text.as_str())
    }
}

impl<'a> From<&'a [u8]> for Content<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Content::Bytes(bytes)
    }
}

impl<'a> From<&'a Vec<u8>> for Content<'a> {
    fn from(bytes: &'a Vec<u8>) -> Self {
        Content::Bytes(bytes.as_slice())
    }
}

impl<'a> From<&'a Value> for Content<'a> {
    fn from(value: &'a Value) -> Self {
        Content::Structured(value)
    }
}

/// Hex-encoded SHA-256 digest of canonicalized content
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentFingerprint(String);

impl ContentFingerprint {
    /// Fingerprint any supported content
    pub fn of<'a>(content: impl Into<Content<'a>>) -> Self {
        match content.into() {
            Content::Text(text) => Self::digest(text.as_bytes()),
            Content::Bytes(bytes) => {
                let decoded: Cow<'_, str> = String::from_utf8_lossy(bytes);
                Self::digest(decoded.as_bytes())
            }
            Content::Structured(value) => Self::digest(canonical_json(value).as_bytes()),
        }
    }

    /// Fingerprint any serializable value through its canonical JSON form
    ///
    /// Values that cannot be represented as JSON (e.g. maps with non-string
    /// keys) hash as `null`.
    pub fn of_serializable<T: Serialize + ?Sized>(value: &T) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        Self::of(&value)
    }

    fn digest(bytes: &[u8]) -> Self {
        let hash = Sha256::digest(bytes);
        Self(format!("{hash:x}"))
    }

    /// Rebuild a fingerprint read back from storage
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading characters of the digest, for log lines
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for ContentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContentFingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Serialize a JSON value with object keys sorted at every depth
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Keys are plain strings; serde_json quoting cannot fail for them
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_fingerprint_is_stable() {
        let a = ContentFingerprint::of("hello world");
        let b = ContentFingerprint::of(&"hello world".to_string());
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert_eq!(
            a.as_str(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_distinct_text_differs() {
        assert_ne!(
            ContentFingerprint::of("hello world"),
            ContentFingerprint::of("hello world!")
        );
    }

    #[test]
    fn test_utf8_bytes_match_text() {
        let text = "grüße";
        assert_eq!(
            ContentFingerprint::of(text),
            ContentFingerprint::of(text.as_bytes())
        );
    }

    #[test]
    fn test_binary_bytes_are_decoded_lossily() {
        let binary: Vec<u8> = vec![0xff, 0xfe, b'a'];
        let fp = ContentFingerprint::of(&binary);
        assert_eq!(fp, ContentFingerprint::of("\u{fffd}\u{fffd}a"));
        assert_eq!(fp, ContentFingerprint::of(&binary));
    }

    #[test]
    fn test_structured_key_order_is_irrelevant() {
        let a = json!({"limit": 5, "lang": "en", "nested": {"b": 1, "a": [1, 2]}});
        let b = json!({"nested": {"a": [1, 2], "b": 1}, "lang": "en", "limit": 5});
        assert_eq!(ContentFingerprint::of(&a), ContentFingerprint::of(&b));
    }

    #[test]
    fn test_structured_array_order_matters() {
        let a = json!([1, 2]);
        let b = json!([2, 1]);
        assert_ne!(ContentFingerprint::of(&a), ContentFingerprint::of(&b));
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let value = json!({"z": 1, "a": {"y": true, "b": null}});
        assert_eq!(canonical_json(&value), r#"{"a":{"b":null,"y":true},"z":1}"#);
    }

    #[test]
    fn test_short_prefix() {
        let fp = ContentFingerprint::of("abc");
        assert_eq!(fp.short().len(), 12);
        assert!(fp.as_str().starts_with(fp.short()));
    }
}

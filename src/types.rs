//! Core cache addressing types: analysis kinds, per-kind options and keys.

use crate::fingerprint::{Content, ContentFingerprint};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Kind of analysis whose result is cached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    Sentiment,
    Keywords,
    Entities,
    Summary,
    Classification,
    LanguageDetection,
    Objects,
    Faces,
    Labels,
    Ocr,
    Colors,
}

impl AnalysisType {
    pub const ALL: [AnalysisType; 11] = [
        AnalysisType::Sentiment,
        AnalysisType::Keywords,
        AnalysisType::Entities,
        AnalysisType::Summary,
        AnalysisType::Classification,
        AnalysisType::LanguageDetection,
        AnalysisType::Objects,
        AnalysisType::Faces,
        AnalysisType::Labels,
        AnalysisType::Ocr,
        AnalysisType::Colors,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisType::Sentiment => "sentiment",
            AnalysisType::Keywords => "keywords",
            AnalysisType::Entities => "entities",
            AnalysisType::Summary => "summary",
            AnalysisType::Classification => "classification",
            AnalysisType::LanguageDetection => "language_detection",
            AnalysisType::Objects => "objects",
            AnalysisType::Faces => "faces",
            AnalysisType::Labels => "labels",
            AnalysisType::Ocr => "ocr",
            AnalysisType::Colors => "colors",
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(
            self,
            AnalysisType::Objects
                | AnalysisType::Faces
                | AnalysisType::Labels
                | AnalysisType::Ocr
                | AnalysisType::Colors
        )
    }
}

impl fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AnalysisType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown analysis type: {s}"))
    }
}

/// Scalar option value for the extensible [`AnalysisOptions::Custom`] bag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SentimentOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeywordOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_sentences: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_results: Option<u32>,
}

/// Options that can change an analysis result and therefore take part in
/// cache identity
///
/// Each known analysis family gets a closed struct so option hashing stays
/// exhaustive. `Custom` exists for analyses that genuinely need an open bag;
/// it is a `BTreeMap` so insertion order never reaches the digest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "options", rename_all = "snake_case")]
pub enum AnalysisOptions {
    #[default]
    None,
    Sentiment(SentimentOptions),
    Keywords(KeywordOptions),
    Entities(EntityOptions),
    Summary(SummaryOptions),
    Image(ImageOptions),
    Custom(BTreeMap<String, OptionValue>),
}

impl AnalysisOptions {
    pub fn keyword_limit(limit: u32) -> Self {
        AnalysisOptions::Keywords(KeywordOptions {
            limit: Some(limit),
            language: None,
        })
    }

    pub fn sentiment_language(language: impl Into<String>) -> Self {
        AnalysisOptions::Sentiment(SentimentOptions {
            language: Some(language.into()),
        })
    }

    pub fn custom<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, OptionValue)>,
        K: Into<String>,
    {
        AnalysisOptions::Custom(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Secondary digest folded into the cache key
    pub fn digest(&self) -> ContentFingerprint {
        ContentFingerprint::of_serializable(self)
    }
}

/// Composite cache address: `{namespace}:{type}:{content}:{options}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub analysis_type: AnalysisType,
    pub content_hash: ContentFingerprint,
    pub options_hash: ContentFingerprint,
    rendered: String,
}

impl CacheKey {
    pub fn new(
        namespace: &str,
        analysis_type: AnalysisType,
        content: Content<'_>,
        options: &AnalysisOptions,
    ) -> Self {
        Self::from_parts(
            namespace,
            analysis_type,
            ContentFingerprint::of(content),
            options.digest(),
        )
    }

    pub fn from_parts(
        namespace: &str,
        analysis_type: AnalysisType,
        content_hash: ContentFingerprint,
        options_hash: ContentFingerprint,
    ) -> Self {
        let rendered = format!(
            "{}{}:{}",
            Self::type_prefix(namespace, analysis_type),
            content_hash,
            options_hash
        );
        Self {
            analysis_type,
            content_hash,
            options_hash,
            rendered,
        }
    }

    /// Prefix shared by every key of one analysis type
    pub fn type_prefix(namespace: &str, analysis_type: AnalysisType) -> String {
        format!("{namespace}:{analysis_type}:")
    }

    /// Prefix shared by every key in a namespace
    pub fn namespace_prefix(namespace: &str) -> String {
        format!("{namespace}:")
    }

    pub fn as_str(&self) -> &str {
        &self.rendered
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analysis_type_round_trips_through_str() {
        for t in AnalysisType::ALL {
            assert_eq!(t.as_str().parse::<AnalysisType>().unwrap(), t);
        }
        assert!("telepathy".parse::<AnalysisType>().is_err());
    }

    #[test]
    fn test_analysis_type_serde_matches_as_str() {
        let json = serde_json::to_string(&AnalysisType::LanguageDetection).unwrap();
        assert_eq!(json, "\"language_detection\"");
    }

    #[test]
    fn test_options_participate_in_identity() {
        let en = AnalysisOptions::sentiment_language("en");
        let es = AnalysisOptions::sentiment_language("es");
        let a = CacheKey::new("analysis", AnalysisType::Sentiment, "same text".into(), &en);
        let b = CacheKey::new("analysis", AnalysisType::Sentiment, "same text".into(), &es);
        assert_ne!(a, b);
        assert_eq!(a.content_hash, b.content_hash);
    }

    #[test]
    fn test_custom_options_ignore_insertion_order() {
        let a = AnalysisOptions::custom([
            ("threshold", OptionValue::Float(0.5)),
            ("mode", OptionValue::Text("fast".into())),
        ]);
        let b = AnalysisOptions::custom([
            ("mode", OptionValue::Text("fast".into())),
            ("threshold", OptionValue::Float(0.5)),
        ]);
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn test_key_layout() {
        let key = CacheKey::new(
            "analysis",
            AnalysisType::Keywords,
            "hello world".into(),
            &AnalysisOptions::keyword_limit(5),
        );
        let prefix = CacheKey::type_prefix("analysis", AnalysisType::Keywords);
        assert!(key.as_str().starts_with(&prefix));
        assert!(key.as_str().contains(key.content_hash.as_str()));
        assert!(key
            .as_str()
            .starts_with(&CacheKey::namespace_prefix("analysis")));
    }

    #[test]
    fn test_type_prefixes_do_not_overlap() {
        let sentiment = CacheKey::type_prefix("ns", AnalysisType::Sentiment);
        for t in AnalysisType::ALL {
            if t != AnalysisType::Sentiment {
                assert!(!CacheKey::type_prefix("ns", t).starts_with(&sentiment));
            }
        }
    }
}

//! End-to-end behaviour of `AnalysisCache` over the in-memory backend.

mod common;

use analysis_cache::{AnalysisOptions, AnalysisType, CallOptions, ComputeError, MemoryBackendConfig};
use common::*;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Keywords {
    keywords: Vec<String>,
    scores: Vec<f64>,
}

#[derive(Debug, Error, PartialEq)]
#[error("model unavailable: {0}")]
struct ModelUnavailable(String);

#[tokio::test]
async fn test_options_isolate_entries() {
    let cache = memory_cache(manual_clock());
    let text = "¡Qué día tan bonito!";
    let en = AnalysisOptions::sentiment_language("en");
    let es = AnalysisOptions::sentiment_language("es");

    assert!(cache.set(AnalysisType::Sentiment, text, &en, &0.1, None).await);
    assert!(cache.set(AnalysisType::Sentiment, text, &es, &0.9, None).await);

    assert_eq!(cache.get::<f64>(AnalysisType::Sentiment, text, &en).await, Some(0.1));
    assert_eq!(cache.get::<f64>(AnalysisType::Sentiment, text, &es).await, Some(0.9));
    // Same content and options under another analysis type is a separate entry
    assert_eq!(cache.get::<f64>(AnalysisType::Summary, text, &en).await, None);
}

#[tokio::test]
async fn test_entries_expire_after_ttl() {
    let clock = manual_clock();
    let cache = memory_cache_with_ttl(Duration::from_secs(1), Arc::clone(&clock));
    let options = AnalysisOptions::None;

    assert!(cache.set(AnalysisType::Labels, "img", &options, &vec!["cat"], None).await);

    clock.advance(Duration::from_millis(500));
    assert_eq!(
        cache.get::<Vec<String>>(AnalysisType::Labels, "img", &options).await,
        Some(vec!["cat".to_string()])
    );

    clock.advance(Duration::from_millis(1000));
    assert_eq!(cache.get::<Vec<String>>(AnalysisType::Labels, "img", &options).await, None);
}

#[tokio::test]
async fn test_per_call_ttl_overrides_default() {
    let clock = manual_clock();
    let cache = memory_cache(Arc::clone(&clock));
    let options = AnalysisOptions::None;

    let value: u32 = cache
        .get_or_compute(
            AnalysisType::Ocr,
            "scan",
            &options,
            || async { Ok::<_, std::io::Error>(42) },
            CallOptions::with_ttl(Duration::from_secs(10)),
        )
        .await
        .unwrap();
    assert_eq!(value, 42);

    clock.advance(Duration::from_secs(11));
    assert_eq!(cache.get::<u32>(AnalysisType::Ocr, "scan", &options).await, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_identical_requests_compute_once() {
    let cache = memory_cache(manual_clock());
    let calls = Arc::new(AtomicUsize::new(0));
    let options = AnalysisOptions::keyword_limit(5);

    let requests = (0..10).map(|_| {
        let cache = cache.clone();
        let calls = Arc::clone(&calls);
        let options = options.clone();
        tokio::spawn(async move {
            cache
                .get_or_compute(
                    AnalysisType::Keywords,
                    "shared document",
                    &options,
                    move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok::<_, std::io::Error>(vec!["shared".to_string()])
                    },
                    CallOptions::default(),
                )
                .await
        })
    });

    for joined in join_all(requests).await {
        let keywords: Vec<String> = joined.unwrap().unwrap();
        assert_eq!(keywords, vec!["shared".to_string()]);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.in_flight(), 0);
}

#[tokio::test]
async fn test_keyword_analysis_scenario() {
    let cache = memory_cache(manual_clock());
    let calls = Arc::new(AtomicUsize::new(0));
    let document = "Rust makes systems programming safe and fast";
    let options = AnalysisOptions::keyword_limit(2);

    let compute = |calls: Arc<AtomicUsize>| {
        move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, std::io::Error>(Keywords {
                keywords: vec!["rust".to_string(), "systems".to_string()],
                scores: vec![0.9, 0.7],
            })
        }
    };

    let first: Keywords = cache
        .get_or_compute(
            AnalysisType::Keywords,
            document,
            &options,
            compute(Arc::clone(&calls)),
            CallOptions::default(),
        )
        .await
        .unwrap();
    let second: Keywords = cache
        .get_or_compute(
            AnalysisType::Keywords,
            document,
            &options,
            compute(Arc::clone(&calls)),
            CallOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let metrics = cache.metrics();
    assert_eq!(metrics.hits, 1);
    assert!(metrics.hit_rate() > 0.0);

    // Editing the document drops its results for every analysis type
    assert_eq!(cache.invalidate_content(document).await, 1);
    let third: Keywords = cache
        .get_or_compute(
            AnalysisType::Keywords,
            document,
            &options,
            compute(Arc::clone(&calls)),
            CallOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(third, first);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_store_failure_still_returns_result() {
    // Budget too small for any entry: every store fails
    let cache = memory_cache_with(
        MemoryBackendConfig {
            max_memory_bytes: 8,
            ..MemoryBackendConfig::default()
        },
        manual_clock(),
    );
    let calls = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        let calls = Arc::clone(&calls);
        let summary: String = cache
            .get_or_compute(
                AnalysisType::Summary,
                "a long article",
                &AnalysisOptions::None,
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, std::io::Error>("a summary that does not fit".to_string())
                },
                CallOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(summary, "a summary that does not fit");
    }

    // Nothing was cached, so both calls computed
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_compute_error_propagates_and_is_not_cached() {
    let cache = memory_cache(manual_clock());
    let options = AnalysisOptions::None;

    let error = cache
        .get_or_compute(
            AnalysisType::Faces,
            "photo",
            &options,
            || async { Err::<u32, _>(ModelUnavailable("faces-v1".to_string())) },
            CallOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(error, ComputeError::Failed(_)));
    assert_eq!(
        error.downcast_ref::<ModelUnavailable>(),
        Some(&ModelUnavailable("faces-v1".to_string()))
    );
    assert_eq!(cache.get::<u32>(AnalysisType::Faces, "photo", &options).await, None);

    // A later success is computed and cached normally
    let value: u32 = cache
        .get_or_compute(
            AnalysisType::Faces,
            "photo",
            &options,
            || async { Ok::<_, ModelUnavailable>(3) },
            CallOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(value, 3);
    assert_eq!(cache.get::<u32>(AnalysisType::Faces, "photo", &options).await, Some(3));
}

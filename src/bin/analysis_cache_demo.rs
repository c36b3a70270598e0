//! Analysis Cache Demo
//!
//! Wires configuration, logging, the cache and the invalidation engine
//! together and walks through a typical request cycle.
//!
//! Usage: `analysis-cache-demo [config.toml] [--serve]`
//!
//! With `--serve` the scheduler keeps running until Ctrl-C.

use analysis_cache::logging::init_structured_logging;
use analysis_cache::{
    AnalysisCache, AnalysisOptions, AnalysisType, CallOptions, ConfigLoader, ContentFingerprint,
    InvalidationContext, InvalidationRuleEngine, InvalidationTrigger, SystemClock,
};
use anyhow::Context;
use std::time::Duration;
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_structured_logging();

    let mut config_path = None;
    let mut serve = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--serve" => serve = true,
            path => config_path = Some(path.to_string()),
        }
    }

    let mut loader = ConfigLoader::new();
    if let Some(path) = &config_path {
        loader = loader.with_file(path);
    }
    let config = loader.load().context("loading analysis cache configuration")?;

    let clock = SystemClock::shared();
    let cache = AnalysisCache::from_config(&config, clock.clone()).await;
    let engine = InvalidationRuleEngine::new(cache.clone(), clock, &config.invalidation);
    engine.start_scheduler();

    info!(
        provider = cache.provider().provider_name(),
        namespace = cache.namespace(),
        rules = engine.stats().total_rules,
        "🚀 Analysis cache ready"
    );

    let document = "The new release is fast, stable and a pleasure to use.";
    let options = AnalysisOptions::keyword_limit(3);

    for attempt in 1..=2 {
        let keywords: Vec<String> = cache
            .get_or_compute(
                AnalysisType::Keywords,
                document,
                &options,
                || async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok::<_, std::io::Error>(vec![
                        "release".to_string(),
                        "fast".to_string(),
                        "stable".to_string(),
                    ])
                },
                CallOptions::default(),
            )
            .await
            .context("computing keywords")?;
        info!(attempt, ?keywords, "Keywords resolved");
    }

    let context = InvalidationContext::for_content(ContentFingerprint::of(document))
        .with_reason("document edited");
    let results = engine
        .execute_invalidation(InvalidationTrigger::ContentUpdated, Some(&context))
        .await;
    for result in &results {
        info!(
            rule = %result.rule_name,
            entries = result.entries_invalidated,
            success = result.success,
            "Invalidation rule executed"
        );
    }

    let stats = cache.stats().await;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    println!("{}", serde_json::to_string_pretty(&engine.stats())?);

    if serve {
        info!("Scheduler running, press Ctrl-C to stop");
        signal::ctrl_c().await?;
    }

    engine.shutdown();
    info!("👋 Analysis cache demo finished");
    Ok(())
}

//! Per-item processing: existence check → plugins → classify → optional
//! summarize and re-classify → save.
//!
//! Inference failures degrade to the best verdict available; only
//! cancellation and store/plugin errors abort an item.

use std::future::Future;
use std::sync::Arc;

use sieve_shared::{
    Classification, Classifier, GlobalConfig, InterestLevel, Item, ItemStore, ModelTarget, Plugin,
    Result, SieveError, SourceConfig, build_rules, resolve_target,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::gate::BackpressureGate;
use crate::plugins::PluginRegistry;

/// Race `fut` against `cancel`. The future is dropped on cancellation.
pub async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SieveError::Cancelled),
        result = fut => result,
    }
}

// ---------------------------------------------------------------------------
// Source context
// ---------------------------------------------------------------------------

/// Everything the pipeline needs to know about the source an item came from.
pub struct SourceContext {
    pub name: String,
    pub url: String,
    /// Resolved plugins, in declared order.
    pub plugins: Vec<Arc<dyn Plugin>>,
    pub summarize: bool,
    /// Merged rule string sent with every classification.
    pub rules: String,
    pub target: ModelTarget,
}

impl SourceContext {
    /// Merge global and source settings. Unknown plugin names are skipped
    /// with a warning.
    pub fn resolve(global: &GlobalConfig, source: &SourceConfig, registry: &PluginRegistry) -> Self {
        let plugins = source
            .plugins
            .iter()
            .filter_map(|name| {
                let plugin = registry.get(name);
                if plugin.is_none() {
                    warn!(source = %source.name, plugin = %name, "unknown plugin, skipping");
                }
                plugin
            })
            .collect();

        Self {
            name: source.name.clone(),
            url: source.url.clone(),
            plugins,
            summarize: source.summarize,
            rules: build_rules(global, source),
            target: resolve_target(&global.ai, &source.ai),
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Run-wide pipeline knobs.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Language for reasons and summaries.
    pub language: String,
    /// Content shorter than this is not worth summarizing; the description is
    /// used instead.
    pub min_content_chars: usize,
}

impl From<&GlobalConfig> for PipelineSettings {
    fn from(global: &GlobalConfig) -> Self {
        Self {
            language: global.preferred_language.clone(),
            min_content_chars: global.min_content_chars,
        }
    }
}

/// What happened to one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Already stored by an earlier run.
    Skipped,
    /// Classified and saved at this level.
    Saved(InterestLevel),
}

impl ItemOutcome {
    pub fn level(&self) -> Option<InterestLevel> {
        match self {
            Self::Skipped => None,
            Self::Saved(level) => Some(*level),
        }
    }
}

pub struct ItemPipeline {
    store: Arc<dyn ItemStore>,
    classifier: Arc<dyn Classifier>,
    gate: Arc<BackpressureGate>,
    settings: PipelineSettings,
}

impl ItemPipeline {
    pub fn new(
        store: Arc<dyn ItemStore>,
        classifier: Arc<dyn Classifier>,
        gate: Arc<BackpressureGate>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            classifier,
            gate,
            settings,
        }
    }

    /// Take one item from fetched to persisted.
    #[instrument(skip_all, fields(source = %source.name, id = %item.id))]
    pub async fn process(
        &self,
        cancel: &CancellationToken,
        source: &SourceContext,
        item: Item,
    ) -> Result<ItemOutcome> {
        if cancellable(cancel, self.store.exists(&item.id)).await? {
            debug!(title = %item.title, "already stored, skipping");
            return Ok(ItemOutcome::Skipped);
        }

        let mut item = item;
        for plugin in &source.plugins {
            item = cancellable(cancel, plugin.execute(item)).await?;
        }

        // Phase 1: title and short text.
        let mut verdict = match self
            .classify(cancel, source, &item.title, item.short_text())
            .await
        {
            Ok(verdict) => verdict,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(title = %item.title, error = %e, "initial classification failed");
                Classification::fallback(format!("initial classification failed: {e}"))
            }
        };

        // Phase 2: summarize, then grade the summary.
        if source.summarize && verdict.level.wants_deep_dive() {
            let body = self.summary_input(&item);
            match self.summarize(cancel, source, &item.title, body).await {
                Ok(summary) => {
                    match self.classify(cancel, source, &item.title, &summary).await {
                        Ok(second) => verdict = second,
                        Err(e) if e.is_cancelled() => return Err(e),
                        Err(e) => {
                            warn!(title = %item.title, error = %e, "re-classification failed, keeping initial verdict");
                        }
                    }
                    item.summary = Some(summary);
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(title = %item.title, error = %e, "summarization failed, keeping initial verdict");
                }
            }
        }

        let level = verdict.level;
        item.apply(verdict);
        cancellable(cancel, self.store.save_item(&item)).await?;
        debug!(title = %item.title, %level, "item saved");

        Ok(ItemOutcome::Saved(level))
    }

    /// Full content when it is long enough, otherwise the description.
    fn summary_input<'a>(&self, item: &'a Item) -> &'a str {
        match item.content.as_deref() {
            Some(content) if content.chars().count() >= self.settings.min_content_chars => content,
            _ => &item.description,
        }
    }

    async fn classify(
        &self,
        cancel: &CancellationToken,
        source: &SourceContext,
        title: &str,
        content: &str,
    ) -> Result<Classification> {
        let _permit = self.gate.acquire(cancel).await?;
        cancellable(
            cancel,
            self.classifier.classify(
                &source.target,
                title,
                content,
                &source.rules,
                &self.settings.language,
            ),
        )
        .await
    }

    async fn summarize(
        &self,
        cancel: &CancellationToken,
        source: &SourceContext,
        title: &str,
        content: &str,
    ) -> Result<String> {
        let _permit = self.gate.acquire(cancel).await?;
        cancellable(
            cancel,
            self.classifier
                .summarize(&source.target, title, content, &self.settings.language),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeClassifier, MemoryStore, Script, item, source_config};
    use sieve_shared::AppConfig;
    use std::time::Duration;

    struct Harness {
        store: Arc<MemoryStore>,
        classifier: Arc<FakeClassifier>,
        pipeline: ItemPipeline,
    }

    fn harness(script: Script) -> Harness {
        let store = Arc::new(MemoryStore::default());
        let classifier = Arc::new(FakeClassifier::new(script));
        let gate = Arc::new(BackpressureGate::new(Duration::from_millis(1), 100, 4));
        let pipeline = ItemPipeline::new(
            store.clone(),
            classifier.clone(),
            gate,
            PipelineSettings {
                language: "en".into(),
                min_content_chars: 100,
            },
        );
        Harness {
            store,
            classifier,
            pipeline,
        }
    }

    fn context(summarize: bool) -> SourceContext {
        let config = AppConfig::default();
        let mut source = source_config("src");
        source.summarize = summarize;
        SourceContext::resolve(&config.global, &source, &PluginRegistry::new())
    }

    #[tokio::test]
    async fn stored_items_make_no_inference_calls() {
        let h = harness(Script::default());
        let mut existing = item("src", "Known");
        existing.interest_level = Some(InterestLevel::Interest);
        existing.reason = "from last run".into();
        h.store.insert(existing.clone());

        let outcome = h
            .pipeline
            .process(&CancellationToken::new(), &context(true), item("src", "Known"))
            .await
            .expect("process");

        assert_eq!(outcome, ItemOutcome::Skipped);
        assert_eq!(h.classifier.total_calls(), 0);
        assert_eq!(h.store.get(&existing.id), Some(existing));
    }

    #[tokio::test]
    async fn low_interest_makes_one_call() {
        for level in [InterestLevel::Exclude, InterestLevel::Uninterested] {
            let h = harness(Script::phase1(level));
            let outcome = h
                .pipeline
                .process(&CancellationToken::new(), &context(true), item("src", "Boring"))
                .await
                .expect("process");

            assert_eq!(outcome, ItemOutcome::Saved(level));
            assert_eq!(h.classifier.total_calls(), 1);
        }
    }

    #[tokio::test]
    async fn interesting_items_take_three_calls_and_keep_second_verdict() {
        let h = harness(Script {
            phase2: Some(InterestLevel::Interest),
            ..Script::phase1(InterestLevel::HighInterest)
        });
        let it = item("src", "Big news");
        let id = it.id.clone();

        let outcome = h
            .pipeline
            .process(&CancellationToken::new(), &context(true), it)
            .await
            .expect("process");

        assert_eq!(outcome, ItemOutcome::Saved(InterestLevel::Interest));
        assert_eq!(h.classifier.classify_calls(), 2);
        assert_eq!(h.classifier.summarize_calls(), 1);

        let saved = h.store.get(&id).expect("saved");
        assert_eq!(saved.interest_level, Some(InterestLevel::Interest));
        assert_eq!(saved.summary.as_deref(), Some("<p>summary of Big news</p>"));
        assert_eq!(saved.reason, "phase 2");
    }

    #[tokio::test]
    async fn no_summarize_flag_means_single_call() {
        let h = harness(Script::phase1(InterestLevel::HighInterest));
        h.pipeline
            .process(&CancellationToken::new(), &context(false), item("src", "Big news"))
            .await
            .expect("process");
        assert_eq!(h.classifier.total_calls(), 1);
    }

    #[tokio::test]
    async fn summarize_failure_keeps_initial_verdict() {
        let h = harness(Script {
            fail_summarize: true,
            phase2: Some(InterestLevel::Exclude),
            ..Script::phase1(InterestLevel::HighInterest)
        });
        let it = item("src", "Big news");
        let id = it.id.clone();

        h.pipeline
            .process(&CancellationToken::new(), &context(true), it)
            .await
            .expect("process");

        assert_eq!(h.classifier.classify_calls(), 1);
        assert_eq!(h.classifier.summarize_calls(), 1);
        let saved = h.store.get(&id).expect("saved");
        assert_eq!(saved.interest_level, Some(InterestLevel::HighInterest));
        assert_eq!(saved.reason, "phase 1");
        assert!(saved.summary.is_none());
    }

    #[tokio::test]
    async fn second_classification_failure_keeps_summary_and_first_verdict() {
        let h = harness(Script {
            fail_phase2: true,
            ..Script::phase1(InterestLevel::Interest)
        });
        let it = item("src", "News");
        let id = it.id.clone();

        h.pipeline
            .process(&CancellationToken::new(), &context(true), it)
            .await
            .expect("process");

        let saved = h.store.get(&id).expect("saved");
        assert_eq!(saved.interest_level, Some(InterestLevel::Interest));
        assert_eq!(saved.summary.as_deref(), Some("<p>summary of News</p>"));
    }

    #[tokio::test]
    async fn initial_failure_falls_back_to_uninterested() {
        let h = harness(Script {
            fail_phase1: true,
            ..Script::default()
        });
        let it = item("src", "Anything");
        let id = it.id.clone();

        let outcome = h
            .pipeline
            .process(&CancellationToken::new(), &context(true), it)
            .await
            .expect("process");

        assert_eq!(outcome, ItemOutcome::Saved(InterestLevel::Uninterested));
        let saved = h.store.get(&id).expect("saved");
        assert!(saved.reason.starts_with("initial classification failed:"));
        assert_eq!(h.classifier.total_calls(), 1);
    }

    #[tokio::test]
    async fn long_content_is_summarized_instead_of_description() {
        let h = harness(Script::phase1(InterestLevel::Interest));
        let long = "x".repeat(150);
        let it = item("src", "Long").with_content(long.clone());

        h.pipeline
            .process(&CancellationToken::new(), &context(true), it)
            .await
            .expect("process");
        assert_eq!(h.classifier.summarized_inputs(), vec![long]);

        let h = harness(Script::phase1(InterestLevel::Interest));
        let it = item("src", "Short").with_content("too short");
        h.pipeline
            .process(&CancellationToken::new(), &context(true), it)
            .await
            .expect("process");
        assert_eq!(h.classifier.summarized_inputs(), vec!["about Short".to_string()]);
    }

    #[tokio::test]
    async fn cancelled_items_are_not_saved() {
        let h = harness(Script::phase1(InterestLevel::Interest));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = h
            .pipeline
            .process(&cancel, &context(true), item("src", "Late"))
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(h.store.len(), 0);
    }

    #[tokio::test]
    async fn plugins_run_in_order_and_errors_abort_the_item() {
        use crate::test_support::{FailingPlugin, TagPlugin};

        let h = harness(Script::phase1(InterestLevel::Uninterested));
        let mut registry = PluginRegistry::new();
        registry.register(TagPlugin("a"));
        registry.register(TagPlugin("b"));
        registry.register(FailingPlugin);

        let config = AppConfig::default();
        let mut source = source_config("src");
        source.plugins = vec!["a".into(), "missing".into(), "b".into()];
        let ctx = SourceContext::resolve(&config.global, &source, &registry);
        assert_eq!(ctx.plugins.len(), 2);

        let it = item("src", "Tagged");
        let id = it.id.clone();
        h.pipeline
            .process(&CancellationToken::new(), &ctx, it)
            .await
            .expect("process");
        assert_eq!(h.store.get(&id).expect("saved").description, "about Tagged [a] [b]");

        source.plugins = vec!["failing".into()];
        let ctx = SourceContext::resolve(&config.global, &source, &registry);
        let err = h
            .pipeline
            .process(&CancellationToken::new(), &ctx, item("src", "Broken"))
            .await
            .unwrap_err();
        assert!(matches!(err, SieveError::Plugin { .. }));
        assert_eq!(h.store.len(), 1);
    }
}

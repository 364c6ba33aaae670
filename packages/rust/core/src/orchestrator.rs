//! Run orchestration: one task per source, a shared gate, one aggregated result.

use std::sync::Arc;
use std::time::Instant;

use sieve_shared::{AppConfig, Classifier, FeedSource, ItemStore, Result, SieveError};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::gate::BackpressureGate;
use crate::pipeline::{ItemOutcome, ItemPipeline, PipelineSettings, SourceContext, cancellable};
use crate::plugins::PluginRegistry;
use crate::progress::{ProgressEvent, ProgressKind, ProgressSink, RunResult, RunTracker, SilentProgress};
use crate::report::ReportGenerator;

/// Source name used on report progress events.
const REPORT_EVENT_SOURCE: &str = "report";

/// Drives a full run over every configured source.
pub struct Orchestrator {
    config: Arc<AppConfig>,
    feed: Arc<dyn FeedSource>,
    store: Arc<dyn ItemStore>,
    classifier: Arc<dyn Classifier>,
    plugins: Arc<PluginRegistry>,
    report: Option<Arc<dyn ReportGenerator>>,
    progress: Arc<dyn ProgressSink>,
}

impl Orchestrator {
    pub fn new(
        config: AppConfig,
        feed: Arc<dyn FeedSource>,
        store: Arc<dyn ItemStore>,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            feed,
            store,
            classifier,
            plugins: Arc::new(PluginRegistry::new()),
            report: None,
            progress: Arc::new(SilentProgress),
        }
    }

    pub fn with_plugins(mut self, plugins: Arc<PluginRegistry>) -> Self {
        self.plugins = plugins;
        self
    }

    /// Generate a report after every successful run.
    pub fn with_report(mut self, report: Arc<dyn ReportGenerator>) -> Self {
        self.report = Some(report);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Process every source concurrently and return the aggregated result.
    ///
    /// Feed and item failures are recorded in the result. Only cancellation
    /// (or a crashed source task) fails the run; sibling tasks are cancelled
    /// and drained before the error is returned.
    #[instrument(skip_all, fields(sources = self.config.sources.len()))]
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunResult> {
        self.config.validate()?;

        let started = Instant::now();
        let run_token = cancel.child_token();
        let gate = Arc::new(BackpressureGate::from_settings(&self.config.gate));
        let tracker = Arc::new(RunTracker::new(Arc::clone(&self.progress)));
        let pipeline = Arc::new(ItemPipeline::new(
            Arc::clone(&self.store),
            Arc::clone(&self.classifier),
            Arc::clone(&gate),
            PipelineSettings::from(&self.config.global),
        ));

        info!(
            interval_ms = self.config.gate.interval().as_millis() as u64,
            burst = self.config.gate.burst(),
            max_in_flight = self.config.gate.max_in_flight(),
            "starting run"
        );

        let mut tasks = JoinSet::new();
        for source in &self.config.sources {
            let task = SourceTask {
                ctx: SourceContext::resolve(&self.config.global, source, &self.plugins),
                feed: Arc::clone(&self.feed),
                pipeline: Arc::clone(&pipeline),
                tracker: Arc::clone(&tracker),
                cancel: run_token.clone(),
            };
            tasks.spawn(task.run());
        }

        let mut failure: Option<SieveError> = None;
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined
                .unwrap_or_else(|e| Err(SieveError::Task(format!("source task crashed: {e}"))));
            if let Err(e) = outcome {
                if failure.is_none() {
                    if !e.is_cancelled() {
                        error!(error = %e, "source task failed, cancelling run");
                    }
                    run_token.cancel();
                    failure = Some(e);
                }
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }
        if run_token.is_cancelled() {
            return Err(SieveError::Cancelled);
        }

        if let Some(report) = &self.report {
            self.generate_report(report.as_ref(), &tracker, &run_token)
                .await?;
        }

        let result = tracker.finish(started.elapsed());
        let stats = gate.stats();
        info!(
            sources_processed = result.sources_processed,
            sources_failed = result.sources_failed.len(),
            items_processed = result.items_processed,
            items_high_interest = result.items_high_interest,
            items_skipped = result.items_skipped,
            items_failed = result.items_failed,
            inference_calls = stats.admitted,
            peak_in_flight = stats.peak_in_flight,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "run complete"
        );
        Ok(result)
    }

    async fn generate_report(
        &self,
        report: &dyn ReportGenerator,
        tracker: &RunTracker,
        cancel: &CancellationToken,
    ) -> Result<()> {
        tracker.emit(ProgressEvent::new(ProgressKind::GenerationStart, REPORT_EVENT_SOURCE));
        let done = ProgressEvent::new(ProgressKind::GenerationDone, REPORT_EVENT_SOURCE);

        match cancellable(cancel, report.generate(self.store.as_ref())).await {
            Ok(summary) => {
                tracker.emit(done.message(format!(
                    "{} items written to {}",
                    summary.total_items,
                    summary.path.display()
                )));
                Ok(())
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                error!(error = %e, "report generation failed");
                tracker.report_failed(&e);
                tracker.emit(done.message(format!("failed: {e}")));
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Per-source task
// ---------------------------------------------------------------------------

struct SourceTask {
    ctx: SourceContext,
    feed: Arc<dyn FeedSource>,
    pipeline: Arc<ItemPipeline>,
    tracker: Arc<RunTracker>,
    cancel: CancellationToken,
}

impl SourceTask {
    /// Returns `Err` only when the run must stop.
    #[instrument(skip_all, fields(source = %self.ctx.name))]
    async fn run(self) -> Result<()> {
        let name = self.ctx.name.as_str();
        self.tracker
            .emit(ProgressEvent::new(ProgressKind::SourceStart, name));

        let fetched = cancellable(&self.cancel, self.feed.fetch_items(&self.ctx.url, name)).await;
        let items = match fetched {
            Ok(items) => items,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                error!(url = %self.ctx.url, error = %e, "feed retrieval failed");
                self.tracker.source_failed(name, &self.ctx.url, &e);
                self.tracker.emit(
                    ProgressEvent::new(ProgressKind::SourceDone, name).message(format!("failed: {e}")),
                );
                return Ok(());
            }
        };

        let total = items.len();
        info!(items = total, "feed retrieved");

        let (mut saved, mut skipped, mut failed) = (0usize, 0usize, 0usize);
        for (idx, item) in items.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Err(SieveError::Cancelled);
            }

            let position = idx + 1;
            let title = item.title.clone();
            self.tracker.emit(
                ProgressEvent::new(ProgressKind::ItemStart, name)
                    .item(&title)
                    .position(position, total),
            );
            let done = ProgressEvent::new(ProgressKind::ItemDone, name)
                .item(&title)
                .position(position, total);

            match self.pipeline.process(&self.cancel, &self.ctx, item).await {
                Ok(outcome) => {
                    match outcome {
                        ItemOutcome::Skipped => skipped += 1,
                        ItemOutcome::Saved(_) => saved += 1,
                    }
                    self.tracker.item_finished(&outcome);
                    self.tracker.emit(done.level(outcome.level()));
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(title = %title, error = %e, "item failed, will retry next run");
                    failed += 1;
                    self.tracker.item_failed();
                    self.tracker.emit(done.message(format!("failed: {e}")));
                }
            }
        }

        self.tracker.source_done();
        self.tracker.emit(
            ProgressEvent::new(ProgressKind::SourceDone, name)
                .position(total, total)
                .message(format!("{saved} saved, {skipped} skipped, {failed} failed")),
        );
        info!(saved, skipped, failed, "source complete");
        Ok(())
    }
}

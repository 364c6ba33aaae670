//! Run-level result aggregation and progress reporting.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use sieve_shared::{InterestLevel, SieveError};

use crate::pipeline::ItemOutcome;

/// How many formatted progress lines a run keeps.
pub const PROGRESS_LOG_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    SourceStart,
    SourceDone,
    ItemStart,
    ItemDone,
    GenerationStart,
    GenerationDone,
}

impl ProgressKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SourceStart => "source_start",
            Self::SourceDone => "source_done",
            Self::ItemStart => "item_start",
            Self::ItemDone => "item_done",
            Self::GenerationStart => "generation_start",
            Self::GenerationDone => "generation_done",
        }
    }
}

/// One observable step of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub kind: ProgressKind,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<InterestLevel>,
    pub current: usize,
    pub total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProgressEvent {
    pub fn new(kind: ProgressKind, source: impl Into<String>) -> Self {
        Self {
            kind,
            source: source.into(),
            item: None,
            level: None,
            current: 0,
            total: 0,
            message: None,
        }
    }

    pub fn item(mut self, title: impl Into<String>) -> Self {
        self.item = Some(title.into());
        self
    }

    pub fn level(mut self, level: Option<InterestLevel>) -> Self {
        self.level = level;
        self
    }

    pub fn position(mut self, current: usize, total: usize) -> Self {
        self.current = current;
        self.total = total;
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Single-line rendering used for the progress log.
    pub fn describe(&self) -> String {
        let mut line = format!("[{}] {}", self.kind.as_str(), self.source);
        if self.total > 0 {
            line.push_str(&format!(" {}/{}", self.current, self.total));
        }
        if let Some(item) = &self.item {
            line.push_str(&format!(" {item:?}"));
        }
        if let Some(level) = self.level {
            line.push_str(&format!(" -> {level}"));
        }
        if let Some(message) = &self.message {
            line.push_str(&format!(": {message}"));
        }
        line
    }
}

/// Receives progress events. Called synchronously from pipeline tasks, so
/// implementations must return quickly.
pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: &ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn on_event(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// No-op sink for headless/test usage.
pub struct SilentProgress;

impl ProgressSink for SilentProgress {
    fn on_event(&self, _event: &ProgressEvent) {}
}

// ---------------------------------------------------------------------------
// Run result
// ---------------------------------------------------------------------------

/// A source whose feed could not be retrieved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFailure {
    pub name: String,
    pub url: String,
    pub error: String,
}

/// Summary of one run. Immutable once returned.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunResult {
    /// Sources whose feed was retrieved and walked to the end.
    pub sources_processed: usize,
    pub sources_failed: Vec<SourceFailure>,
    /// Items classified and persisted by this run.
    pub items_processed: usize,
    pub items_high_interest: usize,
    /// Items already in the store.
    pub items_skipped: usize,
    /// Items abandoned this run; they are retried on the next one.
    pub items_failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_error: Option<String>,
    #[serde(skip)]
    pub elapsed: Duration,
    /// Most recent progress lines, oldest first.
    pub recent_log: Vec<String>,
}

// ---------------------------------------------------------------------------
// Shared run state
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct RunState {
    result: RunResult,
    log: VecDeque<String>,
}

/// Mutable state shared by all source tasks of a run, behind one mutex.
/// The sink is called outside the lock.
pub(crate) struct RunTracker {
    state: Mutex<RunState>,
    sink: Arc<dyn ProgressSink>,
}

impl RunTracker {
    pub(crate) fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            state: Mutex::new(RunState::default()),
            sink,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn emit(&self, event: ProgressEvent) {
        let line = event.describe();
        {
            let mut state = self.lock();
            if state.log.len() == PROGRESS_LOG_CAPACITY {
                state.log.pop_front();
            }
            state.log.push_back(line);
        }
        self.sink.on_event(&event);
    }

    pub(crate) fn source_failed(&self, name: &str, url: &str, error: &SieveError) {
        self.lock().result.sources_failed.push(SourceFailure {
            name: name.to_owned(),
            url: url.to_owned(),
            error: error.to_string(),
        });
    }

    pub(crate) fn source_done(&self) {
        self.lock().result.sources_processed += 1;
    }

    pub(crate) fn item_finished(&self, outcome: &ItemOutcome) {
        let mut state = self.lock();
        match outcome {
            ItemOutcome::Skipped => state.result.items_skipped += 1,
            ItemOutcome::Saved(level) => {
                state.result.items_processed += 1;
                if *level == InterestLevel::HighInterest {
                    state.result.items_high_interest += 1;
                }
            }
        }
    }

    pub(crate) fn item_failed(&self) {
        self.lock().result.items_failed += 1;
    }

    pub(crate) fn report_failed(&self, error: &SieveError) {
        self.lock().result.report_error = Some(error.to_string());
    }

    /// Snapshot the final result.
    pub(crate) fn finish(&self, elapsed: Duration) -> RunResult {
        let state = self.lock();
        RunResult {
            elapsed,
            recent_log: state.log.iter().cloned().collect(),
            ..state.result.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn event_description() {
        let event = ProgressEvent::new(ProgressKind::ItemDone, "hn")
            .item("Rust 2024")
            .position(2, 10)
            .level(Some(InterestLevel::Interest));
        assert_eq!(event.describe(), "[item_done] hn 2/10 \"Rust 2024\" -> interest");

        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["kind"], "item_done");
        assert_eq!(json["level"], "interest");
    }

    #[test]
    fn log_is_a_ring_buffer() {
        let tracker = RunTracker::new(Arc::new(SilentProgress));
        for i in 0..(PROGRESS_LOG_CAPACITY + 10) {
            tracker.emit(ProgressEvent::new(ProgressKind::SourceStart, format!("s{i}")));
        }

        let result = tracker.finish(Duration::ZERO);
        assert_eq!(result.recent_log.len(), PROGRESS_LOG_CAPACITY);
        assert_eq!(result.recent_log[0], "[source_start] s10");
    }

    #[test]
    fn closures_are_sinks() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let tracker = RunTracker::new(Arc::new(move |_: &ProgressEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        tracker.emit(ProgressEvent::new(ProgressKind::GenerationStart, "report"));
        tracker.emit(ProgressEvent::new(ProgressKind::GenerationDone, "report"));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn counters() {
        let tracker = RunTracker::new(Arc::new(SilentProgress));
        tracker.item_finished(&ItemOutcome::Saved(InterestLevel::HighInterest));
        tracker.item_finished(&ItemOutcome::Saved(InterestLevel::Exclude));
        tracker.item_finished(&ItemOutcome::Skipped);
        tracker.item_failed();
        tracker.source_done();
        tracker.source_failed("b", "https://b.example", &SieveError::Network("boom".into()));

        let result = tracker.finish(Duration::from_secs(1));
        assert_eq!(result.items_processed, 2);
        assert_eq!(result.items_high_interest, 1);
        assert_eq!(result.items_skipped, 1);
        assert_eq!(result.items_failed, 1);
        assert_eq!(result.sources_processed, 1);
        assert_eq!(result.sources_failed[0].error, "network error: boom");
    }
}

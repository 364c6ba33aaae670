//! Pipeline core for Sieve.
//!
//! This crate ties the collaborators defined in `sieve-shared` (feed source,
//! classifier, item store, plugins) into a concurrent run:
//! - [`Orchestrator`] fans out one task per source
//! - [`ItemPipeline`] takes each item from fetched to persisted
//! - [`BackpressureGate`] paces and bounds inference calls across all sources
//! - [`progress`] aggregates the [`RunResult`] and reports progress events

pub mod gate;
pub mod orchestrator;
pub mod pipeline;
pub mod plugins;
pub mod progress;
pub mod report;

#[cfg(test)]
mod test_support;

pub use gate::{BackpressureGate, GatePermit, GateStats};
pub use orchestrator::Orchestrator;
pub use pipeline::{ItemOutcome, ItemPipeline, PipelineSettings, SourceContext, cancellable};
pub use plugins::{FetchContentPlugin, NOP_ALIASES, NopPlugin, PluginRegistry, StripHtmlPlugin};
pub use progress::{
    PROGRESS_LOG_CAPACITY, ProgressEvent, ProgressKind, ProgressSink, RunResult, SilentProgress,
    SourceFailure,
};
pub use report::{JsonReport, ReportGenerator, ReportSummary};

//! Shared types, error model, and configuration for Sieve.
//!
//! This crate is the foundation depended on by all other Sieve crates.
//! It provides:
//! - [`SieveError`], the unified error type
//! - Domain types ([`Item`], [`ItemId`], [`InterestLevel`], [`Classification`])
//! - Configuration ([`AppConfig`], [`SourceConfig`], config loading, rule merging)
//! - The collaborator traits the pipeline is written against

pub mod config;
pub mod error;
pub mod rules;
pub mod traits;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AiConfig, AppConfig, GateSettings, GlobalConfig, InferenceSettings, OutputConfig,
    ProviderSettings, ProvidersConfig, SourceConfig, config_dir, config_file_path, init_config,
    init_config_at, load_config, load_config_from,
};
pub use error::{Result, SieveError};
pub use rules::{build_rules, merge_terms, resolve_target};
pub use traits::{Classifier, FeedSource, ItemStore, Plugin};
pub use types::{Classification, InterestLevel, Item, ItemId, ModelTarget, ProviderKind};

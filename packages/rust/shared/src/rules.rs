//! Rule merging and inference target resolution for a source.

use crate::config::{AiConfig, GlobalConfig, SourceConfig};
use crate::types::{ModelTarget, ProviderKind};

/// Union of two comma-separated term lists: global terms first, then source
/// terms not already present. Blank entries are dropped.
pub fn merge_terms(global: &str, source: &str) -> String {
    let mut terms: Vec<&str> = Vec::new();
    for term in global.split(',').chain(source.split(',')) {
        let term = term.trim();
        if !term.is_empty() && !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms.join(",")
}

/// The rule string sent to the classifier for items of `source`.
pub fn build_rules(global: &GlobalConfig, source: &SourceConfig) -> String {
    format!(
        "High: {}, Interest: {}, Uninterested: {}, Exclude: {}",
        merge_terms(&global.high_interest, &source.high_interest),
        merge_terms(&global.interest, &source.interest),
        merge_terms(&global.uninterested, &source.uninterested),
        merge_terms(&global.exclude, &source.exclude),
    )
}

/// Resolve provider and model field by field: source, then global, then the
/// provider's built-in default model.
pub fn resolve_target(global: &AiConfig, source: &AiConfig) -> ModelTarget {
    let provider = source
        .provider
        .or(global.provider)
        .unwrap_or(ProviderKind::Gemini);

    let model = source
        .model
        .as_deref()
        .or(global.model.as_deref())
        .filter(|m| !m.trim().is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| provider.default_model().to_owned());

    ModelTarget { provider, model }
}

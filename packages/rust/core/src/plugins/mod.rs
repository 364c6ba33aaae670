//! Content plugins: named item transforms run before classification.
//!
//! Plugins are looked up by name in an explicit [`PluginRegistry`] built at
//! startup and handed to the orchestrator.

mod builtin;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sieve_shared::{Plugin, Result};

pub use builtin::{FetchContentPlugin, NopPlugin, StripHtmlPlugin};

/// Site-specific plugin names that existing configs still reference. They
/// pass items through unchanged.
pub const NOP_ALIASES: [&str; 4] = [
    "fetch_meta",
    "cnbeta_fetch_content",
    "hn_fetch_comments",
    "zaihuapd_clean_description",
];

/// Plugins by name.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, Arc<dyn Plugin>>,
}

impl PluginRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in plugin. `http_timeout` applies to
    /// plugins that fetch pages.
    pub fn with_builtins(http_timeout: Duration) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(NopPlugin);
        registry.register(StripHtmlPlugin);
        registry.register(FetchContentPlugin::new(http_timeout)?);

        let nop: Arc<dyn Plugin> = Arc::new(NopPlugin);
        for alias in NOP_ALIASES {
            registry.register_as(alias, Arc::clone(&nop));
        }
        Ok(registry)
    }

    /// Register `plugin` under `name` instead of its own name.
    pub fn register_as(&mut self, name: impl Into<String>, plugin: Arc<dyn Plugin>) {
        self.plugins.insert(name.into(), plugin);
    }

    /// Add `plugin`, replacing any plugin with the same name.
    pub fn register(&mut self, plugin: impl Plugin + 'static) {
        self.plugins
            .insert(plugin.name().to_owned(), Arc::new(plugin));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.plugins.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

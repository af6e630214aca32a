//! In-process plugins.
//!
//! A plugin reacts to one or more webhook event kinds. The dispatcher runs
//! every enabled plugin that handles an event in its own task, so plugins
//! must not assume any ordering relative to each other.

pub mod label;
pub mod needs_rebase;
#[cfg(test)]
pub(crate) mod testutils;

use crate::config::PluginsConfig;
use async_trait::async_trait;
use github::{Event, EventKind, GitHubClient, GitHubError};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum PluginError {
    #[error("GitHub error: {0}")]
    GitHub(#[from] GitHubError),
}

/// Everything a handler needs to act on one event.
#[derive(Clone)]
pub struct Agent {
    pub github: Arc<dyn GitHubClient>,
    /// Config snapshot taken when the event arrived
    pub config: Arc<PluginsConfig>,
    pub delivery_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PluginHelp {
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
    pub events: Vec<String>,
    pub commands: Vec<CommandHelp>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CommandHelp {
    pub usage: String,
    pub description: String,
    pub examples: Vec<String>,
}

#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &'static str;

    fn help(&self, config: &PluginsConfig) -> PluginHelp;

    fn handles(&self, kind: &EventKind) -> bool;

    async fn handle(&self, agent: &Agent, event: &Event) -> Result<(), PluginError>;
}

#[derive(Default)]
pub struct PluginRegistry {
    plugins: HashMap<&'static str, Arc<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_plugins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(label::LabelPlugin));
        registry.register(Arc::new(needs_rebase::NeedsRebasePlugin));
        registry
    }

    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins.insert(plugin.name(), plugin);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Plugin>> {
        self.plugins.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    /// Help for every plugin enabled in at least one scope.
    pub fn help(&self, config: &PluginsConfig) -> BTreeMap<&'static str, PluginHelp> {
        config
            .plugins
            .values()
            .flatten()
            .filter_map(|name| self.plugins.get(name.as_str()))
            .map(|plugin| (plugin.name(), plugin.help(config)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry() {
        let registry = PluginRegistry::with_default_plugins();
        assert!(registry.contains("label"));
        assert!(registry.contains("needs-rebase"));
        assert!(!registry.contains("lgtm"));

        let label = registry.get("label").unwrap();
        assert!(label.handles(&EventKind::IssueComment));
        assert!(!label.handles(&EventKind::Push));
    }

    #[test]
    fn test_help_lists_enabled_plugins_only() {
        let registry = PluginRegistry::with_default_plugins();
        let config = PluginsConfig {
            plugins: HashMap::from([
                ("kubernetes".to_string(), vec!["label".to_string()]),
                ("kubernetes/test-infra".to_string(), vec!["label".to_string()]),
            ]),
            ..Default::default()
        };

        let help = registry.help(&config);
        assert_eq!(help.keys().copied().collect::<Vec<_>>(), vec!["label"]);
        assert!(!help["label"].commands.is_empty());
    }
}

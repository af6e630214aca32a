use crate::plugins::PluginRegistry;
use github::EventKind;
use github::client::DEFAULT_API_URL;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Invalid scope {0:?}, expected \"org\" or \"org/repo\"")]
    InvalidScope(String),

    #[error("Unknown plugin {plugin:?} enabled for {scope}")]
    UnknownPlugin { scope: String, plugin: String },

    #[error("Empty external plugin name for {0}")]
    EmptyExternalPluginName(String),

    #[error("External plugin {name:?} endpoint must be http or https, got {endpoint}")]
    InvalidEndpoint { name: String, endpoint: Url },

    #[error("Empty label name in needs_rebase config")]
    EmptyNeedsRebaseLabel,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(#[from] ValidationError),
    #[error("could not load hmac secrets: {0}")]
    Secrets(#[from] github::signature::SecretsError),
}

fn default_grace_period_secs() -> u64 {
    180
}

fn default_reload_interval_secs() -> u64 {
    60
}

/// Hook server configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Listener for webhooks and plugin help
    pub listener: Listener,
    /// Listener for health and readiness probes
    pub admin_listener: Listener,
    /// Plugin configuration, reloaded periodically
    pub plugin_config_path: PathBuf,
    /// HMAC secrets used to validate webhooks, reloaded periodically
    pub hmac_secret_path: PathBuf,
    #[serde(default)]
    pub github: GitHubConfig,
    /// How long shutdown waits for in-flight handlers
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
    #[serde(default = "default_reload_interval_secs")]
    pub reload_interval_secs: u64,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;
        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct GitHubConfig {
    pub api_url: Url,
    /// File holding the API token. Without one, requests are unauthenticated.
    pub token_path: Option<PathBuf>,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        GitHubConfig {
            api_url: Url::parse(DEFAULT_API_URL).expect("default API URL is valid"),
            token_path: None,
        }
    }
}

/// Plugin configuration, keyed by scope (`org` or `org/repo`)
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct PluginsConfig {
    /// In-process plugins enabled per scope
    #[serde(default)]
    pub plugins: HashMap<String, Vec<String>>,
    /// External plugins that receive forwarded webhooks, per scope
    #[serde(default)]
    pub external_plugins: HashMap<String, Vec<ExternalPlugin>>,
    #[serde(default)]
    pub label: LabelConfig,
    #[serde(default)]
    pub needs_rebase: NeedsRebaseConfig,
}

/// A plugin running as its own service
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ExternalPlugin {
    pub name: String,
    pub endpoint: Url,
    /// Event kinds to forward. Empty means every event.
    #[serde(default)]
    pub events: Vec<String>,
}

impl ExternalPlugin {
    pub fn wants(&self, kind: &EventKind) -> bool {
        self.events.is_empty() || self.events.iter().any(|e| e == kind.as_str())
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct LabelConfig {
    /// Labels that `/label` may apply even if the repository does not define them
    #[serde(default)]
    pub additional_labels: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct NeedsRebaseConfig {
    pub label: String,
}

impl Default for NeedsRebaseConfig {
    fn default() -> Self {
        NeedsRebaseConfig {
            label: "needs-rebase".into(),
        }
    }
}

/// Splits `org/repo` into its parts. `org` alone has no repo.
pub fn split_scope(scope: &str) -> Option<(&str, Option<&str>)> {
    match scope.split_once('/') {
        None if !scope.is_empty() => Some((scope, None)),
        Some((org, repo)) if !org.is_empty() && !repo.is_empty() && !repo.contains('/') => {
            Some((org, Some(repo)))
        }
        _ => None,
    }
}

impl PluginsConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }

    pub fn validate(&self, registry: &PluginRegistry) -> Result<(), ValidationError> {
        for (scope, plugins) in &self.plugins {
            split_scope(scope).ok_or_else(|| ValidationError::InvalidScope(scope.clone()))?;

            for plugin in plugins {
                if !registry.contains(plugin) {
                    return Err(ValidationError::UnknownPlugin {
                        scope: scope.clone(),
                        plugin: plugin.clone(),
                    });
                }
            }
        }

        for (scope, externals) in &self.external_plugins {
            split_scope(scope).ok_or_else(|| ValidationError::InvalidScope(scope.clone()))?;

            for external in externals {
                if external.name.is_empty() {
                    return Err(ValidationError::EmptyExternalPluginName(scope.clone()));
                }
                if !matches!(external.endpoint.scheme(), "http" | "https") {
                    return Err(ValidationError::InvalidEndpoint {
                        name: external.name.clone(),
                        endpoint: external.endpoint.clone(),
                    });
                }
            }
        }

        if self.needs_rebase.label.trim().is_empty() {
            return Err(ValidationError::EmptyNeedsRebaseLabel);
        }

        Ok(())
    }

    fn scoped<'a, T>(
        map: &'a HashMap<String, Vec<T>>,
        org: &str,
        repo: Option<&str>,
    ) -> impl Iterator<Item = &'a T> {
        let org_entries = map.get(org).into_iter().flatten();
        let repo_entries = repo
            .and_then(|repo| map.get(&format!("{org}/{repo}")))
            .into_iter()
            .flatten();
        org_entries.chain(repo_entries)
    }

    /// In-process plugins enabled for the org and the repo, org entries
    /// first, without duplicates.
    pub fn enabled_plugins(&self, org: &str, repo: Option<&str>) -> Vec<&str> {
        let mut seen = HashSet::new();
        Self::scoped(&self.plugins, org, repo)
            .map(String::as_str)
            .filter(|name| seen.insert(*name))
            .collect()
    }

    /// External plugins for the org and the repo that want `kind`.
    pub fn external_plugins_for(
        &self,
        org: &str,
        repo: Option<&str>,
        kind: &EventKind,
    ) -> Vec<&ExternalPlugin> {
        Self::scoped(&self.external_plugins, org, repo)
            .filter(|external| external.wants(kind))
            .collect()
    }
}

//! Holds the current plugin config and HMAC secrets and refreshes them from
//! disk. Readers take an `Arc` snapshot, so a reload never changes the
//! config under a running handler.

use crate::config::{ConfigError, PluginsConfig};
use crate::metrics_defs::CONFIG_RELOADS;
use crate::plugins::PluginRegistry;
use github::signature::HmacSecrets;
use parking_lot::RwLock;
use shared::counter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct ConfigAgent {
    plugin_config_path: PathBuf,
    hmac_secret_path: PathBuf,
    registry: Arc<PluginRegistry>,
    plugins: RwLock<Arc<PluginsConfig>>,
    secrets: RwLock<Arc<HmacSecrets>>,
}

fn load_plugins(path: &Path, registry: &PluginRegistry) -> Result<PluginsConfig, ConfigError> {
    let config = PluginsConfig::from_file(path)?;
    config.validate(registry)?;
    Ok(config)
}

impl ConfigAgent {
    /// Loads both files once. Any error here is fatal to startup.
    pub fn load(
        plugin_config_path: PathBuf,
        hmac_secret_path: PathBuf,
        registry: Arc<PluginRegistry>,
    ) -> Result<Self, ConfigError> {
        let plugins = load_plugins(&plugin_config_path, &registry)?;
        let secrets = HmacSecrets::from_file(&hmac_secret_path)?;

        Ok(ConfigAgent {
            plugin_config_path,
            hmac_secret_path,
            registry,
            plugins: RwLock::new(Arc::new(plugins)),
            secrets: RwLock::new(Arc::new(secrets)),
        })
    }

    pub fn plugins(&self) -> Arc<PluginsConfig> {
        self.plugins.read().clone()
    }

    pub fn secrets(&self) -> Arc<HmacSecrets> {
        self.secrets.read().clone()
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// Re-reads both files. Each snapshot is replaced only if its new file
    /// loads and validates, otherwise the previous one stays in place.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let plugins = load_plugins(&self.plugin_config_path, &self.registry)
            .map(|plugins| *self.plugins.write() = Arc::new(plugins));
        let secrets = HmacSecrets::from_file(&self.hmac_secret_path)
            .map(|secrets| *self.secrets.write() = Arc::new(secrets))
            .map_err(ConfigError::from);

        plugins.and(secrets)
    }

    /// Reloads every `interval` until `shutdown` is cancelled.
    pub async fn run_reloader(&self, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately and the config was just loaded
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.cancelled() => return,
            }

            match self.reload() {
                Ok(()) => {
                    tracing::debug!("config reloaded");
                    counter!(CONFIG_RELOADS, "outcome" => "ok").increment(1);
                }
                Err(e) => {
                    tracing::error!(error = %e, "config reload failed, keeping previous config");
                    counter!(CONFIG_RELOADS, "outcome" => "error").increment(1);
                }
            }
        }
    }
}

//! Fans a validated webhook out to plugins.
//!
//! Every matching in-process plugin and every interested external plugin
//! gets its own task. Tasks are fire and forget: nothing waits on them while
//! the server runs and their errors only reach the logs and metrics. They
//! are tracked so that shutdown can wait for the ones still running.

use crate::config::{ExternalPlugin, PluginsConfig, split_scope};
use crate::external::ExternalDispatcher;
use crate::metrics_defs::{
    EXTERNAL_DISPATCH_DURATION, HANDLERS_INFLIGHT, PLUGIN_HANDLE_DURATION, PLUGIN_HANDLE_ERRORS,
};
use crate::plugins::{Agent, PluginRegistry};
use github::events::payload_scope;
use github::{Event, EventKind, EventPayload, GitHubClient};
use http::HeaderMap;
use hyper::body::Bytes;
use shared::{counter, gauge, histogram};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::task::TaskTracker;
use tracing::Instrument;

/// A webhook that passed validation.
#[derive(Clone, Debug)]
pub struct Webhook {
    pub kind: EventKind,
    pub delivery_id: String,
    pub payload: Bytes,
    pub headers: HeaderMap,
}

pub struct Dispatcher {
    github: Arc<dyn GitHubClient>,
    registry: Arc<PluginRegistry>,
    external: ExternalDispatcher,
    tracker: TaskTracker,
}

impl Dispatcher {
    pub fn new(
        github: Arc<dyn GitHubClient>,
        registry: Arc<PluginRegistry>,
        external: ExternalDispatcher,
    ) -> Self {
        Dispatcher {
            github,
            registry,
            external,
            tracker: TaskTracker::new(),
        }
    }

    /// Spawns one task per handler interested in `webhook` and returns
    /// without waiting for any of them.
    pub fn demux(&self, webhook: Webhook, config: Arc<PluginsConfig>) {
        if self.is_closed() {
            tracing::warn!(
                delivery_id = %webhook.delivery_id,
                "dispatcher is shut down, dropping event"
            );
            return;
        }
        let Some(scope) = payload_scope(&webhook.payload) else {
            tracing::debug!(
                event_type = %webhook.kind,
                delivery_id = %webhook.delivery_id,
                "event names no repository or organization, not dispatching"
            );
            return;
        };
        let Some((org, repo)) = split_scope(&scope) else {
            tracing::warn!(scope, "unexpected repository name in payload");
            return;
        };

        self.dispatch_plugins(&webhook, &config, org, repo);

        let webhook = Arc::new(webhook);
        for external in config.external_plugins_for(org, repo, &webhook.kind) {
            self.spawn_external(external.clone(), webhook.clone());
        }
    }

    fn dispatch_plugins(
        &self,
        webhook: &Webhook,
        config: &Arc<PluginsConfig>,
        org: &str,
        repo: Option<&str>,
    ) {
        let enabled = config.enabled_plugins(org, repo);
        let handlers: Vec<_> = enabled
            .iter()
            .filter_map(|name| self.registry.get(name))
            .filter(|plugin| plugin.handles(&webhook.kind))
            .cloned()
            .collect();
        if handlers.is_empty() {
            return;
        }

        let payload = match EventPayload::parse(&webhook.kind, &webhook.payload) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(
                    event_type = %webhook.kind,
                    delivery_id = %webhook.delivery_id,
                    error = %e,
                    "could not parse payload, skipping in-process plugins"
                );
                return;
            }
        };

        let event = Arc::new(Event {
            kind: webhook.kind.clone(),
            delivery_id: webhook.delivery_id.clone(),
            payload,
        });
        let agent = Agent {
            github: self.github.clone(),
            config: config.clone(),
            delivery_id: webhook.delivery_id.clone(),
        };

        for plugin in handlers {
            let event = event.clone();
            let agent = agent.clone();
            let span = tracing::info_span!(
                "plugin",
                plugin = plugin.name(),
                event_type = %event.kind,
                delivery_id = %event.delivery_id,
            );

            gauge!(HANDLERS_INFLIGHT).increment(1.0);
            self.tracker.spawn(
                async move {
                    let started = Instant::now();
                    let outcome = match plugin.handle(&agent, &event).await {
                        Ok(()) => "ok",
                        Err(e) => {
                            tracing::error!(error = %e, "plugin failed");
                            counter!(
                                PLUGIN_HANDLE_ERRORS,
                                "plugin" => plugin.name(),
                                "event_type" => event.kind.to_string()
                            )
                            .increment(1);
                            "error"
                        }
                    };
                    histogram!(
                        PLUGIN_HANDLE_DURATION,
                        "plugin" => plugin.name(),
                        "event_type" => event.kind.to_string(),
                        "outcome" => outcome
                    )
                    .record(started.elapsed().as_secs_f64());
                    gauge!(HANDLERS_INFLIGHT).decrement(1.0);
                }
                .instrument(span),
            );
        }
    }

    fn spawn_external(&self, plugin: ExternalPlugin, webhook: Arc<Webhook>) {
        let external = self.external.clone();
        let span = tracing::info_span!(
            "external_plugin",
            plugin = %plugin.name,
            event_type = %webhook.kind,
            delivery_id = %webhook.delivery_id,
        );

        gauge!(HANDLERS_INFLIGHT).increment(1.0);
        self.tracker.spawn(
            async move {
                let started = Instant::now();
                let outcome = match external.dispatch(&plugin, &webhook).await {
                    Ok(()) => {
                        tracing::debug!("forwarded to external plugin");
                        "ok"
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "failed to forward to external plugin");
                        "error"
                    }
                };
                histogram!(
                    EXTERNAL_DISPATCH_DURATION,
                    "plugin" => plugin.name.clone(),
                    "outcome" => outcome
                )
                .record(started.elapsed().as_secs_f64());
                gauge!(HANDLERS_INFLIGHT).decrement(1.0);
            }
            .instrument(span),
        );
    }

    /// True once `shutdown` has started.
    pub fn is_closed(&self) -> bool {
        self.tracker.is_closed()
    }

    /// Number of handler tasks still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Stops tracking new work and waits up to `grace` for running handlers.
    /// Returns false if some were still running when the grace period ended.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.tracker.close();
        let remaining = self.tracker.len();
        if remaining > 0 {
            tracing::info!(remaining, "waiting for in-flight handlers");
        }

        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    remaining = self.tracker.len(),
                    "grace period elapsed with handlers still running"
                );
                false
            }
        }
    }
}

//! The webhook receiver: validates GitHub deliveries and fans them out to
//! in-process and external plugins.

pub mod config;
pub mod config_agent;
pub mod dispatch;
pub mod errors;
pub mod external;
pub mod metrics_defs;
pub mod plugins;
pub mod server;

use config::Config;
use config_agent::ConfigAgent;
use dispatch::Dispatcher;
use errors::HookError;
use external::ExternalDispatcher;
use github::{GitHubClient, RestClient};
use plugins::PluginRegistry;
use server::WebhookService;
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use shared::signal::shutdown_signal;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub async fn run(config: Config) -> Result<(), HookError> {
    config.validate()?;
    serve(config, shutdown_signal()).await
}

/// Runs both listeners until `signal` resolves or a listener fails, then
/// waits up to the grace period for in-flight handlers.
pub async fn serve<F>(config: Config, signal: F) -> Result<(), HookError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let registry = Arc::new(PluginRegistry::with_default_plugins());
    let agent = Arc::new(ConfigAgent::load(
        config.plugin_config_path.clone(),
        config.hmac_secret_path.clone(),
        registry.clone(),
    )?);

    let api_url = config.github.api_url.clone();
    let github: Arc<dyn GitHubClient> = match &config.github.token_path {
        Some(path) => Arc::new(RestClient::from_token_file(api_url, path)?),
        None => {
            tracing::warn!("no GitHub token configured, requests will be unauthenticated");
            Arc::new(RestClient::new(api_url, "")?)
        }
    };
    let dispatcher = Arc::new(Dispatcher::new(
        github,
        registry,
        ExternalDispatcher::new()?,
    ));

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            signal.await;
            shutdown.cancel();
        });
    }

    let reloader = {
        let agent = agent.clone();
        let shutdown = shutdown.clone();
        let interval = Duration::from_secs(config.reload_interval_secs);
        tokio::spawn(async move { agent.run_reloader(interval, shutdown).await })
    };

    let webhook_service = WebhookService::new(agent, dispatcher.clone());
    let webhooks = async {
        let result = run_http_service(
            &config.listener.host,
            config.listener.port,
            webhook_service,
            shutdown.clone().cancelled_owned(),
        )
        .await;
        shutdown.cancel();
        result
    };

    let ready = shutdown.clone();
    let admin_service = AdminService::new(move || !ready.is_cancelled());
    let admin = async {
        let result = run_http_service(
            &config.admin_listener.host,
            config.admin_listener.port,
            admin_service,
            shutdown.clone().cancelled_owned(),
        )
        .await;
        shutdown.cancel();
        result
    };

    let (webhook_result, admin_result) = tokio::join!(webhooks, admin);
    tracing::info!("listeners stopped, draining handlers");

    let grace = Duration::from_secs(config.grace_period_secs);
    if dispatcher.shutdown(grace).await {
        tracing::info!("all handlers finished");
    }
    if let Err(e) = reloader.await {
        tracing::error!(error = %e, "config reloader panicked");
    }

    webhook_result?;
    admin_result?;
    Ok(())
}

use crate::config_agent::ConfigAgent;
use crate::dispatch::{Dispatcher, Webhook};
use crate::metrics_defs::{WEBHOOK_RECEIVED, WEBHOOK_RESPONSES};
use github::EventKind;
use github::signature::{Algorithm, SHA1_HEADER, SHA256_HEADER, Signature, validate_payload};
use http::header::CONTENT_TYPE;
use http::{HeaderMap, Method};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::{Body, Incoming};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use shared::counter;
use shared::http::{ResponseBody, make_error_response, make_response};
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub const HOOK_PATH: &str = "/hook";
pub const PLUGIN_HELP_PATH: &str = "/plugin-help";

/// GitHub caps webhook payloads at 25 MiB.
pub const MAX_BODY_SIZE: usize = 25 * 1024 * 1024;

const EVENT_HEADER: &str = "x-github-event";
const DELIVERY_HEADER: &str = "x-github-delivery";
const ACCEPTED: &str = "Event received. Have a nice day.";

/// Why a webhook was turned away, in the order the checks run.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum WebhookRejection {
    #[error("Method not allowed")]
    MethodNotAllowed,
    #[error("Missing X-GitHub-Event Header")]
    MissingEventHeader,
    #[error("Missing X-GitHub-Delivery Header")]
    MissingDeliveryHeader,
    #[error("Missing X-Hub-Signature")]
    MissingSignature,
    #[error("Hook only accepts content-type: application/json - please reconfigure this hook on GitHub")]
    InvalidContentType,
    #[error("Payload exceeds {0} bytes")]
    BodyTooLarge(usize),
    #[error("Failed to read request body: {0}")]
    BodyRead(String),
    #[error("Invalid X-Hub-Signature")]
    InvalidSignature,
    #[error("Server is shutting down")]
    ShuttingDown,
}

impl WebhookRejection {
    pub fn status(&self) -> StatusCode {
        match self {
            WebhookRejection::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            WebhookRejection::MissingEventHeader
            | WebhookRejection::MissingDeliveryHeader
            | WebhookRejection::InvalidContentType => StatusCode::BAD_REQUEST,
            WebhookRejection::MissingSignature | WebhookRejection::InvalidSignature => {
                StatusCode::FORBIDDEN
            }
            WebhookRejection::BodyTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            WebhookRejection::BodyRead(_) => StatusCode::INTERNAL_SERVER_ERROR,
            WebhookRejection::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

fn is_json(headers: &HeaderMap) -> bool {
    header_str(headers, CONTENT_TYPE.as_str())
        .and_then(|value| value.split(';').next())
        .is_some_and(|media_type| media_type.trim().eq_ignore_ascii_case("application/json"))
}

struct Inner {
    config: Arc<ConfigAgent>,
    dispatcher: Arc<Dispatcher>,
    max_body_size: usize,
}

/// Serves `/hook` and `/plugin-help`.
#[derive(Clone)]
pub struct WebhookService {
    inner: Arc<Inner>,
}

impl WebhookService {
    pub fn new(config: Arc<ConfigAgent>, dispatcher: Arc<Dispatcher>) -> Self {
        WebhookService {
            inner: Arc::new(Inner {
                config,
                dispatcher,
                max_body_size: MAX_BODY_SIZE,
            }),
        }
    }

    #[cfg(test)]
    fn with_max_body_size(
        config: Arc<ConfigAgent>,
        dispatcher: Arc<Dispatcher>,
        max: usize,
    ) -> Self {
        WebhookService {
            inner: Arc::new(Inner {
                config,
                dispatcher,
                max_body_size: max,
            }),
        }
    }

    pub async fn handle<B>(&self, request: Request<B>) -> Response<ResponseBody>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let path = request.uri().path().to_owned();
        let response = match path.as_str() {
            HOOK_PATH => match self.accept(request).await {
                Ok(webhook) => {
                    counter!(WEBHOOK_RECEIVED, "event_type" => webhook.kind.to_string())
                        .increment(1);
                    tracing::debug!(
                        event_type = %webhook.kind,
                        delivery_id = %webhook.delivery_id,
                        "webhook accepted"
                    );
                    self.inner
                        .dispatcher
                        .demux(webhook, self.inner.config.plugins());
                    make_response(StatusCode::OK, ACCEPTED)
                }
                Err(rejection) => {
                    let status = rejection.status();
                    tracing::warn!(%status, reason = %rejection, "webhook rejected");
                    make_response(status, format!("{status}: {rejection}\n"))
                }
            },
            PLUGIN_HELP_PATH if request.method() == Method::GET => self.plugin_help(),
            PLUGIN_HELP_PATH => make_error_response(StatusCode::METHOD_NOT_ALLOWED),
            _ => make_error_response(StatusCode::NOT_FOUND),
        };

        counter!(WEBHOOK_RESPONSES, "status" => response.status().as_str().to_owned())
            .increment(1);
        response
    }

    /// Runs the validation chain and reads the body. The payload is only
    /// trusted once its signature matches a configured token.
    pub async fn accept<B>(&self, request: Request<B>) -> Result<Webhook, WebhookRejection>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        // Handlers spawned after the drain would never be waited for
        if self.inner.dispatcher.is_closed() {
            return Err(WebhookRejection::ShuttingDown);
        }
        if request.method() != Method::POST {
            return Err(WebhookRejection::MethodNotAllowed);
        }

        let (parts, body) = request.into_parts();
        let headers = parts.headers;

        let kind = header_str(&headers, EVENT_HEADER)
            .map(EventKind::from_header)
            .ok_or(WebhookRejection::MissingEventHeader)?;
        let delivery_id = header_str(&headers, DELIVERY_HEADER)
            .ok_or(WebhookRejection::MissingDeliveryHeader)?
            .to_string();

        // sha256 wins when GitHub sends both
        let (algorithm, signature_header) = match (
            header_str(&headers, SHA256_HEADER),
            header_str(&headers, SHA1_HEADER),
        ) {
            (Some(value), _) => (Algorithm::Sha256, value.to_string()),
            (None, Some(value)) => (Algorithm::Sha1, value.to_string()),
            (None, None) => return Err(WebhookRejection::MissingSignature),
        };

        if !is_json(&headers) {
            return Err(WebhookRejection::InvalidContentType);
        }

        let payload = match Limited::new(body, self.inner.max_body_size).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                return Err(WebhookRejection::BodyTooLarge(self.inner.max_body_size));
            }
            Err(e) => return Err(WebhookRejection::BodyRead(e.to_string())),
        };

        let signature = Signature::parse(algorithm, &signature_header)
            .ok_or(WebhookRejection::InvalidSignature)?;
        if !validate_payload(&payload, &signature, &self.inner.config.secrets()) {
            return Err(WebhookRejection::InvalidSignature);
        }

        Ok(Webhook {
            kind,
            delivery_id,
            payload,
            headers,
        })
    }

    fn plugin_help(&self) -> Response<ResponseBody> {
        let config = self.inner.config.plugins();
        let help = self.inner.config.registry().help(&config);

        match serde_json::to_vec(&help) {
            Ok(body) => {
                let mut response = make_response(StatusCode::OK, body);
                response.headers_mut().insert(
                    CONTENT_TYPE,
                    http::HeaderValue::from_static("application/json"),
                );
                response
            }
            Err(e) => {
                tracing::error!(error = %e, "could not serialize plugin help");
                make_error_response(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
}

impl Service<Request<Incoming>> for WebhookService {
    type Response = Response<ResponseBody>;
    type Error = Infallible;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move { Ok(service.handle(req).await) })
    }
}

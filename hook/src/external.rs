use crate::config::ExternalPlugin;
use crate::dispatch::Webhook;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use std::time::Duration;
use tokio::time::sleep;

const MAX_ATTEMPTS: u32 = 5;
const BASE_DELAY: Duration = Duration::from_millis(100);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Headers copied from the incoming webhook onto the forwarded request.
const FORWARDED_HEADERS: &[&str] = &[
    "x-github-event",
    "x-github-delivery",
    "x-hub-signature",
    "x-hub-signature-256",
];

#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    #[error("request failed after {attempts} attempts: {source}")]
    Transport {
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },
    #[error("response has status {status} and body {body:?}")]
    Status { status: StatusCode, body: String },
}

/// Forwards webhooks to external plugins.
#[derive(Clone)]
pub struct ExternalDispatcher {
    client: reqwest::Client,
    base_delay: Duration,
}

impl ExternalDispatcher {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(ExternalDispatcher {
            client,
            base_delay: BASE_DELAY,
        })
    }

    /// Overrides the first retry delay. Later delays keep doubling.
    pub fn with_backoff(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    fn forwarded_headers(webhook: &Webhook) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for &name in FORWARDED_HEADERS {
            if let Some(value) = webhook.headers.get(name) {
                headers.insert(HeaderName::from_static(name), value.clone());
            }
        }
        let content_type = webhook
            .headers
            .get(CONTENT_TYPE)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, content_type);
        headers
    }

    /// POSTs the raw payload to the plugin. Only transport errors are
    /// retried; any response other than 2xx is returned as an error.
    pub async fn dispatch(
        &self,
        plugin: &ExternalPlugin,
        webhook: &Webhook,
    ) -> Result<(), DispatchError> {
        let headers = Self::forwarded_headers(webhook);
        let mut attempt = 0;

        let response = loop {
            let result = self
                .client
                .post(plugin.endpoint.clone())
                .headers(headers.clone())
                .body(webhook.payload.clone())
                .send()
                .await;

            attempt += 1;
            match result {
                Ok(response) => break response,
                Err(source) if attempt >= MAX_ATTEMPTS => {
                    return Err(DispatchError::Transport {
                        attempts: attempt,
                        source,
                    });
                }
                Err(e) => {
                    let delay = self.base_delay * 2_u32.pow(attempt - 1);
                    tracing::debug!(
                        plugin = %plugin.name,
                        attempt,
                        error = %e,
                        "external plugin request failed, retrying in {delay:?}"
                    );
                    sleep(delay).await;
                }
            }
        };

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!(plugin = %plugin.name, error = %e, "could not read response body");
                format!("<unreadable body: {e}>")
            }
        };
        Err(DispatchError::Status { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use github::EventKind;
    use hyper::body::Bytes;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use url::Url;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn webhook() -> Webhook {
        let mut headers = HeaderMap::new();
        headers.insert("x-github-event", "issue_comment".parse().unwrap());
        headers.insert("x-github-delivery", "d-1".parse().unwrap());
        headers.insert("x-hub-signature", "sha1=abc".parse().unwrap());
        headers.insert("x-hub-signature-256", "sha256=def".parse().unwrap());
        headers.insert(CONTENT_TYPE, "application/json".parse().unwrap());
        headers.insert("authorization", "secret".parse().unwrap());

        Webhook {
            kind: EventKind::IssueComment,
            delivery_id: "d-1".into(),
            payload: Bytes::from_static(b"{\"zen\":\"hi\"}"),
            headers,
        }
    }

    fn plugin(endpoint: &str) -> ExternalPlugin {
        ExternalPlugin {
            name: "cat".into(),
            endpoint: Url::parse(endpoint).unwrap(),
            events: vec![],
        }
    }

    #[tokio::test]
    async fn test_forwards_payload_and_headers() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("x-github-event", "issue_comment"))
            .and(header("x-github-delivery", "d-1"))
            .and(header("x-hub-signature", "sha1=abc"))
            .and(header("x-hub-signature-256", "sha256=def"))
            .and(header("content-type", "application/json"))
            .and(body_string("{\"zen\":\"hi\"}"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher = ExternalDispatcher::new().unwrap();
        dispatcher
            .dispatch(&plugin(&format!("{}/hook", server.uri())), &webhook())
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        assert!(requests[0].headers.get("authorization").is_none());
    }

    #[tokio::test]
    async fn test_non_success_is_not_retried() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher = ExternalDispatcher::new()
            .unwrap()
            .with_backoff(Duration::from_millis(1));
        let err = dispatcher
            .dispatch(&plugin(&server.uri()), &webhook())
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "response has status 500 Internal Server Error and body \"boom\""
        );
    }

    #[tokio::test]
    async fn test_unreadable_error_body_is_reported() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = [0; 4096];
            let _ = stream.read(&mut request).await;
            // Promises more body than it sends, then hangs up
            stream
                .write_all(b"HTTP/1.1 500 Internal Server Error\r\ncontent-length: 100\r\n\r\nshort")
                .await
                .unwrap();
        });

        let dispatcher = ExternalDispatcher::new().unwrap();
        let err = dispatcher
            .dispatch(&plugin(&format!("http://{addr}/")), &webhook())
            .await
            .unwrap_err();

        match err {
            DispatchError::Status { status, body } => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert!(body.starts_with("<unreadable body"), "{body}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_transport_errors_are_retried() {
        // Reserve a port, then close it so connections are refused
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let dispatcher = ExternalDispatcher::new()
            .unwrap()
            .with_backoff(Duration::from_millis(1));
        let err = dispatcher
            .dispatch(&plugin(&format!("http://127.0.0.1:{port}/")), &webhook())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DispatchError::Transport {
                attempts: MAX_ATTEMPTS,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_backoff_doubles() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let dispatcher = ExternalDispatcher::new()
            .unwrap()
            .with_backoff(Duration::from_millis(10));
        let started = tokio::time::Instant::now();
        let _ = dispatcher
            .dispatch(&plugin(&format!("http://127.0.0.1:{port}/")), &webhook())
            .await;

        // 10 + 20 + 40 + 80 ms between the five attempts
        assert!(started.elapsed() >= Duration::from_millis(150));
    }
}

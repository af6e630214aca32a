use crate::events::{Label, PullRequest};
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::time::Duration;
use url::Url;

pub const DEFAULT_API_URL: &str = "https://api.github.com";

const USER_AGENT: &str = "prow-hook";
const PER_PAGE: usize = 100;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(thiserror::Error, Debug)]
pub enum GitHubError {
    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("{method} {path} returned {status}: {body}")]
    Status {
        method: Method,
        path: String,
        status: StatusCode,
        body: String,
    },
    #[error("invalid API URL: {0}")]
    InvalidUrl(String),
    #[error("could not read token: {0}")]
    Token(#[from] std::io::Error),
}

/// The GitHub operations plugins rely on.
#[async_trait]
pub trait GitHubClient: Send + Sync {
    async fn get_repo_labels(&self, org: &str, repo: &str) -> Result<Vec<Label>, GitHubError>;

    async fn get_issue_labels(
        &self,
        org: &str,
        repo: &str,
        number: u64,
    ) -> Result<Vec<Label>, GitHubError>;

    async fn add_labels(
        &self,
        org: &str,
        repo: &str,
        number: u64,
        labels: &[String],
    ) -> Result<(), GitHubError>;

    /// Removing a label the issue does not carry succeeds.
    async fn remove_label(
        &self,
        org: &str,
        repo: &str,
        number: u64,
        label: &str,
    ) -> Result<(), GitHubError>;

    async fn create_comment(
        &self,
        org: &str,
        repo: &str,
        number: u64,
        body: &str,
    ) -> Result<(), GitHubError>;

    async fn get_pull_request(
        &self,
        org: &str,
        repo: &str,
        number: u64,
    ) -> Result<PullRequest, GitHubError>;
}

/// GitHub REST v3 client.
#[derive(Clone)]
pub struct RestClient {
    client: reqwest::Client,
    base_url: Url,
    token: String,
}

impl RestClient {
    pub fn new(base_url: Url, token: impl Into<String>) -> Result<Self, GitHubError> {
        if base_url.cannot_be_a_base() {
            return Err(GitHubError::InvalidUrl(base_url.to_string()));
        }

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(RestClient {
            client,
            base_url,
            token: token.into(),
        })
    }

    /// The token file holds a personal access token, surrounding whitespace
    /// is ignored.
    pub fn from_token_file(base_url: Url, path: &Path) -> Result<Self, GitHubError> {
        let token = std::fs::read_to_string(path)?;
        Self::new(base_url, token.trim())
    }

    // Segments are percent-encoded, so label names like `kind/bug` stay one segment.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header(ACCEPT, "application/vnd.github+json");

        if self.token.is_empty() {
            builder
        } else {
            builder.bearer_auth(&self.token)
        }
    }

    async fn execute(&self, builder: RequestBuilder) -> Result<reqwest::Response, GitHubError> {
        let request = builder.build()?;
        let method = request.method().clone();
        let path = request.url().path().to_string();

        let response = self.client.execute(request).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!(%method, path, error = %e, "could not read error body");
                format!("<unreadable body: {e}>")
            }
        };
        tracing::debug!(%method, path, %status, "GitHub request failed");
        Err(GitHubError::Status {
            method,
            path,
            status,
            body,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, GitHubError> {
        let response = self.execute(self.request(Method::GET, url)).await?;
        Ok(response.json::<T>().await?)
    }

    /// Follows `page` until a page comes back short.
    async fn get_all_pages<T: DeserializeOwned>(
        &self,
        segments: &[&str],
    ) -> Result<Vec<T>, GitHubError> {
        let mut items = Vec::new();
        let mut page = 1;

        loop {
            let mut url = self.url(segments);
            url.query_pairs_mut()
                .append_pair("per_page", &PER_PAGE.to_string())
                .append_pair("page", &page.to_string());

            let batch: Vec<T> = self.get_json(url).await?;
            let done = batch.len() < PER_PAGE;
            items.extend(batch);

            if done {
                break;
            }
            page += 1;
        }

        Ok(items)
    }
}

#[async_trait]
impl GitHubClient for RestClient {
    async fn get_repo_labels(&self, org: &str, repo: &str) -> Result<Vec<Label>, GitHubError> {
        self.get_all_pages(&["repos", org, repo, "labels"]).await
    }

    async fn get_issue_labels(
        &self,
        org: &str,
        repo: &str,
        number: u64,
    ) -> Result<Vec<Label>, GitHubError> {
        let number = number.to_string();
        self.get_all_pages(&["repos", org, repo, "issues", &number, "labels"])
            .await
    }

    async fn add_labels(
        &self,
        org: &str,
        repo: &str,
        number: u64,
        labels: &[String],
    ) -> Result<(), GitHubError> {
        let url = self.url(&["repos", org, repo, "issues", &number.to_string(), "labels"]);
        let body = serde_json::json!({ "labels": labels });
        self.execute(self.request(Method::POST, url).json(&body))
            .await?;
        Ok(())
    }

    async fn remove_label(
        &self,
        org: &str,
        repo: &str,
        number: u64,
        label: &str,
    ) -> Result<(), GitHubError> {
        let url = self.url(&[
            "repos",
            org,
            repo,
            "issues",
            &number.to_string(),
            "labels",
            label,
        ]);

        match self.execute(self.request(Method::DELETE, url)).await {
            Ok(_) => Ok(()),
            Err(GitHubError::Status {
                status: StatusCode::NOT_FOUND,
                ..
            }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn create_comment(
        &self,
        org: &str,
        repo: &str,
        number: u64,
        body: &str,
    ) -> Result<(), GitHubError> {
        let url = self.url(&["repos", org, repo, "issues", &number.to_string(), "comments"]);
        let body = serde_json::json!({ "body": body });
        self.execute(self.request(Method::POST, url).json(&body))
            .await?;
        Ok(())
    }

    async fn get_pull_request(
        &self,
        org: &str,
        repo: &str,
        number: u64,
    ) -> Result<PullRequest, GitHubError> {
        let url = self.url(&["repos", org, repo, "pulls", &number.to_string()]);
        self.get_json(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> RestClient {
        RestClient::new(Url::parse(&server.uri()).unwrap(), "token").unwrap()
    }

    #[tokio::test]
    async fn test_get_repo_labels_paginates() {
        let server = MockServer::start().await;

        let first_page: Vec<_> = (0..PER_PAGE)
            .map(|i| json!({"name": format!("label-{i}"), "color": "ffffff"}))
            .collect();

        Mock::given(method("GET"))
            .and(path("/repos/kubernetes/test-infra/labels"))
            .and(query_param("page", "1"))
            .and(header("authorization", "Bearer token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(first_page))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/repos/kubernetes/test-infra/labels"))
            .and(query_param("page", "2"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([{"name": "kind/bug"}])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let labels = client(&server)
            .get_repo_labels("kubernetes", "test-infra")
            .await
            .unwrap();

        assert_eq!(labels.len(), PER_PAGE + 1);
        assert_eq!(labels[PER_PAGE].name, "kind/bug");
    }

    #[tokio::test]
    async fn test_get_issue_labels_paginates() {
        let server = MockServer::start().await;

        let first_page: Vec<_> = (0..PER_PAGE)
            .map(|i| json!({"name": format!("label-{i}")}))
            .collect();

        Mock::given(method("GET"))
            .and(path("/repos/kubernetes/test-infra/issues/42/labels"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(first_page))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/repos/kubernetes/test-infra/issues/42/labels"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"name": "lgtm"}])))
            .expect(1)
            .mount(&server)
            .await;

        let labels = client(&server)
            .get_issue_labels("kubernetes", "test-infra", 42)
            .await
            .unwrap();

        assert_eq!(labels.len(), PER_PAGE + 1);
        assert_eq!(labels[PER_PAGE].name, "lgtm");
    }

    #[tokio::test]
    async fn test_add_labels() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/repos/kubernetes/test-infra/issues/42/labels"))
            .and(body_json(json!({"labels": ["bug", "flake"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .add_labels(
                "kubernetes",
                "test-infra",
                42,
                &["bug".to_string(), "flake".to_string()],
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_remove_missing_label_is_ok() {
        let server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/repos/kubernetes/test-infra/issues/42/labels/bug"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let result = client(&server)
            .remove_label("kubernetes", "test-infra", 42, "bug")
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_error_status() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/repos/kubernetes/test-infra/issues/1/comments"))
            .respond_with(ResponseTemplate::new(403).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let err = client(&server)
            .create_comment("kubernetes", "test-infra", 1, "hello")
            .await
            .unwrap_err();

        match err {
            GitHubError::Status { status, body, .. } => {
                assert_eq!(status, StatusCode::FORBIDDEN);
                assert_eq!(body, "rate limited");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_error_status_with_truncated_body() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = [0; 4096];
            let _ = stream.read(&mut request).await;
            // Promises more body than it sends, then hangs up
            stream
                .write_all(b"HTTP/1.1 502 Bad Gateway\r\ncontent-length: 100\r\n\r\nshort")
                .await
                .unwrap();
        });

        let client = RestClient::new(Url::parse(&format!("http://{addr}")).unwrap(), "").unwrap();
        let err = client
            .get_pull_request("kubernetes", "test-infra", 9)
            .await
            .unwrap_err();

        match err {
            GitHubError::Status { status, body, .. } => {
                assert_eq!(status, StatusCode::BAD_GATEWAY);
                assert!(body.starts_with("<unreadable body"), "{body}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_get_pull_request() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/repos/kubernetes/test-infra/pulls/9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "number": 9,
                "title": "bump deps",
                "state": "open",
                "user": {"login": "carol"},
                "labels": [{"name": "needs-rebase"}],
                "head": {"ref": "deps", "sha": "abc"},
                "base": {"ref": "master", "sha": "def"},
                "mergeable": false
            })))
            .mount(&server)
            .await;

        let pr = client(&server)
            .get_pull_request("kubernetes", "test-infra", 9)
            .await
            .unwrap();
        assert_eq!(pr.mergeable, Some(false));
        assert_eq!(pr.labels[0].name, "needs-rebase");
    }

    #[test]
    fn test_url_encodes_label_segments() {
        let client = RestClient::new(Url::parse(DEFAULT_API_URL).unwrap(), "").unwrap();
        let url = client.url(&["repos", "o", "r", "issues", "1", "labels", "kind/bug"]);
        assert_eq!(
            url.as_str(),
            "https://api.github.com/repos/o/r/issues/1/labels/kind%2Fbug"
        );
    }

    #[test]
    fn test_token_file() {
        let dir = tempfile::tempdir().unwrap();
        let token_path = dir.path().join("oauth");
        std::fs::write(&token_path, "abc\n").unwrap();

        let client =
            RestClient::from_token_file(Url::parse(DEFAULT_API_URL).unwrap(), &token_path)
                .unwrap();
        assert_eq!(client.token, "abc");

        assert!(matches!(
            RestClient::from_token_file(
                Url::parse(DEFAULT_API_URL).unwrap(),
                &dir.path().join("missing")
            ),
            Err(GitHubError::Token(_))
        ));
    }
}

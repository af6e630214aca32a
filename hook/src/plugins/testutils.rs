use super::{Agent, Plugin, PluginError, PluginHelp};
use crate::config::PluginsConfig;
use async_trait::async_trait;
use github::events::{
    Issue, IssueComment, IssueCommentEvent, Label, PullRequest, PullRequestBranch,
    PullRequestEvent, Repo, User,
};
use github::{Event, EventKind, EventPayload, GitHubClient, GitHubError};
use parking_lot::Mutex;
use reqwest::{Method, StatusCode};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct State {
    repo_labels: Vec<Label>,
    issue_labels: HashMap<u64, Vec<Label>>,
    pull_requests: HashMap<u64, PullRequest>,
    added: Vec<String>,
    removed: Vec<String>,
    comments: Vec<(u64, String)>,
}

/// In-memory GitHub that records every write.
#[derive(Clone, Default)]
pub struct FakeGitHub {
    state: Arc<Mutex<State>>,
}

fn label(name: &str) -> Label {
    Label {
        name: name.to_string(),
        color: String::new(),
    }
}

impl FakeGitHub {
    pub fn new(repo_labels: &[&str]) -> Self {
        let github = FakeGitHub::default();
        github.state.lock().repo_labels = repo_labels.iter().map(|l| label(l)).collect();
        github
    }

    pub fn set_issue_labels(&self, number: u64, labels: &[&str]) {
        self.state
            .lock()
            .issue_labels
            .insert(number, labels.iter().map(|l| label(l)).collect());
    }

    pub fn set_pull_request(&self, pr: PullRequest) {
        self.state.lock().pull_requests.insert(pr.number, pr);
    }

    pub fn issue_labels(&self, number: u64) -> Vec<String> {
        self.state
            .lock()
            .issue_labels
            .get(&number)
            .map(|labels| labels.iter().map(|l| l.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn added(&self) -> Vec<String> {
        self.state.lock().added.clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.state.lock().removed.clone()
    }

    pub fn comments(&self) -> Vec<(u64, String)> {
        self.state.lock().comments.clone()
    }
}

#[async_trait]
impl GitHubClient for FakeGitHub {
    async fn get_repo_labels(&self, _org: &str, _repo: &str) -> Result<Vec<Label>, GitHubError> {
        Ok(self.state.lock().repo_labels.clone())
    }

    async fn get_issue_labels(
        &self,
        _org: &str,
        _repo: &str,
        number: u64,
    ) -> Result<Vec<Label>, GitHubError> {
        Ok(self
            .state
            .lock()
            .issue_labels
            .get(&number)
            .cloned()
            .unwrap_or_default())
    }

    async fn add_labels(
        &self,
        _org: &str,
        _repo: &str,
        number: u64,
        labels: &[String],
    ) -> Result<(), GitHubError> {
        let mut state = self.state.lock();
        state.added.extend(labels.iter().cloned());
        state
            .issue_labels
            .entry(number)
            .or_default()
            .extend(labels.iter().map(|l| label(l)));
        Ok(())
    }

    async fn remove_label(
        &self,
        _org: &str,
        _repo: &str,
        number: u64,
        name: &str,
    ) -> Result<(), GitHubError> {
        let mut state = self.state.lock();
        state.removed.push(name.to_string());
        if let Some(labels) = state.issue_labels.get_mut(&number) {
            labels.retain(|l| l.name != name);
        }
        Ok(())
    }

    async fn create_comment(
        &self,
        _org: &str,
        _repo: &str,
        number: u64,
        body: &str,
    ) -> Result<(), GitHubError> {
        self.state.lock().comments.push((number, body.to_string()));
        Ok(())
    }

    async fn get_pull_request(
        &self,
        org: &str,
        repo: &str,
        number: u64,
    ) -> Result<PullRequest, GitHubError> {
        self.state
            .lock()
            .pull_requests
            .get(&number)
            .cloned()
            .ok_or_else(|| GitHubError::Status {
                method: Method::GET,
                path: format!("/repos/{org}/{repo}/pulls/{number}"),
                status: StatusCode::NOT_FOUND,
                body: "Not Found".into(),
            })
    }
}

pub fn agent_with(github: FakeGitHub, config: PluginsConfig) -> Agent {
    Agent {
        github: Arc::new(github),
        config: Arc::new(config),
        delivery_id: "d-1".into(),
    }
}

pub fn repo() -> Repo {
    Repo {
        owner: User {
            login: "kubernetes".into(),
        },
        name: "test-infra".into(),
        full_name: "kubernetes/test-infra".into(),
    }
}

pub fn issue_comment_event(action: &str, body: &str, labels: &[&str]) -> Event {
    Event {
        kind: EventKind::IssueComment,
        delivery_id: "d-1".into(),
        payload: EventPayload::IssueComment(IssueCommentEvent {
            action: action.into(),
            issue: Issue {
                number: 42,
                title: "flaky test".into(),
                body: None,
                state: "open".into(),
                user: User {
                    login: "alice".into(),
                },
                labels: labels.iter().map(|l| label(l)).collect(),
                pull_request: None,
            },
            comment: IssueComment {
                id: 7,
                body: body.into(),
                user: User {
                    login: "bob".into(),
                },
            },
            repository: repo(),
        }),
    }
}

pub fn pull_request(number: u64, mergeable: Option<bool>, labels: &[&str]) -> PullRequest {
    PullRequest {
        number,
        title: "bump deps".into(),
        state: "open".into(),
        user: User {
            login: "carol".into(),
        },
        labels: labels.iter().map(|l| label(l)).collect(),
        head: PullRequestBranch {
            git_ref: "deps".into(),
            sha: "abc123".into(),
        },
        base: PullRequestBranch {
            git_ref: "master".into(),
            sha: "def456".into(),
        },
        mergeable,
        merged: false,
    }
}

pub fn pull_request_event(action: &str, number: u64) -> Event {
    Event {
        kind: EventKind::PullRequest,
        delivery_id: "d-2".into(),
        payload: EventPayload::PullRequest(PullRequestEvent {
            action: action.into(),
            number,
            pull_request: pull_request(number, None, &[]),
            repository: repo(),
            label: None,
        }),
    }
}

/// Records the delivery ids it sees, optionally after a delay, and fails
/// when asked to.
pub struct RecordingPlugin {
    pub name: &'static str,
    pub kinds: Vec<EventKind>,
    pub delay: Duration,
    pub fail: bool,
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl RecordingPlugin {
    pub fn new(name: &'static str, kinds: Vec<EventKind>) -> Self {
        RecordingPlugin {
            name,
            kinds,
            delay: Duration::ZERO,
            fail: false,
            calls: Arc::default(),
        }
    }
}

#[async_trait]
impl Plugin for RecordingPlugin {
    fn name(&self) -> &'static str {
        self.name
    }

    fn help(&self, _config: &PluginsConfig) -> PluginHelp {
        PluginHelp::default()
    }

    fn handles(&self, kind: &EventKind) -> bool {
        self.kinds.contains(kind)
    }

    async fn handle(&self, agent: &Agent, _event: &Event) -> Result<(), PluginError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.calls.lock().push(agent.delivery_id.clone());
        if self.fail {
            return Err(PluginError::GitHub(GitHubError::InvalidUrl("boom".into())));
        }
        Ok(())
    }
}

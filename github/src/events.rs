//! Webhook event types.
//!
//! Only the fields the dispatcher and plugins read are modelled; GitHub sends
//! far more and serde ignores the rest.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The value of the `X-GitHub-Event` header.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Issues,
    IssueComment,
    PullRequest,
    PullRequestReview,
    PullRequestReviewComment,
    Push,
    Status,
    Ping,
    Other(String),
}

impl EventKind {
    pub fn from_header(value: &str) -> Self {
        match value {
            "issues" => EventKind::Issues,
            "issue_comment" => EventKind::IssueComment,
            "pull_request" => EventKind::PullRequest,
            "pull_request_review" => EventKind::PullRequestReview,
            "pull_request_review_comment" => EventKind::PullRequestReviewComment,
            "push" => EventKind::Push,
            "status" => EventKind::Status,
            "ping" => EventKind::Ping,
            other => EventKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Issues => "issues",
            EventKind::IssueComment => "issue_comment",
            EventKind::PullRequest => "pull_request",
            EventKind::PullRequestReview => "pull_request_review",
            EventKind::PullRequestReviewComment => "pull_request_review_comment",
            EventKind::Push => "push",
            EventKind::Status => "status",
            EventKind::Ping => "ping",
            EventKind::Other(other) => other,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct User {
    pub login: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Label {
    pub name: String,
    #[serde(default)]
    pub color: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Repo {
    pub owner: User,
    pub name: String,
    pub full_name: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub state: String,
    pub user: User,
    #[serde(default)]
    pub labels: Vec<Label>,
    /// Present only when the issue is a pull request.
    #[serde(default)]
    pub pull_request: Option<serde_json::Value>,
}

impl Issue {
    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct IssueComment {
    pub id: u64,
    pub body: String,
    pub user: User,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct PullRequestBranch {
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub sha: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub state: String,
    pub user: User,
    #[serde(default)]
    pub labels: Vec<Label>,
    pub head: PullRequestBranch,
    pub base: PullRequestBranch,
    /// `None` while GitHub is still computing mergeability.
    #[serde(default)]
    pub mergeable: Option<bool>,
    #[serde(default)]
    pub merged: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Review {
    pub id: u64,
    pub user: User,
    #[serde(default)]
    pub body: Option<String>,
    pub state: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ReviewComment {
    pub id: u64,
    pub user: User,
    pub body: String,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct IssueEvent {
    pub action: String,
    pub issue: Issue,
    pub repository: Repo,
    #[serde(default)]
    pub label: Option<Label>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct IssueCommentEvent {
    pub action: String,
    pub issue: Issue,
    pub comment: IssueComment,
    pub repository: Repo,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct PullRequestEvent {
    pub action: String,
    pub number: u64,
    pub pull_request: PullRequest,
    pub repository: Repo,
    #[serde(default)]
    pub label: Option<Label>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ReviewEvent {
    pub action: String,
    pub review: Review,
    pub pull_request: PullRequest,
    pub repository: Repo,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ReviewCommentEvent {
    pub action: String,
    pub comment: ReviewComment,
    pub pull_request: PullRequest,
    pub repository: Repo,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct PushEvent {
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub before: String,
    pub after: String,
    #[serde(default)]
    pub deleted: bool,
    pub repository: Repo,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct StatusEvent {
    pub sha: String,
    pub state: String,
    pub context: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub target_url: Option<String>,
    pub repository: Repo,
}

/// A parsed webhook payload.
#[derive(Clone, Debug, PartialEq)]
pub enum EventPayload {
    Issue(IssueEvent),
    IssueComment(IssueCommentEvent),
    PullRequest(PullRequestEvent),
    Review(ReviewEvent),
    ReviewComment(ReviewCommentEvent),
    Push(PushEvent),
    Status(StatusEvent),
    Ping,
    /// An event kind without a typed model. Only external plugins see these.
    Other,
}

impl EventPayload {
    pub fn parse(kind: &EventKind, payload: &[u8]) -> Result<Self, serde_json::Error> {
        let parsed = match kind {
            EventKind::Issues => EventPayload::Issue(serde_json::from_slice(payload)?),
            EventKind::IssueComment => EventPayload::IssueComment(serde_json::from_slice(payload)?),
            EventKind::PullRequest => EventPayload::PullRequest(serde_json::from_slice(payload)?),
            EventKind::PullRequestReview => EventPayload::Review(serde_json::from_slice(payload)?),
            EventKind::PullRequestReviewComment => {
                EventPayload::ReviewComment(serde_json::from_slice(payload)?)
            }
            EventKind::Push => EventPayload::Push(serde_json::from_slice(payload)?),
            EventKind::Status => EventPayload::Status(serde_json::from_slice(payload)?),
            EventKind::Ping => EventPayload::Ping,
            EventKind::Other(_) => EventPayload::Other,
        };
        Ok(parsed)
    }

    pub fn repo(&self) -> Option<&Repo> {
        match self {
            EventPayload::Issue(e) => Some(&e.repository),
            EventPayload::IssueComment(e) => Some(&e.repository),
            EventPayload::PullRequest(e) => Some(&e.repository),
            EventPayload::Review(e) => Some(&e.repository),
            EventPayload::ReviewComment(e) => Some(&e.repository),
            EventPayload::Push(e) => Some(&e.repository),
            EventPayload::Status(e) => Some(&e.repository),
            EventPayload::Ping | EventPayload::Other => None,
        }
    }
}

/// An event as handed to in-process plugins.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub delivery_id: String,
    pub payload: EventPayload,
}

#[derive(Deserialize)]
struct ScopeProbe {
    repository: Option<RepoProbe>,
    organization: Option<OrgProbe>,
}

#[derive(Deserialize)]
struct RepoProbe {
    full_name: String,
}

#[derive(Deserialize)]
struct OrgProbe {
    login: String,
}

/// Returns `org/repo` for repository events, `org` for organization-level
/// events, and `None` when the payload names neither.
pub fn payload_scope(payload: &[u8]) -> Option<String> {
    let probe: ScopeProbe = serde_json::from_slice(payload).ok()?;
    probe
        .repository
        .map(|r| r.full_name)
        .or(probe.organization.map(|o| o.login))
}

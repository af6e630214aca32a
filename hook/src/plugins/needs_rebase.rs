use super::{Agent, Plugin, PluginError, PluginHelp};
use crate::config::PluginsConfig;
use async_trait::async_trait;
use github::{Event, EventKind, EventPayload};

const ACTIONS: &[&str] = &["opened", "reopened", "synchronize"];

/// Keeps the needs-rebase label in sync with the pull request's mergeability.
pub struct NeedsRebasePlugin;

#[async_trait]
impl Plugin for NeedsRebasePlugin {
    fn name(&self) -> &'static str {
        "needs-rebase"
    }

    fn help(&self, config: &PluginsConfig) -> PluginHelp {
        PluginHelp {
            description: format!(
                "Applies the {} label to pull requests that no longer merge cleanly and removes it once they do.",
                config.needs_rebase.label
            ),
            config: None,
            events: vec![EventKind::PullRequest.to_string()],
            commands: Vec::new(),
        }
    }

    fn handles(&self, kind: &EventKind) -> bool {
        *kind == EventKind::PullRequest
    }

    async fn handle(&self, agent: &Agent, event: &Event) -> Result<(), PluginError> {
        let EventPayload::PullRequest(pr_event) = &event.payload else {
            return Ok(());
        };
        if !ACTIONS.contains(&pr_event.action.as_str()) {
            return Ok(());
        }

        let org = &pr_event.repository.owner.login;
        let repo = &pr_event.repository.name;
        let number = pr_event.number;

        // The payload is usually stale on mergeability, ask again.
        let pr = agent.github.get_pull_request(org, repo, number).await?;
        let Some(mergeable) = pr.mergeable else {
            tracing::info!(org, repo, number, "mergeability not yet known, skipping");
            return Ok(());
        };

        let label = &agent.config.needs_rebase.label;
        let has_label = pr
            .labels
            .iter()
            .any(|l| l.name.eq_ignore_ascii_case(label));

        match (mergeable, has_label) {
            (false, false) => {
                tracing::info!(org, repo, number, "pull request needs a rebase");
                agent
                    .github
                    .add_labels(org, repo, number, std::slice::from_ref(label))
                    .await?;
                let body = format!(
                    "@{}: PR needs rebase.\n\nThis pull request has merge conflicts with its base branch `{}`.",
                    pr.user.login, pr.base.git_ref
                );
                agent.github.create_comment(org, repo, number, &body).await?;
            }
            (true, true) => {
                tracing::info!(org, repo, number, "pull request merges cleanly again");
                agent.github.remove_label(org, repo, number, label).await?;
            }
            _ => {}
        }

        Ok(())
    }
}

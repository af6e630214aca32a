use super::{Agent, CommandHelp, Plugin, PluginError, PluginHelp};
use crate::config::PluginsConfig;
use async_trait::async_trait;
use github::events::Label;
use github::{Event, EventKind, EventPayload};
use regex::Regex;
use std::sync::LazyLock;

const PREFIXES: &[&str] = &[
    "area",
    "committee",
    "kind",
    "language",
    "priority",
    "sig",
    "triage",
    "wg",
];

static COMMAND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^/(remove-)?(area|committee|kind|language|priority|sig|triage|wg|label)[ \t]*(.*?)[ \t]*$",
    )
    .expect("label command regex is valid")
});

/// Labels requested by the commands in one comment.
#[derive(Debug, Default, PartialEq)]
pub struct LabelCommands {
    pub add: Vec<String>,
    pub remove: Vec<String>,
    /// Names requested through `/label`, which may also come from
    /// `additional_labels`
    pub custom: Vec<String>,
}

impl LabelCommands {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

pub fn parse_commands(body: &str) -> LabelCommands {
    let body = body.replace("\r\n", "\n");
    let mut commands = LabelCommands::default();

    for captures in COMMAND_RE.captures_iter(&body) {
        let remove = captures.get(1).is_some();
        let prefix = &captures[2];

        for value in captures[3].split_whitespace() {
            let label = match prefix {
                "label" => {
                    commands.custom.push(value.to_string());
                    value.to_string()
                }
                _ => format!("{prefix}/{value}"),
            };

            let target = if remove {
                &mut commands.remove
            } else {
                &mut commands.add
            };
            if !target.iter().any(|l| l.eq_ignore_ascii_case(&label)) {
                target.push(label);
            }
        }
    }

    commands
}

fn find<'a>(labels: &'a [Label], name: &str) -> Option<&'a Label> {
    labels.iter().find(|l| l.name.eq_ignore_ascii_case(name))
}

/// Adds and removes labels through `/kind bug`, `/remove-kind bug`,
/// `/label foo`, `/remove-label foo` and friends.
pub struct LabelPlugin;

#[async_trait]
impl Plugin for LabelPlugin {
    fn name(&self) -> &'static str {
        "label"
    }

    fn help(&self, config: &PluginsConfig) -> PluginHelp {
        let prefixes = PREFIXES.join("|");
        let config_help = (!config.label.additional_labels.is_empty()).then(|| {
            format!(
                "The following labels may be applied with /label even if the repository does not define them: {}",
                config.label.additional_labels.join(", ")
            )
        });

        PluginHelp {
            description: "Adds or removes labels on issues and pull requests through comment commands. Only labels that exist in the repository can be applied.".into(),
            config: config_help,
            events: vec![EventKind::IssueComment.to_string()],
            commands: vec![
                CommandHelp {
                    usage: format!("/[remove-]({prefixes}) <value> [<value>...]"),
                    description: "Applies or removes a prefixed label, e.g. kind/bug.".into(),
                    examples: vec!["/kind bug".into(), "/remove-area testing".into()],
                },
                CommandHelp {
                    usage: "/[remove-]label <name> [<name>...]".into(),
                    description: "Applies or removes an arbitrary label.".into(),
                    examples: vec!["/label api-review".into()],
                },
            ],
        }
    }

    fn handles(&self, kind: &EventKind) -> bool {
        *kind == EventKind::IssueComment
    }

    async fn handle(&self, agent: &Agent, event: &Event) -> Result<(), PluginError> {
        let EventPayload::IssueComment(comment_event) = &event.payload else {
            return Ok(());
        };
        if comment_event.action != "created" {
            return Ok(());
        }

        let commands = parse_commands(&comment_event.comment.body);
        if commands.is_empty() {
            return Ok(());
        }

        let org = &comment_event.repository.owner.login;
        let repo = &comment_event.repository.name;
        let number = comment_event.issue.number;

        let current = agent.github.get_issue_labels(org, repo, number).await?;
        let available = if commands.add.is_empty() {
            Vec::new()
        } else {
            agent.github.get_repo_labels(org, repo).await?
        };
        let additional = &agent.config.label.additional_labels;

        let mut to_add = Vec::new();
        let mut missing = Vec::new();
        for requested in &commands.add {
            if find(&current, requested).is_some() {
                continue;
            }

            let is_custom = commands
                .custom
                .iter()
                .any(|c| c.eq_ignore_ascii_case(requested));
            let canonical = find(&available, requested)
                .map(|l| l.name.clone())
                .or_else(|| {
                    additional
                        .iter()
                        .find(|a| is_custom && a.eq_ignore_ascii_case(requested))
                        .cloned()
                });

            match canonical {
                Some(name) => to_add.push(name),
                None => missing.push(requested.clone()),
            }
        }

        if !to_add.is_empty() {
            tracing::info!(org, repo, number, labels = ?to_add, "adding labels");
            agent.github.add_labels(org, repo, number, &to_add).await?;
        }

        for requested in &commands.remove {
            if let Some(label) = find(&current, requested) {
                tracing::info!(org, repo, number, label = %label.name, "removing label");
                agent
                    .github
                    .remove_label(org, repo, number, &label.name)
                    .await?;
            }
        }

        if !missing.is_empty() {
            let body = format!(
                "@{}: The label(s) `{}` cannot be applied, because the repository doesn't have them.",
                comment_event.comment.user.login,
                missing.join(", ")
            );
            agent.github.create_comment(org, repo, number, &body).await?;
        }

        Ok(())
    }
}

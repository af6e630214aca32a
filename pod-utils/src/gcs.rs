//! Where a job's logs and artifacts land in the bucket.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const LATEST_BUILD_FILE: &str = "latest-build.txt";

const LOGS_PREFIX: &str = "logs";
const PR_LOGS_PREFIX: &str = "pr-logs/pull";
const BATCH_SEGMENT: &str = "batch";
const DIRECTORY_PREFIX: &str = "pr-logs/directory";

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum GcsError {
    #[error("bucket must be set")]
    MissingBucket,
    #[error("path strategy {0:?} requires default_org and default_repo")]
    MissingDefaults(PathStrategy),
    #[error("{0} job has no refs")]
    MissingRefs(JobType),
    #[error("presubmit job has no pull request in its refs")]
    MissingPull,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Presubmit,
    Postsubmit,
    Periodic,
    Batch,
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobType::Presubmit => "presubmit",
            JobType::Postsubmit => "postsubmit",
            JobType::Periodic => "periodic",
            JobType::Batch => "batch",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Pull {
    pub number: u64,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub sha: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Refs {
    pub org: String,
    pub repo: String,
    #[serde(default)]
    pub base_ref: String,
    #[serde(default)]
    pub base_sha: String,
    #[serde(default)]
    pub pulls: Vec<Pull>,
}

/// The job description injected into every job pod as `JOB_SPEC`.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct JobSpec {
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub job: String,
    #[serde(rename = "buildid")]
    pub build_id: String,
    #[serde(default)]
    pub prowjobid: Option<String>,
    #[serde(default)]
    pub refs: Option<Refs>,
}

/// How the repository shows up in presubmit paths.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PathStrategy {
    /// Always `org_repo`
    #[default]
    Explicit,
    /// Nothing for the default repo, `repo` for the default org
    Legacy,
    /// Nothing for the default repo
    Single,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct GcsConfiguration {
    pub bucket: String,
    #[serde(default)]
    pub path_prefix: String,
    #[serde(default)]
    pub path_strategy: PathStrategy,
    #[serde(default)]
    pub default_org: Option<String>,
    #[serde(default)]
    pub default_repo: Option<String>,
}

/// Joins path segments with `/`, skipping empty ones and stray slashes.
fn join<'a>(segments: impl IntoIterator<Item = &'a str>) -> String {
    segments
        .into_iter()
        .map(|s| s.trim_matches('/'))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

impl GcsConfiguration {
    pub fn validate(&self) -> Result<(), GcsError> {
        if self.bucket.trim().is_empty() {
            return Err(GcsError::MissingBucket);
        }
        if self.path_strategy != PathStrategy::Explicit
            && (self.default_org.is_none() || self.default_repo.is_none())
        {
            return Err(GcsError::MissingDefaults(self.path_strategy));
        }
        Ok(())
    }

    fn is_default_org(&self, org: &str) -> bool {
        self.default_org.as_deref() == Some(org)
    }

    fn is_default_repo(&self, org: &str, repo: &str) -> bool {
        self.is_default_org(org) && self.default_repo.as_deref() == Some(repo)
    }

    /// The repository segment of presubmit paths. Empty means none.
    pub fn repo_path(&self, org: &str, repo: &str) -> String {
        let explicit = format!("{org}_{repo}");
        match self.path_strategy {
            PathStrategy::Explicit => explicit,
            PathStrategy::Legacy if self.is_default_repo(org, repo) => String::new(),
            PathStrategy::Legacy if self.is_default_org(org) => repo.to_string(),
            PathStrategy::Legacy => explicit,
            PathStrategy::Single if self.is_default_repo(org, repo) => String::new(),
            PathStrategy::Single => explicit,
        }
    }

    /// The prefix under which everything for one build is stored.
    pub fn job_path(&self, spec: &JobSpec) -> Result<String, GcsError> {
        let path = match spec.job_type {
            JobType::Postsubmit | JobType::Periodic => {
                join([LOGS_PREFIX, spec.job.as_str(), spec.build_id.as_str()])
            }
            JobType::Batch => join([
                PR_LOGS_PREFIX,
                BATCH_SEGMENT,
                spec.job.as_str(),
                spec.build_id.as_str(),
            ]),
            JobType::Presubmit => {
                let (repo_path, number) = self.pull_location(spec)?;
                join([
                    PR_LOGS_PREFIX,
                    repo_path.as_str(),
                    number.as_str(),
                    spec.job.as_str(),
                    spec.build_id.as_str(),
                ])
            }
        };

        Ok(join([self.path_prefix.as_str(), path.as_str()]))
    }

    fn pull_location(&self, spec: &JobSpec) -> Result<(String, String), GcsError> {
        let refs = spec
            .refs
            .as_ref()
            .ok_or(GcsError::MissingRefs(spec.job_type))?;
        let pull = refs.pulls.first().ok_or(GcsError::MissingPull)?;
        Ok((self.repo_path(&refs.org, &refs.repo), pull.number.to_string()))
    }

    /// Files that record the newest build id of the job.
    pub fn latest_build_markers(&self, spec: &JobSpec) -> Result<Vec<String>, GcsError> {
        let markers = match spec.job_type {
            JobType::Postsubmit | JobType::Periodic => {
                vec![join([LOGS_PREFIX, spec.job.as_str(), LATEST_BUILD_FILE])]
            }
            JobType::Batch => {
                vec![join([DIRECTORY_PREFIX, spec.job.as_str(), LATEST_BUILD_FILE])]
            }
            JobType::Presubmit => {
                let (repo_path, number) = self.pull_location(spec)?;
                vec![
                    join([DIRECTORY_PREFIX, spec.job.as_str(), LATEST_BUILD_FILE]),
                    join([
                        PR_LOGS_PREFIX,
                        repo_path.as_str(),
                        number.as_str(),
                        spec.job.as_str(),
                        LATEST_BUILD_FILE,
                    ]),
                ]
            }
        };

        Ok(markers
            .into_iter()
            .map(|marker| join([self.path_prefix.as_str(), marker.as_str()]))
            .collect())
    }

    /// Presubmit builds get a `pr-logs/directory/<job>/<build>.txt` file
    /// holding the full location of the build, so the directory lists every
    /// build of the job regardless of the PR it ran for.
    pub fn link_file(&self, spec: &JobSpec) -> Result<Option<(String, String)>, GcsError> {
        if spec.job_type != JobType::Presubmit {
            return Ok(None);
        }

        let name = format!("{}.txt", spec.build_id);
        let link = join([
            self.path_prefix.as_str(),
            DIRECTORY_PREFIX,
            spec.job.as_str(),
            name.as_str(),
        ]);
        let target = format!("gs://{}/{}", self.bucket, self.job_path(spec)?);
        Ok(Some((link, target)))
    }
}

/// What to write at a destination.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum UploadSource {
    File(PathBuf),
    Contents(String),
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Upload {
    pub destination: String,
    pub source: UploadSource,
}

/// Every object a build uploads, relative to `bucket`.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct UploadPlan {
    pub bucket: String,
    pub uploads: Vec<Upload>,
}

impl UploadPlan {
    /// Files are placed directly under the job path (plus `sub_dir`);
    /// directories keep their own name and layout beneath it. Missing items
    /// are logged and skipped.
    pub fn build(
        config: &GcsConfiguration,
        spec: &JobSpec,
        items: &[PathBuf],
        sub_dir: &str,
    ) -> Result<Self, GcsError> {
        config.validate()?;
        let base = join([config.job_path(spec)?.as_str(), sub_dir]);
        let mut uploads = Vec::new();

        for item in items {
            let Some(name) = item.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                tracing::warn!(item = %item.display(), "item has no file name, skipping");
                continue;
            };

            if item.is_dir() {
                let destination = join([base.as_str(), name.as_str()]);
                uploads.extend(directory_uploads(item, &destination));
            } else if item.is_file() {
                uploads.push(Upload {
                    destination: join([base.as_str(), name.as_str()]),
                    source: UploadSource::File(item.clone()),
                });
            } else {
                tracing::warn!(item = %item.display(), "item does not exist, skipping");
            }
        }

        for marker in config.latest_build_markers(spec)? {
            uploads.push(Upload {
                destination: marker,
                source: UploadSource::Contents(spec.build_id.clone()),
            });
        }
        if let Some((link, target)) = config.link_file(spec)? {
            uploads.push(Upload {
                destination: link,
                source: UploadSource::Contents(target),
            });
        }

        Ok(UploadPlan {
            bucket: config.bucket.clone(),
            uploads,
        })
    }
}

fn directory_uploads(root: &Path, destination: &str) -> Vec<Upload> {
    let mut uploads = Vec::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(root = %root.display(), error = %e, "could not walk artifacts");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        uploads.push(Upload {
            destination: join([destination, relative.as_str()]),
            source: UploadSource::File(entry.path().to_path_buf()),
        });
    }

    uploads
}

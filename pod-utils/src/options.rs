//! Options injected into job pods as JSON environment variables.

use crate::censor::DEFAULT_BUFFER_SIZE;
use crate::gcs::{GcsConfiguration, JobSpec};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::path::PathBuf;

pub const GCSUPLOAD_OPTIONS_ENV: &str = "GCSUPLOAD_OPTIONS";
pub const SIDECAR_OPTIONS_ENV: &str = "SIDECAR_OPTIONS";
pub const JOB_SPEC_ENV: &str = "JOB_SPEC";

#[derive(thiserror::Error, Debug)]
pub enum OptionsError {
    #[error("${0} is not set")]
    Missing(&'static str),
    #[error("could not parse ${var}: {source}")]
    Parse {
        var: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

fn from_env<T: DeserializeOwned>(var: &'static str) -> Result<T, OptionsError> {
    let value = std::env::var(var).map_err(|_| OptionsError::Missing(var))?;
    from_json(var, &value)
}

fn from_json<T: DeserializeOwned>(var: &'static str, value: &str) -> Result<T, OptionsError> {
    serde_json::from_str(value).map_err(|source| OptionsError::Parse { var, source })
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct GcsUploadOptions {
    /// Files and directories to upload
    #[serde(default)]
    pub items: Vec<PathBuf>,
    /// Placed between the job path and the items
    #[serde(default)]
    pub sub_dir: String,
    #[serde(flatten)]
    pub gcs_configuration: GcsConfiguration,
}

impl GcsUploadOptions {
    pub fn from_env() -> Result<Self, OptionsError> {
        from_env(GCSUPLOAD_OPTIONS_ENV)
    }

    pub fn from_json(value: &str) -> Result<Self, OptionsError> {
        from_json(GCSUPLOAD_OPTIONS_ENV, value)
    }
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct CensoringOptions {
    /// Directories holding mounted secrets, one secret per file
    #[serde(default)]
    pub secret_directories: Vec<PathBuf>,
    #[serde(default = "default_buffer_size")]
    pub censoring_buffer_size: usize,
}

/// The files one wrapped test process leaves behind.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct WrapperOptions {
    pub process_log: PathBuf,
    pub marker_file: PathBuf,
    #[serde(default)]
    pub metadata_file: Option<PathBuf>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct SidecarOptions {
    pub gcs_options: GcsUploadOptions,
    #[serde(default)]
    pub entries: Vec<WrapperOptions>,
    #[serde(default)]
    pub censoring_options: Option<CensoringOptions>,
}

impl SidecarOptions {
    pub fn from_env() -> Result<Self, OptionsError> {
        from_env(SIDECAR_OPTIONS_ENV)
    }

    pub fn from_json(value: &str) -> Result<Self, OptionsError> {
        from_json(SIDECAR_OPTIONS_ENV, value)
    }

    /// Every path the sidecar uploads, and so has to censor first.
    pub fn outputs(&self) -> Vec<PathBuf> {
        let mut outputs = Vec::new();
        for entry in &self.entries {
            outputs.push(entry.process_log.clone());
            outputs.extend(entry.metadata_file.iter().cloned());
        }
        outputs.extend(self.gcs_options.items.iter().cloned());
        outputs
    }
}

impl JobSpec {
    pub fn from_env() -> Result<Self, OptionsError> {
        from_env(JOB_SPEC_ENV)
    }

    pub fn from_json(value: &str) -> Result<Self, OptionsError> {
        from_json(JOB_SPEC_ENV, value)
    }
}

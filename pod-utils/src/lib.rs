//! Utilities that run inside job pods: censoring secrets out of logs and
//! artifacts, and working out where they are uploaded.

pub mod censor;
pub mod gcs;
pub mod metrics_defs;
pub mod options;

use censor::{CensorError, Censorer};
use gcs::{GcsError, JobSpec, UploadPlan};
use options::{GcsUploadOptions, SidecarOptions};

/// Censors every output the sidecar would upload. Returns the number of
/// secret occurrences masked.
pub fn censor_outputs(options: &SidecarOptions) -> Result<usize, CensorError> {
    let Some(censoring) = &options.censoring_options else {
        tracing::info!("no censoring options, nothing to do");
        return Ok(0);
    };

    let censorer = Censorer::from_directories(&censoring.secret_directories)?;
    if censorer.is_empty() {
        tracing::info!("no secrets found, nothing to censor");
        return Ok(0);
    }

    let mut count = 0;
    for output in options.outputs() {
        if !output.exists() {
            tracing::warn!(path = %output.display(), "output does not exist, skipping");
            continue;
        }
        count += censorer.censor_path(&output, censoring.censoring_buffer_size)?;
    }
    Ok(count)
}

pub fn plan_upload(options: &GcsUploadOptions, spec: &JobSpec) -> Result<UploadPlan, GcsError> {
    UploadPlan::build(
        &options.gcs_configuration,
        spec,
        &options.items,
        &options.sub_dir,
    )
}

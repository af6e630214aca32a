use thiserror::Error;

/// Errors that stop the hook server from starting or running
#[derive(Error, Debug)]
pub enum HookError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Invalid config: {0}")]
    Validation(#[from] crate::config::ValidationError),

    #[error("GitHub client error: {0}")]
    GitHub(#[from] github::GitHubError),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}

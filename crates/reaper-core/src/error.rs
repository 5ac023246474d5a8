use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReaperError {
    #[error("config file not found: {0}")]
    ConfigNotFound(String),

    #[error("invalid label key '{0}': expected [prefix/]name with alphanumerics, '-', '_' or '.'")]
    InvalidLabelKey(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, ReaperError>;

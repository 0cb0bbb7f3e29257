use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("Invalid accumulator key: {0}")]
    InvalidKey(String),

    #[error("Repository error: {0}")]
    RepositoryError(#[from] anyhow::Error),
}

pub type DomainResult<T> = Result<T, DomainError>;

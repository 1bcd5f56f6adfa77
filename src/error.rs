use deadpool::managed::PoolError;
use thiserror::Error;

pub type Result<T, E = RepositoryError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum RepositoryError {
    /// A structural precondition of the model type or the dialect is not met.
    #[error("Operation not supported: {0}")]
    Unsupported(String),

    #[error("Query compilation failed: {0}")]
    Compile(String),

    /// Raised by the executor or the connection provider; passed through unchanged.
    #[error("Provider error: {0}")]
    Provider(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Query returned no rows")]
    NotFound,

    #[error("Query returned more than one row")]
    MultipleRows,

    #[error("Failed to decode column `{column}`: {message}")]
    Decode { column: String, message: String },

    #[error("Connection timed out")]
    Timeout,

    #[error("Pool error: {0}")]
    Pool(String),

    #[error("Shutdown in progress")]
    ShuttingDown,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl RepositoryError {
    pub fn provider(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Provider(Box::new(err))
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported(message.into())
    }

    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported(_))
    }
}

impl From<tokio::time::error::Elapsed> for RepositoryError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout
    }
}

impl<T: std::fmt::Display> From<PoolError<T>> for RepositoryError {
    fn from(value: PoolError<T>) -> Self {
        match value {
            PoolError::Timeout(_) => Self::Timeout,
            PoolError::Closed => Self::ShuttingDown,
            other => Self::Pool(other.to_string()),
        }
    }
}

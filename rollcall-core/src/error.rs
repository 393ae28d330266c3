use thiserror::Error;

/// Failures talking to the durable event log.
#[derive(Error, Debug)]
pub enum LogError {
    /// The log could not be reached (refused, dropped, timed out).
    #[error("event log unavailable: {0}")]
    Unavailable(String),

    /// The log answered, but with something we could not use.
    #[error("event log protocol error: {0}")]
    Protocol(String),
}

impl LogError {
    pub fn is_transient(&self) -> bool {
        matches!(self, LogError::Unavailable(_))
    }
}

impl From<redis::RedisError> for LogError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
            || err.is_timeout()
        {
            LogError::Unavailable(err.to_string())
        } else {
            LogError::Protocol(err.to_string())
        }
    }
}

/// Failures talking to the relational system of record.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("relational store unavailable: {0}")]
    Unavailable(String),

    #[error("relational store query failed: {0}")]
    Query(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => {
                StoreError::Unavailable(err.to_string())
            }
            other => StoreError::Query(other.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Log(#[from] LogError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PipelineError {
    /// Whether retrying after a reconnect could make the failure go away.
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::Log(err) => err.is_transient(),
            PipelineError::Store(err) => err.is_transient(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

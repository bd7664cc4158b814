use crate::stream::StreamName;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("configuration: {0}")]
    Configuration(String),

    #[error("stream `{0}` must contain at least one event")]
    EmptyStream(StreamName),

    #[error("concurrency conflict while appending to `{table}`")]
    Concurrency {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("transaction already started")]
    TransactionAlreadyStarted,

    #[error("no transaction started")]
    NoTransaction,

    #[error("metadata key `{0}` collides with a reserved column")]
    ReservedColumn(String),

    #[error("stream name must not be empty")]
    InvalidStreamName,

    #[error("invalid created_at `{0}`")]
    InvalidCreatedAt(String),

    #[error("sqlx `{0}`")]
    Sqlx(#[from] sqlx::Error),

    #[error("streamtable_query `{0}`")]
    Query(streamtable_query::QueryError),

    #[error("sea_query `{0}`")]
    SeaQuery(#[from] sea_query::error::Error),

    #[error("serde_json `{0}`")]
    SerdeJson(#[from] serde_json::Error),

    #[error("uuid `{0}`")]
    Uuid(#[from] uuid::Error),

    #[error("std::num `{0}`")]
    TryFromInt(#[from] std::num::TryFromIntError),

    #[error("factory `{0}`")]
    Factory(#[from] anyhow::Error),
}

impl From<streamtable_query::QueryError> for StoreError {
    fn from(value: streamtable_query::QueryError) -> Self {
        match value {
            streamtable_query::QueryError::Sqlx(err) => Self::Sqlx(err),
            err => Self::Query(err),
        }
    }
}

impl StoreError {
    pub fn is_concurrency(&self) -> bool {
        matches!(self, Self::Concurrency { .. })
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

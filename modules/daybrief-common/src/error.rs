use thiserror::Error;

#[derive(Error, Debug)]
pub enum DaybriefError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Ingest error: {0}")]
    Ingest(String),

    #[error("Summarize error: {0}")]
    Summarize(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Pipeline run conflict: another run is in progress")]
    RunInFlight,

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

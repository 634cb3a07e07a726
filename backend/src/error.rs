use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum AuthError {
    #[error("invalid api key")]
    InvalidApiKey,

    #[error("invalid signature")]
    InvalidSignature,
}

#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("Malformed payload: {0}")]
    Malformed(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("History I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("History record is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("History table error: {0}")]
    Sql(#[from] sqlx::Error),
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Notification failed: {0}")]
    Notification(#[source] reqwest::Error),

    #[error("Persistence failed: {0}")]
    Persistence(#[from] StoreError),

    #[error("Forwarding failed: {0}")]
    Forwarding(#[source] reqwest::Error),

    #[error("Forwarding queue is full or closed")]
    QueueFull,

    #[error("Unexpected status {status} from {service}")]
    UnexpectedStatus { service: &'static str, status: u16 },
}

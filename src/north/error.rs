#[derive(Debug, thiserror::Error)]
pub enum NorthError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("failed to serialize value records: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(u16),
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("service is shutting down")]
    Shutdown,
}

#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("{0}")]
    Rejected(String),
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Insufficient funds: balance {balance} is below cost {cost}")]
    InsufficientFunds { balance: u64, cost: u64 },
    #[error("Credential error: {0}")]
    Credential(String),
}

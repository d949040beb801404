use thiserror::Error;

/// Every failure a swarm client can report.
///
/// Inbound-pipeline problems (bad bytes, bad signatures, unknown senders) never
/// show up here: they are logged and dropped where they happen.
#[derive(Debug, Error)]
pub enum SwarmError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("Request timeout")]
    Timeout,

    #[error("database does not exist")]
    NoDatabase,

    #[error("database already exists")]
    AlreadyExists,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("status document error: {0}")]
    StatusDocument(#[from] serde_json::Error),

    #[error("crypto error: {0}")]
    Crypto(#[from] secp256k1::Error),

    #[error("hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error(transparent)]
    Settings(#[from] config::ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

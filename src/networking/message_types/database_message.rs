use serde::{Deserialize, Serialize};

pub const TIMEOUT_ERROR_MESSAGE: &str = "Request timeout";
pub const DATABASE_NOT_FOUND: &str = "DATABASE_NOT_FOUND";
pub const DATABASE_EXISTS: &str = "DATABASE_EXISTS";

/// Routing header carried by every database request and echoed back in its responses.
/// - `db_uuid` - the database the operation targets
/// - `nonce` - dispatcher assigned id correlating a request with its responses
/// - `point_of_contact` - the node the request was first addressed to (may be empty)
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
pub struct DatabaseHeader {
    pub db_uuid: String,
    pub nonce: u64,
    pub point_of_contact: String,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub enum DatabaseOperation {
    Create {
        key: String,
        #[serde(with = "serde_bytes")]
        value: Vec<u8>,
        expire: u64,
    },
    Read {
        key: String,
    },
    QuickRead {
        key: String,
    },
    Update {
        key: String,
        #[serde(with = "serde_bytes")]
        value: Vec<u8>,
        expire: u64,
    },
    Delete {
        key: String,
    },
    Has {
        key: String,
    },
    Keys,
    Size,
    Expire {
        key: String,
        expire: u64,
    },
    Persist {
        key: String,
    },
    Ttl {
        key: String,
    },
    CreateDb {
        max_size: u64,
        random_evict: bool,
    },
    DeleteDb,
    HasDb,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct DatabaseRequest {
    pub header: DatabaseHeader,
    pub operation: DatabaseOperation,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub enum DatabaseResult {
    Ack,
    Read {
        key: String,
        #[serde(with = "serde_bytes")]
        value: Vec<u8>,
    },
    /// Answered by a single node without signing; exempt from the signature check.
    QuickRead {
        key: String,
        #[serde(with = "serde_bytes")]
        value: Vec<u8>,
        error: String,
    },
    Has {
        key: String,
        has: bool,
    },
    Keys {
        keys: Vec<String>,
    },
    Size {
        bytes: u64,
        keys: u64,
        remaining_bytes: u64,
        max_size: u64,
    },
    Ttl {
        key: String,
        ttl: u64,
    },
    HasDb {
        uuid: String,
        has: bool,
    },
    Error {
        message: String,
    },
}

impl DatabaseResult {
    pub fn discriminant(&self) -> u8 {
        match self {
            DatabaseResult::Ack => 0,
            DatabaseResult::Read { .. } => 1,
            DatabaseResult::QuickRead { .. } => 2,
            DatabaseResult::Has { .. } => 3,
            DatabaseResult::Keys { .. } => 4,
            DatabaseResult::Size { .. } => 5,
            DatabaseResult::Ttl { .. } => 6,
            DatabaseResult::HasDb { .. } => 7,
            DatabaseResult::Error { .. } => 8,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct DatabaseResponse {
    pub header: DatabaseHeader,
    pub result: DatabaseResult,
}

impl DatabaseResponse {
    pub fn new(header: DatabaseHeader, result: DatabaseResult) -> Self {
        DatabaseResponse { header, result }
    }

    pub fn timeout(header: DatabaseHeader) -> Self {
        DatabaseResponse::error(header, TIMEOUT_ERROR_MESSAGE)
    }

    pub fn error(header: DatabaseHeader, message: &str) -> Self {
        DatabaseResponse {
            header,
            result: DatabaseResult::Error {
                message: message.to_string(),
            },
        }
    }

    pub fn nonce(&self) -> u64 {
        self.header.nonce
    }

    pub fn is_quick_read(&self) -> bool {
        matches!(self.result, DatabaseResult::QuickRead { .. })
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.result {
            DatabaseResult::Error { message } => Some(message),
            _ => None,
        }
    }

    /// Two responses agree when they carry the same kind of result and encode to
    /// the same bytes. Envelope metadata such as the signature is not part of a
    /// `DatabaseResponse` and so never takes part in the comparison.
    pub fn matches(&self, other: &DatabaseResponse) -> bool {
        if self.result.discriminant() != other.result.discriminant() {
            return false;
        }
        match (bincode::serialize(self), bincode::serialize(other)) {
            (Ok(ours), Ok(theirs)) => ours == theirs,
            _ => false,
        }
    }
}

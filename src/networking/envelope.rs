use serde::{Deserialize, Serialize};

use crate::networking::message_types::database_message::{DatabaseRequest, DatabaseResponse};
use crate::networking::message_types::status_message::{StatusRequest, StatusResponse};

/// Discriminant of the payload carried by an [`Envelope`]. The numeric value is
/// part of the signing input, so it must never be renumbered.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    DatabaseRequest = 1,
    DatabaseResponse = 2,
    StatusRequest = 3,
    StatusResponse = 4,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub enum Payload {
    DatabaseRequest(DatabaseRequest),
    DatabaseResponse(DatabaseResponse),
    StatusRequest(StatusRequest),
    StatusResponse(StatusResponse),
}

impl Payload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::DatabaseRequest(_) => PayloadKind::DatabaseRequest,
            Payload::DatabaseResponse(_) => PayloadKind::DatabaseResponse,
            Payload::StatusRequest(_) => PayloadKind::StatusRequest,
            Payload::StatusResponse(_) => PayloadKind::StatusResponse,
        }
    }

    /// The encoded bytes of the selected payload, without the union tag.
    pub fn content_bytes(&self) -> crate::Result<Vec<u8>> {
        let bytes = match self {
            Payload::DatabaseRequest(request) => bincode::serialize(request)?,
            Payload::DatabaseResponse(response) => bincode::serialize(response)?,
            Payload::StatusRequest(request) => bincode::serialize(request)?,
            Payload::StatusResponse(response) => bincode::serialize(response)?,
        };
        Ok(bytes)
    }
}

/// The signed unit exchanged with swarm nodes.
///
/// `sender` is the base58 public key of whoever built the envelope, so the
/// receiver can check `signature` without any other key material.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Envelope {
    pub sender: String,
    pub swarm_id: String,
    pub timestamp: u64,
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
    pub payload: Payload,
}

impl Envelope {
    /// An unsigned, unstamped envelope. The topology fills in the rest before sending.
    pub fn new(payload: Payload) -> Self {
        Envelope {
            sender: String::new(),
            swarm_id: String::new(),
            timestamp: 0,
            signature: vec![],
            payload,
        }
    }

    pub fn kind(&self) -> PayloadKind {
        self.payload.kind()
    }

    pub fn is_signed(&self) -> bool {
        !self.signature.is_empty()
    }

    pub fn serialize(&self) -> crate::Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn deserialize(bytes: &[u8]) -> crate::Result<Envelope> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::networking::message_types::database_message::{
        DatabaseHeader, DatabaseOperation,
    };

    #[test]
    fn test_envelope_serialize() {
        let mut envelope = Envelope::new(Payload::DatabaseRequest(DatabaseRequest {
            header: DatabaseHeader {
                db_uuid: String::from("db"),
                nonce: 42,
                point_of_contact: String::from("node-a"),
            },
            operation: DatabaseOperation::Read {
                key: String::from("key"),
            },
        }));
        envelope.sender = String::from("client");
        envelope.signature = vec![1, 2, 3];
        let bytes = envelope.serialize().unwrap();
        assert_eq!(Envelope::deserialize(&bytes).unwrap(), envelope);
        assert_eq!(envelope.kind(), PayloadKind::DatabaseRequest);
        assert!(envelope.is_signed());
    }

    #[test]
    fn test_envelope_rejects_garbage() {
        assert!(Envelope::deserialize(&[0xff; 3]).is_err());
        assert!(Envelope::deserialize(&[]).is_err());
    }

    #[test]
    fn test_payload_kind_discriminants() {
        assert_eq!(PayloadKind::DatabaseRequest as u8, 1);
        assert_eq!(PayloadKind::StatusResponse as u8, 4);
        assert_eq!(
            Payload::StatusRequest(StatusRequest::default()).kind(),
            PayloadKind::StatusRequest
        );
    }
}

use tracing::{event, Level};

use crate::crypto::{decode_identity, hash, verify};
use crate::keypair::Keypair;
use crate::networking::envelope::Envelope;

/// Signs outgoing envelopes and checks incoming ones.
///
/// Neither operation reports errors to the caller: `sign` says whether a
/// signature was written, `verify` collapses every failure into `false`.
pub trait MessageAuthenticator: Send + Sync {
    /// The identity stamped into `Envelope::sender`.
    fn identity(&self) -> String;
    fn sign(&self, envelope: &mut Envelope) -> bool;
    fn verify(&self, envelope: &Envelope) -> bool;
}

/// Joins tokens as `<len>|<token><len>|<token>...`.
///
/// Every token carries its own length, so moving bytes from one field into its
/// neighbour always changes the output.
pub fn length_prefixed(tokens: &[&[u8]]) -> Vec<u8> {
    let mut vbytes: Vec<u8> = vec![];
    for token in tokens {
        vbytes.extend(format!("{}|", token.len()).as_bytes());
        vbytes.extend(*token);
    }
    vbytes
}

/// The canonical signing input of an envelope: sender, payload kind, payload
/// bytes and timestamp, in that order, each length prefixed.
pub fn deterministic_serialize(envelope: &Envelope) -> crate::Result<Vec<u8>> {
    let kind = (envelope.kind() as u8).to_string();
    let payload = envelope.payload.content_bytes()?;
    let timestamp = envelope.timestamp.to_string();
    Ok(length_prefixed(&[
        envelope.sender.as_bytes(),
        kind.as_bytes(),
        payload.as_slice(),
        timestamp.as_bytes(),
    ]))
}

/// secp256k1 signatures over the blake3 hash of the canonical signing input.
pub struct SignatureAuthenticator {
    keypair: Keypair,
}

impl SignatureAuthenticator {
    pub fn new(keypair: Keypair) -> Self {
        SignatureAuthenticator { keypair }
    }
}

impl MessageAuthenticator for SignatureAuthenticator {
    fn identity(&self) -> String {
        self.keypair.address()
    }

    fn sign(&self, envelope: &mut Envelope) -> bool {
        let signature = deterministic_serialize(envelope)
            .and_then(|input| self.keypair.sign_hash(&hash(&input)));
        match signature {
            Ok(signature) => {
                envelope.signature = signature.to_vec();
                true
            }
            Err(err) => {
                event!(Level::ERROR, "failed to sign envelope: {}", err);
                false
            }
        }
    }

    fn verify(&self, envelope: &Envelope) -> bool {
        let publickey = match decode_identity(&envelope.sender) {
            Some(publickey) => publickey,
            None => {
                event!(Level::DEBUG, "sender {} is not a public key", envelope.sender);
                return false;
            }
        };
        let input = match deterministic_serialize(envelope) {
            Ok(input) => input,
            Err(err) => {
                event!(Level::DEBUG, "cannot rebuild signing input: {}", err);
                return false;
            }
        };
        let valid = verify(&hash(&input), &envelope.signature, &publickey);
        if !valid {
            event!(Level::DEBUG, "bad signature from {}", envelope.sender);
        }
        valid
    }
}

/// Accepts everything. For trusted swarms and tests.
pub struct NullAuthenticator {
    identity: String,
}

impl NullAuthenticator {
    pub fn new(identity: &str) -> Self {
        NullAuthenticator {
            identity: identity.to_string(),
        }
    }
}

impl MessageAuthenticator for NullAuthenticator {
    fn identity(&self) -> String {
        self.identity.clone()
    }

    fn sign(&self, _envelope: &mut Envelope) -> bool {
        true
    }

    fn verify(&self, _envelope: &Envelope) -> bool {
        true
    }
}

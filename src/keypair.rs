use crate::crypto::{
    encode_identity, generate_keypair_from_privatekey, generate_keys, sign, SwarmHash,
    SwarmPrivateKey, SwarmPublicKey, SwarmSignature,
};
use std::fmt;

/// An secp256k1 keypair used to sign envelopes sent to the swarm
#[derive(Clone, PartialEq)]
pub struct Keypair {
    privatekey: SwarmPrivateKey,
    publickey: SwarmPublicKey,
}

impl Keypair {
    /// Create and return a keypair with a randomly generated private key.
    pub fn new() -> Keypair {
        let (publickey, privatekey) = generate_keys();
        Keypair {
            privatekey,
            publickey,
        }
    }

    /// Create and return a keypair with the given bytes as the private key
    pub fn from_secret_slice(slice: &[u8]) -> crate::Result<Keypair> {
        let (publickey, privatekey) = generate_keypair_from_privatekey(slice)?;
        Ok(Keypair {
            privatekey,
            publickey,
        })
    }

    /// Create and return a keypair with the given hex string as the private key
    pub fn from_secret_hex(secret_hex: &str) -> crate::Result<Keypair> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(secret_hex, &mut bytes as &mut [u8])?;
        Keypair::from_secret_slice(&bytes)
    }

    /// The identity other parties know us by, i.e. the base58 public key
    pub fn address(&self) -> String {
        encode_identity(&self.publickey)
    }

    pub fn public_key(&self) -> &SwarmPublicKey {
        &self.publickey
    }

    pub fn sign_hash(&self, hash: &SwarmHash) -> crate::Result<SwarmSignature> {
        sign(hash, &self.privatekey)
    }
}

impl Default for Keypair {
    fn default() -> Self {
        Keypair::new()
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("address", &self.address())
            .finish()
    }
}

impl fmt::Display for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pubkey:{}", self.address())
    }
}

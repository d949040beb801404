use base58::{FromBase58, ToBase58};
use rand::RngCore;
use secp256k1::{Message, PublicKey, SecretKey, Signature, SECP256K1};

pub type SwarmHash = [u8; 32];
pub type SwarmPublicKey = [u8; 33];
pub type SwarmPrivateKey = [u8; 32];
pub type SwarmSignature = [u8; 64];

pub fn hash(data: &[u8]) -> SwarmHash {
    *blake3::hash(data).as_bytes()
}

/// Generates a fresh secp256k1 keypair, retrying until the random bytes form a
/// valid secret key.
pub fn generate_keys() -> (SwarmPublicKey, SwarmPrivateKey) {
    let mut rng = rand::thread_rng();
    loop {
        let mut privatekey: SwarmPrivateKey = [0; 32];
        rng.fill_bytes(&mut privatekey);
        if let Ok(keys) = generate_keypair_from_privatekey(&privatekey) {
            return keys;
        }
    }
}

pub fn generate_keypair_from_privatekey(
    slice: &[u8],
) -> crate::Result<(SwarmPublicKey, SwarmPrivateKey)> {
    let secret_key = SecretKey::from_slice(slice)?;
    let public_key = PublicKey::from_secret_key(SECP256K1, &secret_key);
    let mut privatekey: SwarmPrivateKey = [0; 32];
    privatekey.copy_from_slice(slice);
    Ok((public_key.serialize(), privatekey))
}

pub fn sign(hash: &SwarmHash, privatekey: &SwarmPrivateKey) -> crate::Result<SwarmSignature> {
    let msg = Message::from_slice(hash)?;
    let secret = SecretKey::from_slice(privatekey)?;
    Ok(SECP256K1.sign(&msg, &secret).serialize_compact())
}

/// Checks a compact signature over `hash`. Malformed keys or signatures are
/// simply reported as invalid.
pub fn verify(hash: &SwarmHash, sig: &[u8], publickey: &PublicKey) -> bool {
    let msg = match Message::from_slice(hash) {
        Ok(msg) => msg,
        Err(_) => return false,
    };
    match Signature::from_compact(sig) {
        Ok(sig) => SECP256K1.verify(&msg, &sig, publickey).is_ok(),
        Err(_) => false,
    }
}

/// Node and client identities are the base58 form of the compressed public key.
pub fn encode_identity(publickey: &SwarmPublicKey) -> String {
    publickey.to_base58()
}

pub fn decode_identity(identity: &str) -> Option<PublicKey> {
    let bytes = identity.from_base58().ok()?;
    PublicKey::from_slice(&bytes).ok()
}

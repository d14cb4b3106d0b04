//! Shared test helpers: minisign signing for discovery fixtures
//!
//! The discovery store only verifies signatures; tests need to produce
//! them. `TestSigner` generates an ed25519 key with a random minisign
//! key ID and emits complete `.minisig` files over arbitrary content.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use blake2::{Blake2b512, Digest};
use ed25519_dalek::{Signer, SigningKey};
use rand::RngCore as _;

use peregrine::discovery::verify::PublicKey;

/// An ed25519 signing key with a minisign key ID, able to produce
/// signature files the verifier accepts.
pub struct TestSigner {
    signing: SigningKey,
    key_id: [u8; 8],
}

impl TestSigner {
    /// Generates a fresh random signer.
    pub fn new() -> Self {
        let mut seed = [0u8; 32];
        rand::rng().fill_bytes(&mut seed);
        let mut key_id = [0u8; 8];
        rand::rng().fill_bytes(&mut key_id);
        Self {
            signing: SigningKey::from_bytes(&seed),
            key_id,
        }
    }

    /// The trusted-key representation of this signer.
    pub fn public_key(&self) -> PublicKey {
        let mut blob = Vec::new();
        blob.extend_from_slice(b"Ed");
        blob.extend_from_slice(&self.key_id);
        blob.extend_from_slice(self.signing.verifying_key().as_bytes());
        PublicKey::decode(&BASE64.encode(blob)).expect("test key must decode")
    }

    /// Produces a complete prehashed (`ED`) `.minisig` file over
    /// `content`, with a trusted comment referencing `file_name`.
    pub fn sign(&self, content: &[u8], file_name: &str) -> String {
        let digest = Blake2b512::digest(content);
        let signature = self.signing.sign(digest.as_slice());

        let mut blob = Vec::new();
        blob.extend_from_slice(b"ED");
        blob.extend_from_slice(&self.key_id);
        blob.extend_from_slice(&signature.to_bytes());

        let trusted_comment = format!("timestamp:1700000000\tfile:{file_name} hashed");
        let mut global_message = Vec::new();
        global_message.extend_from_slice(&signature.to_bytes());
        global_message.extend_from_slice(trusted_comment.as_bytes());
        let global = self.signing.sign(&global_message);

        format!(
            "untrusted comment: signature from test key\n{}\ntrusted comment: {}\n{}\n",
            BASE64.encode(blob),
            trusted_comment,
            BASE64.encode(global.to_bytes())
        )
    }
}

impl Default for TestSigner {
    fn default() -> Self {
        Self::new()
    }
}

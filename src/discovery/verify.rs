//! Minisign detached-signature verification for discovery documents
//!
//! The discovery service publishes each JSON document together with a
//! detached signature file (`<name>.minisig`). This module validates
//! such signatures against one or more trusted ed25519 public keys and
//! enforces the version floor that prevents replay of stale but validly
//! signed catalogs.
//!
//! Verification is a pure function of its inputs; no state is held here.
//!
//! # Signature file format
//!
//! ```text
//! untrusted comment: <ignored>
//! base64(<alg:2> <key_id:8> <signature:64>)
//! trusted comment: <comment>
//! base64(<global_signature:64>)
//! ```
//!
//! The algorithm is `Ed` (signature over the raw content) or `ED`
//! (signature over the Blake2b-512 digest of the content). The global
//! signature covers the content signature concatenated with the trusted
//! comment, binding the comment to the signing key.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use blake2::{Blake2b512, Digest};
use ed25519_dalek::{Signature, VerifyingKey};
use thiserror::Error;

/// Trusted discovery signing keys compiled into the client.
///
/// Key rotation ships as a client update; the verifier accepts a
/// signature from any key in this list.
pub const TRUSTED_DISCOVERY_KEYS: &[&str] =
    &["RWRtBSX1alxyGX+Xn3LuZnWUT0w//B6EmTJvgaAxBMYzGbjv/Kz7UyWN"];

// ---------------------------------------------------------------------------
// VerifyError
// ---------------------------------------------------------------------------

/// Verification failure kinds.
///
/// All of these are treated as fetch failures by the discovery store:
/// the document is never applied and cached data is retained.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// The signature file or a key blob does not have the expected shape.
    #[error("malformed signature data: {0}")]
    MalformedSignature(String),

    /// The signature names a key ID that is not in the trusted set.
    #[error("signature key ID is not in the trusted key set")]
    UnknownKeyId,

    /// The two-byte algorithm tag is neither `Ed` nor `ED`.
    #[error("unsupported signature algorithm '{0}'")]
    UnsupportedAlgorithm(String),

    /// A prehashed signature was required but a legacy one was supplied.
    #[error("legacy 'Ed' signature rejected: prehashed 'ED' is required")]
    PrehashRequired,

    /// The content signature does not verify against the trusted key.
    #[error("signature does not match the document content")]
    InvalidSignature,

    /// The global signature over signature + trusted comment is invalid.
    #[error("global signature does not match the trusted comment")]
    InvalidGlobalSignature,

    /// The trusted comment does not reference the expected file name.
    #[error("trusted comment does not reference file '{expected}'")]
    WrongFilename {
        /// File name the signature was expected to cover.
        expected: String,
    },

    /// The signed document is not valid JSON or lacks the version field.
    #[error("signed document is malformed: {0}")]
    MalformedDocument(String),

    /// The signed document carries a version older than one already
    /// accepted, indicating a replayed catalog.
    #[error("document version {got} is older than accepted version {accepted}")]
    RolledBack {
        /// Version embedded in the signed document.
        got: u64,
        /// Previously accepted version.
        accepted: u64,
    },
}

// ---------------------------------------------------------------------------
// PublicKey
// ---------------------------------------------------------------------------

/// A trusted minisign public key: an 8-byte key ID plus the ed25519
/// verifying key.
#[derive(Debug, Clone)]
pub struct PublicKey {
    key_id: [u8; 8],
    key: VerifyingKey,
}

impl PublicKey {
    /// Decodes a base64 minisign public key blob
    /// (`Ed` tag, 8-byte key ID, 32-byte ed25519 key).
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::MalformedSignature`] for bad base64,
    /// wrong length, or a non-`Ed` tag, and
    /// [`VerifyError::UnsupportedAlgorithm`] for unknown tags.
    pub fn decode(encoded: &str) -> Result<Self, VerifyError> {
        let raw = BASE64
            .decode(encoded.trim())
            .map_err(|e| VerifyError::MalformedSignature(format!("public key base64: {e}")))?;
        if raw.len() != 42 {
            return Err(VerifyError::MalformedSignature(format!(
                "public key blob is {} bytes, expected 42",
                raw.len()
            )));
        }
        if &raw[0..2] != b"Ed" {
            return Err(VerifyError::UnsupportedAlgorithm(
                String::from_utf8_lossy(&raw[0..2]).into_owned(),
            ));
        }
        let mut key_id = [0u8; 8];
        key_id.copy_from_slice(&raw[2..10]);
        let mut key_bytes = [0u8; 32];
        key_bytes.copy_from_slice(&raw[10..42]);
        let key = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|_| VerifyError::MalformedSignature("invalid ed25519 point".to_string()))?;
        Ok(Self { key_id, key })
    }

    /// Decodes the compiled-in trusted key list.
    pub fn default_trusted() -> Result<Vec<Self>, VerifyError> {
        TRUSTED_DISCOVERY_KEYS.iter().map(|k| Self::decode(k)).collect()
    }
}

// ---------------------------------------------------------------------------
// Signature file parsing
// ---------------------------------------------------------------------------

/// Content signature algorithm tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignatureAlgorithm {
    /// `Ed`: signature over the raw content.
    Legacy,
    /// `ED`: signature over the Blake2b-512 digest of the content.
    Prehashed,
}

/// Parsed `.minisig` file.
#[derive(Debug)]
struct SignatureFile {
    algorithm: SignatureAlgorithm,
    key_id: [u8; 8],
    signature: [u8; 64],
    trusted_comment: String,
    global_signature: [u8; 64],
}

fn decode_64(encoded: &str, what: &str) -> Result<[u8; 64], VerifyError> {
    let raw = BASE64
        .decode(encoded.trim())
        .map_err(|e| VerifyError::MalformedSignature(format!("{what} base64: {e}")))?;
    raw.try_into()
        .map_err(|_| VerifyError::MalformedSignature(format!("{what} is not 64 bytes")))
}

fn parse_signature_file(text: &str) -> Result<SignatureFile, VerifyError> {
    let mut lines = text.lines();
    let untrusted = lines
        .next()
        .ok_or_else(|| VerifyError::MalformedSignature("empty signature file".to_string()))?;
    if !untrusted.starts_with("untrusted comment:") {
        return Err(VerifyError::MalformedSignature(
            "missing untrusted comment line".to_string(),
        ));
    }

    let sig_line = lines
        .next()
        .ok_or_else(|| VerifyError::MalformedSignature("missing signature line".to_string()))?;
    let raw = BASE64
        .decode(sig_line.trim())
        .map_err(|e| VerifyError::MalformedSignature(format!("signature base64: {e}")))?;
    if raw.len() != 74 {
        return Err(VerifyError::MalformedSignature(format!(
            "signature blob is {} bytes, expected 74",
            raw.len()
        )));
    }
    let algorithm = match &raw[0..2] {
        b"Ed" => SignatureAlgorithm::Legacy,
        b"ED" => SignatureAlgorithm::Prehashed,
        other => {
            return Err(VerifyError::UnsupportedAlgorithm(
                String::from_utf8_lossy(other).into_owned(),
            ))
        }
    };
    let mut key_id = [0u8; 8];
    key_id.copy_from_slice(&raw[2..10]);
    let mut signature = [0u8; 64];
    signature.copy_from_slice(&raw[10..74]);

    let comment_line = lines.next().ok_or_else(|| {
        VerifyError::MalformedSignature("missing trusted comment line".to_string())
    })?;
    let trusted_comment = comment_line
        .strip_prefix("trusted comment: ")
        .ok_or_else(|| {
            VerifyError::MalformedSignature("malformed trusted comment line".to_string())
        })?
        .to_string();

    let global_line = lines.next().ok_or_else(|| {
        VerifyError::MalformedSignature("missing global signature line".to_string())
    })?;
    let global_signature = decode_64(global_line, "global signature")?;

    Ok(SignatureFile {
        algorithm,
        key_id,
        signature,
        trusted_comment,
        global_signature,
    })
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

/// Minimal view of a signed discovery document: the version field only.
#[derive(Debug, serde::Deserialize)]
struct VersionedDocument {
    #[serde(default, rename = "v")]
    version: u64,
}

/// Verifies a detached minisign signature over a discovery document and
/// returns the document's embedded version.
///
/// The checks, in order:
///
/// 1. Parse the signature file and select the trusted key by key ID.
/// 2. Verify the content signature (prehashing with Blake2b-512 when the
///    algorithm is `ED`; `force_prehash` rejects legacy `Ed`).
/// 3. Verify the global signature over signature bytes plus trusted
///    comment, and require the comment to reference `expected_file`.
/// 4. Parse the document's `v` field and reject versions older than
///    `previous_version` (rollback). Equal versions are returned to the
///    caller, which decides whether the content is genuinely unchanged.
///
/// # Arguments
///
/// * `signature_text` - Contents of the `.minisig` file.
/// * `content` - The raw signed JSON document.
/// * `expected_file` - File name the trusted comment must reference.
/// * `previous_version` - Version of the last accepted document (0 when
///   nothing was accepted yet).
/// * `force_prehash` - Reject legacy `Ed` signatures when set.
/// * `keys` - The trusted public keys.
///
/// # Errors
///
/// Returns the specific [`VerifyError`] kind for each failed check; the
/// caller treats all of them as fetch failures.
pub fn verify(
    signature_text: &str,
    content: &[u8],
    expected_file: &str,
    previous_version: u64,
    force_prehash: bool,
    keys: &[PublicKey],
) -> Result<u64, VerifyError> {
    let sig = parse_signature_file(signature_text)?;

    let key = keys
        .iter()
        .find(|k| k.key_id == sig.key_id)
        .ok_or(VerifyError::UnknownKeyId)?;

    if force_prehash && sig.algorithm == SignatureAlgorithm::Legacy {
        return Err(VerifyError::PrehashRequired);
    }

    let signature = Signature::from_bytes(&sig.signature);
    let verified = match sig.algorithm {
        SignatureAlgorithm::Legacy => key.key.verify_strict(content, &signature),
        SignatureAlgorithm::Prehashed => {
            let digest = Blake2b512::digest(content);
            key.key.verify_strict(digest.as_slice(), &signature)
        }
    };
    if verified.is_err() {
        return Err(VerifyError::InvalidSignature);
    }

    // Global signature binds the trusted comment to the content signature.
    let mut global_message = Vec::with_capacity(64 + sig.trusted_comment.len());
    global_message.extend_from_slice(&sig.signature);
    global_message.extend_from_slice(sig.trusted_comment.as_bytes());
    let global = Signature::from_bytes(&sig.global_signature);
    if key.key.verify_strict(&global_message, &global).is_err() {
        return Err(VerifyError::InvalidGlobalSignature);
    }

    // The comment must name the file this signature was made for, so a
    // valid server_list signature cannot be replayed for the
    // organization list.
    let names_file = sig
        .trusted_comment
        .split_whitespace()
        .any(|token| token.strip_prefix("file:") == Some(expected_file));
    if !names_file {
        return Err(VerifyError::WrongFilename {
            expected: expected_file.to_string(),
        });
    }

    let document: VersionedDocument = serde_json::from_slice(content)
        .map_err(|e| VerifyError::MalformedDocument(e.to_string()))?;
    if document.version < previous_version {
        return Err(VerifyError::RolledBack {
            got: document.version,
            accepted: previous_version,
        });
    }

    Ok(document.version)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

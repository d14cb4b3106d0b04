//! PKCE S256 challenge generation
//!
//! Implements the Proof Key for Code Exchange extension to OAuth 2.0 as
//! defined in RFC 7636, using the `S256` challenge method the VPN portal
//! requires.
//!
//! # How PKCE works
//!
//! 1. The client generates a high-entropy random string called the
//!    `code_verifier`.
//! 2. The client computes a SHA-256 hash of the verifier and
//!    base64url-encodes it to produce the `code_challenge`.
//! 3. The authorization request includes `code_challenge` and
//!    `code_challenge_method=S256`.
//! 4. The token exchange request includes the original `code_verifier`,
//!    proving possession of the secret the code was bound to.
//!
//! # References
//!
//! - RFC 7636 <https://www.rfc-editor.org/rfc/rfc7636>

use base64::Engine as _;
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// PkceChallenge
// ---------------------------------------------------------------------------

/// A PKCE S256 challenge pair consisting of a verifier and its derived
/// challenge value.
///
/// Created by [`generate`] and consumed by the authorization flow in
/// `src/oauth/flow.rs`.
///
/// # Examples
///
/// ```
/// use peregrine::oauth::pkce;
///
/// let challenge = pkce::generate();
/// assert_eq!(challenge.method, "S256");
/// assert_eq!(challenge.verifier.len(), 43);
/// ```
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    /// The code verifier: a base64url-encoded (no padding) random string
    /// of exactly 43 characters derived from 32 random bytes.
    pub verifier: String,

    /// The code challenge: the base64url-encoded (no padding) SHA-256
    /// digest of the UTF-8 representation of [`Self::verifier`].
    pub challenge: String,

    /// The challenge method. Always `"S256"`.
    pub method: &'static str,
}

/// Generates a fresh PKCE S256 challenge.
///
/// The verifier is 32 cryptographically random bytes encoded as a
/// base64url string without padding (43 characters). The challenge is
/// the base64url-encoded SHA-256 digest of the verifier string's UTF-8
/// bytes, as specified in RFC 7636 section 4.2.
pub fn generate() -> PkceChallenge {
    use rand::RngCore as _;

    let mut random_bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut random_bytes);

    let verifier = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(random_bytes);

    // RFC 7636 section 4.2: ASCII(BASE64URL(SHA256(ASCII(code_verifier))))
    let digest = Sha256::digest(verifier.as_bytes());
    let challenge = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest.as_slice());

    PkceChallenge {
        verifier,
        challenge,
        method: "S256",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_produces_correct_verifier_length() {
        let pkce = generate();
        assert_eq!(
            pkce.verifier.len(),
            43,
            "32 random bytes in base64url without padding produces 43 chars"
        );
    }

    #[test]
    fn test_challenge_is_correct_s256_of_verifier() {
        let pkce = generate();
        let digest = Sha256::digest(pkce.verifier.as_bytes());
        let expected =
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest.as_slice());
        assert_eq!(
            pkce.challenge, expected,
            "challenge must equal base64url(SHA256(verifier))"
        );
    }

    #[test]
    fn test_generate_produces_unique_verifiers() {
        let a = generate();
        let b = generate();
        assert_ne!(
            a.verifier, b.verifier,
            "successive calls must produce distinct verifiers"
        );
    }

    #[test]
    fn test_verifier_uses_url_safe_base64_no_padding() {
        let pkce = generate();
        assert!(
            pkce.verifier
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
            "verifier must only contain base64url characters, got: {}",
            pkce.verifier
        );
        assert!(!pkce.verifier.contains('='));
    }

    #[test]
    fn test_verifier_and_challenge_are_distinct() {
        let pkce = generate();
        assert_ne!(pkce.verifier, pkce.challenge);
    }

    /// Verifies the S256 computation against the known test vector from
    /// RFC 7636 Appendix B.
    #[test]
    fn test_s256_known_answer_rfc7636_appendix_b() {
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        let digest = Sha256::digest(verifier.as_bytes());
        let challenge =
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest.as_slice());
        assert_eq!(
            challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM",
            "S256 challenge must match RFC 7636 Appendix B test vector"
        );
    }
}

//! Challenge-response identity primitives.
//!
//! Two handshakes share these helpers:
//! - **End-user**: the client signs `parch-chat-auth:<host>:<challenge>` with
//!   its own Ed25519 key, establishing the session's signing identity.
//! - **Host author**: the backend signs `parch-host-auth:<host>:<challenge>`
//!   with the host's registered key, establishing the single connection that
//!   may act for the host.
//!
//! Keys and signatures travel as standard base64.

use base64::{engine::general_purpose::STANDARD, Engine};
use ed25519_dalek::{Signature, Verifier, VerifyingKey, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Domain prefix of the end-user signed message.
pub const CHAT_AUTH_PREFIX: &str = "parch-chat-auth:";

/// Domain prefix of the host-author signed message.
pub const HOST_AUTH_PREFIX: &str = "parch-host-auth:";

/// Display names are truncated to this many characters.
pub const MAX_USERNAME_CHARS: usize = 40;

/// Identity handshake failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Public key or signature left blank.
    #[error("public key and signature are required")]
    MissingCredentials,
    /// Presented challenge is not the session's current one.
    #[error("invalid or expired challenge")]
    ChallengeMismatch,
    /// Public key is not a base64 32-byte Ed25519 key.
    #[error("invalid public key")]
    InvalidPublicKey,
    /// Signature is malformed or does not verify.
    #[error("signature verification failed")]
    InvalidSignature,
    /// Frame requires a completed pubkey handshake.
    #[error("authentication required")]
    NotAuthenticated,
    /// Connection may not attempt the host-author handshake.
    #[error("connection is not eligible to act as host author")]
    NotAuthorEligible,
    /// The host has no usable registered signing key.
    #[error("host signing key is missing or invalid")]
    HostKeyUnavailable,
    /// Frame may only come from the host's current author.
    #[error("only the host author may send {0}")]
    NotHostAuthor(&'static str),
    /// Pubkey handshake repeated on an authenticated session.
    #[error("session is already authenticated")]
    AlreadyAuthenticated,
    /// Source address already holds the maximum authenticated sessions.
    #[error("too many authenticated sessions from this address")]
    TooManySessions,
}

/// Generate a fresh single-use challenge (32 random bytes, hex).
pub fn new_challenge() -> String {
    random_hex::<32>()
}

/// Generate a correlation nonce (16 random bytes, hex).
pub fn new_nonce() -> String {
    random_hex::<16>()
}

fn random_hex<const N: usize>() -> String {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// The exact bytes an end user signs.
pub fn chat_auth_message(host_id: &str, challenge: &str) -> String {
    format!("{CHAT_AUTH_PREFIX}{host_id}:{challenge}")
}

/// The exact bytes a host author signs.
pub fn host_auth_message(host_id: &str, challenge: &str) -> String {
    format!("{HOST_AUTH_PREFIX}{host_id}:{challenge}")
}

/// Parse a base64 Ed25519 public key.
pub fn decode_public_key(encoded: &str) -> Result<VerifyingKey, AuthError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|_| AuthError::InvalidPublicKey)?;
    let bytes: [u8; PUBLIC_KEY_LENGTH] = bytes
        .try_into()
        .map_err(|_| AuthError::InvalidPublicKey)?;
    VerifyingKey::from_bytes(&bytes).map_err(|_| AuthError::InvalidPublicKey)
}

/// Parse a base64 Ed25519 signature.
pub fn decode_signature(encoded: &str) -> Result<Signature, AuthError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|_| AuthError::InvalidSignature)?;
    let bytes: [u8; SIGNATURE_LENGTH] = bytes
        .try_into()
        .map_err(|_| AuthError::InvalidSignature)?;
    Ok(Signature::from_bytes(&bytes))
}

/// Verify an end-user handshake answer against the session's challenge.
///
/// Checks run in protocol order: blank credentials, challenge, key shape,
/// signature.
pub fn verify_user(
    host_id: &str,
    expected_challenge: &str,
    public_key: &str,
    presented_challenge: &str,
    signature: &str,
) -> Result<(), AuthError> {
    if public_key.trim().is_empty() || signature.trim().is_empty() {
        return Err(AuthError::MissingCredentials);
    }
    if expected_challenge.is_empty() || presented_challenge != expected_challenge {
        return Err(AuthError::ChallengeMismatch);
    }
    let key = decode_public_key(public_key)?;
    let signature = decode_signature(signature)?;
    key.verify(
        chat_auth_message(host_id, presented_challenge).as_bytes(),
        &signature,
    )
    .map_err(|_| AuthError::InvalidSignature)
}

/// Verify a host-author handshake answer against the host's registered key.
pub fn verify_host(
    host_id: &str,
    host_signing_key: Option<&str>,
    expected_challenge: &str,
    presented_challenge: &str,
    signature: &str,
) -> Result<(), AuthError> {
    if signature.trim().is_empty() {
        return Err(AuthError::MissingCredentials);
    }
    if expected_challenge.is_empty() || presented_challenge != expected_challenge {
        return Err(AuthError::ChallengeMismatch);
    }
    let key = host_signing_key
        .ok_or(AuthError::HostKeyUnavailable)
        .and_then(|k| decode_public_key(k).map_err(|_| AuthError::HostKeyUnavailable))?;
    let signature = decode_signature(signature)?;
    key.verify(
        host_auth_message(host_id, presented_challenge).as_bytes(),
        &signature,
    )
    .map_err(|_| AuthError::InvalidSignature)
}

/// Stable pseudo user id for a public key.
///
/// 31-bit, never zero. Used until the host backend supplies the user's
/// real numeric id.
pub fn pseudo_user_id(public_key: &str) -> i64 {
    let digest = Sha256::digest(public_key.as_bytes());
    let id = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) & 0x7fff_ffff;
    if id == 0 {
        1
    } else {
        i64::from(id)
    }
}

/// Normalize a requested display name.
///
/// Trimmed; empty names become `user-` plus the first eight characters of
/// the key; the result is capped at [`MAX_USERNAME_CHARS`] characters.
pub fn normalize_username(requested: Option<&str>, public_key: &str) -> String {
    let trimmed = requested.map(str::trim).unwrap_or_default();
    let name = if trimmed.is_empty() {
        format!("user-{}", public_key.chars().take(8).collect::<String>())
    } else {
        trimmed.to_string()
    };
    truncate_chars(&name, MAX_USERNAME_CHARS)
}

/// Truncate to a maximum character length without splitting UTF-8.
fn truncate_chars(name: &str, max_chars: usize) -> String {
    if name.chars().count() <= max_chars {
        name.to_string()
    } else {
        name.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    fn keypair() -> (SigningKey, String) {
        let key = SigningKey::generate(&mut OsRng);
        let public = STANDARD.encode(key.verifying_key().to_bytes());
        (key, public)
    }

    fn sign(key: &SigningKey, message: &str) -> String {
        STANDARD.encode(key.sign(message.as_bytes()).to_bytes())
    }

    #[test]
    fn challenges_are_random_hex() {
        let a = new_challenge();
        let b = new_challenge();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(new_nonce().len(), 32);
    }

    #[test]
    fn signed_messages_use_domain_prefixes() {
        assert_eq!(
            chat_auth_message("host-123", "abc"),
            "parch-chat-auth:host-123:abc"
        );
        assert_eq!(
            host_auth_message("host-123", "abc"),
            "parch-host-auth:host-123:abc"
        );
    }

    #[test]
    fn verify_user_accepts_valid_signature() {
        let (key, public) = keypair();
        let sig = sign(&key, "parch-chat-auth:host-123:abc");
        assert_eq!(verify_user("host-123", "abc", &public, "abc", &sig), Ok(()));
    }

    #[test]
    fn verify_user_rejections_in_order() {
        let (key, public) = keypair();
        let sig = sign(&key, "parch-chat-auth:host-123:abc");

        assert_eq!(
            verify_user("host-123", "abc", "", "abc", &sig),
            Err(AuthError::MissingCredentials)
        );
        assert_eq!(
            verify_user("host-123", "abc", &public, "abc", "  "),
            Err(AuthError::MissingCredentials)
        );
        assert_eq!(
            verify_user("host-123", "abc", &public, "xyz", &sig),
            Err(AuthError::ChallengeMismatch)
        );
        assert_eq!(
            verify_user("host-123", "abc", "c2hvcnQ=", "abc", &sig),
            Err(AuthError::InvalidPublicKey)
        );
        assert_eq!(
            verify_user("host-123", "abc", &public, "abc", "bm90LWEtc2ln"),
            Err(AuthError::InvalidSignature)
        );
        // Signed for a different host
        let other = sign(&key, "parch-chat-auth:host-999:abc");
        assert_eq!(
            verify_user("host-123", "abc", &public, "abc", &other),
            Err(AuthError::InvalidSignature)
        );
    }

    #[test]
    fn verify_host_uses_registered_key() {
        let (host_key, host_public) = keypair();
        let (intruder, _) = keypair();
        let msg = "parch-host-auth:host-123:c1";

        assert_eq!(
            verify_host("host-123", Some(&host_public), "c1", "c1", &sign(&host_key, msg)),
            Ok(())
        );
        assert_eq!(
            verify_host("host-123", Some(&host_public), "c1", "c1", &sign(&intruder, msg)),
            Err(AuthError::InvalidSignature)
        );
        assert_eq!(
            verify_host("host-123", None, "c1", "c1", &sign(&host_key, msg)),
            Err(AuthError::HostKeyUnavailable)
        );
        assert_eq!(
            verify_host("host-123", Some("!!"), "c1", "c1", &sign(&host_key, msg)),
            Err(AuthError::HostKeyUnavailable)
        );
        // The user-auth domain must not satisfy the host handshake
        let chat_sig = sign(&host_key, "parch-chat-auth:host-123:c1");
        assert_eq!(
            verify_host("host-123", Some(&host_public), "c1", "c1", &chat_sig),
            Err(AuthError::InvalidSignature)
        );
    }

    #[test]
    fn pseudo_user_id_is_deterministic_positive_31_bit() {
        let (_, public) = keypair();
        let id = pseudo_user_id(&public);
        assert_eq!(id, pseudo_user_id(&public));
        assert!(id > 0);
        assert!(id <= 0x7fff_ffff);
    }

    #[test]
    fn usernames_are_normalized() {
        let pk = "ABCDEFGHIJKLMNOP";
        assert_eq!(normalize_username(Some("  alice  "), pk), "alice");
        assert_eq!(normalize_username(Some("   "), pk), "user-ABCDEFGH");
        assert_eq!(normalize_username(None, pk), "user-ABCDEFGH");
        let long = "x".repeat(100);
        assert_eq!(normalize_username(Some(&long), pk).chars().count(), 40);
        let wide = "日".repeat(50);
        assert_eq!(normalize_username(Some(&wide), pk), "日".repeat(40));
    }
}

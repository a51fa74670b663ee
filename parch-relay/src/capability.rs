//! Capability token verification.
//!
//! A capability is a host-signed, scope-limited, time-boxed grant:
//!
//! ```text
//! base64url(claims JSON) "." base64url(ed25519 signature over the claims bytes)
//! ```
//!
//! The relay never stores tokens; each one is verified when presented and
//! the request is dropped before reaching the author if any check fails.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, SIGNATURE_LENGTH};
use parch_types::{CapabilityClaims, Scope, CAPABILITY_VERSION};

use crate::identity::decode_public_key;

/// Why a capability was refused. Each check has its own variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityError {
    /// Session has not completed the pubkey handshake.
    #[error("session is not authenticated")]
    NotAuthenticated,
    /// No token presented.
    #[error("capability token required")]
    MissingToken,
    /// Token is not exactly `payload.signature`.
    #[error("capability token must have exactly two segments")]
    MalformedToken,
    /// A segment is not base64url.
    #[error("capability token segment is not valid base64url")]
    UndecodableSegment,
    /// Signature segment is not 64 bytes.
    #[error("capability signature has the wrong length")]
    SignatureLength,
    /// The host's registered signing key is missing or unparsable.
    #[error("host signing key is unavailable")]
    HostKeyUnavailable,
    /// Signature does not verify over the payload bytes.
    #[error("capability signature verification failed")]
    BadSignature,
    /// Payload is not a claims object.
    #[error("capability claims are malformed")]
    InvalidClaims,
    /// Claims version is not supported.
    #[error("unsupported capability version {0}")]
    UnsupportedVersion(u32),
    /// Token was issued for another host.
    #[error("capability was issued for a different host")]
    HostMismatch,
    /// Token is bound to another space.
    #[error("capability was issued for a different space")]
    SpaceMismatch,
    /// Token belongs to another public key.
    #[error("capability subject does not match this session")]
    SubjectMismatch,
    /// `expires_at` is not in the future.
    #[error("capability has expired")]
    Expired,
    /// `issued_at` is too far in the future.
    #[error("capability issued in the future")]
    IssuedInFuture,
    /// Requested scope not granted.
    #[error("capability does not grant {0}")]
    MissingScope(Scope),
    /// Channel-bound token presented for another channel.
    #[error("capability is not valid for this channel")]
    ChannelMismatch,
}

/// Everything a verification is checked against.
#[derive(Debug, Clone)]
pub struct CapabilityCheck<'a> {
    /// Whether the presenting session completed the pubkey handshake.
    pub authenticated: bool,
    /// The presenting session's public key.
    pub session_public_key: &'a str,
    /// Host the session belongs to.
    pub host_id: &'a str,
    /// The host's registered base64 signing key.
    pub host_signing_key: Option<&'a str>,
    /// Space the action targets.
    pub space_id: &'a str,
    /// Scope the action needs.
    pub scope: Scope,
    /// Channel the action targets, if channel-specific.
    pub channel_id: Option<&'a str>,
    /// Check time, unix seconds.
    pub now: i64,
}

/// Stateless verifier for capability tokens.
#[derive(Debug, Clone)]
pub struct CapabilityVerifier {
    clock_skew_secs: i64,
}

impl CapabilityVerifier {
    /// Create a verifier tolerating `clock_skew_secs` of host clock lead.
    pub fn new(clock_skew_secs: i64) -> Self {
        Self { clock_skew_secs }
    }

    /// Verify `token` for the given check, returning its claims.
    ///
    /// Checks run in a fixed order and stop at the first failure.
    pub fn verify(
        &self,
        token: Option<&str>,
        check: &CapabilityCheck<'_>,
    ) -> Result<CapabilityClaims, CapabilityError> {
        if !check.authenticated {
            return Err(CapabilityError::NotAuthenticated);
        }
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(CapabilityError::MissingToken)?;

        let segments: Vec<&str> = token.split('.').collect();
        let [payload_b64, signature_b64] = segments.as_slice() else {
            return Err(CapabilityError::MalformedToken);
        };

        let payload = decode_segment(payload_b64)?;
        let signature = decode_segment(signature_b64)?;
        let signature: [u8; SIGNATURE_LENGTH] = signature
            .try_into()
            .map_err(|_| CapabilityError::SignatureLength)?;

        let host_key = check
            .host_signing_key
            .ok_or(CapabilityError::HostKeyUnavailable)
            .and_then(|k| {
                decode_public_key(k).map_err(|_| CapabilityError::HostKeyUnavailable)
            })?;
        host_key
            .verify(&payload, &Signature::from_bytes(&signature))
            .map_err(|_| CapabilityError::BadSignature)?;

        let claims: CapabilityClaims =
            serde_json::from_slice(&payload).map_err(|_| CapabilityError::InvalidClaims)?;

        if claims.version != CAPABILITY_VERSION {
            return Err(CapabilityError::UnsupportedVersion(claims.version));
        }
        if claims.host_id != check.host_id {
            return Err(CapabilityError::HostMismatch);
        }
        if claims.space_id != check.space_id {
            return Err(CapabilityError::SpaceMismatch);
        }
        if claims.subject_public_key != check.session_public_key {
            return Err(CapabilityError::SubjectMismatch);
        }
        if claims.expires_at <= check.now {
            return Err(CapabilityError::Expired);
        }
        if claims.issued_at > check.now + self.clock_skew_secs {
            return Err(CapabilityError::IssuedInFuture);
        }
        if !claims.grants(check.scope) {
            return Err(CapabilityError::MissingScope(check.scope));
        }
        if let Some(channel_id) = check.channel_id {
            if !claims.covers_channel(channel_id) {
                return Err(CapabilityError::ChannelMismatch);
            }
        }

        Ok(claims)
    }
}

fn decode_segment(segment: &str) -> Result<Vec<u8>, CapabilityError> {
    URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|_| CapabilityError::UndecodableSegment)
}

/// Encode and sign claims into a capability token.
///
/// This is what a host backend does when granting access; the relay uses it
/// only for tooling and tests.
pub fn issue_token(
    claims: &CapabilityClaims,
    host_key: &SigningKey,
) -> Result<String, serde_json::Error> {
    let payload = serde_json::to_vec(claims)?;
    let signature = host_key.sign(&payload);
    Ok(format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(&payload),
        URL_SAFE_NO_PAD.encode(signature.to_bytes())
    ))
}

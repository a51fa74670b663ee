//! Payloads the relay itself interprets.
//!
//! Frames for host-backed actions carry host-specific fields the relay
//! never looks at; those travel as raw JSON and only the routing fields
//! below are decoded.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Role value a backend sends in [`JoinHost`] to announce itself as the author.
pub const AUTHOR_ROLE: &str = "author";

/// Attach a connection to a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinHost {
    /// Target host
    pub host_id: String,
    /// Author id the connecting backend believes the host has
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
    /// `"author"` for a backend connection, absent for end users
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Free-form device description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
}

impl JoinHost {
    /// Whether the sender asks to act as the host author.
    pub fn wants_author(&self) -> bool {
        self.role.as_deref() == Some(AUTHOR_ROLE)
    }
}

/// Join acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinHostSuccess {
    /// Joined host
    pub host_id: String,
    /// Relay-assigned session id
    pub session_id: String,
}

/// End-user challenge sent right after a join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthChallenge {
    /// Single-use random challenge
    pub challenge: String,
}

/// End-user handshake answer.
///
/// The signature covers `"parch-chat-auth:" + host_id + ":" + challenge`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuthPubkey {
    /// Base64 Ed25519 signing key
    #[serde(default)]
    pub public_key: String,
    /// Base64 key used by peers for end-to-end encryption (opaque to the relay)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enc_public_key: Option<String>,
    /// Requested display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Challenge being answered
    #[serde(default)]
    pub challenge: String,
    /// Base64 Ed25519 signature
    #[serde(default)]
    pub signature: String,
}

/// End-user handshake accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthPubkeySuccess {
    /// Numeric user id (pseudo id until the host supplies one)
    pub user_id: i64,
    /// Normalized display name
    pub username: String,
    /// Authenticated signing key
    pub public_key: String,
    /// End-to-end encryption key, if provided
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enc_public_key: Option<String>,
}

/// Host-author challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostAuthChallenge {
    /// Single-use random challenge
    pub challenge: String,
}

/// Host-author handshake answer.
///
/// The signature covers `"parch-host-auth:" + host_id + ":" + challenge`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HostAuth {
    /// Challenge being answered
    #[serde(default)]
    pub challenge: String,
    /// Base64 Ed25519 signature by the host's registered key
    #[serde(default)]
    pub signature: String,
}

/// Host-author handshake accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostAuthSuccess {
    /// Host this connection now authors
    pub host_id: String,
}

/// `relay_health_check` and its acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Correlation nonce, echoed by the author
    pub nonce: String,
}

/// Payload of `error`, `authentication-error` and `author_error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Human-readable description
    pub content: String,
    /// Session the error is about, when relayed from an author
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl ErrorPayload {
    /// Error without a client id.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            client_id: None,
        }
    }
}

/// `update_username` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateUsername {
    /// Requested display name
    #[serde(default)]
    pub username: String,
}

/// Routing fields of a space/channel action.
///
/// Any other fields in the frame are forwarded to the author untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActionRequest {
    /// Space acted on
    #[serde(default)]
    pub space_id: Option<String>,
    /// Channel acted on
    #[serde(default)]
    pub channel_id: Option<String>,
    /// Host-signed capability token
    #[serde(default)]
    pub capability: Option<String>,
}

/// `join_channel` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinChannel {
    /// Space the channel belongs to
    pub space_id: String,
    /// Channel to join
    pub channel_id: String,
    /// Host-signed capability token
    #[serde(default)]
    pub capability: Option<String>,
}

/// `chat` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    /// Space of the target channel
    pub space_id: String,
    /// Target channel; defaults to the session's current channel
    #[serde(default)]
    pub channel_id: Option<String>,
    /// End-to-end encrypted envelope (opaque to the relay)
    #[serde(default)]
    pub envelope: Value,
    /// Host-signed capability token
    #[serde(default)]
    pub capability: Option<String>,
}

/// Any `*_response` from the host author.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorResponse {
    /// Session id of the client that issued the original request
    pub client_id: String,
    /// Host-side failure, forwarded to the client as an `error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Everything else, passed through to the client
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl AuthorResponse {
    /// A string field of the body.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.body.get(key).and_then(Value::as_str)
    }

    /// An integer field of the body.
    pub fn i64_field(&self, key: &str) -> Option<i64> {
        self.body.get(key).and_then(Value::as_i64)
    }

    /// The `id` of a nested object field, e.g. `space.id`.
    pub fn nested_id(&self, key: &str) -> Option<String> {
        match self.body.get(key)?.get("id")? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

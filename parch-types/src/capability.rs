//! Capability claims - the signed body of a host-issued authorization token.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The only claims version the relay accepts.
pub const CAPABILITY_VERSION: u32 = 1;

/// `channel_scope` value that covers every channel of the space.
pub const WILDCARD_CHANNEL: &str = "*";

/// An action a capability may unlock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Join a channel or subscribe to a space
    JoinChannel,
    /// Send chat envelopes
    SendMessage,
    /// Read channel listings and history
    ReadHistory,
    /// Create a channel
    CreateChannel,
    /// Delete a channel
    DeleteChannel,
    /// Invite a user to the space
    InviteUser,
    /// Remove a user from the space
    RemoveSpaceUser,
    /// Delete the space
    DeleteSpace,
}

impl Scope {
    /// Wire name of the scope.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::JoinChannel => "join_channel",
            Scope::SendMessage => "send_message",
            Scope::ReadHistory => "read_history",
            Scope::CreateChannel => "create_channel",
            Scope::DeleteChannel => "delete_channel",
            Scope::InviteUser => "invite_user",
            Scope::RemoveSpaceUser => "remove_space_user",
            Scope::DeleteSpace => "delete_space",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claims signed by a host to authorize one subject within one space.
///
/// Scopes are kept as strings so tokens minted by newer hosts with scopes
/// this relay does not know still decode; unknown scopes simply never match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityClaims {
    /// Claims format version
    pub version: u32,
    /// Issuing host
    pub host_id: String,
    /// Space the token is bound to
    pub space_id: String,
    /// Public key of the session allowed to present the token
    pub subject_public_key: String,
    /// Granted scopes
    pub scopes: Vec<String>,
    /// Unix seconds after which the token is invalid
    pub expires_at: i64,
    /// Unix seconds at which the host issued the token
    pub issued_at: i64,
    /// Host-chosen token identifier
    pub token_id: String,
    /// `"*"` or a single channel id
    #[serde(default = "default_channel_scope")]
    pub channel_scope: String,
}

fn default_channel_scope() -> String {
    WILDCARD_CHANNEL.to_string()
}

impl CapabilityClaims {
    /// Whether the claims grant `scope`.
    pub fn grants(&self, scope: Scope) -> bool {
        self.scopes.iter().any(|s| s == scope.as_str())
    }

    /// Whether the claims cover `channel_id`.
    pub fn covers_channel(&self, channel_id: &str) -> bool {
        self.channel_scope == WILDCARD_CHANNEL || self.channel_scope == channel_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims(scopes: &[&str], channel_scope: &str) -> CapabilityClaims {
        CapabilityClaims {
            version: CAPABILITY_VERSION,
            host_id: "host-123".into(),
            space_id: "space-1".into(),
            subject_public_key: "pk".into(),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            expires_at: 2_000_000_000,
            issued_at: 1_700_000_000,
            token_id: "tok-1".into(),
            channel_scope: channel_scope.into(),
        }
    }

    #[test]
    fn grants_matches_wire_names() {
        let c = claims(&["join_channel", "send_message", "read_history"], "*");
        assert!(c.grants(Scope::JoinChannel));
        assert!(c.grants(Scope::SendMessage));
        assert!(!c.grants(Scope::DeleteSpace));
    }

    #[test]
    fn channel_scope_wildcard_and_exact() {
        assert!(claims(&[], "*").covers_channel("general"));
        assert!(claims(&[], "general").covers_channel("general"));
        assert!(!claims(&[], "general").covers_channel("random"));
    }

    #[test]
    fn missing_channel_scope_defaults_to_wildcard() {
        let c: CapabilityClaims = serde_json::from_value(json!({
            "version": 1,
            "host_id": "h",
            "space_id": "s",
            "subject_public_key": "pk",
            "scopes": ["future_scope"],
            "expires_at": 10,
            "issued_at": 1,
            "token_id": "t",
        }))
        .unwrap();
        assert_eq!(c.channel_scope, WILDCARD_CHANNEL);
        assert!(!c.grants(Scope::JoinChannel));
    }

    #[test]
    fn scope_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&Scope::RemoveSpaceUser).unwrap(),
            "\"remove_space_user\""
        );
        assert_eq!(Scope::RemoveSpaceUser.to_string(), "remove_space_user");
    }
}

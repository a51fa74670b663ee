//! Frame handlers.
//!
//! Client actions either stay inside the relay (channel and space
//! subscriptions) or are forwarded to the host author, whose reply is routed
//! back by `client_id`. The relay keeps no pending state for those round
//! trips: everything it needs to finish one is carried in the reply.

mod auth;
mod author;
mod channels;
mod join;
mod messages;
mod spaces;

use crate::capability::CapabilityCheck;
use crate::error::{HandlerError, HandlerResult};
use crate::host::Host;
use crate::server::{Relay, RelayMetrics};
use crate::session::{unix_now, Session};
use parch_types::{AuthorResponse, CapabilityClaims, Frame, MessageType, Scope};
use serde_json::{Map, Value};

/// Content of the `author_error` sent when a forward finds no author.
pub const AUTHOR_UNREACHABLE: &str = "host author is not connected";

impl Relay {
    /// Verify a capability token for an action by `session`.
    pub(crate) fn authorize(
        &self,
        host: &Host,
        session: &Session,
        token: Option<&str>,
        space_id: &str,
        scope: Scope,
        channel_id: Option<&str>,
    ) -> HandlerResult<CapabilityClaims> {
        let identity = session.snapshot();
        let public_key = identity.public_key.unwrap_or_default();
        let check = CapabilityCheck {
            authenticated: identity.authenticated,
            session_public_key: &public_key,
            host_id: host.id(),
            host_signing_key: host.signing_key(),
            space_id,
            scope,
            channel_id,
            now: unix_now(),
        };
        Ok(self.verifier().verify(token, &check)?)
    }

    /// Forward a client request to the host author.
    ///
    /// The capability is stripped and the requester's `client_id`,
    /// `user_id` and `public_key` are injected.
    pub(crate) fn forward_to_author(
        &self,
        host: &Host,
        session: &Session,
        kind: MessageType,
        mut body: Map<String, Value>,
    ) -> HandlerResult {
        let identity = session.snapshot();
        body.remove("capability");
        body.insert(
            "client_id".into(),
            Value::String(session.session_id().to_string()),
        );
        body.insert("user_id".into(), Value::from(identity.user_id));
        body.insert(
            "public_key".into(),
            Value::String(identity.public_key.unwrap_or_default()),
        );

        if !self.send_to_author(host, Frame::new(kind, Value::Object(body))) {
            return Err(HandlerError::host(AUTHOR_UNREACHABLE));
        }
        RelayMetrics::incr(&self.metrics().forwarded_total);
        tracing::debug!(
            "Forwarded {} for session {} to author of host {}",
            kind,
            session.session_id(),
            host.id()
        );
        Ok(())
    }
}

/// Refuse a channel the relay already maps to a different space.
pub(crate) fn ensure_channel_in_space(
    host: &Host,
    space_id: &str,
    channel_id: &str,
) -> HandlerResult {
    match host.channel_space(channel_id) {
        Some(owner) if owner != space_id => Err(HandlerError::protocol(format!(
            "channel {channel_id} does not belong to space {space_id}"
        ))),
        _ => Ok(()),
    }
}

/// The payload of a client frame as a JSON object.
pub(crate) fn object_body(frame: Frame) -> HandlerResult<Map<String, Value>> {
    match frame.data {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        _ => Err(HandlerError::protocol(format!(
            "{} payload must be an object",
            frame.kind
        ))),
    }
}

/// A required, non-blank id field.
pub(crate) fn required<'a>(value: Option<&'a str>, field: &str) -> HandlerResult<&'a str> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| HandlerError::protocol(format!("{field} is required")))
}

/// An id from a JSON object: a string or number under `key`, or the `id`
/// of the object under `nested`.
pub(crate) fn id_field(response: &AuthorResponse, key: &str, nested: &str) -> Option<String> {
    match response.body.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => response.nested_id(nested),
    }
}

/// A string id from a raw client body.
pub(crate) fn body_id(body: &Map<String, Value>, key: &str) -> Option<String> {
    match body.get(key) {
        Some(Value::String(s)) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(value: Value) -> AuthorResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn id_field_accepts_string_number_or_nested() {
        let r = response(json!({"client_id": "c", "space_id": "s1"}));
        assert_eq!(id_field(&r, "space_id", "space").as_deref(), Some("s1"));

        let r = response(json!({"client_id": "c", "space_id": 42}));
        assert_eq!(id_field(&r, "space_id", "space").as_deref(), Some("42"));

        let r = response(json!({"client_id": "c", "space": {"id": "s9", "name": "x"}}));
        assert_eq!(id_field(&r, "space_id", "space").as_deref(), Some("s9"));

        let r = response(json!({"client_id": "c"}));
        assert_eq!(id_field(&r, "space_id", "space"), None);
    }

    #[test]
    fn object_body_rejects_non_objects() {
        let frame = Frame::new(MessageType::GetDashboard, Value::Null);
        assert!(object_body(frame).unwrap().is_empty());

        let frame = Frame::new(MessageType::GetDashboard, json!([1, 2]));
        assert!(matches!(object_body(frame), Err(HandlerError::Protocol(_))));
    }

    #[test]
    fn required_trims_and_rejects_blank() {
        assert_eq!(required(Some(" s1 "), "space_id").unwrap(), "s1");
        let err = required(Some("  "), "space_id").unwrap_err();
        assert_eq!(err.to_string(), "space_id is required");
        assert!(required(None, "space_id").is_err());
    }

    #[test]
    fn channel_owner_must_match_space() {
        let host = Host::new(crate::storage::HostRecord {
            host_id: "h".into(),
            author_id: "a".into(),
            signing_public_key: None,
        });
        host.map_channel("c1", "s1");

        assert!(ensure_channel_in_space(&host, "s1", "c1").is_ok());
        assert!(ensure_channel_in_space(&host, "s2", "unmapped").is_ok());
        let err = ensure_channel_in_space(&host, "s2", "c1").unwrap_err();
        assert_eq!(err.to_string(), "channel c1 does not belong to space s2");
    }

    #[test]
    fn body_id_reads_strings_and_numbers() {
        let body = json!({"a": " x ", "b": 7, "c": ""});
        let body = body.as_object().unwrap();
        assert_eq!(body_id(body, "a").as_deref(), Some("x"));
        assert_eq!(body_id(body, "b").as_deref(), Some("7"));
        assert_eq!(body_id(body, "c"), None);
        assert_eq!(body_id(body, "d"), None);
    }
}

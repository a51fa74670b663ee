//! Frame - the JSON envelope wrapping every socket message.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ErrorPayload, TypesError};

macro_rules! message_types {
    ($($(#[$doc:meta])* $variant:ident => $name:literal,)+) => {
        /// Every frame type the relay knows about.
        ///
        /// Frames with other type names are still decodable as a [`Frame`]
        /// but are rejected by the relay dispatcher.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum MessageType {
            $($(#[$doc])* $variant,)+
        }

        impl MessageType {
            /// The wire name of this frame type.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(MessageType::$variant => $name,)+
                }
            }

            /// Look up a frame type by its wire name.
            pub fn parse(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(MessageType::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

message_types! {
    // client -> relay
    /// Attach the connection to a host
    JoinHost => "join_host",
    /// End-user pubkey handshake answer
    AuthPubkey => "auth_pubkey",
    /// Host-author handshake answer
    HostAuth => "host_auth",
    /// Change the session's display name
    UpdateUsername => "update_username",
    /// Fetch the user's dashboard from the host
    GetDashboard => "get_dashboard",
    /// Create a space
    CreateSpace => "create_space",
    /// Delete a space
    DeleteSpace => "delete_space",
    /// Subscribe to a space's broadcasts
    JoinSpace => "join_space",
    /// Unsubscribe from a space
    LeaveSpace => "leave_space",
    /// List a space's channels
    GetChannels => "get_channels",
    /// Create a channel in a space
    CreateChannel => "create_channel",
    /// Delete a channel from a space
    DeleteChannel => "delete_channel",
    /// Join a channel (leaves any previous one)
    JoinChannel => "join_channel",
    /// Leave the current channel
    LeaveChannel => "leave_channel",
    /// Invite a user to a space
    InviteUser => "invite_user",
    /// Remove a user from a space
    RemoveSpaceUser => "remove_space_user",
    /// Fetch channel message history
    GetMessages => "get_messages",
    /// Send an encrypted envelope to the current channel
    Chat => "chat",

    // relay -> client
    /// Join acknowledgement
    JoinHostSuccess => "join_host_success",
    /// End-user challenge
    AuthChallenge => "auth_challenge",
    /// End-user handshake accepted
    AuthPubkeySuccess => "auth_pubkey_success",
    /// Host-author challenge
    HostAuthChallenge => "host_auth_challenge",
    /// Host-author handshake accepted
    HostAuthSuccess => "host_auth_success",
    /// Host assigned the session its real identity
    IdentityUpdate => "identity_update",
    /// Display name changed
    UpdateUsernameSuccess => "update_username_success",
    /// Dashboard contents
    DashboardData => "dashboard_data",
    /// Space created
    CreateSpaceSuccess => "create_space_success",
    /// Space deleted (to the requester)
    DeleteSpaceSuccess => "delete_space_success",
    /// Space deleted (to members)
    SpaceDeleted => "space_deleted",
    /// Space subscription added
    JoinSpaceSuccess => "join_space_success",
    /// Space subscription removed
    LeaveSpaceSuccess => "leave_space_success",
    /// Channel listing
    ChannelsList => "channels_list",
    /// Channel created (to the requester)
    CreateChannelSuccess => "create_channel_success",
    /// Channel created (to space members)
    ChannelCreated => "channel_created",
    /// Channel deleted (to the requester)
    DeleteChannelSuccess => "delete_channel_success",
    /// Channel deleted (to space members)
    ChannelDeleted => "channel_deleted",
    /// Channel joined
    JoinChannelSuccess => "join_channel_success",
    /// Channel left
    LeaveChannelSuccess => "leave_channel_success",
    /// Another user joined the channel
    UserJoinedChannel => "user_joined_channel",
    /// Another user left the channel
    UserLeftChannel => "user_left_channel",
    /// Invite accepted by the host
    InviteUserSuccess => "invite_user_success",
    /// Delivered to an online invitee
    SpaceInvite => "space_invite",
    /// Member removal accepted by the host
    RemoveSpaceUserSuccess => "remove_space_user_success",
    /// A member was removed (to space members)
    SpaceUserRemoved => "space_user_removed",
    /// Delivered to the removed member
    RemovedFromSpace => "removed_from_space",
    /// Channel history page
    MessageHistory => "message_history",
    /// A new message in the current channel
    NewMessage => "new_message",
    /// Generic or authorization error
    Error => "error",
    /// Authentication failure
    AuthenticationError => "authentication-error",
    /// Host connectivity failure
    AuthorError => "author_error",

    // relay -> author
    /// Liveness probe
    RelayHealthCheck => "relay_health_check",
    /// Ask the host for the user's real identity
    IdentityUpsertRequest => "identity_upsert_request",
    /// Forwarded display-name change
    UpdateUsernameRequest => "update_username_request",
    /// Forwarded dashboard fetch
    DashboardRequest => "dashboard_request",
    /// Forwarded space creation
    CreateSpaceRequest => "create_space_request",
    /// Forwarded space deletion
    DeleteSpaceRequest => "delete_space_request",
    /// Forwarded channel listing
    ChannelsRequest => "channels_request",
    /// Forwarded channel creation
    CreateChannelRequest => "create_channel_request",
    /// Forwarded channel deletion
    DeleteChannelRequest => "delete_channel_request",
    /// Forwarded invite
    InviteUserRequest => "invite_user_request",
    /// Forwarded member removal
    RemoveSpaceUserRequest => "remove_space_user_request",
    /// Forwarded history fetch
    MessageHistoryRequest => "message_history_request",
    /// Forwarded chat send
    NewMessageRequest => "new_message_request",

    // author -> relay
    /// Liveness probe answer
    RelayHealthCheckAck => "relay_health_check_ack",
    /// Host identity answer
    IdentityUpsertResponse => "identity_upsert_response",
    /// Display-name change answer
    UpdateUsernameResponse => "update_username_response",
    /// Dashboard answer
    DashboardResponse => "dashboard_response",
    /// Space creation answer
    CreateSpaceResponse => "create_space_response",
    /// Space deletion answer
    DeleteSpaceResponse => "delete_space_response",
    /// Channel listing answer
    ChannelsResponse => "channels_response",
    /// Channel creation answer
    CreateChannelResponse => "create_channel_response",
    /// Channel deletion answer
    DeleteChannelResponse => "delete_channel_response",
    /// Invite answer
    InviteUserResponse => "invite_user_response",
    /// Member removal answer
    RemoveSpaceUserResponse => "remove_space_user_response",
    /// History answer
    MessageHistoryResponse => "message_history_response",
    /// Chat send answer
    NewMessageResponse => "new_message_response",
}

impl MessageType {
    /// Whether this is a reply the host author sends back to the relay.
    ///
    /// Author-eligible sessions may send these before their own pubkey
    /// authentication, since their trust comes from the author handshake.
    pub fn is_author_response(&self) -> bool {
        matches!(
            self,
            MessageType::RelayHealthCheckAck
                | MessageType::IdentityUpsertResponse
                | MessageType::UpdateUsernameResponse
                | MessageType::DashboardResponse
                | MessageType::CreateSpaceResponse
                | MessageType::DeleteSpaceResponse
                | MessageType::ChannelsResponse
                | MessageType::CreateChannelResponse
                | MessageType::DeleteChannelResponse
                | MessageType::InviteUserResponse
                | MessageType::RemoveSpaceUserResponse
                | MessageType::MessageHistoryResponse
                | MessageType::NewMessageResponse
                | MessageType::Error
                | MessageType::AuthorError
        )
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `{"type": ..., "data": ...}` envelope.
///
/// `data` is kept as raw JSON so the relay can pass host-specific fields
/// through untouched and only decode what it needs to check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Frame type name
    #[serde(rename = "type")]
    pub kind: String,
    /// Type-specific payload
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    /// Build a frame from a known type and raw JSON data.
    pub fn new(kind: MessageType, data: Value) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            data,
        }
    }

    /// Build a frame from a known type and a payload struct.
    ///
    /// Payload structs are plain data; a payload that cannot be represented
    /// as JSON becomes `null`.
    pub fn with_payload<T: Serialize>(kind: MessageType, payload: &T) -> Self {
        Self::new(kind, serde_json::to_value(payload).unwrap_or(Value::Null))
    }

    /// Generic `error` frame.
    pub fn error(content: impl Into<String>) -> Self {
        Self::with_payload(MessageType::Error, &ErrorPayload::new(content))
    }

    /// `authentication-error` frame.
    pub fn authentication_error(content: impl Into<String>) -> Self {
        Self::with_payload(MessageType::AuthenticationError, &ErrorPayload::new(content))
    }

    /// `author_error` frame.
    pub fn author_error(content: impl Into<String>) -> Self {
        Self::with_payload(MessageType::AuthorError, &ErrorPayload::new(content))
    }

    /// The known type of this frame, if any.
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::parse(&self.kind)
    }

    /// Decode the payload into `T`.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, TypesError> {
        T::deserialize(&self.data).map_err(|source| TypesError::InvalidPayload {
            kind: self.kind.clone(),
            source,
        })
    }

    /// Serialize to JSON text.
    pub fn to_text(&self) -> Result<String, TypesError> {
        serde_json::to_string(self).map_err(TypesError::Serialization)
    }

    /// Deserialize from JSON text.
    pub fn from_text(text: &str) -> Result<Self, TypesError> {
        serde_json::from_str(text).map_err(TypesError::MalformedFrame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JoinHost;
    use serde_json::json;

    #[test]
    fn message_type_names_are_unique_and_reversible() {
        for name in [
            "join_host",
            "auth_pubkey",
            "chat",
            "authentication-error",
            "relay_health_check_ack",
            "new_message_response",
        ] {
            let kind = MessageType::parse(name).unwrap();
            assert_eq!(kind.as_str(), name);
        }
        assert_eq!(MessageType::parse("join_hosts"), None);
    }

    #[test]
    fn author_responses_are_flagged() {
        assert!(MessageType::DashboardResponse.is_author_response());
        assert!(MessageType::RelayHealthCheckAck.is_author_response());
        assert!(MessageType::Error.is_author_response());
        assert!(!MessageType::Chat.is_author_response());
        assert!(!MessageType::DashboardRequest.is_author_response());
    }

    #[test]
    fn frame_uses_type_and_data_keys() {
        let frame = Frame::new(MessageType::AuthChallenge, json!({"challenge": "abc"}));
        let text = frame.to_text().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "auth_challenge");
        assert_eq!(value["data"]["challenge"], "abc");
    }

    #[test]
    fn frame_without_data_decodes_as_null() {
        let frame = Frame::from_text(r#"{"type":"leave_channel"}"#).unwrap();
        assert_eq!(frame.message_type(), Some(MessageType::LeaveChannel));
        assert!(frame.data.is_null());
    }

    #[test]
    fn frame_payload_decodes_typed_data() {
        let frame = Frame::from_text(r#"{"type":"join_host","data":{"host_id":"host-123"}}"#)
            .unwrap();
        let join: JoinHost = frame.payload().unwrap();
        assert_eq!(join.host_id, "host-123");
        assert!(join.role.is_none());
    }

    #[test]
    fn malformed_text_is_rejected() {
        assert!(matches!(
            Frame::from_text("{not json"),
            Err(TypesError::MalformedFrame(_))
        ));
        assert!(matches!(
            Frame::from_text(r#"{"data":{}}"#),
            Err(TypesError::MalformedFrame(_))
        ));
    }

    #[test]
    fn error_frames_carry_content() {
        let frame = Frame::author_error("host is offline or unresponsive");
        assert_eq!(frame.kind, "author_error");
        assert_eq!(frame.data["content"], "host is offline or unresponsive");
        assert!(frame.data.get("client_id").is_none());
    }
}

//! Replies from the host author.
//!
//! Every reply names the requesting session by `client_id`. A reply that
//! carries an `error` string is passed to that client as an `error` frame
//! and has no other effect.

use super::id_field;
use crate::error::{HandlerError, HandlerResult};
use crate::host::Host;
use crate::server::Relay;
use crate::session::Session;
use parch_types::{AuthorResponse, ErrorPayload, Frame, HealthCheck, MessageType, SessionId};
use serde_json::{json, Map, Value};
use std::sync::Arc;

impl Relay {
    /// Handle a frame from the host's current author.
    pub(crate) fn handle_author_frame(
        &self,
        host: &Arc<Host>,
        kind: MessageType,
        frame: Frame,
    ) -> HandlerResult {
        match kind {
            MessageType::RelayHealthCheckAck => {
                let ack: HealthCheck = frame.payload()?;
                if !self.acknowledge_liveness(&ack.nonce) {
                    tracing::debug!("Stale liveness ack {} from host {}", ack.nonce, host.id());
                }
                Ok(())
            }
            MessageType::Error | MessageType::AuthorError => {
                let error: ErrorPayload = frame.payload()?;
                match error.client_id.as_deref() {
                    Some(client_id) => {
                        let target = self.target(host, client_id)?;
                        target.deliver(Frame::error(error.content));
                    }
                    None => {
                        tracing::warn!("Author of host {} reported: {}", host.id(), error.content)
                    }
                }
                Ok(())
            }
            _ => {
                let response: AuthorResponse = frame.payload()?;
                let target = self.target(host, &response.client_id)?;
                if let Some(error) = &response.error {
                    target.deliver(Frame::error(error.clone()));
                    return Ok(());
                }
                self.complete(host, &target, kind, response)
            }
        }
    }

    fn target(&self, host: &Host, client_id: &str) -> HandlerResult<Arc<Session>> {
        SessionId::parse(client_id)
            .and_then(|id| host.session_by_id(&id))
            .ok_or_else(|| {
                HandlerError::Resource(format!(
                    "no session {client_id} on host {} for author reply",
                    host.id()
                ))
            })
    }

    /// Apply a successful reply and notify the affected sessions.
    fn complete(
        &self,
        host: &Host,
        target: &Arc<Session>,
        kind: MessageType,
        response: AuthorResponse,
    ) -> HandlerResult {
        let conn = target.connection_id();
        match kind {
            MessageType::IdentityUpsertResponse => {
                let user_id = response
                    .i64_field("user_id")
                    .filter(|id| *id > 0)
                    .ok_or_else(|| HandlerError::protocol("user_id is required"))?;
                host.rebind_user_id(conn, user_id);
                if let Some(username) = response.str_field("username") {
                    target.identity().username = username.to_string();
                }
                let identity = target.snapshot();
                target.deliver(Frame::new(
                    MessageType::IdentityUpdate,
                    json!({
                        "user_id": identity.user_id,
                        "username": identity.username,
                        "public_key": identity.public_key,
                    }),
                ));
                tracing::debug!("Session {} rebound to user {}", target.session_id(), user_id);
            }
            MessageType::UpdateUsernameResponse => {
                if let Some(username) = response.str_field("username") {
                    target.identity().username = username.to_string();
                }
                let identity = target.snapshot();
                let mut body = response.body;
                body.insert("username".into(), Value::String(identity.username));
                body.insert("user_id".into(), Value::from(identity.user_id));
                target.deliver(Frame::new(
                    MessageType::UpdateUsernameSuccess,
                    Value::Object(body),
                ));
            }
            MessageType::DashboardResponse => {
                target.deliver(Frame::new(
                    MessageType::DashboardData,
                    Value::Object(response.body),
                ));
            }
            MessageType::CreateSpaceResponse => {
                if let Some(space_id) = id_field(&response, "space_id", "space") {
                    host.join_space(conn, &space_id);
                }
                target.deliver(Frame::new(
                    MessageType::CreateSpaceSuccess,
                    Value::Object(response.body),
                ));
            }
            MessageType::DeleteSpaceResponse => {
                let space_id = id_field(&response, "space_id", "space")
                    .ok_or_else(|| HandlerError::protocol("space_id is required"))?;
                let notice = Frame::new(MessageType::SpaceDeleted, json!({ "space_id": space_id }));
                self.broadcast_space(host, &space_id, notice, None);
                host.drop_space(&space_id);
                target.deliver(Frame::new(
                    MessageType::DeleteSpaceSuccess,
                    Value::Object(response.body),
                ));
            }
            MessageType::ChannelsResponse => {
                if let Some(space_id) = id_field(&response, "space_id", "space") {
                    for channel_id in channel_ids(&response.body) {
                        host.map_channel(&channel_id, &space_id);
                    }
                }
                target.deliver(Frame::new(
                    MessageType::ChannelsList,
                    Value::Object(response.body),
                ));
            }
            MessageType::CreateChannelResponse => {
                let space_id = id_field(&response, "space_id", "space");
                let channel_id = id_field(&response, "channel_id", "channel");
                if let (Some(space_id), Some(channel_id)) = (&space_id, &channel_id) {
                    host.map_channel(channel_id, space_id);
                    let notice =
                        Frame::new(MessageType::ChannelCreated, Value::Object(response.body.clone()));
                    self.broadcast_space(host, space_id, notice, None);
                }
                target.deliver(Frame::new(
                    MessageType::CreateChannelSuccess,
                    Value::Object(response.body),
                ));
            }
            MessageType::DeleteChannelResponse => {
                let channel_id = id_field(&response, "channel_id", "channel")
                    .ok_or_else(|| HandlerError::protocol("channel_id is required"))?;
                let mapped = host.unmap_channel(&channel_id);
                let space_id = id_field(&response, "space_id", "space").or(mapped);
                if let Some(space_id) = space_id {
                    let notice = Frame::new(
                        MessageType::ChannelDeleted,
                        json!({ "space_id": space_id, "channel_id": channel_id }),
                    );
                    self.broadcast_space(host, &space_id, notice, None);
                }
                target.deliver(Frame::new(
                    MessageType::DeleteChannelSuccess,
                    Value::Object(response.body),
                ));
            }
            MessageType::InviteUserResponse => {
                let invitees = find_user(host, &response, "invitee_user_id", "invitee_public_key");
                for invitee in invitees {
                    invitee.deliver(Frame::new(
                        MessageType::SpaceInvite,
                        Value::Object(response.body.clone()),
                    ));
                }
                target.deliver(Frame::new(
                    MessageType::InviteUserSuccess,
                    Value::Object(response.body),
                ));
            }
            MessageType::RemoveSpaceUserResponse => {
                let space_id = id_field(&response, "space_id", "space")
                    .ok_or_else(|| HandlerError::protocol("space_id is required"))?;
                let removed = find_user(host, &response, "removed_user_id", "removed_public_key");
                for session in removed {
                    if let Some(channel_id) = host.leave_space(session.connection_id(), &space_id) {
                        self.announce_left(host, &session, &channel_id);
                    }
                    session.deliver(Frame::new(
                        MessageType::RemovedFromSpace,
                        json!({ "space_id": space_id }),
                    ));
                }
                let notice = Frame::new(
                    MessageType::SpaceUserRemoved,
                    Value::Object(response.body.clone()),
                );
                self.broadcast_space(host, &space_id, notice, None);
                target.deliver(Frame::new(
                    MessageType::RemoveSpaceUserSuccess,
                    Value::Object(response.body),
                ));
            }
            MessageType::MessageHistoryResponse => {
                target.deliver(Frame::new(
                    MessageType::MessageHistory,
                    Value::Object(response.body),
                ));
            }
            MessageType::NewMessageResponse => {
                let channel_id = id_field(&response, "channel_id", "channel")
                    .ok_or_else(|| HandlerError::protocol("channel_id is required"))?;
                let message = Frame::new(MessageType::NewMessage, Value::Object(response.body));
                let delivered = self.broadcast_channel(host, &channel_id, message, None);
                tracing::debug!("new_message to channel {}: {} sessions", channel_id, delivered);
            }
            other => {
                return Err(HandlerError::protocol(format!(
                    "unexpected author message type: {other}"
                )))
            }
        }
        Ok(())
    }
}

/// Ids of the `channels` array of a channel list.
fn channel_ids(body: &Map<String, Value>) -> Vec<String> {
    let Some(Value::Array(channels)) = body.get("channels") else {
        return Vec::new();
    };
    channels
        .iter()
        .filter_map(|channel| match channel.get("id")? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect()
}

/// Every live session named by the user id or public key fields of a reply.
fn find_user(
    host: &Host,
    response: &AuthorResponse,
    id_key: &str,
    key_key: &str,
) -> Vec<Arc<Session>> {
    let by_user = response
        .i64_field(id_key)
        .map(|user_id| host.sessions_by_user(user_id))
        .unwrap_or_default();
    if !by_user.is_empty() {
        return by_user;
    }
    response
        .str_field(key_key)
        .map(|public_key| host.sessions_by_key(public_key))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_ids_reads_string_and_numeric_ids() {
        let body = json!({"channels": [{"id": "c1"}, {"id": 7}, {"name": "no id"}]});
        assert_eq!(channel_ids(body.as_object().unwrap()), vec!["c1", "7"]);

        let body = json!({"channels": "not a list"});
        assert!(channel_ids(body.as_object().unwrap()).is_empty());
    }
}

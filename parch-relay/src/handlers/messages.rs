//! History reads and chat sends.

use super::{ensure_channel_in_space, object_body, required};
use crate::error::{HandlerError, HandlerResult};
use crate::host::Host;
use crate::server::Relay;
use crate::session::Session;
use parch_types::{ActionRequest, Chat, Frame, MessageType, Scope};
use serde_json::Value;
use std::sync::Arc;

impl Relay {
    pub(crate) fn handle_get_messages(
        &self,
        host: &Arc<Host>,
        session: &Arc<Session>,
        frame: Frame,
    ) -> HandlerResult {
        let request: ActionRequest = frame.payload()?;
        let space_id = required(request.space_id.as_deref(), "space_id")?;
        let channel_id = required(request.channel_id.as_deref(), "channel_id")?;
        ensure_channel_in_space(host, space_id, channel_id)?;
        self.authorize(
            host,
            session,
            request.capability.as_deref(),
            space_id,
            Scope::ReadHistory,
            Some(channel_id),
        )?;
        let body = object_body(frame)?;
        self.forward_to_author(host, session, MessageType::MessageHistoryRequest, body)
    }

    /// Chat send.
    ///
    /// Nothing reaches the author until channel ownership, the capability,
    /// the envelope shape and the sliding-window rate limit have passed.
    /// Only a send that passed the other checks counts against the window.
    /// Without an explicit `channel_id` the session's current channel is
    /// used.
    pub(crate) fn handle_chat(
        &self,
        host: &Arc<Host>,
        session: &Arc<Session>,
        frame: Frame,
    ) -> HandlerResult {
        let chat: Chat = frame.payload()?;
        let space_id = required(Some(chat.space_id.as_str()), "space_id")?;
        let channel_id = match chat.channel_id.as_deref().map(str::trim) {
            Some(channel_id) if !channel_id.is_empty() => channel_id.to_string(),
            _ => host
                .current_channel(session.connection_id())
                .ok_or_else(|| HandlerError::protocol("join a channel first"))?,
        };
        ensure_channel_in_space(host, space_id, &channel_id)?;

        self.authorize(
            host,
            session,
            chat.capability.as_deref(),
            space_id,
            Scope::SendMessage,
            Some(&channel_id),
        )?;
        self.envelope_limits().validate(&chat.envelope)?;
        self.rate_limits().check_chat(&session.session_id())?;

        let mut body = object_body(frame)?;
        body.insert("space_id".into(), Value::String(space_id.to_string()));
        body.insert("channel_id".into(), Value::String(channel_id));
        self.forward_to_author(host, session, MessageType::NewMessageRequest, body)
    }
}

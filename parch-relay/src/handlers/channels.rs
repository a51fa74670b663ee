//! Channel actions.

use super::{ensure_channel_in_space, object_body, required};
use crate::error::{HandlerError, HandlerResult};
use crate::host::Host;
use crate::server::Relay;
use crate::session::Session;
use parch_types::{ActionRequest, Frame, JoinChannel, MessageType, Scope};
use serde_json::{json, Value};
use std::sync::Arc;

impl Relay {
    /// Tell the rest of `channel_id` that `session` left.
    pub(crate) fn announce_left(&self, host: &Host, session: &Session, channel_id: &str) {
        let frame = presence_frame(MessageType::UserLeftChannel, session, channel_id);
        self.broadcast_channel(host, channel_id, frame, Some(session.connection_id()));
    }

    fn announce_joined(&self, host: &Host, session: &Session, channel_id: &str) {
        let frame = presence_frame(MessageType::UserJoinedChannel, session, channel_id);
        self.broadcast_channel(host, channel_id, frame, Some(session.connection_id()));
    }

    pub(crate) fn handle_get_channels(
        &self,
        host: &Arc<Host>,
        session: &Arc<Session>,
        frame: Frame,
    ) -> HandlerResult {
        let request: ActionRequest = frame.payload()?;
        let space_id = required(request.space_id.as_deref(), "space_id")?;
        self.authorize(
            host,
            session,
            request.capability.as_deref(),
            space_id,
            Scope::ReadHistory,
            None,
        )?;
        let body = object_body(frame)?;
        self.forward_to_author(host, session, MessageType::ChannelsRequest, body)
    }

    pub(crate) fn handle_create_channel(
        &self,
        host: &Arc<Host>,
        session: &Arc<Session>,
        frame: Frame,
    ) -> HandlerResult {
        let request: ActionRequest = frame.payload()?;
        let space_id = required(request.space_id.as_deref(), "space_id")?;
        self.authorize(
            host,
            session,
            request.capability.as_deref(),
            space_id,
            Scope::CreateChannel,
            None,
        )?;
        let body = object_body(frame)?;
        self.forward_to_author(host, session, MessageType::CreateChannelRequest, body)
    }

    /// Channel-bound: a capability scoped to another channel is refused.
    pub(crate) fn handle_delete_channel(
        &self,
        host: &Arc<Host>,
        session: &Arc<Session>,
        frame: Frame,
    ) -> HandlerResult {
        let request: ActionRequest = frame.payload()?;
        let channel_id = required(request.channel_id.as_deref(), "channel_id")?;
        let space_id = match request.space_id.as_deref() {
            Some(space_id) => required(Some(space_id), "space_id")?.to_string(),
            None => host
                .channel_space(channel_id)
                .ok_or_else(|| HandlerError::protocol("space_id is required"))?,
        };
        ensure_channel_in_space(host, &space_id, channel_id)?;
        self.authorize(
            host,
            session,
            request.capability.as_deref(),
            &space_id,
            Scope::DeleteChannel,
            Some(channel_id),
        )?;
        let mut body = object_body(frame)?;
        body.insert("space_id".into(), Value::String(space_id));
        self.forward_to_author(host, session, MessageType::DeleteChannelRequest, body)
    }

    /// Subscribe to a channel, leaving any other channel first.
    pub(crate) fn handle_join_channel(
        &self,
        host: &Arc<Host>,
        session: &Arc<Session>,
        frame: &Frame,
    ) -> HandlerResult {
        let request: JoinChannel = frame.payload()?;
        let space_id = required(Some(request.space_id.as_str()), "space_id")?;
        let channel_id = required(Some(request.channel_id.as_str()), "channel_id")?;
        ensure_channel_in_space(host, space_id, channel_id)?;
        self.authorize(
            host,
            session,
            request.capability.as_deref(),
            space_id,
            Scope::JoinChannel,
            Some(channel_id),
        )?;

        let switch = host.join_channel(session.connection_id(), channel_id);
        if let Some(previous) = &switch.previous {
            self.announce_left(host, session, previous);
        }
        if switch.joined {
            self.announce_joined(host, session, channel_id);
            tracing::debug!(
                "Session {} joined channel {}",
                session.session_id(),
                channel_id
            );
        }
        session.deliver(Frame::new(
            MessageType::JoinChannelSuccess,
            json!({ "space_id": space_id, "channel_id": channel_id }),
        ));
        Ok(())
    }

    pub(crate) fn handle_leave_channel(
        &self,
        host: &Arc<Host>,
        session: &Arc<Session>,
    ) -> HandlerResult {
        let left = host.leave_channel(session.connection_id());
        if let Some(channel_id) = &left {
            self.announce_left(host, session, channel_id);
        }
        session.deliver(Frame::new(
            MessageType::LeaveChannelSuccess,
            json!({ "channel_id": left }),
        ));
        Ok(())
    }
}

fn presence_frame(kind: MessageType, session: &Session, channel_id: &str) -> Frame {
    let identity = session.snapshot();
    Frame::new(
        kind,
        json!({
            "channel_id": channel_id,
            "user_id": identity.user_id,
            "username": identity.username,
            "public_key": identity.public_key,
        }),
    )
}

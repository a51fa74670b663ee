//! Space actions.

use super::{body_id, object_body, required};
use crate::error::{HandlerError, HandlerResult};
use crate::host::Host;
use crate::server::Relay;
use crate::session::Session;
use parch_types::{ActionRequest, Frame, MessageType, Scope};
use serde_json::json;
use std::sync::Arc;

impl Relay {
    pub(crate) fn handle_get_dashboard(
        &self,
        host: &Arc<Host>,
        session: &Arc<Session>,
        frame: Frame,
    ) -> HandlerResult {
        let body = object_body(frame)?;
        self.forward_to_author(host, session, MessageType::DashboardRequest, body)
    }

    /// Anyone authenticated may create a space; no capability exists yet.
    pub(crate) fn handle_create_space(
        &self,
        host: &Arc<Host>,
        session: &Arc<Session>,
        frame: Frame,
    ) -> HandlerResult {
        let body = object_body(frame)?;
        self.forward_to_author(host, session, MessageType::CreateSpaceRequest, body)
    }

    pub(crate) fn handle_delete_space(
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
            Scope::DeleteSpace,
            None,
        )?;
        let body = object_body(frame)?;
        self.forward_to_author(host, session, MessageType::DeleteSpaceRequest, body)
    }

    /// Subscribe to a space's events. Additive and idempotent.
    pub(crate) fn handle_join_space(
        &self,
        host: &Arc<Host>,
        session: &Arc<Session>,
        frame: &Frame,
    ) -> HandlerResult {
        let request: ActionRequest = frame.payload()?;
        let space_id = required(request.space_id.as_deref(), "space_id")?;
        self.authorize(
            host,
            session,
            request.capability.as_deref(),
            space_id,
            Scope::JoinChannel,
            None,
        )?;

        if host.join_space(session.connection_id(), space_id) {
            tracing::debug!("Session {} joined space {}", session.session_id(), space_id);
        }
        session.deliver(Frame::new(
            MessageType::JoinSpaceSuccess,
            json!({ "space_id": space_id }),
        ));
        Ok(())
    }

    pub(crate) fn handle_leave_space(
        &self,
        host: &Arc<Host>,
        session: &Arc<Session>,
        frame: &Frame,
    ) -> HandlerResult {
        let request: ActionRequest = frame.payload()?;
        let space_id = required(request.space_id.as_deref(), "space_id")?;

        if let Some(channel_id) = host.leave_space(session.connection_id(), space_id) {
            self.announce_left(host, session, &channel_id);
        }
        session.deliver(Frame::new(
            MessageType::LeaveSpaceSuccess,
            json!({ "space_id": space_id }),
        ));
        Ok(())
    }

    /// The invitee travels as `invitee_user_id` or `invitee_public_key`,
    /// since `user_id` on a forwarded request names the requester.
    pub(crate) fn handle_invite_user(
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
            Scope::InviteUser,
            None,
        )?;
        let body = object_body(frame)?;
        self.forward_to_author(host, session, MessageType::InviteUserRequest, body)
    }

    /// The removed user travels as `removed_user_id` or
    /// `removed_public_key`.
    pub(crate) fn handle_remove_space_user(
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
            Scope::RemoveSpaceUser,
            None,
        )?;
        let body = object_body(frame)?;
        if body_id(&body, "removed_user_id").is_none()
            && body_id(&body, "removed_public_key").is_none()
        {
            return Err(HandlerError::protocol(
                "removed_user_id or removed_public_key is required",
            ));
        }
        self.forward_to_author(host, session, MessageType::RemoveSpaceUserRequest, body)
    }
}

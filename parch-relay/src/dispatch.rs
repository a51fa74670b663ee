//! Inbound frame dispatch.
//!
//! Frames on one connection are handled strictly in arrival order. Each
//! frame passes three gates before reaching its handler:
//!
//! 1. nothing but `join_host` until the connection has joined a host;
//! 2. nothing but the handshakes until the session has authenticated,
//!    except author replies from author-eligible connections;
//! 3. author replies only from the host's current author.
//!
//! Handler failures become one client-visible frame and never end the
//! session.

use crate::error::{HandlerError, HandlerResult};
use crate::identity::AuthError;
use crate::server::{Relay, RelayMetrics};
use crate::session::Connection;
use parch_types::{Frame, MessageType};

impl Relay {
    /// Process one inbound frame.
    pub async fn handle_frame(&self, conn: &mut Connection, frame: Frame) {
        RelayMetrics::incr(&self.metrics().frames_total);
        if let Err(err) = self.dispatch(conn, frame).await {
            self.report(conn, err);
        }
    }

    /// Process one inbound text message.
    pub async fn handle_text(&self, conn: &mut Connection, text: &str) {
        match Frame::from_text(text) {
            Ok(frame) => self.handle_frame(conn, frame).await,
            Err(e) => {
                RelayMetrics::incr(&self.metrics().frames_total);
                self.report(conn, HandlerError::from(e));
            }
        }
    }

    fn report(&self, conn: &Connection, err: HandlerError) {
        let metrics = self.metrics();
        match &err {
            HandlerError::Authentication(_) => {
                RelayMetrics::incr(&metrics.auth_failures);
                tracing::warn!("{}: authentication rejected: {}", conn.id, err);
            }
            HandlerError::Unauthorized(_) => {
                RelayMetrics::incr(&metrics.unauthorized_total);
                tracing::warn!("{}: capability rejected: {}", conn.id, err);
            }
            HandlerError::RateLimited(_) => {
                RelayMetrics::incr(&metrics.rate_limit_hits);
                tracing::warn!("{}: {}", conn.id, err);
            }
            HandlerError::Resource(_) => {
                tracing::debug!("{}: {}", conn.id, err);
            }
            HandlerError::Protocol(_) | HandlerError::Envelope(_) | HandlerError::HostConnectivity(_) => {
                RelayMetrics::incr(&metrics.errors_total);
                tracing::debug!("{}: {}", conn.id, err);
            }
        }
        if let Some(frame) = err.to_frame() {
            conn.send(frame);
        }
    }

    async fn dispatch(&self, conn: &mut Connection, frame: Frame) -> HandlerResult {
        let Some(kind) = frame.message_type() else {
            return Err(HandlerError::protocol(format!(
                "unknown message type: {}",
                frame.kind
            )));
        };

        if kind == MessageType::JoinHost {
            return self.handle_join_host(conn, &frame).await;
        }

        let Some((host, session)) = conn.joined.clone() else {
            return Err(HandlerError::protocol("join a host first"));
        };
        session.touch();

        match kind {
            MessageType::AuthPubkey => return self.handle_auth_pubkey(&host, &session, &frame),
            MessageType::HostAuth => return self.handle_host_auth(&host, &session, &frame),
            _ => {}
        }

        if kind.is_author_response() {
            if !session.is_authenticated() && !session.author_eligible() {
                return Err(AuthError::NotAuthenticated.into());
            }
            if !session.is_author() {
                return Err(AuthError::NotHostAuthor(kind.as_str()).into());
            }
            return self.handle_author_frame(&host, kind, frame);
        }

        if !session.is_authenticated() {
            return Err(AuthError::NotAuthenticated.into());
        }

        match kind {
            MessageType::UpdateUsername => self.handle_update_username(&host, &session, &frame),
            MessageType::GetDashboard => self.handle_get_dashboard(&host, &session, frame),
            MessageType::CreateSpace => self.handle_create_space(&host, &session, frame),
            MessageType::DeleteSpace => self.handle_delete_space(&host, &session, frame),
            MessageType::JoinSpace => self.handle_join_space(&host, &session, &frame),
            MessageType::LeaveSpace => self.handle_leave_space(&host, &session, &frame),
            MessageType::GetChannels => self.handle_get_channels(&host, &session, frame),
            MessageType::CreateChannel => self.handle_create_channel(&host, &session, frame),
            MessageType::DeleteChannel => self.handle_delete_channel(&host, &session, frame),
            MessageType::JoinChannel => self.handle_join_channel(&host, &session, &frame),
            MessageType::LeaveChannel => self.handle_leave_channel(&host, &session),
            MessageType::InviteUser => self.handle_invite_user(&host, &session, frame),
            MessageType::RemoveSpaceUser => self.handle_remove_space_user(&host, &session, frame),
            MessageType::GetMessages => self.handle_get_messages(&host, &session, frame),
            MessageType::Chat => self.handle_chat(&host, &session, frame),
            other => Err(HandlerError::protocol(format!(
                "unexpected message type: {other}"
            ))),
        }
    }
}

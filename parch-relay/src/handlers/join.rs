//! `join_host`: attach a connection to a host.

use crate::error::{HandlerError, HandlerResult};
use crate::identity::{new_challenge, AuthError};
use crate::server::Relay;
use crate::session::{Connection, Session};
use parch_types::{
    AuthChallenge, Frame, HostAuthChallenge, JoinHost, JoinHostSuccess, MessageType,
};
use std::sync::Arc;

impl Relay {
    /// Join a host.
    ///
    /// Author-role joins must come from an author-eligible connection and
    /// skip the liveness check; every other join first proves the host's
    /// author is alive. A connection that was already joined leaves its
    /// previous session before the new one is registered.
    pub(crate) async fn handle_join_host(
        &self,
        conn: &mut Connection,
        frame: &Frame,
    ) -> HandlerResult {
        let join: JoinHost = frame.payload()?;
        let host_id = join.host_id.trim();
        if host_id.is_empty() {
            return Err(HandlerError::protocol("host_id is required"));
        }

        let host = self.host_for_join(host_id).await?;

        if join.wants_author() {
            if !conn.author_eligible {
                return Err(AuthError::NotAuthorEligible.into());
            }
            if let Some(author_id) = join.author_id.as_deref() {
                if author_id != host.author_id() {
                    tracing::warn!("{}: author id mismatch for host {}", conn.id, host.id());
                    return Err(AuthError::NotAuthorEligible.into());
                }
            }
        } else {
            self.check_liveness(&host).await?;
        }

        if let Some((previous_host, previous)) = conn.joined.take() {
            self.unregister_session(&previous_host, &previous);
        }

        let challenge = new_challenge();
        let host_challenge = if conn.author_eligible {
            new_challenge()
        } else {
            String::new()
        };
        let session = Arc::new(Session::new(
            conn,
            host.id(),
            join.device,
            challenge.clone(),
            host_challenge.clone(),
        ));
        host.register_session(session.clone());
        conn.joined = Some((host.clone(), session.clone()));

        session.deliver(Frame::with_payload(
            MessageType::JoinHostSuccess,
            &JoinHostSuccess {
                host_id: host.id().to_string(),
                session_id: session.session_id().to_string(),
            },
        ));
        session.deliver(Frame::with_payload(
            MessageType::AuthChallenge,
            &AuthChallenge { challenge },
        ));
        if conn.author_eligible {
            session.deliver(Frame::with_payload(
                MessageType::HostAuthChallenge,
                &HostAuthChallenge {
                    challenge: host_challenge,
                },
            ));
        }

        tracing::info!(
            "Session {} joined host {} (sessions: {})",
            session.session_id(),
            host.id(),
            host.session_count()
        );
        Ok(())
    }
}

//! Identity handshakes and username changes.

use super::object_body;
use crate::error::{HandlerError, HandlerResult};
use crate::host::Host;
use crate::identity::{
    new_challenge, normalize_username, pseudo_user_id, verify_host, verify_user, AuthError,
};
use crate::server::Relay;
use crate::session::Session;
use parch_types::{
    AuthPubkey, AuthPubkeySuccess, Frame, HostAuth, HostAuthSuccess, MessageType, UpdateUsername,
};
use serde_json::{json, Map, Value};
use std::sync::Arc;

impl Relay {
    /// End-user pubkey handshake.
    pub(crate) fn handle_auth_pubkey(
        &self,
        host: &Arc<Host>,
        session: &Arc<Session>,
        frame: &Frame,
    ) -> HandlerResult {
        let auth: AuthPubkey = frame.payload()?;
        let expected = session.identity().challenge.clone();
        verify_user(
            host.id(),
            &expected,
            &auth.public_key,
            &auth.challenge,
            &auth.signature,
        )?;
        // Identity is fixed once set; the host may have rebound the user id
        if session.is_authenticated() {
            return Err(AuthError::AlreadyAuthenticated.into());
        }

        if !session.identity().ip_counted {
            self.count_authenticated(session.ip())?;
        }

        let public_key = auth.public_key.trim().to_string();
        let user_id = pseudo_user_id(&public_key);
        let username = normalize_username(auth.username.as_deref(), &public_key);
        {
            let mut identity = session.identity();
            identity.public_key = Some(public_key.clone());
            identity.enc_public_key = auth.enc_public_key.clone();
            identity.username = username.clone();
            identity.authenticated = true;
            identity.ip_counted = true;
            identity.challenge = new_challenge();
        }
        host.rebind_user_id(session.connection_id(), user_id);
        host.index_identity(session.connection_id(), user_id, &public_key);

        session.deliver(Frame::with_payload(
            MessageType::AuthPubkeySuccess,
            &AuthPubkeySuccess {
                user_id,
                username: username.clone(),
                public_key: public_key.clone(),
                enc_public_key: auth.enc_public_key.clone(),
            },
        ));
        tracing::info!(
            "Session {} on host {} authenticated as user {}",
            session.session_id(),
            host.id(),
            user_id
        );

        // Let the host swap in its own numeric id for this key
        if host.author().is_some() && !session.is_author() {
            let mut body = Map::new();
            body.insert("username".into(), Value::String(username));
            if let Some(enc) = auth.enc_public_key {
                body.insert("enc_public_key".into(), Value::String(enc));
            }
            let device = session.identity().device.clone();
            if let Some(device) = device {
                body.insert("device".into(), Value::String(device));
            }
            if let Err(e) =
                self.forward_to_author(host, session, MessageType::IdentityUpsertRequest, body)
            {
                tracing::debug!("Identity upsert for {} not sent: {}", session.session_id(), e);
            }
        }
        Ok(())
    }

    /// Host-author handshake.
    pub(crate) fn handle_host_auth(
        &self,
        host: &Arc<Host>,
        session: &Arc<Session>,
        frame: &Frame,
    ) -> HandlerResult {
        if !session.author_eligible() {
            return Err(AuthError::NotAuthorEligible.into());
        }
        let auth: HostAuth = frame.payload()?;
        let expected = session.identity().host_challenge.clone();
        verify_host(
            host.id(),
            host.signing_key(),
            &expected,
            &auth.challenge,
            &auth.signature,
        )?;
        session.identity().host_challenge = new_challenge();

        if let Some(previous) = host.promote_author(session.connection_id()) {
            tracing::info!(
                "Author for host {} replaced: session {} demoted",
                host.id(),
                previous.session_id()
            );
        }

        session.deliver(Frame::with_payload(
            MessageType::HostAuthSuccess,
            &HostAuthSuccess {
                host_id: host.id().to_string(),
            },
        ));
        tracing::info!(
            "Session {} is now author for host {}, host online",
            session.session_id(),
            host.id()
        );
        Ok(())
    }

    /// `update_username`: round-trips through the author.
    pub(crate) fn handle_update_username(
        &self,
        host: &Arc<Host>,
        session: &Arc<Session>,
        frame: &Frame,
    ) -> HandlerResult {
        let request: UpdateUsername = frame.payload()?;
        if request.username.trim().is_empty() {
            return Err(HandlerError::protocol("username is required"));
        }
        let public_key = session.identity().public_key.clone().unwrap_or_default();
        let username = normalize_username(Some(&request.username), &public_key);

        let mut body = object_body(frame.clone())?;
        body.insert("username".into(), json!(username));
        self.forward_to_author(host, session, MessageType::UpdateUsernameRequest, body)
    }
}

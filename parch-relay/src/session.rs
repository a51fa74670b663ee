//! Per-connection session state.
//!
//! A [`Connection`] exists for the lifetime of a socket. Once it joins a
//! host it gains a [`Session`]: the relay-side identity and mailbox that the
//! host's indices point at.

use crate::host::Host;
use crate::mailbox::{Delivery, Mailbox};
use parch_types::{Frame, SessionId};
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Process-unique handle for a live socket.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wrap a raw handle value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw handle value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

/// Where a session is in the end-user handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// No challenge outstanding.
    Unauthenticated,
    /// Challenge issued, answer pending.
    Challenged,
    /// Pubkey handshake completed.
    Authenticated,
}

/// Mutable identity of a session.
#[derive(Debug, Clone, Default)]
pub struct SessionIdentity {
    /// Numeric user id; 0 until authenticated.
    pub user_id: i64,
    /// Authenticated signing key.
    pub public_key: Option<String>,
    /// End-to-end encryption key, opaque to the relay.
    pub enc_public_key: Option<String>,
    /// Display name.
    pub username: String,
    /// Client-supplied device description.
    pub device: Option<String>,
    /// Unix seconds of the last inbound frame.
    pub last_seen: i64,
    /// Current end-user challenge.
    pub challenge: String,
    /// Current host-author challenge (author-eligible sessions only).
    pub host_challenge: String,
    /// Pubkey handshake completed.
    pub authenticated: bool,
    /// This connection is the host's author.
    pub is_author: bool,
    /// Counted against the source IP's authenticated-session total.
    pub ip_counted: bool,
}

impl SessionIdentity {
    /// Handshake state derived from the identity fields.
    pub fn auth_state(&self) -> AuthState {
        if self.authenticated {
            AuthState::Authenticated
        } else if self.challenge.is_empty() {
            AuthState::Unauthenticated
        } else {
            AuthState::Challenged
        }
    }
}

/// A joined connection's relay-side state.
#[derive(Debug)]
pub struct Session {
    connection_id: ConnectionId,
    host_id: String,
    session_id: SessionId,
    ip: IpAddr,
    author_eligible: bool,
    mailbox: Arc<Mailbox>,
    identity: Mutex<SessionIdentity>,
}

impl Session {
    /// Create a session for a connection joining `host_id`.
    pub fn new(
        connection: &Connection,
        host_id: &str,
        device: Option<String>,
        challenge: String,
        host_challenge: String,
    ) -> Self {
        Self {
            connection_id: connection.id,
            host_id: host_id.to_string(),
            session_id: SessionId::new(),
            ip: connection.ip,
            author_eligible: connection.author_eligible,
            mailbox: connection.mailbox.clone(),
            identity: Mutex::new(SessionIdentity {
                device,
                last_seen: unix_now(),
                challenge,
                host_challenge,
                ..SessionIdentity::default()
            }),
        }
    }

    /// The connection this session lives on.
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// The host this session belongs to.
    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    /// Relay-assigned session id.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Source address.
    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    /// Whether this connection may attempt the host-author handshake.
    pub fn author_eligible(&self) -> bool {
        self.author_eligible
    }

    /// Lock the mutable identity.
    ///
    /// Taken after, never before, the owning host's lock.
    pub fn identity(&self) -> MutexGuard<'_, SessionIdentity> {
        self.identity.lock()
    }

    /// Copy of the mutable identity.
    pub fn snapshot(&self) -> SessionIdentity {
        self.identity.lock().clone()
    }

    /// Whether the pubkey handshake has completed.
    pub fn is_authenticated(&self) -> bool {
        self.identity.lock().authenticated
    }

    /// Whether this session is the host's author.
    pub fn is_author(&self) -> bool {
        self.identity.lock().is_author
    }

    /// Record inbound activity.
    pub fn touch(&self) {
        self.identity.lock().last_seen = unix_now();
    }

    /// Queue a frame without waiting (see [`Mailbox::deliver`]).
    pub fn deliver(&self, frame: Frame) -> Delivery {
        let outcome = self.mailbox.deliver(frame);
        if outcome == Delivery::Overflowed {
            tracing::warn!(
                "Mailbox full for session {} on host {}, disconnecting",
                self.session_id,
                self.host_id
            );
        }
        outcome
    }

    /// Close the session's mailbox and fire its teardown signal.
    pub fn close(&self) {
        self.mailbox.close();
    }
}

/// A live socket, before and after joining a host.
#[derive(Debug)]
pub struct Connection {
    /// Process-unique handle.
    pub id: ConnectionId,
    /// Source address.
    pub ip: IpAddr,
    /// Decided at upgrade time by the transport (e.g. non-browser origin).
    pub author_eligible: bool,
    /// Outbound queue shared with the session.
    pub mailbox: Arc<Mailbox>,
    pub(crate) joined: Option<(Arc<Host>, Arc<Session>)>,
}

impl Connection {
    /// The joined host and session, if any.
    pub fn joined(&self) -> Option<(&Arc<Host>, &Arc<Session>)> {
        self.joined.as_ref().map(|(h, s)| (h, s))
    }

    /// The joined session, if any.
    pub fn session(&self) -> Option<&Arc<Session>> {
        self.joined.as_ref().map(|(_, s)| s)
    }

    /// Send a frame on this connection whether or not it has joined.
    pub fn send(&self, frame: Frame) -> Delivery {
        self.mailbox.deliver(frame)
    }
}

/// Current unix time in seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(eligible: bool) -> (Connection, tokio::sync::mpsc::Receiver<Frame>) {
        let (mailbox, rx) = Mailbox::new(4);
        (
            Connection {
                id: ConnectionId::new(7),
                ip: "127.0.0.1".parse().unwrap(),
                author_eligible: eligible,
                mailbox: Arc::new(mailbox),
                joined: None,
            },
            rx,
        )
    }

    #[test]
    fn new_session_is_challenged() {
        let (conn, _rx) = connection(false);
        let session = Session::new(&conn, "host-1", None, "c1".into(), String::new());
        assert_eq!(session.snapshot().auth_state(), AuthState::Challenged);
        assert_eq!(session.connection_id(), ConnectionId::new(7));
        assert_eq!(session.host_id(), "host-1");
        assert!(!session.author_eligible());
        assert!(!session.is_authenticated());
        assert!(session.snapshot().last_seen > 0);
    }

    #[test]
    fn auth_state_follows_identity() {
        let mut identity = SessionIdentity::default();
        assert_eq!(identity.auth_state(), AuthState::Unauthenticated);
        identity.challenge = "c".into();
        assert_eq!(identity.auth_state(), AuthState::Challenged);
        identity.authenticated = true;
        assert_eq!(identity.auth_state(), AuthState::Authenticated);
    }

    #[test]
    fn session_shares_connection_mailbox() {
        let (conn, mut rx) = connection(true);
        let session = Session::new(&conn, "host-1", Some("laptop".into()), "c".into(), "h".into());
        assert_eq!(session.deliver(Frame::error("x")), Delivery::Queued);
        assert_eq!(rx.try_recv().unwrap().kind, "error");

        session.close();
        assert!(conn.mailbox.is_closed());
        assert_eq!(conn.send(Frame::error("y")), Delivery::Closed);
    }

    #[test]
    fn connection_id_display() {
        assert_eq!(ConnectionId::new(42).to_string(), "conn-42");
    }
}

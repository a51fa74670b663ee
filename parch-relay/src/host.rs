//! Per-host connection hub.
//!
//! A [`Host`] owns every index the relay keeps for one registered backend:
//! the four session indices, the channel and space membership tables, and
//! the author slot. All index mutations happen under the host's single lock.
//! Membership sets carry their own lock, taken only while the host lock is
//! held and released before anything is delivered.
//!
//! Lock order: host, then membership, then session identity.

use crate::session::{ConnectionId, Session};
use crate::storage::HostRecord;
use parch_types::SessionId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

/// Members of a channel or space: connection to numeric user id.
#[derive(Debug, Default)]
pub struct Membership {
    members: Mutex<HashMap<ConnectionId, i64>>,
}

impl Membership {
    fn insert(&self, conn: ConnectionId, user_id: i64) -> bool {
        self.members.lock().insert(conn, user_id).is_none()
    }

    fn remove(&self, conn: ConnectionId) -> bool {
        self.members.lock().remove(&conn).is_some()
    }

    fn rebind(&self, conn: ConnectionId, user_id: i64) {
        if let Some(entry) = self.members.lock().get_mut(&conn) {
            *entry = user_id;
        }
    }

    fn connections(&self) -> Vec<ConnectionId> {
        self.members.lock().keys().copied().collect()
    }

    /// Whether `conn` is a member.
    pub fn contains(&self, conn: ConnectionId) -> bool {
        self.members.lock().contains_key(&conn)
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.lock().len()
    }

    /// Whether there are no members.
    pub fn is_empty(&self) -> bool {
        self.members.lock().is_empty()
    }
}

#[derive(Debug, Default)]
struct HostIndex {
    author: Option<ConnectionId>,
    online: bool,
    sessions: HashMap<ConnectionId, Arc<Session>>,
    by_session_id: HashMap<SessionId, ConnectionId>,
    /// Several devices may share one identity; newest last.
    by_user: HashMap<i64, Vec<ConnectionId>>,
    by_key: HashMap<String, Vec<ConnectionId>>,
    channels: HashMap<String, Arc<Membership>>,
    channel_space: HashMap<String, String>,
    spaces: HashMap<String, Arc<Membership>>,
    conn_channel: HashMap<ConnectionId, String>,
    conn_spaces: HashMap<ConnectionId, Vec<String>>,
}

impl HostIndex {
    fn resolve(&self, conns: impl IntoIterator<Item = ConnectionId>) -> Vec<Arc<Session>> {
        conns
            .into_iter()
            .filter_map(|conn| self.sessions.get(&conn).cloned())
            .collect()
    }

    fn leave_channel(&mut self, conn: ConnectionId) -> Option<String> {
        let channel_id = self.conn_channel.remove(&conn)?;
        if let Some(channel) = self.channels.get(&channel_id) {
            channel.remove(conn);
        }
        Some(channel_id)
    }

    fn leave_space(&mut self, conn: ConnectionId, space_id: &str) -> bool {
        let removed = self
            .spaces
            .get(space_id)
            .map(|space| space.remove(conn))
            .unwrap_or(false);
        if let Some(list) = self.conn_spaces.get_mut(&conn) {
            list.retain(|s| s != space_id);
            if list.is_empty() {
                self.conn_spaces.remove(&conn);
            }
        }
        removed
    }

    fn unindex_identity(&mut self, conn: ConnectionId) {
        unlink_all(&mut self.by_user, conn);
        unlink_all(&mut self.by_key, conn);
    }

    fn user_id(&self, conn: ConnectionId) -> i64 {
        self.sessions
            .get(&conn)
            .map(|s| s.identity().user_id)
            .unwrap_or_default()
    }
}

fn link<K: Hash + Eq>(index: &mut HashMap<K, Vec<ConnectionId>>, key: K, conn: ConnectionId) {
    let conns = index.entry(key).or_default();
    conns.retain(|c| *c != conn);
    conns.push(conn);
}

fn unlink<K: Hash + Eq>(index: &mut HashMap<K, Vec<ConnectionId>>, key: &K, conn: ConnectionId) {
    if let Some(conns) = index.get_mut(key) {
        conns.retain(|c| *c != conn);
        if conns.is_empty() {
            index.remove(key);
        }
    }
}

fn unlink_all<K: Hash + Eq>(index: &mut HashMap<K, Vec<ConnectionId>>, conn: ConnectionId) {
    index.retain(|_, conns| {
        conns.retain(|c| *c != conn);
        !conns.is_empty()
    });
}

/// What was released when a session left its host.
#[derive(Debug)]
pub struct Departure {
    /// The removed session.
    pub session: Arc<Session>,
    /// The session held the author role.
    pub was_author: bool,
    /// Channel the session was subscribed to.
    pub channel: Option<String>,
    /// Spaces the session was subscribed to.
    pub spaces: Vec<String>,
}

/// Outcome of subscribing to a channel.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ChannelSwitch {
    /// Channel left to make room for the new one.
    pub previous: Option<String>,
    /// False when the session was already in the requested channel.
    pub joined: bool,
}

/// Live state for one registered backend.
#[derive(Debug)]
pub struct Host {
    id: String,
    author_id: String,
    signing_key: Option<String>,
    state: Mutex<HostIndex>,
}

impl Host {
    /// Create an empty hub from a directory record.
    pub fn new(record: HostRecord) -> Self {
        Self {
            id: record.host_id,
            author_id: record.author_id,
            signing_key: record.signing_public_key,
            state: Mutex::new(HostIndex::default()),
        }
    }

    /// Host id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Author id from the host record.
    pub fn author_id(&self) -> &str {
        &self.author_id
    }

    /// Registered base64 Ed25519 signing key.
    pub fn signing_key(&self) -> Option<&str> {
        self.signing_key.as_deref()
    }

    /// Whether an authenticated author is connected.
    pub fn is_online(&self) -> bool {
        self.state.lock().online
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Index a new session.
    ///
    /// The caller unregisters any earlier session on the same connection
    /// first so its IP accounting is released.
    pub fn register_session(&self, session: Arc<Session>) {
        let mut state = self.state.lock();
        let conn = session.connection_id();
        state.by_session_id.insert(session.session_id(), conn);
        state.sessions.insert(conn, session);
    }

    /// Reverse every index entry for `conn` and release its memberships.
    pub fn remove_session(&self, conn: ConnectionId) -> Option<Departure> {
        let mut state = self.state.lock();
        let session = state.sessions.remove(&conn)?;

        if state.by_session_id.get(&session.session_id()) == Some(&conn) {
            state.by_session_id.remove(&session.session_id());
        }
        state.unindex_identity(conn);

        let channel = state.leave_channel(conn);
        let spaces = state.conn_spaces.get(&conn).cloned().unwrap_or_default();
        for space_id in &spaces {
            state.leave_space(conn, space_id);
        }

        let was_author = state.author == Some(conn);
        if was_author {
            state.author = None;
            state.online = false;
        }
        session.identity().is_author = false;

        Some(Departure {
            session,
            was_author,
            channel,
            spaces,
        })
    }

    /// Index an authenticated session by user id and public key.
    pub fn index_identity(&self, conn: ConnectionId, user_id: i64, public_key: &str) {
        let mut state = self.state.lock();
        if !state.sessions.contains_key(&conn) {
            tracing::debug!("index_identity: {} not on host {}", conn, self.id);
            return;
        }
        state.unindex_identity(conn);
        link(&mut state.by_user, user_id, conn);
        link(&mut state.by_key, public_key.to_string(), conn);
    }

    /// Replace a session's user id with the host-assigned one.
    ///
    /// Returns the previous id, or `None` if the session is gone.
    pub fn rebind_user_id(&self, conn: ConnectionId, user_id: i64) -> Option<i64> {
        let mut state = self.state.lock();
        let session = state.sessions.get(&conn)?.clone();
        let previous = {
            let mut identity = session.identity();
            std::mem::replace(&mut identity.user_id, user_id)
        };
        unlink(&mut state.by_user, &previous, conn);
        link(&mut state.by_user, user_id, conn);

        if let Some(channel_id) = state.conn_channel.get(&conn) {
            if let Some(channel) = state.channels.get(channel_id) {
                channel.rebind(conn, user_id);
            }
        }
        if let Some(spaces) = state.conn_spaces.get(&conn) {
            for space_id in spaces {
                if let Some(space) = state.spaces.get(space_id) {
                    space.rebind(conn, user_id);
                }
            }
        }
        Some(previous)
    }

    /// Make `conn` the author, demoting any previous holder.
    ///
    /// Returns the demoted session, if it was a different connection.
    pub fn promote_author(&self, conn: ConnectionId) -> Option<Arc<Session>> {
        let mut state = self.state.lock();
        let session = state.sessions.get(&conn)?.clone();
        let previous = state
            .author
            .replace(conn)
            .filter(|prev| *prev != conn)
            .and_then(|prev| state.sessions.get(&prev).cloned());
        if let Some(prev) = &previous {
            prev.identity().is_author = false;
        }
        session.identity().is_author = true;
        state.online = true;
        previous
    }

    /// The current author session.
    pub fn author(&self) -> Option<Arc<Session>> {
        let state = self.state.lock();
        state.author.and_then(|conn| state.sessions.get(&conn).cloned())
    }

    /// Session on connection `conn`.
    pub fn session(&self, conn: ConnectionId) -> Option<Arc<Session>> {
        self.state.lock().sessions.get(&conn).cloned()
    }

    /// Session with relay-assigned id `session_id`.
    pub fn session_by_id(&self, session_id: &SessionId) -> Option<Arc<Session>> {
        let state = self.state.lock();
        state
            .by_session_id
            .get(session_id)
            .and_then(|conn| state.sessions.get(conn).cloned())
    }

    /// Most recently authenticated session for `user_id`.
    pub fn session_by_user(&self, user_id: i64) -> Option<Arc<Session>> {
        self.sessions_by_user(user_id).pop()
    }

    /// Most recently authenticated session for `public_key`.
    pub fn session_by_key(&self, public_key: &str) -> Option<Arc<Session>> {
        self.sessions_by_key(public_key).pop()
    }

    /// Every live session authenticated as `user_id`, oldest first.
    pub fn sessions_by_user(&self, user_id: i64) -> Vec<Arc<Session>> {
        let state = self.state.lock();
        let conns = state.by_user.get(&user_id).cloned().unwrap_or_default();
        state.resolve(conns)
    }

    /// Every live session authenticated with `public_key`, oldest first.
    pub fn sessions_by_key(&self, public_key: &str) -> Vec<Arc<Session>> {
        let state = self.state.lock();
        let conns = state.by_key.get(public_key).cloned().unwrap_or_default();
        state.resolve(conns)
    }

    /// Subscribe `conn` to `channel_id`, leaving any other channel first.
    pub fn join_channel(&self, conn: ConnectionId, channel_id: &str) -> ChannelSwitch {
        let mut state = self.state.lock();
        if !state.sessions.contains_key(&conn) {
            return ChannelSwitch::default();
        }
        if state.conn_channel.get(&conn).map(String::as_str) == Some(channel_id) {
            return ChannelSwitch {
                previous: None,
                joined: false,
            };
        }
        let previous = state.leave_channel(conn);
        let user_id = state.user_id(conn);
        state
            .channels
            .entry(channel_id.to_string())
            .or_default()
            .insert(conn, user_id);
        state.conn_channel.insert(conn, channel_id.to_string());
        ChannelSwitch {
            previous,
            joined: true,
        }
    }

    /// Unsubscribe `conn` from its channel. Returns the channel left.
    pub fn leave_channel(&self, conn: ConnectionId) -> Option<String> {
        self.state.lock().leave_channel(conn)
    }

    /// The channel `conn` is subscribed to.
    pub fn current_channel(&self, conn: ConnectionId) -> Option<String> {
        self.state.lock().conn_channel.get(&conn).cloned()
    }

    /// Subscribe `conn` to `space_id`. Returns false if already subscribed.
    pub fn join_space(&self, conn: ConnectionId, space_id: &str) -> bool {
        let mut state = self.state.lock();
        if !state.sessions.contains_key(&conn) {
            return false;
        }
        let user_id = state.user_id(conn);
        let added = state
            .spaces
            .entry(space_id.to_string())
            .or_default()
            .insert(conn, user_id);
        let list = state.conn_spaces.entry(conn).or_default();
        if !list.iter().any(|s| s == space_id) {
            list.push(space_id.to_string());
        }
        added
    }

    /// Unsubscribe `conn` from `space_id`.
    ///
    /// Also leaves the session's channel when that channel belongs to the
    /// space; the channel left is returned.
    pub fn leave_space(&self, conn: ConnectionId, space_id: &str) -> Option<String> {
        let mut state = self.state.lock();
        state.leave_space(conn, space_id);
        let in_space = state
            .conn_channel
            .get(&conn)
            .and_then(|channel| state.channel_space.get(channel))
            .is_some_and(|s| s == space_id);
        if in_space {
            state.leave_channel(conn)
        } else {
            None
        }
    }

    /// Spaces `conn` is subscribed to.
    pub fn spaces_of(&self, conn: ConnectionId) -> Vec<String> {
        self.state
            .lock()
            .conn_spaces
            .get(&conn)
            .cloned()
            .unwrap_or_default()
    }

    /// Forget a deleted space.
    ///
    /// Every member is unsubscribed, members sitting in one of its channels
    /// leave that channel, and its channel mappings are removed.
    pub fn drop_space(&self, space_id: &str) {
        let mut state = self.state.lock();
        let members = state
            .spaces
            .remove(space_id)
            .map(|space| space.connections())
            .unwrap_or_default();
        for conn in members {
            state.leave_space(conn, space_id);
        }

        let channels: Vec<String> = state
            .channel_space
            .iter()
            .filter(|(_, s)| s.as_str() == space_id)
            .map(|(c, _)| c.clone())
            .collect();
        let in_channels: Vec<ConnectionId> = state
            .conn_channel
            .iter()
            .filter(|(_, c)| channels.contains(c))
            .map(|(conn, _)| *conn)
            .collect();
        for conn in in_channels {
            state.leave_channel(conn);
        }
        for channel in channels {
            state.channel_space.remove(&channel);
        }
    }

    /// Record that `channel_id` belongs to `space_id`.
    pub fn map_channel(&self, channel_id: &str, space_id: &str) {
        self.state
            .lock()
            .channel_space
            .insert(channel_id.to_string(), space_id.to_string());
    }

    /// Remove a channel's space mapping. Membership is left intact.
    pub fn unmap_channel(&self, channel_id: &str) -> Option<String> {
        self.state.lock().channel_space.remove(channel_id)
    }

    /// The space `channel_id` belongs to.
    pub fn channel_space(&self, channel_id: &str) -> Option<String> {
        self.state.lock().channel_space.get(channel_id).cloned()
    }

    /// Sessions subscribed to `channel_id`, excluding `except`.
    pub fn channel_members(
        &self,
        channel_id: &str,
        except: Option<ConnectionId>,
    ) -> Vec<Arc<Session>> {
        let state = self.state.lock();
        let Some(channel) = state.channels.get(channel_id) else {
            return Vec::new();
        };
        let conns = channel
            .connections()
            .into_iter()
            .filter(|c| Some(*c) != except);
        state.resolve(conns)
    }

    /// Sessions subscribed to `space_id`, excluding `except`.
    pub fn space_members(&self, space_id: &str, except: Option<ConnectionId>) -> Vec<Arc<Session>> {
        let state = self.state.lock();
        let Some(space) = state.spaces.get(space_id) else {
            return Vec::new();
        };
        let conns = space
            .connections()
            .into_iter()
            .filter(|c| Some(*c) != except);
        state.resolve(conns)
    }

    /// Membership handle for a channel, if it was ever joined.
    pub fn channel(&self, channel_id: &str) -> Option<Arc<Membership>> {
        self.state.lock().channels.get(channel_id).cloned()
    }

    /// Membership handle for a space, if it has subscribers.
    pub fn space(&self, space_id: &str) -> Option<Arc<Membership>> {
        self.state.lock().spaces.get(space_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::Mailbox;
    use crate::session::Connection;
    use parch_types::Frame;
    use tokio::sync::mpsc;

    fn host() -> Host {
        Host::new(HostRecord {
            host_id: "host-1".into(),
            author_id: "author-1".into(),
            signing_public_key: None,
        })
    }

    fn join(host: &Host, id: u64) -> (Arc<Session>, mpsc::Receiver<Frame>) {
        let (mailbox, rx) = Mailbox::new(8);
        let conn = Connection {
            id: ConnectionId::new(id),
            ip: "10.0.0.1".parse().unwrap(),
            author_eligible: true,
            mailbox: Arc::new(mailbox),
            joined: None,
        };
        let session = Arc::new(Session::new(&conn, host.id(), None, "c".into(), "h".into()));
        host.register_session(session.clone());
        (session, rx)
    }

    fn conn(id: u64) -> ConnectionId {
        ConnectionId::new(id)
    }

    #[test]
    fn register_and_lookup() {
        let host = host();
        let (session, _rx) = join(&host, 1);
        host.index_identity(conn(1), 77, "pk-1");

        assert_eq!(host.session_count(), 1);
        assert!(host.session_by_id(&session.session_id()).is_some());
        assert!(host.session_by_user(77).is_some());
        assert!(host.session_by_key("pk-1").is_some());
        assert!(host.session(conn(2)).is_none());
    }

    #[test]
    fn remove_session_clears_every_index() {
        let host = host();
        let (session, _rx) = join(&host, 1);
        host.index_identity(conn(1), 77, "pk-1");
        host.join_space(conn(1), "s1");
        host.join_channel(conn(1), "c1");
        host.promote_author(conn(1));

        let departure = host.remove_session(conn(1)).unwrap();
        assert!(departure.was_author);
        assert_eq!(departure.channel.as_deref(), Some("c1"));
        assert_eq!(departure.spaces, vec!["s1".to_string()]);

        assert_eq!(host.session_count(), 0);
        assert!(host.session_by_id(&session.session_id()).is_none());
        assert!(host.session_by_user(77).is_none());
        assert!(host.session_by_key("pk-1").is_none());
        assert!(host.channel("c1").unwrap().is_empty());
        assert!(host.space("s1").unwrap().is_empty());
        assert!(host.author().is_none());
        assert!(!host.is_online());
        assert!(host.remove_session(conn(1)).is_none());
    }

    #[test]
    fn shared_identity_survives_one_device_leaving() {
        let host = host();
        let (_a, _rx1) = join(&host, 1);
        let (_b, _rx2) = join(&host, 2);
        host.index_identity(conn(1), 77, "pk-1");
        host.index_identity(conn(2), 77, "pk-1");

        assert_eq!(host.sessions_by_user(77).len(), 2);
        assert_eq!(host.session_by_key("pk-1").unwrap().connection_id(), conn(2));

        host.remove_session(conn(2)).unwrap();
        assert_eq!(host.session_by_user(77).unwrap().connection_id(), conn(1));
        assert_eq!(host.session_by_key("pk-1").unwrap().connection_id(), conn(1));
        assert_eq!(host.sessions_by_key("pk-1").len(), 1);

        host.remove_session(conn(1)).unwrap();
        assert!(host.sessions_by_user(77).is_empty());
    }

    #[test]
    fn channel_subscription_is_exclusive() {
        let host = host();
        let (_s, _rx) = join(&host, 1);

        let first = host.join_channel(conn(1), "c1");
        assert_eq!(first, ChannelSwitch { previous: None, joined: true });

        let second = host.join_channel(conn(1), "c2");
        assert_eq!(second.previous.as_deref(), Some("c1"));
        assert!(!host.channel("c1").unwrap().contains(conn(1)));
        assert!(host.channel("c2").unwrap().contains(conn(1)));

        let again = host.join_channel(conn(1), "c2");
        assert!(!again.joined);
        assert_eq!(host.current_channel(conn(1)).as_deref(), Some("c2"));
    }

    #[test]
    fn space_subscription_is_additive_and_deduplicated() {
        let host = host();
        let (_s, _rx) = join(&host, 1);

        assert!(host.join_space(conn(1), "s1"));
        assert!(!host.join_space(conn(1), "s1"));
        assert!(host.join_space(conn(1), "s2"));
        assert_eq!(host.spaces_of(conn(1)), vec!["s1", "s2"]);
        assert_eq!(host.space("s1").unwrap().len(), 1);
    }

    #[test]
    fn leave_space_leaves_channel_in_that_space() {
        let host = host();
        let (_s, _rx) = join(&host, 1);
        host.map_channel("c1", "s1");
        host.join_space(conn(1), "s1");
        host.join_space(conn(1), "s2");
        host.join_channel(conn(1), "c1");

        assert_eq!(host.leave_space(conn(1), "s2"), None);
        assert_eq!(host.current_channel(conn(1)).as_deref(), Some("c1"));

        assert_eq!(host.leave_space(conn(1), "s1").as_deref(), Some("c1"));
        assert!(host.current_channel(conn(1)).is_none());
        assert!(host.spaces_of(conn(1)).is_empty());
    }

    #[test]
    fn promote_author_demotes_previous() {
        let host = host();
        let (first, _rx1) = join(&host, 1);
        let (second, _rx2) = join(&host, 2);

        assert!(host.promote_author(conn(1)).is_none());
        assert!(first.is_author());
        assert!(host.is_online());

        let demoted = host.promote_author(conn(2)).unwrap();
        assert_eq!(demoted.connection_id(), conn(1));
        assert!(!first.is_author());
        assert!(second.is_author());
        assert_eq!(host.author().unwrap().connection_id(), conn(2));
    }

    #[test]
    fn rebind_user_id_updates_index_and_membership() {
        let host = host();
        let (session, _rx) = join(&host, 1);
        session.identity().user_id = 5;
        host.index_identity(conn(1), 5, "pk");
        host.join_channel(conn(1), "c1");

        assert_eq!(host.rebind_user_id(conn(1), 900), Some(5));
        assert!(host.session_by_user(5).is_none());
        assert!(host.session_by_user(900).is_some());
        assert_eq!(session.identity().user_id, 900);
        assert_eq!(host.rebind_user_id(conn(9), 1), None);
    }

    #[test]
    fn drop_space_releases_members_and_mappings() {
        let host = host();
        let (_a, _rx1) = join(&host, 1);
        let (_b, _rx2) = join(&host, 2);
        host.map_channel("c1", "s1");
        host.map_channel("c9", "s9");
        host.join_space(conn(1), "s1");
        host.join_space(conn(2), "s1");
        host.join_channel(conn(1), "c1");
        host.join_channel(conn(2), "c9");

        host.drop_space("s1");
        assert!(host.space("s1").is_none());
        assert!(host.spaces_of(conn(1)).is_empty());
        assert!(host.current_channel(conn(1)).is_none());
        assert_eq!(host.current_channel(conn(2)).as_deref(), Some("c9"));
        assert!(host.channel_space("c1").is_none());
        assert_eq!(host.channel_space("c9").as_deref(), Some("s9"));
    }

    #[test]
    fn member_lists_exclude_sender() {
        let host = host();
        let (_a, _rx1) = join(&host, 1);
        let (_b, _rx2) = join(&host, 2);
        host.join_channel(conn(1), "c1");
        host.join_channel(conn(2), "c1");

        assert_eq!(host.channel_members("c1", None).len(), 2);
        let others = host.channel_members("c1", Some(conn(1)));
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].connection_id(), conn(2));
        assert!(host.channel_members("nope", None).is_empty());
        assert!(host.space_members("nope", None).is_empty());
    }
}

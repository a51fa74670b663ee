//! Relay service object.
//!
//! `Relay` owns every process-wide registry (host hubs, rate limits, the
//! liveness correlator, IP accounting) and the routing primitives handlers
//! use to reach sessions. It is constructed once and shared as `Arc<Relay>`.

use crate::capability::CapabilityVerifier;
use crate::config::Config;
use crate::correlator::{Awaited, Correlator};
use crate::error::{HandlerError, HandlerResult};
use crate::host::{Departure, Host};
use crate::identity::{new_nonce, AuthError};
use crate::limits::{EnvelopeLimits, RateLimits};
use crate::mailbox::{Delivery, Mailbox};
use crate::session::{Connection, ConnectionId, Session};
use crate::storage::HostDirectory;
use dashmap::DashMap;
use parch_types::{Frame, HealthCheck, MessageType, SessionId};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Content of the `author_error` sent when the liveness check fails.
pub const HOST_OFFLINE: &str = "host is offline or unresponsive";

/// Content of the `author_error` sent for unknown host ids.
pub const HOST_NOT_FOUND: &str = "host not found";

/// Operational metrics for monitoring relay activity.
///
/// All counters are monotonically increasing (reset only on restart).
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// WebSocket connections accepted.
    pub connections_total: AtomicU64,
    /// Inbound frames processed.
    pub frames_total: AtomicU64,
    /// Requests forwarded to host authors.
    pub forwarded_total: AtomicU64,
    /// Fan-out deliveries to channels and spaces.
    pub broadcasts_total: AtomicU64,
    /// Failed end-user or host-author handshakes.
    pub auth_failures: AtomicU64,
    /// Capability verification failures.
    pub unauthorized_total: AtomicU64,
    /// Rate limit rejections (connection + chat).
    pub rate_limit_hits: AtomicU64,
    /// Liveness checks that found no author or timed out.
    pub liveness_failures: AtomicU64,
    /// Sessions closed because their mailbox filled up.
    pub mailbox_overflows: AtomicU64,
    /// Protocol and other client-visible errors.
    pub errors_total: AtomicU64,
}

impl RelayMetrics {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// The relay.
pub struct Relay {
    config: Config,
    directory: Arc<dyn HostDirectory>,
    /// Host hubs, created on first successful join.
    hosts: DashMap<String, Arc<Host>>,
    rate_limits: RateLimits,
    envelope_limits: EnvelopeLimits,
    verifier: CapabilityVerifier,
    /// Pending liveness checks keyed by nonce.
    liveness: Correlator<()>,
    /// Authenticated sessions per source address.
    ip_sessions: DashMap<IpAddr, usize>,
    metrics: RelayMetrics,
    next_connection: AtomicU64,
    started: Instant,
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("config", &self.config)
            .field("metrics", &self.metrics)
            .field("hosts_count", &self.hosts.len())
            .finish_non_exhaustive()
    }
}

impl Relay {
    /// Create a relay with the given config and host directory.
    pub fn new(config: Config, directory: Arc<dyn HostDirectory>) -> Self {
        let rate_limits = RateLimits::new(&config.limits);
        let envelope_limits = EnvelopeLimits::new(&config.limits);
        let verifier = CapabilityVerifier::new(config.capability.clock_skew_secs);
        Self {
            config,
            directory,
            hosts: DashMap::new(),
            rate_limits,
            envelope_limits,
            verifier,
            liveness: Correlator::new(),
            ip_sessions: DashMap::new(),
            metrics: RelayMetrics::default(),
            next_connection: AtomicU64::new(1),
            started: Instant::now(),
        }
    }

    /// Get the relay configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the host directory.
    pub fn directory(&self) -> &Arc<dyn HostDirectory> {
        &self.directory
    }

    /// Get access to the rate limiters.
    pub fn rate_limits(&self) -> &RateLimits {
        &self.rate_limits
    }

    /// Get the envelope validator.
    pub fn envelope_limits(&self) -> &EnvelopeLimits {
        &self.envelope_limits
    }

    /// Get the capability verifier.
    pub fn verifier(&self) -> &CapabilityVerifier {
        &self.verifier
    }

    /// Get the liveness correlator.
    pub fn liveness(&self) -> &Correlator<()> {
        &self.liveness
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Hub for `host_id`, if any session has joined it.
    pub fn host(&self, host_id: &str) -> Option<Arc<Host>> {
        self.hosts.get(host_id).map(|h| h.clone())
    }

    /// Number of host hubs.
    pub fn total_hosts(&self) -> usize {
        self.hosts.len()
    }

    /// Number of sessions across all hosts.
    pub fn total_sessions(&self) -> usize {
        self.hosts.iter().map(|h| h.session_count()).sum()
    }

    /// Number of hosts whose author has completed the author handshake.
    pub fn online_hosts(&self) -> usize {
        self.hosts.iter().filter(|h| h.is_online()).count()
    }

    /// Hosts with connected sessions but no authenticated author, sorted.
    pub fn stranded_hosts(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .hosts
            .iter()
            .filter(|h| !h.is_online() && h.session_count() > 0)
            .map(|h| h.id().to_string())
            .collect();
        ids.sort();
        ids
    }

    /// Authenticated end-user sessions across all hosts.
    pub fn authenticated_sessions(&self) -> usize {
        self.ip_sessions.iter().map(|entry| *entry.value()).sum()
    }

    /// Time since the relay was constructed.
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Number of authenticated sessions counted against `ip`.
    pub fn authenticated_from(&self, ip: IpAddr) -> usize {
        self.ip_sessions.get(&ip).map(|c| *c).unwrap_or(0)
    }

    /// Find the hub for `host_id`, creating it from the directory record.
    ///
    /// Unknown host ids fail closed.
    pub async fn host_for_join(&self, host_id: &str) -> HandlerResult<Arc<Host>> {
        if let Some(host) = self.host(host_id) {
            return Ok(host);
        }

        let record = match self.directory.lookup_host(host_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::debug!("Join for unknown host {}", host_id);
                return Err(HandlerError::host(HOST_NOT_FOUND));
            }
            Err(e) => {
                tracing::error!("Host lookup for {} failed: {}", host_id, e);
                return Err(HandlerError::host(HOST_NOT_FOUND));
            }
        };

        // A concurrent join may have created the hub while we looked it up
        let host = self
            .hosts
            .entry(host_id.to_string())
            .or_insert_with(|| {
                tracing::info!("Created hub for host {}", record.host_id);
                Arc::new(Host::new(record))
            })
            .clone();
        Ok(host)
    }

    /// Accept a new socket.
    ///
    /// Returns the connection state and the receiving end of its mailbox,
    /// which the transport drains to the socket.
    pub fn open_connection(
        &self,
        ip: IpAddr,
        author_eligible: bool,
    ) -> (Connection, mpsc::Receiver<Frame>) {
        let id = ConnectionId::new(self.next_connection.fetch_add(1, Ordering::Relaxed));
        let (mailbox, rx) = Mailbox::new(self.config.limits.mailbox_capacity);
        RelayMetrics::incr(&self.metrics.connections_total);
        tracing::debug!("Opened {} from {} (author eligible: {})", id, ip, author_eligible);
        (
            Connection {
                id,
                ip,
                author_eligible,
                mailbox: Arc::new(mailbox),
                joined: None,
            },
            rx,
        )
    }

    /// Tear down a connection: release its session and close its mailbox.
    pub fn disconnect(&self, conn: &mut Connection) {
        if let Some((host, session)) = conn.joined.take() {
            self.unregister_session(&host, &session);
        }
        conn.mailbox.close();
        tracing::debug!("Closed {}", conn.id);
    }

    /// Remove a session from its host and release everything it held.
    ///
    /// Channel members are told the session left. The mailbox stays open:
    /// it belongs to the connection, which may join again.
    pub fn unregister_session(&self, host: &Host, session: &Session) -> Option<Departure> {
        let departure = host.remove_session(session.connection_id())?;
        let identity = departure.session.snapshot();

        if let Some(channel_id) = &departure.channel {
            self.announce_left(host, &departure.session, channel_id);
        }
        if departure.was_author {
            tracing::info!("Author for host {} disconnected, host offline", host.id());
        }
        self.rate_limits.clear_session(&session.session_id());
        if identity.ip_counted {
            self.release_ip(session.ip());
        }
        tracing::debug!(
            "Unregistered session {} from host {} (remaining: {})",
            session.session_id(),
            host.id(),
            host.session_count()
        );
        Some(departure)
    }

    /// Count a newly authenticated session against its source address.
    pub(crate) fn count_authenticated(&self, ip: IpAddr) -> Result<(), AuthError> {
        let limit = self.config.limits.max_authenticated_per_ip;
        let mut count = self.ip_sessions.entry(ip).or_insert(0);
        if *count >= limit {
            return Err(AuthError::TooManySessions);
        }
        *count += 1;
        Ok(())
    }

    fn release_ip(&self, ip: IpAddr) {
        let remove = match self.ip_sessions.get_mut(&ip) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => false,
        };
        if remove {
            self.ip_sessions.remove_if(&ip, |_, count| *count == 0);
        }
    }

    fn deliver(&self, session: &Session, frame: Frame) -> bool {
        match session.deliver(frame) {
            Delivery::Queued => true,
            Delivery::Overflowed => {
                RelayMetrics::incr(&self.metrics.mailbox_overflows);
                false
            }
            Delivery::Closed => false,
        }
    }

    /// Deliver to the session with relay id `session_id`.
    pub fn send_to_session(&self, host: &Host, session_id: &SessionId, frame: Frame) -> bool {
        match host.session_by_id(session_id) {
            Some(session) => self.deliver(&session, frame),
            None => {
                tracing::debug!("No session {} on host {}", session_id, host.id());
                false
            }
        }
    }

    /// Deliver to the host's current author.
    pub fn send_to_author(&self, host: &Host, frame: Frame) -> bool {
        match host.author() {
            Some(author) => self.deliver(&author, frame),
            None => false,
        }
    }

    /// Deliver to every session in `channel_id` except `except`.
    ///
    /// Returns the number of frames queued.
    pub fn broadcast_channel(
        &self,
        host: &Host,
        channel_id: &str,
        frame: Frame,
        except: Option<ConnectionId>,
    ) -> usize {
        let targets = host.channel_members(channel_id, except);
        self.fan_out(&targets, frame)
    }

    /// Deliver to every session subscribed to `space_id` except `except`.
    pub fn broadcast_space(
        &self,
        host: &Host,
        space_id: &str,
        frame: Frame,
        except: Option<ConnectionId>,
    ) -> usize {
        let targets = host.space_members(space_id, except);
        self.fan_out(&targets, frame)
    }

    fn fan_out(&self, targets: &[Arc<Session>], frame: Frame) -> usize {
        let delivered = targets
            .iter()
            .filter(|session| self.deliver(session, frame.clone()))
            .count();
        self.metrics
            .broadcasts_total
            .fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }

    /// Ask the host author to prove it is alive.
    ///
    /// Sends `relay_health_check` with a fresh nonce and waits for the
    /// matching acknowledgement for the configured timeout.
    pub async fn check_liveness(&self, host: &Host) -> HandlerResult {
        let nonce = new_nonce();
        let rx = self.liveness.register(nonce.clone());
        let frame = Frame::with_payload(
            MessageType::RelayHealthCheck,
            &HealthCheck {
                nonce: nonce.clone(),
            },
        );
        if !self.send_to_author(host, frame) {
            self.liveness.cancel(&nonce);
            RelayMetrics::incr(&self.metrics.liveness_failures);
            tracing::debug!("Host {} has no reachable author", host.id());
            return Err(HandlerError::host(HOST_OFFLINE));
        }

        match self
            .liveness
            .wait(&nonce, rx, self.config.liveness.timeout())
            .await
        {
            Awaited::Resolved(()) => Ok(()),
            Awaited::TimedOut | Awaited::Dropped => {
                RelayMetrics::incr(&self.metrics.liveness_failures);
                tracing::warn!("Liveness check for host {} timed out", host.id());
                Err(HandlerError::host(HOST_OFFLINE))
            }
        }
    }

    /// Resolve a pending liveness check.
    pub fn acknowledge_liveness(&self, nonce: &str) -> bool {
        self.liveness.resolve(nonce, ())
    }
}

//! Rate and shape limiting for parch-relay.
//!
//! Provides protection against connection flooding and chat spam.
//!
//! ## Design Notes
//!
//! - **Connection attempts** are throttled per source IP with governor's
//!   keyed rate limiter backed by DashMap.
//! - **Chat sends** use an exact sliding window per session: a pruned list
//!   of send timestamps, so the limit holds for every rolling window rather
//!   than on average.
//! - **Envelopes** are shape-checked without being interpreted; the relay
//!   only looks at size and the `wrapped_keys` list.

use crate::config::LimitsConfig;
use dashmap::DashMap;
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use parch_types::SessionId;
use serde_json::Value;
use std::collections::VecDeque;
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Type alias for a keyed rate limiter using DashMap.
type KeyedLimiter<K> = RateLimiter<
    K,
    dashmap::DashMap<K, InMemoryState>,
    DefaultClock,
    NoOpMiddleware<governor::clock::QuantaInstant>,
>;

/// Rate limiters for the relay server.
pub struct RateLimits {
    /// Limits WebSocket upgrades per source IP.
    ///
    /// Configured via `limits.connections_per_ip` (per minute).
    connection_limiter: Arc<KeyedLimiter<IpAddr>>,

    /// Recent chat send times per session, oldest first.
    chat_windows: DashMap<SessionId, VecDeque<Instant>>,

    /// Sends allowed per window.
    chat_limit: usize,

    /// Window length.
    chat_window: Duration,
}

impl std::fmt::Debug for RateLimits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimits")
            .field("connection_limiter", &"KeyedLimiter<IpAddr>")
            .field("chat_windows", &self.chat_windows.len())
            .field("chat_limit", &self.chat_limit)
            .field("chat_window", &self.chat_window)
            .finish()
    }
}

impl RateLimits {
    /// Create rate limiters from configuration.
    ///
    /// A zero connection quota is treated as one per minute.
    pub fn new(config: &LimitsConfig) -> Self {
        let connections_per_minute =
            NonZeroU32::new(config.connections_per_ip).unwrap_or(NonZeroU32::MIN);
        let connection_quota = Quota::per_minute(connections_per_minute);

        Self {
            connection_limiter: Arc::new(RateLimiter::keyed(connection_quota)),
            chat_windows: DashMap::new(),
            chat_limit: config.chat_messages_per_window,
            chat_window: Duration::from_secs(config.chat_window_secs),
        }
    }

    /// Check if a connection attempt from `ip` is allowed.
    pub fn check_connection(&self, ip: IpAddr) -> Result<(), RateLimitError> {
        self.connection_limiter
            .check_key(&ip)
            .map_err(|_| RateLimitError::ConnectionLimitExceeded)
    }

    /// Record a chat send for `session` if it fits in the current window.
    pub fn check_chat(&self, session: &SessionId) -> Result<(), RateLimitError> {
        self.check_chat_at(session, Instant::now())
    }

    /// [`check_chat`](Self::check_chat) at an explicit time.
    ///
    /// Rejected sends are not recorded, so a throttled client recovers as
    /// soon as its oldest accepted send leaves the window.
    pub fn check_chat_at(&self, session: &SessionId, now: Instant) -> Result<(), RateLimitError> {
        let mut window = self.chat_windows.entry(*session).or_default();
        prune(&mut window, now, self.chat_window);
        if window.len() >= self.chat_limit {
            return Err(RateLimitError::ChatWindowExceeded);
        }
        window.push_back(now);
        Ok(())
    }

    /// Forget a session's chat window (on disconnect).
    pub fn clear_session(&self, session: &SessionId) {
        self.chat_windows.remove(session);
    }

    /// Get the number of tracked connection keys (for metrics).
    pub fn connection_keys_count(&self) -> usize {
        self.connection_limiter.len()
    }

    /// Get the number of sessions with a chat window (for metrics).
    pub fn chat_window_count(&self) -> usize {
        self.chat_windows.len()
    }

    /// Evict idle limiter state.
    ///
    /// Drops connection-limiter cells that have fully recharged and chat
    /// windows with no sends left inside the window. Call periodically from
    /// the cleanup task.
    pub fn shrink(&self) {
        self.shrink_at(Instant::now());
    }

    fn shrink_at(&self, now: Instant) {
        self.connection_limiter.retain_recent();
        let window = self.chat_window;
        self.chat_windows.retain(|_, sends| {
            prune(sends, now, window);
            !sends.is_empty()
        });
    }
}

fn prune(sends: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = sends.front() {
        if now.saturating_duration_since(*oldest) >= window {
            sends.pop_front();
        } else {
            break;
        }
    }
}

/// Rate limit error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    /// Too many connection attempts from this address.
    #[error("connection rate limit exceeded")]
    ConnectionLimitExceeded,
    /// Too many chat sends in the current window.
    #[error("rate limit exceeded: too many messages, slow down")]
    ChatWindowExceeded,
}

/// Shape constraints for chat envelopes.
#[derive(Debug, Clone)]
pub struct EnvelopeLimits {
    max_bytes: usize,
    max_wrapped_keys: usize,
}

impl EnvelopeLimits {
    /// Create envelope limits from configuration.
    pub fn new(config: &LimitsConfig) -> Self {
        Self {
            max_bytes: config.max_envelope_bytes,
            max_wrapped_keys: config.max_wrapped_keys,
        }
    }

    /// Check an envelope's shape without interpreting its contents.
    pub fn validate(&self, envelope: &Value) -> Result<(), EnvelopeError> {
        let empty = match envelope {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            Value::Array(a) => a.is_empty(),
            Value::Object(o) => o.is_empty(),
            Value::Bool(_) | Value::Number(_) => false,
        };
        if empty {
            return Err(EnvelopeError::Empty);
        }

        let size = serde_json::to_vec(envelope)
            .map(|bytes| bytes.len())
            .map_err(|_| EnvelopeError::Empty)?;
        if size > self.max_bytes {
            return Err(EnvelopeError::TooLarge {
                size,
                limit: self.max_bytes,
            });
        }

        if let Some(wrapped) = envelope.get("wrapped_keys") {
            let keys = wrapped.as_array().ok_or(EnvelopeError::WrappedKeysNotList)?;
            if keys.is_empty() || keys.len() > self.max_wrapped_keys {
                return Err(EnvelopeError::WrappedKeysCount {
                    count: keys.len(),
                    max: self.max_wrapped_keys,
                });
            }
        }

        Ok(())
    }
}

/// Envelope shape violations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    /// Missing or empty envelope.
    #[error("envelope is empty")]
    Empty,
    /// Serialized envelope over the size limit.
    #[error("envelope too large: {size} bytes (limit: {limit} bytes)")]
    TooLarge {
        /// Serialized size.
        size: usize,
        /// Configured limit.
        limit: usize,
    },
    /// `wrapped_keys` present but not a list.
    #[error("wrapped_keys must be a list")]
    WrappedKeysNotList,
    /// `wrapped_keys` list empty or too long.
    #[error("wrapped_keys must have between 1 and {max} entries (got {count})")]
    WrappedKeysCount {
        /// Entries present.
        count: usize,
        /// Configured maximum.
        max: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_config() -> LimitsConfig {
        LimitsConfig {
            connections_per_ip: 5,
            ..LimitsConfig::default()
        }
    }

    #[test]
    fn create_rate_limits() {
        let limits = RateLimits::new(&test_config());
        assert_eq!(limits.connection_keys_count(), 0);
        assert_eq!(limits.chat_window_count(), 0);
    }

    #[test]
    fn connection_limit_allows_within_quota() {
        let limits = RateLimits::new(&test_config());
        let ip: IpAddr = "203.0.113.7".parse().unwrap();

        for _ in 0..5 {
            assert!(limits.check_connection(ip).is_ok());
        }

        assert_eq!(
            limits.check_connection(ip),
            Err(RateLimitError::ConnectionLimitExceeded)
        );

        // Other addresses are unaffected
        let other: IpAddr = "203.0.113.8".parse().unwrap();
        assert!(limits.check_connection(other).is_ok());
    }

    #[test]
    fn forty_first_message_in_window_is_rejected() {
        let limits = RateLimits::new(&test_config());
        let session = SessionId::new();
        let start = Instant::now();

        for i in 0..40 {
            let t = start + Duration::from_millis(i * 100);
            assert!(limits.check_chat_at(&session, t).is_ok(), "send {i}");
        }
        assert_eq!(
            limits.check_chat_at(&session, start + Duration::from_millis(4_500)),
            Err(RateLimitError::ChatWindowExceeded)
        );
    }

    #[test]
    fn window_slides() {
        let limits = RateLimits::new(&test_config());
        let session = SessionId::new();
        let start = Instant::now();

        for _ in 0..40 {
            limits.check_chat_at(&session, start).unwrap();
        }
        assert!(limits
            .check_chat_at(&session, start + Duration::from_secs(9))
            .is_err());
        // Ten seconds after the burst every send has left the window
        assert!(limits
            .check_chat_at(&session, start + Duration::from_secs(10))
            .is_ok());
    }

    #[test]
    fn sessions_have_independent_windows() {
        let limits = RateLimits::new(&test_config());
        let a = SessionId::new();
        let b = SessionId::new();
        let now = Instant::now();

        for _ in 0..40 {
            limits.check_chat_at(&a, now).unwrap();
        }
        assert!(limits.check_chat_at(&a, now).is_err());
        assert!(limits.check_chat_at(&b, now).is_ok());
    }

    #[test]
    fn clear_session_resets_window() {
        let limits = RateLimits::new(&test_config());
        let session = SessionId::new();
        let now = Instant::now();

        for _ in 0..40 {
            limits.check_chat_at(&session, now).unwrap();
        }
        limits.clear_session(&session);
        assert_eq!(limits.chat_window_count(), 0);
        assert!(limits.check_chat_at(&session, now).is_ok());
    }

    #[test]
    fn shrink_drops_idle_windows() {
        let limits = RateLimits::new(&test_config());
        let session = SessionId::new();
        let start = Instant::now();
        limits.check_chat_at(&session, start).unwrap();
        let _ = limits.check_connection("198.51.100.1".parse().unwrap());

        limits.shrink_at(start + Duration::from_secs(5));
        assert_eq!(limits.chat_window_count(), 1);

        limits.shrink_at(start + Duration::from_secs(11));
        assert_eq!(limits.chat_window_count(), 0);
    }

    #[test]
    fn rate_limit_error_display() {
        assert_eq!(
            RateLimitError::ConnectionLimitExceeded.to_string(),
            "connection rate limit exceeded"
        );
        assert!(RateLimitError::ChatWindowExceeded
            .to_string()
            .starts_with("rate limit exceeded"));
    }

    #[test]
    fn envelope_must_not_be_empty() {
        let limits = EnvelopeLimits::new(&LimitsConfig::default());
        assert_eq!(limits.validate(&Value::Null), Err(EnvelopeError::Empty));
        assert_eq!(limits.validate(&json!({})), Err(EnvelopeError::Empty));
        assert_eq!(limits.validate(&json!("")), Err(EnvelopeError::Empty));
        assert!(limits.validate(&json!({"ciphertext": "AAAA"})).is_ok());
    }

    #[test]
    fn envelope_size_is_capped_at_128_kib() {
        let limits = EnvelopeLimits::new(&LimitsConfig::default());
        // {"c":"..."} adds 8 bytes of JSON around the string
        let fits = json!({"c": "a".repeat(128 * 1024 - 8)});
        assert!(limits.validate(&fits).is_ok());

        let over = json!({"c": "a".repeat(128 * 1024 - 7)});
        assert!(matches!(
            limits.validate(&over),
            Err(EnvelopeError::TooLarge { size, limit: 131072 }) if size == 131073
        ));
    }

    #[test]
    fn wrapped_keys_shape() {
        let limits = EnvelopeLimits::new(&LimitsConfig::default());
        assert!(limits
            .validate(&json!({"ciphertext": "x", "wrapped_keys": [{"k": 1}]}))
            .is_ok());
        assert_eq!(
            limits.validate(&json!({"ciphertext": "x", "wrapped_keys": "k"})),
            Err(EnvelopeError::WrappedKeysNotList)
        );
        assert_eq!(
            limits.validate(&json!({"ciphertext": "x", "wrapped_keys": []})),
            Err(EnvelopeError::WrappedKeysCount { count: 0, max: 512 })
        );
        let too_many: Vec<u32> = (0..513).collect();
        assert_eq!(
            limits.validate(&json!({"ciphertext": "x", "wrapped_keys": too_many})),
            Err(EnvelopeError::WrappedKeysCount { count: 513, max: 512 })
        );
        let max: Vec<u32> = (0..512).collect();
        assert!(limits
            .validate(&json!({"ciphertext": "x", "wrapped_keys": max}))
            .is_ok());
    }
}

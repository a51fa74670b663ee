//! Health check endpoint.
//!
//! Reports `degraded` while any host has sessions waiting on an author that
//! is not connected, since those clients can do nothing but wait.

use crate::server::Relay;
use axum::{Extension, Json};
use serde::Serialize;
use std::sync::Arc;

/// Health status response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// `ok` or `degraded`.
    pub status: &'static str,
    /// Server version.
    pub version: &'static str,
    /// Host hubs created since start.
    pub hosts_known: usize,
    /// Hosts with an authenticated author.
    pub hosts_online: usize,
    /// Hosts with sessions but no author.
    pub hosts_stranded: Vec<String>,
    /// Live sessions across all hosts, authors included.
    pub sessions: usize,
    /// Sessions that completed the pubkey handshake.
    pub authenticated_sessions: usize,
    /// Liveness checks waiting on an author.
    pub pending_liveness_checks: usize,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
}

impl HealthStatus {
    /// Snapshot the relay's current state.
    pub fn of(relay: &Relay) -> Self {
        let hosts_stranded = relay.stranded_hosts();
        Self {
            status: if hosts_stranded.is_empty() { "ok" } else { "degraded" },
            version: env!("CARGO_PKG_VERSION"),
            hosts_known: relay.total_hosts(),
            hosts_online: relay.online_hosts(),
            hosts_stranded,
            sessions: relay.total_sessions(),
            authenticated_sessions: relay.authenticated_sessions(),
            pending_liveness_checks: relay.liveness().len(),
            uptime_seconds: relay.uptime().as_secs(),
        }
    }
}

/// Health check handler.
pub async fn health_handler(Extension(relay): Extension<Arc<Relay>>) -> Json<HealthStatus> {
    Json(HealthStatus::of(&relay))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::{HostDirectory, HostRecord, SqliteHostStore};
    use parch_types::{Frame, MessageType};
    use serde_json::json;

    async fn relay() -> Relay {
        let store = SqliteHostStore::in_memory().await.unwrap();
        store
            .register_host(&HostRecord {
                host_id: "host-1".into(),
                author_id: "author-1".into(),
                signing_public_key: None,
            })
            .await
            .unwrap();
        Relay::new(Config::default(), Arc::new(store))
    }

    #[tokio::test]
    async fn idle_relay_is_ok() {
        let status = HealthStatus::of(&relay().await);
        assert_eq!(status.status, "ok");
        assert_eq!(status.hosts_known, 0);
        assert_eq!(status.sessions, 0);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["hosts_stranded"], json!([]));
    }

    #[tokio::test]
    async fn host_without_author_is_degraded() {
        let relay = relay().await;
        // An author-role join creates the hub without completing the handshake
        let (mut conn, _rx) = relay.open_connection("10.0.0.1".parse().unwrap(), true);
        relay
            .handle_frame(
                &mut conn,
                Frame::new(
                    MessageType::JoinHost,
                    json!({ "host_id": "host-1", "role": "author" }),
                ),
            )
            .await;

        let status = HealthStatus::of(&relay);
        assert_eq!(status.status, "degraded");
        assert_eq!(status.hosts_known, 1);
        assert_eq!(status.hosts_online, 0);
        assert_eq!(status.hosts_stranded, vec!["host-1".to_string()]);
        assert_eq!(status.sessions, 1);
        assert_eq!(status.authenticated_sessions, 0);

        relay.disconnect(&mut conn);
        assert_eq!(HealthStatus::of(&relay).status, "ok");
    }
}

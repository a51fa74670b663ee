//! Prometheus metrics endpoint.

use crate::server::{Relay, RelayMetrics};
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Prometheus metrics handler.
pub async fn metrics_handler(Extension(relay): Extension<Arc<Relay>>) -> impl IntoResponse {
    let body = render(&relay);
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

fn render(relay: &Relay) -> String {
    let m: &RelayMetrics = relay.metrics();
    let mut out = String::new();

    gauge(&mut out, "sessions_active", "Live sessions across all hosts", relay.total_sessions() as u64);
    gauge(&mut out, "hosts_active", "Host hubs created since startup", relay.total_hosts() as u64);
    gauge(&mut out, "liveness_pending", "Liveness checks awaiting an ack", relay.liveness().len() as u64);
    gauge(&mut out, "chat_windows", "Sessions with an open chat rate window", relay.rate_limits().chat_window_count() as u64);

    let counters: [(&str, &str, &AtomicU64); 10] = [
        ("connections_total", "WebSocket connections accepted", &m.connections_total),
        ("frames_total", "Inbound frames processed", &m.frames_total),
        ("forwarded_total", "Requests forwarded to host authors", &m.forwarded_total),
        ("broadcasts_total", "Fan-out deliveries to channels and spaces", &m.broadcasts_total),
        ("auth_failures_total", "Rejected identity handshakes", &m.auth_failures),
        ("unauthorized_total", "Rejected capability tokens", &m.unauthorized_total),
        ("rate_limit_hits_total", "Rate limit rejections", &m.rate_limit_hits),
        ("liveness_failures_total", "Joins refused because the host author was unresponsive", &m.liveness_failures),
        ("mailbox_overflows_total", "Sessions closed on a full mailbox", &m.mailbox_overflows),
        ("errors_total", "Protocol and connectivity errors", &m.errors_total),
    ];
    for (name, help, value) in counters {
        out.push_str(&format!(
            "# HELP parch_relay_{name} {help}\n# TYPE parch_relay_{name} counter\nparch_relay_{name} {}\n\n",
            value.load(Ordering::Relaxed)
        ));
    }

    out.push_str(&format!(
        "# HELP parch_relay_info Server information\n# TYPE parch_relay_info gauge\nparch_relay_info{{version=\"{}\"}} 1\n",
        env!("CARGO_PKG_VERSION")
    ));
    out
}

fn gauge(out: &mut String, name: &str, help: &str, value: u64) {
    out.push_str(&format!(
        "# HELP parch_relay_{name} {help}\n# TYPE parch_relay_{name} gauge\nparch_relay_{name} {value}\n\n"
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::SqliteHostStore;

    #[tokio::test]
    async fn render_includes_gauges_and_counters() {
        let store = SqliteHostStore::in_memory().await.unwrap();
        let relay = Relay::new(Config::default(), Arc::new(store));
        RelayMetrics::incr(&relay.metrics().rate_limit_hits);

        let text = render(&relay);
        assert!(text.contains("# TYPE parch_relay_sessions_active gauge"));
        assert!(text.contains("parch_relay_sessions_active 0"));
        assert!(text.contains("parch_relay_rate_limit_hits_total 1"));
        assert!(text.contains("# TYPE parch_relay_connections_total counter"));
        assert!(text.contains("parch_relay_info{version="));
    }
}

//! Metrics Collection for HookTunnel Relay
//!
//! Atomic relay-wide counters plus per-webhook counters, rendered in
//! Prometheus text format for the ingress `/metrics` endpoint.

use dashmap::DashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Relay-wide metrics
#[derive(Clone, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    registrations: AtomicU64,
    active_links: AtomicU64,
    forwarded: AtomicU64,
    /// Rejections by reason
    rejected_not_found: AtomicU64,
    rejected_unavailable: AtomicU64,
    transmit_failures: AtomicU64,
    results_reported: AtomicU64,
    bytes_in: AtomicU64,
    /// Per-webhook metrics, dropped when the session goes away
    webhooks: DashMap<String, WebhookMetrics>,
}

/// Per-webhook metrics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebhookMetrics {
    pub forwarded: u64,
    pub failed: u64,
    pub bytes_in: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registered(&self) {
        self.inner.registrations.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an attached stream; starts the per-webhook entry
    pub fn link_opened(&self, webhook_id: &str) {
        self.inner.active_links.fetch_add(1, Ordering::Relaxed);
        self.inner.webhooks.entry(webhook_id.to_string()).or_default();
    }

    /// Record a closed stream; `session_removed` drops the per-webhook entry
    pub fn link_closed(&self, webhook_id: &str, session_removed: bool) {
        let _ = self
            .inner
            .active_links
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        if session_removed {
            self.inner.webhooks.remove(webhook_id);
        }
    }

    pub fn forwarded(&self, webhook_id: &str, bytes: u64) {
        self.inner.forwarded.fetch_add(1, Ordering::Relaxed);
        self.inner.bytes_in.fetch_add(bytes, Ordering::Relaxed);
        // The entry is gone if the session detached while this send completed
        if let Some(mut entry) = self.inner.webhooks.get_mut(webhook_id) {
            entry.forwarded += 1;
            entry.bytes_in += bytes;
        }
    }

    pub fn rejected_not_found(&self) {
        self.inner.rejected_not_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rejected_unavailable(&self) {
        self.inner.rejected_unavailable.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transmit_failed(&self, webhook_id: &str) {
        self.inner.transmit_failures.fetch_add(1, Ordering::Relaxed);
        if let Some(mut entry) = self.inner.webhooks.get_mut(webhook_id) {
            entry.failed += 1;
        }
    }

    pub fn result_reported(&self) {
        self.inner.results_reported.fetch_add(1, Ordering::Relaxed);
    }

    pub fn active_links(&self) -> u64 {
        self.inner.active_links.load(Ordering::Relaxed)
    }

    pub fn results_reported(&self) -> u64 {
        self.inner.results_reported.load(Ordering::Relaxed)
    }

    pub fn webhook(&self, webhook_id: &str) -> Option<WebhookMetrics> {
        self.inner.webhooks.get(webhook_id).map(|m| m.value().clone())
    }

    /// Generate Prometheus-format metrics text
    pub fn to_prometheus(&self) -> String {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let inner = &self.inner;

        let mut out = format!(
r#"# HELP hooktunnel_registrations_total Listener registrations accepted
# TYPE hooktunnel_registrations_total counter
hooktunnel_registrations_total {}

# HELP hooktunnel_active_links Client streams currently attached
# TYPE hooktunnel_active_links gauge
hooktunnel_active_links {}

# HELP hooktunnel_deliveries_total Inbound webhooks by relay outcome
# TYPE hooktunnel_deliveries_total counter
hooktunnel_deliveries_total{{outcome="forwarded"}} {}
hooktunnel_deliveries_total{{outcome="not_found"}} {}
hooktunnel_deliveries_total{{outcome="link_unavailable"}} {}
hooktunnel_deliveries_total{{outcome="transmit_error"}} {}

# HELP hooktunnel_results_reported_total Delivery results reported by clients
# TYPE hooktunnel_results_reported_total counter
hooktunnel_results_reported_total {}

# HELP hooktunnel_bytes_in_total Webhook body bytes relayed to clients
# TYPE hooktunnel_bytes_in_total counter
hooktunnel_bytes_in_total {}
"#,
            load(&inner.registrations),
            load(&inner.active_links),
            load(&inner.forwarded),
            load(&inner.rejected_not_found),
            load(&inner.rejected_unavailable),
            load(&inner.transmit_failures),
            load(&inner.results_reported),
            load(&inner.bytes_in),
        );

        if !inner.webhooks.is_empty() {
            out.push_str("\n# HELP hooktunnel_webhook_deliveries_total Deliveries per webhook\n");
            out.push_str("# TYPE hooktunnel_webhook_deliveries_total counter\n");
            for entry in inner.webhooks.iter() {
                let _ = writeln!(
                    out,
                    "hooktunnel_webhook_deliveries_total{{webhook=\"{}\",outcome=\"forwarded\"}} {}",
                    entry.key(),
                    entry.forwarded
                );
                let _ = writeln!(
                    out,
                    "hooktunnel_webhook_deliveries_total{{webhook=\"{}\",outcome=\"failed\"}} {}",
                    entry.key(),
                    entry.failed
                );
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_webhook_counters() {
        let m = Metrics::new();
        m.link_opened("w");
        m.forwarded("w", 10);
        m.forwarded("w", 5);
        m.transmit_failed("w");
        assert_eq!(
            m.webhook("w"),
            Some(WebhookMetrics { forwarded: 2, failed: 1, bytes_in: 15 })
        );

        m.link_closed("w", true);
        assert_eq!(m.active_links(), 0);
        assert!(m.webhook("w").is_none());
    }

    #[test]
    fn test_late_forward_does_not_resurrect_entry() {
        let m = Metrics::new();
        m.link_opened("w");
        m.link_closed("w", true);
        m.forwarded("w", 3);
        assert!(m.webhook("w").is_none());
        assert!(m.to_prometheus().contains(r#"hooktunnel_deliveries_total{outcome="forwarded"} 1"#));
    }

    #[test]
    fn test_link_closed_never_underflows() {
        let m = Metrics::new();
        m.link_closed("w", false);
        assert_eq!(m.active_links(), 0);
    }

    #[test]
    fn test_prometheus_output() {
        let m = Metrics::new();
        m.registered();
        m.link_opened("github");
        m.forwarded("github", 7);
        m.rejected_not_found();
        let text = m.to_prometheus();
        assert!(text.contains("hooktunnel_registrations_total 1"));
        assert!(text.contains(r#"hooktunnel_deliveries_total{outcome="forwarded"} 1"#));
        assert!(text.contains(r#"hooktunnel_deliveries_total{outcome="not_found"} 1"#));
        assert!(text.contains(r#"webhook="github",outcome="forwarded"} 1"#));
    }
}

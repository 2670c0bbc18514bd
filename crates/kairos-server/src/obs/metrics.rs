//! Metric registry for the server.
//!
//! Counters and gauges carry dynamic labels backed by `DashMap`; label sets
//! are flattened into sorted key vectors for deterministic rendering. Hot
//! paths (per-command, per-frame) use plain atomics with no label lookup.
//! Output is text exposition suitable for the log or a future scrape
//! endpoint.

use std::fmt::Write;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use dashmap::DashMap;

type LabelKey = Vec<(String, String)>;

fn label_key(labels: &[(&str, &str)]) -> LabelKey {
    let mut key: LabelKey = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    key.sort();
    key
}

fn render_labels(key: &LabelKey) -> String {
    key.iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, v.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Default)]
pub struct CounterVec {
    map: DashMap<LabelKey, AtomicU64>,
}

impl CounterVec {
    pub fn inc(&self, labels: &[(&str, &str)]) {
        self.add(labels, 1);
    }

    pub fn add(&self, labels: &[(&str, &str)], v: u64) {
        self.map
            .entry(label_key(labels))
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(v, Ordering::Relaxed);
    }

    pub fn get(&self, labels: &[(&str, &str)]) -> u64 {
        self.map
            .get(&label_key(labels))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {name} counter");
        for r in self.map.iter() {
            let _ = writeln!(
                out,
                "{name}{{{}}} {}",
                render_labels(r.key()),
                r.value().load(Ordering::Relaxed)
            );
        }
    }
}

#[derive(Default)]
pub struct GaugeVec {
    map: DashMap<LabelKey, AtomicI64>,
}

impl GaugeVec {
    pub fn inc(&self, labels: &[(&str, &str)]) {
        self.add(labels, 1);
    }

    pub fn dec(&self, labels: &[(&str, &str)]) {
        self.add(labels, -1);
    }

    pub fn add(&self, labels: &[(&str, &str)], v: i64) {
        self.map
            .entry(label_key(labels))
            .or_insert_with(|| AtomicI64::new(0))
            .fetch_add(v, Ordering::Relaxed);
    }

    pub fn get(&self, labels: &[(&str, &str)]) -> i64 {
        self.map
            .get(&label_key(labels))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {name} gauge");
        for r in self.map.iter() {
            let _ = writeln!(
                out,
                "{name}{{{}}} {}",
                render_labels(r.key()),
                r.value().load(Ordering::Relaxed)
            );
        }
    }
}

/// All server metrics. Shared via `Arc`; every field is independently
/// thread-safe so there is no global lock.
#[derive(Default)]
pub struct ServerMetrics {
    /// Labeled: transport = tcp|local.
    pub sessions_active: GaugeVec,
    /// Labeled: transport.
    pub sessions_total: CounterVec,
    /// Labeled: reason = capacity|peer_capacity|timeout|error.
    pub sessions_rejected: CounterVec,
    /// Labeled: kind (error taxonomy label).
    pub decode_errors: CounterVec,
    /// Labeled: code (wire error code).
    pub error_responses: CounterVec,

    pub bytes_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub messages_received: AtomicU64,
    pub messages_sent: AtomicU64,
    pub commands_rate_limited: AtomicU64,
    pub frames_rendered: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub draw_calls: AtomicU64,
    pub vertices_flushed: AtomicU64,
}

impl ServerMetrics {
    pub fn add_bytes_received(&self, n: u64) {
        self.bytes_received.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_bytes_sent(&self, n: u64) {
        self.bytes_sent.fetch_add(n, Ordering::Relaxed);
    }

    /// Render all metrics plus caller-provided extra lines (queue depth,
    /// FPS and friends that live outside this registry).
    pub fn render(&self, extra: &[(&str, u64)]) -> String {
        let mut out = String::new();
        self.sessions_active.render("kairos_sessions_active", &mut out);
        self.sessions_total.render("kairos_sessions_total", &mut out);
        self.sessions_rejected.render("kairos_sessions_rejected_total", &mut out);
        self.decode_errors.render("kairos_decode_errors_total", &mut out);
        self.error_responses.render("kairos_error_responses_total", &mut out);

        for (name, v) in [
            ("kairos_bytes_received_total", &self.bytes_received),
            ("kairos_bytes_sent_total", &self.bytes_sent),
            ("kairos_messages_received_total", &self.messages_received),
            ("kairos_messages_sent_total", &self.messages_sent),
            ("kairos_commands_rate_limited_total", &self.commands_rate_limited),
            ("kairos_frames_rendered_total", &self.frames_rendered),
            ("kairos_frames_dropped_total", &self.frames_dropped),
            ("kairos_draw_calls_total", &self.draw_calls),
            ("kairos_vertices_flushed_total", &self.vertices_flushed),
        ] {
            let _ = writeln!(out, "# TYPE {name} counter");
            let _ = writeln!(out, "{name} {}", v.load(Ordering::Relaxed));
        }

        for (k, v) in extra {
            let _ = writeln!(out, "{k} {v}");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_labels_are_order_insensitive() {
        let c = CounterVec::default();
        c.inc(&[("a", "1"), ("b", "2")]);
        c.inc(&[("b", "2"), ("a", "1")]);
        assert_eq!(c.get(&[("a", "1"), ("b", "2")]), 2);
    }

    #[test]
    fn gauge_inc_dec_balances() {
        let g = GaugeVec::default();
        g.inc(&[("transport", "tcp")]);
        g.inc(&[("transport", "tcp")]);
        g.dec(&[("transport", "tcp")]);
        assert_eq!(g.get(&[("transport", "tcp")]), 1);
    }

    #[test]
    fn render_contains_type_lines() {
        let m = ServerMetrics::default();
        m.sessions_total.inc(&[("transport", "tcp")]);
        let out = m.render(&[("kairos_queue_depth", 5)]);
        assert!(out.contains("# TYPE kairos_sessions_total counter"));
        assert!(out.contains("kairos_queue_depth 5"));
    }
}

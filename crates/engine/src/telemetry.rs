//! Telemetry: the rolling seconds-per-thought window and the text
//! renderers for the metrics export endpoints.
//!
//! The processing rate is *seconds per thought* — the rolling mean of
//! per-thought wall time over the most recent ≤100 completed thoughts —
//! never a message rate.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Thought metrics
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ThoughtMetrics {
    window: Mutex<VecDeque<f64>>,
    window_cap: usize,
    thoughts_total: AtomicU64,
    tasks_completed: AtomicU64,
    gate_rejections: AtomicU64,
}

impl ThoughtMetrics {
    pub fn new(window_cap: usize) -> Self {
        Self {
            window: Mutex::new(VecDeque::with_capacity(window_cap)),
            window_cap: window_cap.max(1),
            thoughts_total: AtomicU64::new(0),
            tasks_completed: AtomicU64::new(0),
            gate_rejections: AtomicU64::new(0),
        }
    }

    /// Record one completed thought's wall time.
    pub fn record_thought(&self, seconds: f64) {
        let mut window = self.window.lock();
        if window.len() == self.window_cap {
            window.pop_front();
        }
        window.push_back(seconds);
        self.thoughts_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_task_completed(&self) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_gate_rejection(&self) {
        self.gate_rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// Rolling mean over the window; 0.0 with no samples.
    pub fn seconds_per_thought(&self) -> f64 {
        let window = self.window.lock();
        if window.is_empty() {
            return 0.0;
        }
        window.iter().sum::<f64>() / window.len() as f64
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            seconds_per_thought: self.seconds_per_thought(),
            thoughts_total: self.thoughts_total.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            gate_rejections: self.gate_rejections.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub seconds_per_thought: f64,
    pub thoughts_total: u64,
    pub tasks_completed: u64,
    pub gate_rejections: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Text renderers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One gauge line set for the export formats.
pub struct MetricLine {
    pub name: String,
    pub value: f64,
}

pub fn gauge(name: impl Into<String>, value: f64) -> MetricLine {
    MetricLine {
        name: name.into(),
        value,
    }
}

/// Prometheus text exposition format.
pub fn render_prometheus(prefix: &str, lines: &[MetricLine]) -> String {
    let mut out = String::new();
    for line in lines {
        let full = format!("{prefix}_{}", line.name);
        out.push_str(&format!("# TYPE {full} gauge\n"));
        out.push_str(&format!("{full} {}\n", line.value));
    }
    out
}

/// Graphite plaintext protocol (`name value timestamp`).
pub fn render_graphite(prefix: &str, lines: &[MetricLine], timestamp: i64) -> String {
    let mut out = String::new();
    for line in lines {
        out.push_str(&format!("{prefix}.{} {} {timestamp}\n", line.name, line.value));
    }
    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_window_reports_zero() {
        let metrics = ThoughtMetrics::new(100);
        assert_eq!(metrics.seconds_per_thought(), 0.0);
    }

    #[test]
    fn rolling_mean_over_window() {
        let metrics = ThoughtMetrics::new(100);
        metrics.record_thought(5.0);
        metrics.record_thought(15.0);
        assert!((metrics.seconds_per_thought() - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn window_evicts_beyond_cap() {
        let metrics = ThoughtMetrics::new(3);
        for s in [100.0, 1.0, 2.0, 3.0] {
            metrics.record_thought(s);
        }
        // The 100.0 sample fell out of the window.
        assert!((metrics.seconds_per_thought() - 2.0).abs() < f64::EPSILON);
        // But the lifetime counter kept it.
        assert_eq!(metrics.snapshot().thoughts_total, 4);
    }

    #[test]
    fn mean_tracks_most_recent_hundred() {
        let metrics = ThoughtMetrics::new(100);
        for _ in 0..100 {
            metrics.record_thought(1.0);
        }
        for _ in 0..50 {
            metrics.record_thought(3.0);
        }
        // Window now holds 50×1.0 + 50×3.0.
        assert!((metrics.seconds_per_thought() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn prometheus_format() {
        let out = render_prometheus(
            "ciris",
            &[gauge("seconds_per_thought", 7.5), gauge("queue_depth", 3.0)],
        );
        assert!(out.contains("# TYPE ciris_seconds_per_thought gauge"));
        assert!(out.contains("ciris_seconds_per_thought 7.5"));
        assert!(out.contains("ciris_queue_depth 3"));
    }

    #[test]
    fn graphite_format() {
        let out = render_graphite("ciris", &[gauge("seconds_per_thought", 7.5)], 1_700_000_000);
        assert_eq!(out, "ciris.seconds_per_thought 7.5 1700000000\n");
    }
}

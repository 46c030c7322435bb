//! Inbound FIFO and backlog diagnostics

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Unbounded FIFO between the transport callback and the inbound worker.
/// The callback only pushes, so it never waits on processing.
#[derive(Default)]
pub struct InboundQueue {
    items: Mutex<VecDeque<String>>,
    ready: Condvar,
}

impl InboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, blob: String) {
        self.items.lock().push_back(blob);
        self.ready.notify_one();
    }

    /// Oldest blob, waiting up to `timeout` for one to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<String> {
        let mut items = self.items.lock();
        if items.is_empty() {
            let _ = self.ready.wait_for(&mut items, timeout);
        }
        items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// First `n` queued blobs, each cut to `width` chars.
    pub fn previews(&self, n: usize, width: usize) -> Vec<String> {
        self.items
            .lock()
            .iter()
            .take(n)
            .map(|s| s.chars().take(width).collect())
            .collect()
    }
}

/// Samples queue depth while it is above a threshold and hands the samples
/// back at most once per interval.
pub struct BacklogProbe {
    threshold: usize,
    interval: Duration,
    samples: Vec<usize>,
    last_report: Option<Instant>,
}

impl BacklogProbe {
    pub fn new(threshold: usize, interval: Duration) -> Self {
        Self {
            threshold,
            interval,
            samples: Vec::new(),
            last_report: None,
        }
    }

    pub fn observe(&mut self, depth: usize, in_trading_hours: bool, now: Instant) -> Option<Vec<usize>> {
        if !in_trading_hours || depth <= self.threshold {
            return None;
        }
        self.samples.push(depth);
        let due = self
            .last_report
            .is_none_or(|t| now.duration_since(t) >= self.interval);
        if !due {
            return None;
        }
        self.last_report = Some(now);
        Some(std::mem::take(&mut self.samples))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_is_fifo() {
        let q = InboundQueue::new();
        q.push("a".into());
        q.push("b".into());
        assert_eq!(q.pop_timeout(Duration::from_millis(1)).as_deref(), Some("a"));
        assert_eq!(q.pop_timeout(Duration::from_millis(1)).as_deref(), Some("b"));
        assert_eq!(q.pop_timeout(Duration::from_millis(1)), None);
    }

    #[test]
    fn test_previews_are_truncated() {
        let q = InboundQueue::new();
        q.push("<orders><order/></orders>".into());
        assert_eq!(q.previews(5, 8), vec!["<orders>".to_string()]);
    }

    #[test]
    fn test_backlog_reports_at_most_once_per_interval() {
        let mut probe = BacklogProbe::new(24, Duration::from_secs(15));
        let t0 = Instant::now();
        assert_eq!(probe.observe(10, true, t0), None);
        assert_eq!(probe.observe(30, false, t0), None);
        assert_eq!(probe.observe(30, true, t0), Some(vec![30]));
        assert_eq!(probe.observe(40, true, t0 + Duration::from_secs(1)), None);
        assert_eq!(
            probe.observe(50, true, t0 + Duration::from_secs(16)),
            Some(vec![40, 50])
        );
    }
}

//! Per-request telemetry and aggregate traffic statistics.
//!
//! Requests are tracked by an id assigned by the caller. Aggregates are kept
//! as running totals so [`TrafficMonitor::stats`] does not scan records.
//! Completed records are retained up to a fixed bound for inspection through
//! [`TrafficMonitor::record`]; pending ones are kept until they complete.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Number of latency samples averaged in statistics.
pub const LATENCY_WINDOW: usize = 1000;

/// Number of completed records retained for inspection.
pub const COMPLETED_RETENTION: usize = 10_000;

/// Lifecycle state of a tracked request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Waiting for a response.
    Pending,
    /// Response recorded.
    Completed,
}

/// Snapshot of one tracked request.
#[derive(Debug, Clone, PartialEq)]
pub struct TrafficRecord {
    /// Request URL.
    pub url: String,
    /// Request method.
    pub method: String,
    /// When tracking started.
    pub started_at: Instant,
    /// Time from start to response, once completed.
    pub elapsed: Option<Duration>,
    /// Response status code, once completed.
    pub status_code: Option<u16>,
    /// Response body size in bytes, once completed.
    pub response_size: Option<u64>,
    /// Lifecycle state.
    pub status: RecordStatus,
}

/// Aggregate traffic statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkStats {
    /// Wall-clock start of monitoring.
    pub started_at: DateTime<Utc>,
    /// Seconds since monitoring started.
    pub uptime: f64,
    /// Requests ever tracked.
    pub total_requests: u64,
    /// Requests with a recorded response.
    pub completed_requests: u64,
    /// Mean latency in seconds over the most recent samples.
    pub average_response_time: f64,
    /// Sum of response sizes.
    pub total_bytes_transferred: u64,
    /// Completed requests per second of uptime.
    pub requests_per_second: f64,
}

#[derive(Debug, Default)]
struct MonitorState {
    records: HashMap<u64, TrafficRecord>,
    completed_order: VecDeque<u64>,
    latencies: VecDeque<f64>,
    total_requests: u64,
    completed_requests: u64,
    total_bytes: u64,
}

impl MonitorState {
    fn forget(&mut self, id: u64) {
        if let Some(old) = self.records.remove(&id) {
            if old.status == RecordStatus::Completed {
                self.completed_requests = self.completed_requests.saturating_sub(1);
                self.total_bytes = self
                    .total_bytes
                    .saturating_sub(old.response_size.unwrap_or(0));
                self.completed_order.retain(|&c| c != id);
            }
            self.total_requests = self.total_requests.saturating_sub(1);
        }
    }
}

/// Thread-safe request tracker.
#[derive(Debug)]
pub struct TrafficMonitor {
    state: Mutex<MonitorState>,
    started: Instant,
    started_at: DateTime<Utc>,
}

impl Default for TrafficMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl TrafficMonitor {
    /// Creates a monitor starting now.
    pub fn new() -> Self {
        Self::started(Instant::now())
    }

    fn started(started: Instant) -> Self {
        Self {
            state: Mutex::new(MonitorState::default()),
            started,
            started_at: Utc::now(),
        }
    }

    /// Starts tracking a request. Re-using an id replaces its record.
    pub fn track_request(&self, id: u64, url: &str, method: &str) {
        self.track_request_at(id, url, method, Instant::now());
    }

    /// Completes a request. Unknown or already completed ids are ignored.
    pub fn track_response(&self, id: u64, status_code: u16, response_size: u64) {
        self.track_response_at(id, status_code, response_size, Instant::now());
    }

    /// Returns aggregate statistics.
    pub fn stats(&self) -> NetworkStats {
        self.stats_at(Instant::now())
    }

    /// Returns a snapshot of one record, if still retained.
    pub fn record(&self, id: u64) -> Option<TrafficRecord> {
        self.state.lock().records.get(&id).cloned()
    }

    pub(crate) fn track_request_at(&self, id: u64, url: &str, method: &str, now: Instant) {
        let mut state = self.state.lock();
        state.forget(id);
        state.records.insert(
            id,
            TrafficRecord {
                url: url.to_string(),
                method: method.to_string(),
                started_at: now,
                elapsed: None,
                status_code: None,
                response_size: None,
                status: RecordStatus::Pending,
            },
        );
        state.total_requests += 1;
    }

    pub(crate) fn track_response_at(&self, id: u64, status_code: u16, response_size: u64, now: Instant) {
        let mut state = self.state.lock();

        let Some(record) = state.records.get_mut(&id) else {
            return;
        };
        if record.status == RecordStatus::Completed {
            return;
        }

        let elapsed = now.saturating_duration_since(record.started_at);
        record.elapsed = Some(elapsed);
        record.status_code = Some(status_code);
        record.response_size = Some(response_size);
        record.status = RecordStatus::Completed;

        state.completed_requests += 1;
        state.total_bytes += response_size;

        state.latencies.push_back(elapsed.as_secs_f64());
        if state.latencies.len() > LATENCY_WINDOW {
            state.latencies.pop_front();
        }

        state.completed_order.push_back(id);
        if state.completed_order.len() > COMPLETED_RETENTION {
            if let Some(oldest) = state.completed_order.pop_front() {
                state.records.remove(&oldest);
            }
        }
    }

    pub(crate) fn stats_at(&self, now: Instant) -> NetworkStats {
        let state = self.state.lock();
        let uptime = now.saturating_duration_since(self.started).as_secs_f64();

        let average_response_time = if state.latencies.is_empty() {
            0.0
        } else {
            state.latencies.iter().sum::<f64>() / state.latencies.len() as f64
        };

        let requests_per_second = if uptime > 0.0 {
            state.completed_requests as f64 / uptime
        } else {
            0.0
        };

        NetworkStats {
            started_at: self.started_at,
            uptime,
            total_requests: state.total_requests,
            completed_requests: state.completed_requests,
            average_response_time,
            total_bytes_transferred: state.total_bytes,
            requests_per_second,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[test]
    fn pending_then_completed() {
        let t0 = Instant::now();
        let monitor = TrafficMonitor::started(t0);

        monitor.track_request_at(1, "http://a/", "GET", t0);
        let pending = monitor.record(1).unwrap();
        assert_eq!(pending.status, RecordStatus::Pending);
        assert!(pending.elapsed.is_none());

        monitor.track_response_at(1, 200, 512, t0 + secs(0.25));
        let done = monitor.record(1).unwrap();
        assert_eq!(done.status, RecordStatus::Completed);
        assert_eq!(done.status_code, Some(200));
        assert_eq!(done.response_size, Some(512));
        assert_eq!(done.elapsed, Some(secs(0.25)));
    }

    #[test]
    fn stats_aggregate() {
        let t0 = Instant::now();
        let monitor = TrafficMonitor::started(t0);

        monitor.track_request_at(1, "http://a/", "GET", t0);
        monitor.track_request_at(2, "http://b/", "GET", t0);
        monitor.track_request_at(3, "http://c/", "POST", t0);
        monitor.track_response_at(1, 200, 100, t0 + secs(1.0));
        monitor.track_response_at(2, 404, 50, t0 + secs(3.0));

        let stats = monitor.stats_at(t0 + secs(4.0));
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.completed_requests, 2);
        assert_eq!(stats.total_bytes_transferred, 150);
        assert!((stats.average_response_time - 2.0).abs() < 1e-9);
        assert!((stats.uptime - 4.0).abs() < 1e-9);
        assert!((stats.requests_per_second - 0.5).abs() < 1e-9);
    }

    #[test]
    fn zero_uptime_has_zero_rate() {
        let t0 = Instant::now();
        let monitor = TrafficMonitor::started(t0);
        monitor.track_request_at(1, "http://a/", "GET", t0);
        monitor.track_response_at(1, 200, 1, t0);
        let stats = monitor.stats_at(t0);
        assert_eq!(stats.requests_per_second, 0.0);
        assert_eq!(stats.completed_requests, 1);
    }

    #[test]
    fn unknown_id_is_ignored() {
        let monitor = TrafficMonitor::new();
        monitor.track_response(42, 200, 10);
        let stats = monitor.stats();
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.completed_requests, 0);
    }

    #[test]
    fn double_completion_counts_once() {
        let monitor = TrafficMonitor::new();
        monitor.track_request(1, "http://a/", "GET");
        monitor.track_response(1, 200, 10);
        monitor.track_response(1, 500, 99);
        let stats = monitor.stats();
        assert_eq!(stats.completed_requests, 1);
        assert_eq!(stats.total_bytes_transferred, 10);
    }

    #[test]
    fn latency_positive_in_real_time() {
        let monitor = TrafficMonitor::new();
        monitor.track_request(1, "http://a/", "GET");
        std::thread::sleep(Duration::from_millis(5));
        monitor.track_response(1, 200, 10);
        assert!(monitor.stats().average_response_time > 0.0);
    }

    #[test]
    fn latency_window_keeps_most_recent() {
        let t0 = Instant::now();
        let monitor = TrafficMonitor::started(t0);

        for id in 0..LATENCY_WINDOW as u64 {
            monitor.track_request_at(id, "http://a/", "GET", t0);
            monitor.track_response_at(id, 200, 0, t0 + secs(10.0));
        }
        for id in 0..LATENCY_WINDOW as u64 {
            let id = id + LATENCY_WINDOW as u64;
            monitor.track_request_at(id, "http://a/", "GET", t0);
            monitor.track_response_at(id, 200, 0, t0 + secs(2.0));
        }

        let stats = monitor.stats_at(t0 + secs(20.0));
        assert!((stats.average_response_time - 2.0).abs() < 1e-9);
        assert_eq!(stats.completed_requests, 2 * LATENCY_WINDOW as u64);
    }

    #[test]
    fn reused_id_replaces_record() {
        let monitor = TrafficMonitor::new();
        monitor.track_request(7, "http://a/", "GET");
        monitor.track_response(7, 200, 10);
        monitor.track_request(7, "http://b/", "POST");

        let stats = monitor.stats();
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.completed_requests, 0);
        assert_eq!(stats.total_bytes_transferred, 0);
        assert_eq!(monitor.record(7).unwrap().url, "http://b/");
    }

    #[test]
    fn stats_serialize_with_expected_keys() {
        let json = serde_json::to_value(TrafficMonitor::new().stats()).unwrap();
        for key in [
            "uptime",
            "total_requests",
            "completed_requests",
            "average_response_time",
            "total_bytes_transferred",
            "requests_per_second",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }
}

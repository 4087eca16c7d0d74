// Server statistics
// Monotonic counters plus the peak request-to-response latency, all behind
// one mutex; the expire loop renders the summary line periodically.

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    accept_conn: u64,
    expire_conn: u64,
    requests: u64,
    responses: u64,
    max_req_resp: Duration,
}

/// Real-time server statistics.
#[derive(Debug)]
pub struct Stats {
    started: Instant,
    counters: Mutex<Counters>,
}

/// A point-in-time copy of the counters.
#[derive(Debug, Clone, Copy)]
pub struct StatsSnapshot {
    pub accept_conn_count: u64,
    pub expire_conn_count: u64,
    pub request_count: u64,
    pub response_count: u64,
    /// Duration of the longest request-to-response cycle seen so far.
    pub max_req_resp_time: Duration,
    pub started: Instant,
}

impl Stats {
    pub(crate) fn new() -> Stats {
        Stats {
            started: Instant::now(),
            counters: Mutex::new(Counters::default()),
        }
    }

    pub(crate) fn inc_accept_conn(&self) {
        self.counters.lock().unwrap().accept_conn += 1;
    }

    pub(crate) fn inc_expire_conn(&self) {
        self.counters.lock().unwrap().expire_conn += 1;
    }

    pub(crate) fn inc_request(&self) {
        self.counters.lock().unwrap().requests += 1;
    }

    pub(crate) fn inc_response(&self) {
        self.counters.lock().unwrap().responses += 1;
    }

    pub(crate) fn add_req_resp_time(&self, elapsed: Duration) {
        let mut counters = self.counters.lock().unwrap();
        if elapsed > counters.max_req_resp {
            counters.max_req_resp = elapsed;
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let counters = *self.counters.lock().unwrap();
        StatsSnapshot {
            accept_conn_count: counters.accept_conn,
            expire_conn_count: counters.expire_conn,
            request_count: counters.requests,
            response_count: counters.responses,
            max_req_resp_time: counters.max_req_resp,
            started: self.started,
        }
    }

    /// One-line operational summary, as logged by the expire loop.
    pub fn summary_line(&self, live_conns: usize) -> String {
        let counters = *self.counters.lock().unwrap();
        format!(
            "running {} min, {} accept, {} expire, {} req, {} resp; peak req-resp {} ms; {} conns live",
            self.started.elapsed().as_secs() / 60,
            counters.accept_conn,
            counters.expire_conn,
            counters.requests,
            counters.responses,
            counters.max_req_resp.as_millis(),
            live_conns,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = Stats::new();
        stats.inc_accept_conn();
        stats.inc_request();
        stats.inc_request();
        stats.inc_response();
        stats.inc_expire_conn();
        let snap = stats.snapshot();
        assert_eq!(snap.accept_conn_count, 1);
        assert_eq!(snap.request_count, 2);
        assert_eq!(snap.response_count, 1);
        assert_eq!(snap.expire_conn_count, 1);
    }

    #[test]
    fn test_latency_keeps_peak() {
        let stats = Stats::new();
        stats.add_req_resp_time(Duration::from_millis(5));
        stats.add_req_resp_time(Duration::from_millis(50));
        stats.add_req_resp_time(Duration::from_millis(20));
        assert_eq!(stats.snapshot().max_req_resp_time, Duration::from_millis(50));
    }

    #[test]
    fn test_summary_line_mentions_counts() {
        let stats = Stats::new();
        stats.inc_accept_conn();
        let line = stats.summary_line(3);
        assert!(line.contains("1 accept"));
        assert!(line.contains("3 conns live"));
    }
}

//! Per-connection heartbeat bookkeeping
//!
//! The owner of a connection sends `ping` on a fixed interval and records each
//! timestamp as outstanding. Any `pong` echoing an outstanding timestamp clears
//! the whole set and updates the measured delay, so the set size counts pings
//! missed in a row. Reaching the configured maximum marks the peer unresponsive.
//!
//! NOTE: clearing every outstanding ping on a single pong assumes at most one
//! ping is in flight at a time, which the send interval provides in practice but
//! nothing enforces.

use std::collections::HashSet;

/// Liveness of a connection as seen by its heartbeat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatState {
    /// No ping outstanding
    Quiet,
    /// This many pings sent without a pong
    Awaiting(usize),
    /// Miss threshold reached; the connection must be closed
    Unresponsive,
}

/// What the sender side should do on a heartbeat tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingDecision {
    /// Emit a `ping` carrying this timestamp, then [`HeartbeatTracker::record_ping`] it
    Send(i64),
    /// Too many unanswered pings
    Unresponsive,
}

#[derive(Debug, Clone)]
pub struct HeartbeatTracker {
    outstanding: HashSet<i64>,
    delay: i64,
    max_missed: usize,
}

impl HeartbeatTracker {
    pub fn new(max_missed: usize) -> Self {
        Self {
            outstanding: HashSet::new(),
            delay: 0,
            max_missed: max_missed.max(1),
        }
    }

    /// Decide whether to ping at `now_ms` or give up on the peer
    pub fn tick(&self, now_ms: i64) -> PingDecision {
        if self.outstanding.len() >= self.max_missed {
            PingDecision::Unresponsive
        } else {
            PingDecision::Send(now_ms)
        }
    }

    pub fn record_ping(&mut self, timestamp: i64) {
        self.outstanding.insert(timestamp);
    }

    /// Handle a `pong` echoing `timestamp`; returns the new delay when it matched
    pub fn on_pong(&mut self, timestamp: i64, now_ms: i64) -> Option<i64> {
        if !self.outstanding.contains(&timestamp) {
            return None;
        }
        self.outstanding.clear();
        self.delay = now_ms - timestamp;
        Some(self.delay)
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Last measured round trip in milliseconds
    pub fn delay(&self) -> i64 {
        self.delay
    }

    pub fn max_missed(&self) -> usize {
        self.max_missed
    }

    pub fn state(&self) -> HeartbeatState {
        match self.outstanding.len() {
            0 => HeartbeatState::Quiet,
            n if n >= self.max_missed => HeartbeatState::Unresponsive,
            n => HeartbeatState::Awaiting(n),
        }
    }
}

/// Current wall-clock time in milliseconds since the epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_to_awaiting_to_quiet() {
        let mut hb = HeartbeatTracker::new(3);
        assert_eq!(hb.state(), HeartbeatState::Quiet);

        let ts = match hb.tick(1_000) {
            PingDecision::Send(ts) => ts,
            other => panic!("unexpected {:?}", other),
        };
        hb.record_ping(ts);
        assert_eq!(hb.state(), HeartbeatState::Awaiting(1));

        assert_eq!(hb.on_pong(ts, 1_042), Some(42));
        assert_eq!(hb.delay(), 42);
        assert_eq!(hb.state(), HeartbeatState::Quiet);
    }

    #[test]
    fn test_any_matching_pong_clears_all() {
        let mut hb = HeartbeatTracker::new(5);
        hb.record_ping(10);
        hb.record_ping(20);
        hb.record_ping(30);
        assert_eq!(hb.outstanding(), 3);

        assert_eq!(hb.on_pong(10, 50), Some(40));
        assert_eq!(hb.outstanding(), 0);
    }

    #[test]
    fn test_unknown_pong_is_ignored() {
        let mut hb = HeartbeatTracker::new(2);
        hb.record_ping(10);
        assert_eq!(hb.on_pong(11, 50), None);
        assert_eq!(hb.outstanding(), 1);
        assert_eq!(hb.delay(), 0);
    }

    #[test]
    fn test_unresponsive_after_max_missed() {
        let mut hb = HeartbeatTracker::new(2);
        for now in [100, 200] {
            match hb.tick(now) {
                PingDecision::Send(ts) => hb.record_ping(ts),
                PingDecision::Unresponsive => panic!("gave up too early"),
            }
        }
        assert_eq!(hb.state(), HeartbeatState::Unresponsive);
        assert_eq!(hb.tick(300), PingDecision::Unresponsive);
    }

    #[test]
    fn test_delay_is_replaced_not_accumulated() {
        let mut hb = HeartbeatTracker::new(2);
        hb.record_ping(0);
        hb.on_pong(0, 30);
        hb.record_ping(100);
        hb.on_pong(100, 105);
        assert_eq!(hb.delay(), 5);
    }
}

//! # Connection Lifecycle Manager
//!
//! Decides when to dial, when to retry and when to give up.
//! It is pure and synchronous: the event loop reports what happened to the
//! session and carries out what the lifecycle answers (spawn a session, arm a
//! reconnect timer, or do nothing).
//!
//! The reconnect budget is a fixed number of attempts with a fixed delay. The
//! counter only resets on a fully successful connection, so a flapping link
//! does not earn a fresh budget on partial progress.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Automatic reconnect attempts before manual intervention is required.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
/// Fixed delay between a failure and the next dial.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Connection states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting for a reconnect timer, or exhausted when no retry is pending.
    Reconnecting,
    /// Deliberate quit. No transitions out.
    Terminated,
}

/// Lifecycle state as exposed (read-only) on the dashboard snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionState {
    pub phase: ConnectionPhase,
    /// Why the most recent session failed. Only a successful connect clears
    /// it, so it can outlive [`DashboardSnapshot::error`].
    ///
    /// [`DashboardSnapshot::error`]: crate::core::DashboardSnapshot::error
    pub last_error: Option<String>,
    /// Reconnect attempts since the last successful connection, `0..=max_attempts`.
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_connected_at: Option<DateTime<Utc>>,
    /// A reconnect timer is armed.
    pub retry_pending: bool,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            phase: ConnectionPhase::Disconnected,
            last_error: None,
            attempts: 0,
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            last_connected_at: None,
            retry_pending: false,
        }
    }
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        self.phase == ConnectionPhase::Connected
    }

    /// Waiting on a scheduled retry.
    pub fn is_reconnecting(&self) -> bool {
        self.phase == ConnectionPhase::Reconnecting && self.retry_pending
    }

    /// Budget spent; only a restart recovers.
    pub fn is_exhausted(&self) -> bool {
        self.phase == ConnectionPhase::Reconnecting && !self.retry_pending
    }
}

/// The state machine. Owned by the event loop, never shared.
#[derive(Debug)]
pub struct ConnectionLifecycle {
    state: ConnectionState,
    retry_delay: Duration,
}

impl Default for ConnectionLifecycle {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_DELAY)
    }
}

impl ConnectionLifecycle {
    pub fn new(max_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            state: ConnectionState {
                max_attempts,
                ..ConnectionState::default()
            },
            retry_delay,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.state.phase
    }

    fn transition(&mut self, to: ConnectionPhase) {
        if self.state.phase != to {
            log::info!("Transitioning connection: {:?} -> {:?}", self.state.phase, to);
            self.state.phase = to;
        }
    }

    /// `Disconnected -> Connecting` on initial start.
    /// Returns `true` if the caller should spawn a session.
    pub fn begin_connect(&mut self) -> bool {
        if self.state.phase != ConnectionPhase::Disconnected {
            return false;
        }
        self.transition(ConnectionPhase::Connecting);
        true
    }

    /// `Connecting -> Connected`. Resets the attempt counter.
    /// Returns `false` if we were not connecting (stale report).
    pub fn on_connected(&mut self, at: DateTime<Utc>) -> bool {
        if self.state.phase != ConnectionPhase::Connecting {
            return false;
        }
        self.transition(ConnectionPhase::Connected);
        self.state.attempts = 0;
        self.state.last_error = None;
        self.state.last_connected_at = Some(at);
        self.state.retry_pending = false;
        true
    }

    /// `Connecting | Connected -> Reconnecting`.
    ///
    /// Returns the delay after which a reconnect should fire, or `None` when the
    /// failure is ignored (not connecting/connected) or the budget is spent.
    pub fn on_failure(&mut self, error: impl Into<String>) -> Option<Duration> {
        match self.state.phase {
            ConnectionPhase::Connecting | ConnectionPhase::Connected => {}
            _ => return None,
        }

        self.state.last_error = Some(error.into());
        self.transition(ConnectionPhase::Reconnecting);

        if self.state.attempts < self.state.max_attempts {
            self.state.attempts += 1;
            self.state.retry_pending = true;
            log::info!(
                "Reconnect {}/{} in {}s.",
                self.state.attempts,
                self.state.max_attempts,
                self.retry_delay.as_secs_f32()
            );
            Some(self.retry_delay)
        } else {
            self.state.retry_pending = false;
            log::error!(
                "Reconnect budget of {} attempts exhausted. No further automatic retries.",
                self.state.max_attempts
            );
            None
        }
    }

    /// Reconnect timer fired: `Reconnecting -> Connecting`, only if a retry is
    /// still pending. A timer outliving a quit or a recovery is ignored.
    pub fn on_reconnect_due(&mut self) -> bool {
        if !self.state.is_reconnecting() {
            log::debug!("Ignoring stale reconnect timer in {:?}.", self.state.phase);
            return false;
        }
        self.state.retry_pending = false;
        self.transition(ConnectionPhase::Connecting);
        true
    }

    /// `* -> Terminated`. Returns `true` only on the first call.
    pub fn terminate(&mut self) -> bool {
        if self.state.phase == ConnectionPhase::Terminated {
            return false;
        }
        self.state.retry_pending = false;
        self.transition(ConnectionPhase::Terminated);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lifecycle() -> ConnectionLifecycle {
        ConnectionLifecycle::new(5, Duration::from_secs(5))
    }

    #[test]
    fn test_three_failed_dials_then_success() {
        let mut lc = lifecycle();
        assert!(lc.begin_connect());
        assert_eq!(lc.phase(), ConnectionPhase::Connecting);

        let mut counters = Vec::new();
        for _ in 0..3 {
            assert_eq!(lc.on_failure("ws dial: refused"), Some(Duration::from_secs(5)));
            counters.push(lc.state().attempts);
            assert!(lc.state().is_reconnecting());
            assert!(lc.on_reconnect_due());
            assert_eq!(lc.phase(), ConnectionPhase::Connecting);
        }
        assert!(lc.on_connected(Utc::now()));
        counters.push(lc.state().attempts);

        assert_eq!(counters, vec![1, 2, 3, 0]);
        assert_eq!(lc.phase(), ConnectionPhase::Connected);
        assert!(lc.state().last_error.is_none());
        assert!(lc.state().last_connected_at.is_some());
    }

    #[test]
    fn test_exhausts_after_five_failed_reconnects() {
        let mut lc = lifecycle();
        lc.begin_connect();

        for attempt in 1..=5 {
            assert!(lc.on_failure("ws read: connection closed by remote").is_some());
            assert_eq!(lc.state().attempts, attempt);
            assert!(lc.on_reconnect_due());
        }

        assert_eq!(lc.on_failure("ws dial: refused"), None);
        assert!(lc.state().is_exhausted());
        assert_eq!(lc.state().attempts, 5);
        assert_eq!(lc.state().last_error.as_deref(), Some("ws dial: refused"));

        // Nothing brings it back automatically.
        assert!(!lc.on_reconnect_due());
        assert_eq!(lc.on_failure("again"), None);
        assert!(!lc.begin_connect());
        assert!(lc.state().is_exhausted());

        // Manual quit is still accepted.
        assert!(lc.terminate());
        assert_eq!(lc.phase(), ConnectionPhase::Terminated);
    }

    #[test]
    fn test_success_resets_counter_after_many_failures() {
        let mut lc = lifecycle();
        lc.begin_connect();
        for _ in 0..4 {
            lc.on_failure("blip");
            lc.on_reconnect_due();
        }
        assert_eq!(lc.state().attempts, 4);
        assert!(lc.on_connected(Utc::now()));
        assert_eq!(lc.state().attempts, 0);

        // A fresh failure starts the budget over.
        assert!(lc.on_failure("blip").is_some());
        assert_eq!(lc.state().attempts, 1);
    }

    #[test]
    fn test_stale_reconnect_timer_is_ignored() {
        let mut lc = lifecycle();
        lc.begin_connect();
        lc.on_failure("blip");
        assert!(lc.on_reconnect_due());
        lc.on_connected(Utc::now());

        // A second timer for the same outage fires after recovery.
        assert!(!lc.on_reconnect_due());
        assert_eq!(lc.phase(), ConnectionPhase::Connected);

        lc.on_failure("blip");
        assert!(lc.terminate());
        assert!(!lc.on_reconnect_due());
        assert_eq!(lc.phase(), ConnectionPhase::Terminated);
    }

    #[test]
    fn test_terminate_is_idempotent_and_final() {
        let mut lc = lifecycle();
        lc.begin_connect();
        assert!(lc.terminate());
        assert!(!lc.terminate());
        assert_eq!(lc.on_failure("late read error"), None);
        assert!(!lc.on_connected(Utc::now()));
        assert!(!lc.begin_connect());
        assert_eq!(lc.phase(), ConnectionPhase::Terminated);
    }

    #[test]
    fn test_failures_outside_a_session_are_ignored() {
        let mut lc = lifecycle();
        assert_eq!(lc.on_failure("no session yet"), None);
        assert_eq!(lc.phase(), ConnectionPhase::Disconnected);
        assert_eq!(lc.state().attempts, 0);
    }
}

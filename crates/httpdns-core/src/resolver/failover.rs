//! Failover state of one server pool
//!
//! Servers are ordered primary first, then backups. The active server takes
//! every attempt until it accumulates `retry_before_switch` consecutive soft
//! failures; then the next server becomes active (wrapping to the primary
//! after the last backup) and the counter starts over.
//!
//! Once the switch-back cool-down has passed since the primary last failed,
//! the next attempt goes to the primary again.

use chrono::{DateTime, Duration, Utc};

/// Outcome of recording a failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Still on the same server
    Retained { failures: u32 },
    /// Moved to another server
    Switched { from: String, to: String },
    /// The failed server is no longer active; nothing counted
    Outdated,
}

/// Active server, failure counter and switch timestamps
#[derive(Debug, Clone)]
pub struct FailoverState {
    servers: Vec<String>,
    active: usize,
    consecutive_failures: u32,
    switched_at: Option<DateTime<Utc>>,
    primary_failed_at: Option<DateTime<Utc>>,
}

impl FailoverState {
    /// Create a state for `servers` (primary first)
    pub fn new(servers: Vec<String>) -> Self {
        Self {
            servers,
            active: 0,
            consecutive_failures: 0,
            switched_at: None,
            primary_failed_at: None,
        }
    }

    /// Adopt a new server list; resets to the primary if it changed
    pub fn sync_servers(&mut self, servers: &[String]) {
        if self.servers != servers {
            tracing::info!("Server list changed, resetting failover to primary");
            *self = Self::new(servers.to_vec());
        }
    }

    /// Server the next attempt should target
    ///
    /// Applies the switch-back rule first.
    pub fn active_server(&mut self, now: DateTime<Utc>, cooldown: Duration) -> (usize, String) {
        self.maybe_switch_back(now, cooldown);
        (self.active, self.servers[self.active].clone())
    }

    /// Count a soft failure of an attempt sent to server `index`
    ///
    /// Failures of a server that is no longer active (a concurrent
    /// resolution already moved the pool on) do not count against the new
    /// one. A primary failure still delays the switch-back.
    pub fn record_failure(
        &mut self,
        index: usize,
        now: DateTime<Utc>,
        threshold: u32,
    ) -> FailureOutcome {
        if index == 0 {
            self.primary_failed_at = Some(now);
        }
        if index != self.active {
            return FailureOutcome::Outdated;
        }

        self.consecutive_failures += 1;
        if self.consecutive_failures < threshold.max(1) {
            return FailureOutcome::Retained {
                failures: self.consecutive_failures,
            };
        }

        let from = self.servers[self.active].clone();
        self.active = (self.active + 1) % self.servers.len();
        self.consecutive_failures = 0;
        self.switched_at = if self.active == 0 { None } else { Some(now) };

        FailureOutcome::Switched {
            from,
            to: self.servers[self.active].clone(),
        }
    }

    /// A successful attempt against the active server clears its counter
    pub fn record_success(&mut self, index: usize) {
        if index == self.active {
            self.consecutive_failures = 0;
        }
    }

    /// Index of the active server (0 = primary)
    pub fn active_index(&self) -> usize {
        self.active
    }

    /// Consecutive failures against the active server
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Number of servers in the pool
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    /// Whether the pool is empty
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Return to the primary once the cool-down has passed since the last
    /// switch and since the primary last failed
    ///
    /// Returns `true` if the state moved back.
    pub fn maybe_switch_back(&mut self, now: DateTime<Utc>, cooldown: Duration) -> bool {
        if self.active == 0 {
            return false;
        }

        let switched_long_ago = self.switched_at.is_none_or(|at| now - at >= cooldown);
        let primary_quiet = self.primary_failed_at.is_none_or(|at| now - at >= cooldown);
        if !(switched_long_ago && primary_quiet) {
            return false;
        }

        tracing::info!(
            "Switch-back cool-down elapsed, returning to primary {}",
            self.servers[0]
        );
        self.active = 0;
        self.consecutive_failures = 0;
        self.switched_at = None;
        true
    }
}

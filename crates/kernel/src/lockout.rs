//! Account lockout service.
//!
//! Tracks failed login attempts per email and temporarily locks the account
//! after too many failures.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::clock::Clock;

/// Maximum failed attempts before lockout.
const MAX_FAILED_ATTEMPTS: u32 = 5;

/// Lockout duration in seconds (15 minutes).
const LOCKOUT_DURATION_SECS: i64 = 15 * 60;

/// Failed attempt tracking window in seconds (15 minutes).
const ATTEMPT_WINDOW_SECS: i64 = 15 * 60;

#[derive(Debug, Clone)]
struct AttemptState {
    attempts: u32,
    window_start: DateTime<Utc>,
    locked_until: Option<DateTime<Utc>>,
}

/// Account lockout service.
#[derive(Clone, Debug)]
pub struct LockoutService {
    entries: Arc<DashMap<String, AttemptState>>,
    clock: Arc<dyn Clock>,
}

impl LockoutService {
    /// Create a new lockout service.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            clock,
        }
    }

    /// Check if an account is currently locked.
    pub fn is_locked(&self, email: &str) -> bool {
        self.lockout_remaining(email).is_some()
    }

    /// Remaining lockout time in seconds.
    pub fn lockout_remaining(&self, email: &str) -> Option<u64> {
        let now = self.clock.now();
        let entry = self.entries.get(&key(email))?;
        let until = entry.locked_until?;
        (until > now).then(|| (until - now).num_seconds().max(1) as u64)
    }

    /// Record a failed login attempt.
    ///
    /// Returns (is_now_locked, attempts_remaining).
    pub fn record_failed_attempt(&self, email: &str) -> (bool, u32) {
        let now = self.clock.now();
        let mut entry = self.entries.entry(key(email)).or_insert(AttemptState {
            attempts: 0,
            window_start: now,
            locked_until: None,
        });

        // Attempts older than the window no longer count
        if now - entry.window_start >= Duration::seconds(ATTEMPT_WINDOW_SECS) {
            entry.attempts = 0;
            entry.window_start = now;
        }
        if entry.locked_until.is_some_and(|until| until <= now) {
            entry.locked_until = None;
        }

        entry.attempts += 1;

        if entry.attempts >= MAX_FAILED_ATTEMPTS {
            entry.locked_until = Some(now + Duration::seconds(LOCKOUT_DURATION_SECS));
            entry.attempts = 0;
            entry.window_start = now;

            tracing::warn!(email = %email, "account locked due to failed attempts");

            return (true, 0);
        }

        (false, MAX_FAILED_ATTEMPTS - entry.attempts)
    }

    /// Clear failed attempts after successful login.
    pub fn clear_attempts(&self, email: &str) {
        if let Some(mut entry) = self.entries.get_mut(&key(email)) {
            entry.attempts = 0;
        }
    }

    /// Clear all lockout state (both attempts and lock) for an account.
    pub fn clear_all(&self, email: &str) {
        self.entries.remove(&key(email));
    }

    /// Drop entries that are neither locked nor inside an attempt window.
    pub fn purge_expired(&self) {
        let now = self.clock.now();
        self.entries.retain(|_, state| {
            let locked = state.locked_until.is_some_and(|until| until > now);
            let counting = state.attempts > 0
                && now - state.window_start < Duration::seconds(ATTEMPT_WINDOW_SECS);
            locked || counting
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn key(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn service() -> (LockoutService, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (LockoutService::new(clock.clone()), clock)
    }

    #[test]
    fn locks_after_max_attempts() {
        let (lockout, _) = service();
        for expected_remaining in (1..MAX_FAILED_ATTEMPTS).rev() {
            assert_eq!(
                lockout.record_failed_attempt("a@example.org"),
                (false, expected_remaining)
            );
        }
        assert_eq!(lockout.record_failed_attempt("A@example.org"), (true, 0));
        assert!(lockout.is_locked("a@example.org"));
        assert!(lockout.lockout_remaining("a@example.org").is_some());
    }

    #[test]
    fn lock_expires() {
        let (lockout, clock) = service();
        for _ in 0..MAX_FAILED_ATTEMPTS {
            lockout.record_failed_attempt("b@example.org");
        }
        assert!(lockout.is_locked("b@example.org"));
        clock.advance(Duration::seconds(LOCKOUT_DURATION_SECS));
        assert!(!lockout.is_locked("b@example.org"));
    }

    #[test]
    fn old_attempts_fall_out_of_window() {
        let (lockout, clock) = service();
        for _ in 0..MAX_FAILED_ATTEMPTS - 1 {
            lockout.record_failed_attempt("c@example.org");
        }
        clock.advance(Duration::seconds(ATTEMPT_WINDOW_SECS));
        assert_eq!(
            lockout.record_failed_attempt("c@example.org"),
            (false, MAX_FAILED_ATTEMPTS - 1)
        );
    }

    #[test]
    fn clear_and_purge() {
        let (lockout, clock) = service();
        lockout.record_failed_attempt("d@example.org");
        lockout.clear_attempts("d@example.org");
        lockout.purge_expired();
        assert!(lockout.is_empty());

        lockout.record_failed_attempt("e@example.org");
        assert_eq!(lockout.len(), 1);
        clock.advance(Duration::seconds(ATTEMPT_WINDOW_SECS));
        lockout.purge_expired();
        assert!(lockout.is_empty());
    }
}

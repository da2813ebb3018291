//! Login-attempt bookkeeping.
//!
//! Each account is either `Unlocked(attempts)` or `Locked(until)`. A lock
//! whose window has passed is treated as a fresh window on the next
//! attempt, so no background sweep is needed.

/// Default number of failed attempts before an account is locked.
pub const DEFAULT_LOCKOUT_THRESHOLD: u32 = 5;

/// Default lock duration: 2 hours
pub const DEFAULT_LOCKOUT_DURATION_SECS: u64 = 2 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked { attempts: u32 },
    Locked { until: u64 },
}

impl LockState {
    /// Rebuild the state from the stored counter and lock timestamp.
    pub fn from_stored(attempts: u32, lock_until: Option<u64>) -> Self {
        match lock_until {
            Some(until) => LockState::Locked { until },
            None => LockState::Unlocked { attempts },
        }
    }

    /// Stored representation: (login_attempts, lock_until).
    pub fn to_stored(self, threshold: u32) -> (u32, Option<u64>) {
        match self {
            LockState::Unlocked { attempts } => (attempts, None),
            LockState::Locked { until } => (threshold, Some(until)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    pub threshold: u32,
    pub duration_secs: u64,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_LOCKOUT_THRESHOLD,
            duration_secs: DEFAULT_LOCKOUT_DURATION_SECS,
        }
    }
}

impl LockoutPolicy {
    /// Returns the lock expiry if the account is currently locked.
    pub fn locked_until(&self, state: LockState, now: u64) -> Option<u64> {
        match state {
            LockState::Locked { until } if until > now => Some(until),
            _ => None,
        }
    }

    /// State after a failed credential check. Callers must check
    /// [`locked_until`](Self::locked_until) first: an active lock is not
    /// extended or counted.
    pub fn register_failure(&self, state: LockState, now: u64) -> LockState {
        let attempts = match state {
            LockState::Unlocked { attempts } => attempts.saturating_add(1),
            LockState::Locked { until } if until > now => return state,
            // Expired lock: this failure opens a new window
            LockState::Locked { .. } => 1,
        };

        if attempts >= self.threshold {
            LockState::Locked {
                until: now + self.duration_secs,
            }
        } else {
            LockState::Unlocked { attempts }
        }
    }

    /// State after a successful login.
    pub fn register_success(&self) -> LockState {
        LockState::Unlocked { attempts: 0 }
    }
}

//! Tumbling-minute quota budgets with hold/commit/release accounting.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};
use uuid::Uuid;

/// Length of one accounting window in seconds.
pub const WINDOW_SECS: u64 = 60;

/// Current wall-clock time as whole seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Largest minute boundary at or before `now`.
fn minute_floor(now: u64) -> u64 {
    now - now % WINDOW_SECS
}

/// An outstanding, not-yet-committed claim against a budget.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub client_id: String,
    pub amount: u64,
    pub acquired_at: u64,
}

/// Point-in-time view of one budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetSnapshot {
    pub limit: u64,
    pub committed: u64,
    pub held: u64,
    pub available: u64,
    pub seconds_until_reset: u64,
}

/// Why a lock was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockDenied {
    /// The requested amount was zero or negative; no state was touched.
    InvalidAmount { amount: i64 },
    /// Not enough room left in the current window.
    Exhausted {
        requested: u64,
        available: u64,
        seconds_until_reset: u64,
    },
}

impl LockDenied {
    /// Time until the window rolls, when the denial is capacity-related.
    pub fn seconds_until_reset(&self) -> Option<u64> {
        match self {
            LockDenied::InvalidAmount { .. } => None,
            LockDenied::Exhausted {
                seconds_until_reset, ..
            } => Some(*seconds_until_reset),
        }
    }
}

/// A granted reservation.
#[derive(Debug, Clone)]
pub struct Granted {
    pub handle: String,
    pub available_after: u64,
    pub seconds_until_reset: u64,
}

struct BudgetState {
    window_start: u64,
    committed: u64,
    held: u64,
    reservations: HashMap<String, Reservation>,
}

/// One quota pool with a per-minute integer limit.
///
/// Every entry point serialises on the internal mutex and advances the
/// window before any other logic runs. The critical section never performs
/// I/O, so a plain [`std::sync::Mutex`] is sufficient even under an async
/// server. There is no background timer: windows roll lazily on access.
pub struct WindowBudget {
    name: &'static str,
    limit: u64,
    state: Mutex<BudgetState>,
}

impl WindowBudget {
    pub fn new(name: &'static str, limit: u64) -> Self {
        Self::new_at(unix_now(), name, limit)
    }

    /// Clock-injected twin of [`WindowBudget::new`]: the first window opens
    /// at the minute boundary containing `now`.
    pub fn new_at(now: u64, name: &'static str, limit: u64) -> Self {
        Self {
            name,
            limit,
            state: Mutex::new(BudgetState {
                window_start: minute_floor(now),
                committed: 0,
                held: 0,
                reservations: HashMap::new(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Reserve `amount` units for `client_id`.
    pub fn lock(&self, client_id: &str, amount: i64) -> Result<Granted, LockDenied> {
        self.lock_at(unix_now(), client_id, amount)
    }

    /// Clock-injected twin of [`WindowBudget::lock`].
    pub fn lock_at(&self, now: u64, client_id: &str, amount: i64) -> Result<Granted, LockDenied> {
        let mut state = self.state.lock().unwrap();
        self.roll(&mut state, now);

        if amount <= 0 {
            debug!(
                "{}: rejected lock of {} from {}: amount must be positive",
                self.name, amount, client_id
            );
            return Err(LockDenied::InvalidAmount { amount });
        }
        let amount = amount as u64;

        let in_use = state.committed + state.held;
        let available = self.limit.saturating_sub(in_use);
        let seconds_until_reset = seconds_until_reset(state.window_start, now);

        if amount > available {
            warn!(
                "{}: denied {} for {}: requested {}, available {}",
                self.name, amount, client_id, amount, available
            );
            return Err(LockDenied::Exhausted {
                requested: amount,
                available,
                seconds_until_reset,
            });
        }

        let handle = Uuid::new_v4().to_string();
        state.held += amount;
        state.reservations.insert(
            handle.clone(),
            Reservation {
                client_id: client_id.to_string(),
                amount,
                acquired_at: now,
            },
        );
        info!(
            "{}: locked {} for {} with handle {}",
            self.name, amount, client_id, handle
        );
        Ok(Granted {
            handle,
            available_after: self.limit.saturating_sub(state.committed + state.held),
            seconds_until_reset,
        })
    }

    /// Commit actual usage for a reservation. Returns `false` when the
    /// handle is unknown, which callers treat as a benign no-op: the
    /// reservation has already been reclaimed by a window roll.
    pub fn report(&self, handle: &str, used: i64) -> bool {
        self.report_at(unix_now(), handle, used)
    }

    pub fn report_at(&self, now: u64, handle: &str, used: i64) -> bool {
        let mut state = self.state.lock().unwrap();
        self.roll(&mut state, now);

        let Some(reservation) = state.reservations.remove(handle) else {
            debug!(
                "{}: report for unknown handle {} (reclaimed by roll-over)",
                self.name, handle
            );
            return false;
        };

        state.held = state.held.saturating_sub(reservation.amount);
        let used = used.max(0) as u64;
        state.committed += used;
        if state.committed + state.held > self.limit {
            // Over-consuming reports are authoritative; surface the overshoot
            // so chronic under-estimation can be detected from the logs.
            warn!(
                "{}: window oversubscribed: committed {} + held {} exceeds limit {} (reported {} against reservation of {})",
                self.name, state.committed, state.held, self.limit, used, reservation.amount
            );
        }
        info!(
            "{}: reported {} for {} (reserved {})",
            self.name, used, reservation.client_id, reservation.amount
        );
        true
    }

    /// Drop a reservation without committing usage. Missing handles are a
    /// no-op, same policy as [`WindowBudget::report`].
    pub fn release(&self, handle: &str) -> bool {
        self.release_at(unix_now(), handle)
    }

    pub fn release_at(&self, now: u64, handle: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        self.roll(&mut state, now);

        let Some(reservation) = state.reservations.remove(handle) else {
            debug!(
                "{}: release for unknown handle {} (reclaimed by roll-over)",
                self.name, handle
            );
            return false;
        };
        state.held = state.held.saturating_sub(reservation.amount);
        info!(
            "{}: released {} held by {}",
            self.name, reservation.amount, reservation.client_id
        );
        true
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        self.snapshot_at(unix_now())
    }

    pub fn snapshot_at(&self, now: u64) -> BudgetSnapshot {
        let mut state = self.state.lock().unwrap();
        self.roll(&mut state, now);
        BudgetSnapshot {
            limit: self.limit,
            committed: state.committed,
            held: state.held,
            available: self.limit.saturating_sub(state.committed + state.held),
            seconds_until_reset: seconds_until_reset(state.window_start, now),
        }
    }

    /// Advance the window if at least one full minute has elapsed. A clock
    /// that jumped backward never rewinds the window; a jump forward of any
    /// size lands on the new minute boundary in a single roll.
    fn roll(&self, state: &mut BudgetState, now: u64) {
        if now.saturating_sub(state.window_start) < WINDOW_SECS {
            return;
        }
        let dropped: u64 = state.reservations.values().map(|r| r.amount).sum();
        if dropped > 0 {
            info!(
                "{}: window roll reclaimed {} held across {} reservations",
                self.name,
                dropped,
                state.reservations.len()
            );
        } else {
            debug!("{}: window roll", self.name);
        }
        state.window_start = minute_floor(now);
        state.committed = 0;
        state.held = 0;
        state.reservations.clear();
    }
}

fn seconds_until_reset(window_start: u64, now: u64) -> u64 {
    let elapsed = now.saturating_sub(window_start).min(WINDOW_SECS - 1);
    WINDOW_SECS - elapsed
}

//! Atomic token+request budget pairs.

use super::budget::{unix_now, BudgetSnapshot, LockDenied, WindowBudget};
use super::handle::LeaseHandle;

/// Why a combined lock was refused. The variants distinguish the exhausted
/// pool so that wire messages (and worker logs) can tell a token shortage
/// from a request-slot shortage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairedDenial {
    InvalidAmount {
        amount: i64,
    },
    TokensExhausted {
        requested: u64,
        available: u64,
        seconds_until_reset: u64,
    },
    RequestsExhausted {
        seconds_until_reset: u64,
    },
}

impl PairedDenial {
    /// Human-readable wire message. The leading phrases are load-bearing:
    /// the original fleet's clients match on them, so they are kept stable.
    pub fn message(&self) -> String {
        match self {
            PairedDenial::InvalidAmount { amount } => {
                format!("Invalid token count: {amount}. Token count must be a positive integer.")
            }
            PairedDenial::TokensExhausted {
                requested,
                available,
                ..
            } => format!(
                "Token limit would be exceeded. Available: {available}, Requested: {requested}"
            ),
            PairedDenial::RequestsExhausted { .. } => {
                "API rate limit would be exceeded. No available request slots.".to_string()
            }
        }
    }

    pub fn seconds_until_reset(&self) -> Option<u64> {
        match self {
            PairedDenial::InvalidAmount { .. } => None,
            PairedDenial::TokensExhausted {
                seconds_until_reset,
                ..
            }
            | PairedDenial::RequestsExhausted {
                seconds_until_reset,
            } => Some(*seconds_until_reset),
        }
    }
}

/// Snapshot of both halves of a pair.
#[derive(Debug, Clone, Copy)]
pub struct PairedSnapshot {
    pub tokens: BudgetSnapshot,
    pub requests: BudgetSnapshot,
}

impl PairedSnapshot {
    /// Effective time-to-reset for the pair: the earlier of the two windows.
    pub fn seconds_until_reset(&self) -> u64 {
        self.tokens
            .seconds_until_reset
            .min(self.requests.seconds_until_reset)
    }
}

/// Two budgets (tokens and request slots) manipulated as one unit.
///
/// A combined lock claims `amount` tokens and exactly one request slot,
/// all-or-nothing. The token budget is always taken first; when the
/// request side denies, the token half is released before the combined
/// denial is returned, so a denied lock never leaves either half held.
pub struct PairedBudget {
    tokens: WindowBudget,
    requests: WindowBudget,
}

impl PairedBudget {
    pub fn new(tokens: WindowBudget, requests: WindowBudget) -> Self {
        Self { tokens, requests }
    }

    pub fn tokens(&self) -> &WindowBudget {
        &self.tokens
    }

    pub fn requests(&self) -> &WindowBudget {
        &self.requests
    }

    pub fn lock(&self, client_id: &str, token_count: i64) -> Result<LeaseHandle, PairedDenial> {
        self.lock_at(unix_now(), client_id, token_count)
    }

    pub fn lock_at(
        &self,
        now: u64,
        client_id: &str,
        token_count: i64,
    ) -> Result<LeaseHandle, PairedDenial> {
        let token_grant = self
            .tokens
            .lock_at(now, client_id, token_count)
            .map_err(|denied| match denied {
                LockDenied::InvalidAmount { amount } => PairedDenial::InvalidAmount { amount },
                LockDenied::Exhausted {
                    requested,
                    available,
                    seconds_until_reset,
                } => PairedDenial::TokensExhausted {
                    requested,
                    available,
                    seconds_until_reset,
                },
            })?;

        match self.requests.lock_at(now, client_id, 1) {
            Ok(request_grant) => Ok(LeaseHandle::paired(token_grant.handle, request_grant.handle)),
            Err(denied) => {
                // Compensating release of the token half; the pair must not
                // hold anything after a combined denial.
                self.tokens.release_at(now, &token_grant.handle);
                let seconds_until_reset = denied
                    .seconds_until_reset()
                    .unwrap_or(token_grant.seconds_until_reset);
                Err(PairedDenial::RequestsExhausted {
                    seconds_until_reset,
                })
            }
        }
    }

    /// Settle a reservation: commit `used_tokens` against the token half
    /// and one request against the rate half. Missing halves are benign.
    pub fn report(&self, handle: &LeaseHandle, used_tokens: i64) {
        self.report_at(unix_now(), handle, used_tokens)
    }

    pub fn report_at(&self, now: u64, handle: &LeaseHandle, used_tokens: i64) {
        self.tokens.report_at(now, &handle.token, used_tokens);
        if let Some(rate) = &handle.rate {
            self.requests.report_at(now, rate, 1);
        }
    }

    /// Settle only the token half. Embedding calls have no output
    /// dimension, so their request slot is left to the window roll.
    pub fn report_tokens_only(&self, handle: &LeaseHandle, used_tokens: i64) {
        self.tokens.report_at(unix_now(), &handle.token, used_tokens);
    }

    /// Return both halves of a reservation to the pool.
    pub fn release(&self, handle: &LeaseHandle) {
        self.release_at(unix_now(), handle)
    }

    pub fn release_at(&self, now: u64, handle: &LeaseHandle) {
        self.tokens.release_at(now, &handle.token);
        if let Some(rate) = &handle.rate {
            self.requests.release_at(now, rate);
        }
    }

    pub fn status(&self) -> PairedSnapshot {
        self.status_at(unix_now())
    }

    pub fn status_at(&self, now: u64) -> PairedSnapshot {
        PairedSnapshot {
            tokens: self.tokens.snapshot_at(now),
            requests: self.requests.snapshot_at(now),
        }
    }
}

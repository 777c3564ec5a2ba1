//! Ledger operations over an [`SvStore`].

use crate::error::{Error, Result};
use crate::scoring::{accrual_delta, ActivityKind};
use crate::state::SvState;
use crate::store::SvStore;
use serde::Serialize;
use std::sync::Arc;

/// Swap attempts before giving up with [`Error::Contention`].
pub const MAX_CAS_ATTEMPTS: usize = 32;

/// Result of an accrual.
#[derive(Debug, Clone, Serialize)]
pub struct Accrual {
    pub delta: f64,
    pub state: SvState,
}

/// SV ledger.
#[derive(Clone)]
pub struct SvLedger {
    store: Arc<dyn SvStore>,
}

impl SvLedger {
    pub fn new(store: Arc<dyn SvStore>) -> Self {
        Self { store }
    }

    /// Current state, creating the zero row on first read.
    pub fn get(&self, node_id: &str, now: i64) -> Result<SvState> {
        check_node_id(node_id)?;
        if let Some(state) = self.store.load(node_id)? {
            return Ok(state);
        }
        let mut fresh = SvState::new(node_id, now);
        fresh.revision = 1;
        if self.store.compare_and_swap(node_id, None, &fresh)? {
            return Ok(fresh);
        }
        // Lost the insert race; the winner's row is just as fresh.
        self.store
            .load(node_id)?
            .ok_or_else(|| Error::Store(format!("row for {node_id} vanished")))
    }

    /// Add `base(kind) * weight * streak * tier` to `unclaimed`.
    pub fn accrue(&self, node_id: &str, kind: ActivityKind, weight: f64, ts: i64) -> Result<Accrual> {
        let mut delta = 0.0;
        let state = self.update(node_id, ts, |state| {
            delta = accrual_delta(kind, weight, state.streak_days, state.tier)?;
            state.apply_accrual(delta)?;
            Ok(true)
        })?;
        tracing::debug!(node_id, kind = kind.as_str(), delta, "sv accrued");
        Ok(Accrual { delta, state })
    }

    /// Move all unclaimed SV into the balance. No-op when nothing is
    /// unclaimed.
    pub fn claim(&self, node_id: &str, now: i64) -> Result<SvState> {
        self.update(node_id, now, |state| state.apply_claim(now))
    }

    /// Extend the streak by `by` days, capped at 365.
    pub fn bump_streak(&self, node_id: &str, by: u32, now: i64) -> Result<SvState> {
        self.update(node_id, now, |state| {
            let before = state.streak_days;
            state.apply_streak(by);
            Ok(state.streak_days != before)
        })
    }

    /// All known states.
    pub fn list(&self) -> Result<Vec<SvState>> {
        self.store.list()
    }

    /// Read / modify / swap loop. `apply` returns whether it changed
    /// anything; unchanged states are returned without a write.
    fn update<F>(&self, node_id: &str, now: i64, mut apply: F) -> Result<SvState>
    where
        F: FnMut(&mut SvState) -> Result<bool>,
    {
        check_node_id(node_id)?;
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.store.load(node_id)?;
            let expected = current.as_ref().map(|s| s.revision);
            let mut next = current.unwrap_or_else(|| SvState::new(node_id, now));

            if !apply(&mut next)? {
                if expected.is_some() {
                    return Ok(next);
                }
                // First touch still materializes the row.
            }

            next.revision = expected.unwrap_or(0) + 1;
            next.updated_at = now;
            if self.store.compare_and_swap(node_id, expected, &next)? {
                return Ok(next);
            }
        }
        tracing::warn!(node_id, "sv update gave up after {} attempts", MAX_CAS_ATTEMPTS);
        Err(Error::Contention(node_id.to_string()))
    }
}

fn check_node_id(node_id: &str) -> Result<()> {
    if node_id.trim().is_empty() {
        return Err(Error::EmptyNodeId);
    }
    Ok(())
}

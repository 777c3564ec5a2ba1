//! ÆSC SV Ledger
//!
//! SV is the per-node points unit of the Meshwork. Activity accrues into an
//! `unclaimed` pool; claiming moves it into `balance`, and the balance
//! decides the node's [`Tier`], whose multiplier applies to later accruals.
//!
//! # Design
//!
//! Scoring is pure: [`accrual_delta`] and [`tier_for`] depend only on their
//! arguments. State lives behind the [`SvStore`] trait, which offers a
//! revision-checked compare-and-swap, and [`SvLedger`] runs every mutation
//! as a read / compute / swap loop. Two accruals racing on one node both
//! land; neither overwrites the other.
//!
//! # Example
//!
//! ```
//! use aesc_sv::{ActivityKind, MemorySvStore, SvLedger};
//! use std::sync::Arc;
//!
//! let ledger = SvLedger::new(Arc::new(MemorySvStore::new()));
//! let accrual = ledger.accrue("x", ActivityKind::Post, 2.0, 0).unwrap();
//! assert_eq!(accrual.delta, 4.0);
//! assert_eq!(accrual.state.unclaimed, 4.0);
//! ```

mod error;
mod ledger;
mod scoring;
mod state;
mod store;
mod tier;

pub use error::{Error, Result};
pub use ledger::{Accrual, SvLedger, MAX_CAS_ATTEMPTS};
pub use scoring::{accrual_delta, streak_factor, ActivityKind, MAX_WEIGHT, STREAK_BONUS_CAP_DAYS};
pub use state::{SvState, MAX_STREAK_DAYS};
pub use store::{MemorySvStore, SvStore};
pub use tier::{tier_for, Tier};

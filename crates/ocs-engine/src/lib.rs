//! Account charging engine
//!
//! This crate contains the business logic that charges usage events
//! against account balances: selection by weight, blocker handling,
//! abstract and concrete debits, refunds and the per-account locking that
//! keeps concurrent debits consistent.
//!
//! # Architecture
//!
//! - The engine owns its collaborators (store, filters, rating) behind traits
//! - It is wrapped in Arc and shared across async tasks
//! - All operations are instrumented with tracing
//! - Every call is bounded by a [`CallContext`] deadline
//!
//! # Components
//!
//! - `ChargingEngine` - Max/Debit abstracts and concretes, refunds, admin ops
//! - `AccountLockManager` - Per-account mutual exclusion
//! - `FilterS` - Default filter predicate evaluator
//! - `Pricing` - Cost and coverage math for cost increments and rates

pub mod admin;
pub mod charging;
pub mod context;
pub mod debit;
pub mod diktats;
pub mod filters;
pub mod locks;
pub mod ordering;
pub mod pricing;
pub mod resolver;

pub use charging::ChargingEngine;
pub use context::CallContext;
pub use debit::ChargeKind;
pub use diktats::{BalanceDiktat, RemoveBalanceArgs, SetBalanceArgs};
pub use filters::{Filter, FilterRule, FilterS, RuleKind};
pub use locks::{AccountLockGuard, AccountLockManager};
pub use pricing::{NoRatingEngine, Pricing};

/// Engine constants
pub mod constants {
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    /// Factor applied when no unit factor of a balance matches
    pub const DEFAULT_UNIT_FACTOR: Decimal = dec!(1);

    /// Path prefix of balance diktats
    pub const BALANCE_DIKTAT_PREFIX: &str = "*balance.";
}

//! Collaborator traits
//!
//! The engine talks to storage, filter matching and rating only through
//! these abstractions, so every backend can be swapped or mocked.

use crate::models::{Account, ChargingEvent, IntervalRate};
use crate::AppResult;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Key-value store of accounts, keyed by `tenant:id`
///
/// Implementations return owned copies, so callers never observe a write
/// in progress.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Load one account
    async fn get_account(&self, tenant: &str, id: &str) -> AppResult<Option<Account>>;

    /// Persist all accounts as a single write
    async fn set_accounts(&self, accounts: &[Account]) -> AppResult<()>;

    /// Delete an account, returns whether it existed
    async fn remove_account(&self, tenant: &str, id: &str) -> AppResult<bool>;

    /// All accounts of a tenant
    async fn list_accounts(&self, tenant: &str) -> AppResult<Vec<Account>>;

    /// Persist one account
    async fn set_account(&self, account: &Account) -> AppResult<()> {
        self.set_accounts(std::slice::from_ref(account)).await
    }
}

/// Boolean predicate over events, identified by filter IDs
pub trait FilterEvaluator: Send + Sync {
    /// True when every filter passes; an empty list always passes
    fn pass(&self, tenant: &str, filter_ids: &[String], event: &ChargingEvent) -> AppResult<bool>;

    /// Fails with `BrokenReference` when any ID cannot be resolved
    fn check_references(&self, tenant: &str, filter_ids: &[&str]) -> AppResult<()>;
}

/// External interval-rate lookup
///
/// Consulted for balances whose own cost increments do not match the
/// event. `Ok(None)` means no rate applies.
#[async_trait]
pub trait RatingEngine: Send + Sync {
    async fn interval_rate(
        &self,
        tenant: &str,
        rate_profile_ids: &[String],
        event: &ChargingEvent,
        usage: Decimal,
    ) -> AppResult<Option<IntervalRate>>;
}

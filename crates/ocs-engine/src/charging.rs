//! Charging engine
//!
//! Entry points for charging calls:
//! - `max_abstracts` / `debit_abstracts` - cover usage
//! - `max_concretes` / `debit_concretes` - take a monetary amount
//! - `authorize_abstracts` - pre-check that fails when usage is not covered
//! - `accounts_for_event` - the accounts a charging call would process
//! - `refund_charges` - give back what a previous debit took
//!
//! Max calls run on copies and persist nothing. Debit and refund calls lock
//! every candidate account, re-read it under the lock and commit all
//! changes in one store write.

use crate::context::CallContext;
use crate::debit::{ChargeKind, Debitor};
use crate::locks::AccountLockManager;
use crate::ordering::order_accounts;
use crate::pricing::NoRatingEngine;
use ocs_core::config::EngineConfig;
use ocs_core::error::AppError;
use ocs_core::models::{tenant_id, Account, ChargingEvent, EventCharges};
use ocs_core::traits::{AccountStore, FilterEvaluator, RatingEngine};
use ocs_core::AppResult;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use validator::Validate;

/// Charging engine
///
/// Generic over the account store; filters and rating are trait objects.
pub struct ChargingEngine<S: AccountStore> {
    pub(crate) store: Arc<S>,
    pub(crate) filters: Arc<dyn FilterEvaluator>,
    pub(crate) rating: Arc<dyn RatingEngine>,
    pub(crate) locks: AccountLockManager,
    pub(crate) config: EngineConfig,
}

impl<S: AccountStore> ChargingEngine<S> {
    /// Create an engine without an external rating engine
    pub fn new(store: Arc<S>, filters: Arc<dyn FilterEvaluator>, config: EngineConfig) -> Self {
        Self {
            store,
            filters,
            rating: Arc::new(NoRatingEngine),
            locks: AccountLockManager::new(),
            config,
        }
    }

    pub fn with_rating_engine(mut self, rating: Arc<dyn RatingEngine>) -> Self {
        self.rating = rating;
        self
    }

    /// Share a lock registry with other engines in the same process
    pub fn with_lock_manager(mut self, locks: AccountLockManager) -> Self {
        self.locks = locks;
        self
    }

    pub fn locks(&self) -> &AccountLockManager {
        &self.locks
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// A context with the configured default deadline
    pub fn context(&self) -> CallContext {
        CallContext::with_timeout(self.config.call_timeout())
    }

    pub(crate) fn tenant_or_default<'a>(&'a self, tenant: &'a str) -> &'a str {
        if tenant.is_empty() {
            &self.config.default_tenant
        } else {
            tenant
        }
    }

    /// Usage the candidate accounts could cover, nothing is changed
    #[instrument(skip(self, ctx, event), fields(event_id = %event.id))]
    pub async fn max_abstracts(
        &self,
        ctx: &CallContext,
        event: &ChargingEvent,
    ) -> AppResult<EventCharges> {
        self.charge(ctx, event, ChargeKind::Abstracts, false).await
    }

    /// Covers the event usage and persists the debited accounts
    #[instrument(skip(self, ctx, event), fields(event_id = %event.id))]
    pub async fn debit_abstracts(
        &self,
        ctx: &CallContext,
        event: &ChargingEvent,
    ) -> AppResult<EventCharges> {
        self.charge(ctx, event, ChargeKind::Abstracts, true).await
    }

    /// Money the candidate accounts could pay, nothing is changed
    #[instrument(skip(self, ctx, event), fields(event_id = %event.id))]
    pub async fn max_concretes(
        &self,
        ctx: &CallContext,
        event: &ChargingEvent,
    ) -> AppResult<EventCharges> {
        self.charge(ctx, event, ChargeKind::Concretes, false).await
    }

    /// Takes the event amount from concrete balances and persists it
    #[instrument(skip(self, ctx, event), fields(event_id = %event.id))]
    pub async fn debit_concretes(
        &self,
        ctx: &CallContext,
        event: &ChargingEvent,
    ) -> AppResult<EventCharges> {
        self.charge(ctx, event, ChargeKind::Concretes, true).await
    }

    /// Like `max_abstracts` but fails when the usage is not fully covered
    ///
    /// # Errors
    ///
    /// Returns `AppError::InsufficientCredit` with the covered usage as
    /// the available amount.
    #[instrument(skip(self, ctx, event), fields(event_id = %event.id))]
    pub async fn authorize_abstracts(
        &self,
        ctx: &CallContext,
        event: &ChargingEvent,
    ) -> AppResult<EventCharges> {
        let requested = event.usage()?;
        let ec = self.max_abstracts(ctx, event).await?;
        if ec.abstracts < requested {
            let mut accounts: Vec<&str> = ec.accounts.keys().map(String::as_str).collect();
            accounts.sort_unstable();
            warn!(
                "Event {} not authorized: {} of {} covered",
                event.id, ec.abstracts, requested
            );
            return Err(AppError::InsufficientCredit {
                account: accounts.join(","),
                required: requested.to_string(),
                available: ec.abstracts.to_string(),
            });
        }
        Ok(ec)
    }

    /// Accounts eligible for the event, in processing order
    ///
    /// Nothing is locked or changed. Fails with `NotFound` when no account
    /// matches.
    #[instrument(skip(self, ctx, event), fields(event_id = %event.id))]
    pub async fn accounts_for_event(
        &self,
        ctx: &CallContext,
        event: &ChargingEvent,
    ) -> AppResult<Vec<Account>> {
        let event = self.prepare_event(event)?;
        let ids = self.candidate_ids(ctx, &event).await?;
        let accounts = self.load_accounts(ctx, &event.tenant, &ids).await?;
        let ordered = order_accounts(accounts, self.filters.as_ref(), &event)?;
        if ordered.is_empty() {
            return Err(AppError::NotFound(format!(
                "no account matches event {}",
                event.id
            )));
        }
        debug!("{} account(s) match event {}", ordered.len(), event.id);
        Ok(ordered.into_iter().map(|(account, _)| account).collect())
    }

    fn prepare_event(&self, event: &ChargingEvent) -> AppResult<ChargingEvent> {
        let mut event = event.clone();
        if event.tenant.is_empty() {
            event.tenant = self.config.default_tenant.clone();
        }
        event.validate()?;
        Ok(event)
    }

    async fn candidate_ids(&self, ctx: &CallContext, event: &ChargingEvent) -> AppResult<Vec<String>> {
        match event.account_ids()? {
            Some(ids) => Ok(ids),
            None => Ok(ctx
                .run("list accounts", self.store.list_accounts(&event.tenant))
                .await?
                .into_iter()
                .map(|a| a.id)
                .collect()),
        }
    }

    async fn load_accounts(
        &self,
        ctx: &CallContext,
        tenant: &str,
        ids: &[String],
    ) -> AppResult<Vec<Account>> {
        let mut accounts = Vec::with_capacity(ids.len());
        for id in ids {
            match ctx.run("load account", self.store.get_account(tenant, id)).await? {
                Some(account) => accounts.push(account),
                None => debug!("Candidate account {} not found", tenant_id(tenant, id)),
            }
        }
        Ok(accounts)
    }

    async fn charge(
        &self,
        ctx: &CallContext,
        event: &ChargingEvent,
        kind: ChargeKind,
        debit: bool,
    ) -> AppResult<EventCharges> {
        let event = self.prepare_event(event)?;
        let amount = event.usage()?;
        let ids = self.candidate_ids(ctx, &event).await?;
        if ids.is_empty() {
            return Err(AppError::NotFound(format!(
                "no accounts for tenant {}",
                event.tenant
            )));
        }

        let debitor = Debitor::new(self.filters.as_ref(), self.rating.as_ref(), ctx, &event);
        if !debit {
            let accounts = self.load_accounts(ctx, &event.tenant, &ids).await?;
            let ec = debitor.charge(accounts, kind, amount).await?;
            debug!(
                "Max {:?} for event {}: {} usage, {} money",
                kind, event.id, ec.abstracts, ec.concretes
            );
            return Ok(ec);
        }

        let _guard = self
            .locks
            .lock(ids.iter().map(|id| tenant_id(&event.tenant, id)), ctx)
            .await?;
        let accounts = self.load_accounts(ctx, &event.tenant, &ids).await?;
        let ec = debitor.charge(accounts, kind, amount).await?;

        let debited: HashSet<&str> = ec
            .accounting
            .values()
            .map(|charge| charge.account_id.as_str())
            .collect();
        let changed: Vec<Account> = ec
            .accounts
            .values()
            .filter(|account| debited.contains(account.id.as_str()))
            .cloned()
            .collect();

        ctx.check("commit")?;
        if !changed.is_empty() {
            self.store.set_accounts(&changed).await?;
        }
        info!(
            "Debited {:?} for event {}: {} of {} covered, {} money, {} account(s)",
            kind,
            event.id,
            ec.abstracts,
            amount,
            ec.concretes,
            changed.len()
        );
        Ok(ec)
    }

    /// Gives back every unit recorded in `ec`
    ///
    /// Balances removed since the debit are re-created from the ledger's
    /// account snapshots. Refunding the same ledger twice refunds twice.
    ///
    /// # Errors
    ///
    /// - `AppError::InvalidInput` for a ledger with dangling references
    /// - `AppError::AccountNotFound` when a debited account no longer exists
    /// - `AppError::Timeout` when the locks cannot be taken in time
    #[instrument(skip(self, ctx, ec))]
    pub async fn refund_charges(
        &self,
        ctx: &CallContext,
        tenant: &str,
        ec: &EventCharges,
    ) -> AppResult<()> {
        let tenant = self.tenant_or_default(tenant);
        let refunds = ec.refund_debits()?;
        if refunds.is_empty() {
            debug!("Nothing to refund");
            return Ok(());
        }

        let account_ids: BTreeSet<&str> = refunds.iter().map(|r| r.account_id.as_str()).collect();
        let _guard = self
            .locks
            .lock(account_ids.iter().map(|id| tenant_id(tenant, id)), ctx)
            .await?;

        let mut accounts: HashMap<&str, Account> = HashMap::with_capacity(account_ids.len());
        for id in account_ids.iter().copied() {
            let account = ctx
                .run("load account", self.store.get_account(tenant, id))
                .await?
                .ok_or_else(|| AppError::AccountNotFound(tenant_id(tenant, id)))?;
            accounts.insert(id, account);
        }

        for refund in &refunds {
            let account = accounts
                .get_mut(refund.account_id.as_str())
                .ok_or_else(|| AppError::Internal(format!("account {} not loaded", refund.account_id)))?;
            match account.balances.get_mut(&refund.balance_id) {
                Some(balance) => balance.units += refund.units,
                None => {
                    let mut restored = ec
                        .accounts
                        .get(&refund.account_id)
                        .and_then(|snapshot| snapshot.balances.get(&refund.balance_id))
                        .cloned()
                        .ok_or_else(|| AppError::BalanceNotFound {
                            account: tenant_id(tenant, &refund.account_id),
                            balance: refund.balance_id.clone(),
                        })?;
                    warn!(
                        "Re-creating balance {} on account {} for refund",
                        refund.balance_id, refund.account_id
                    );
                    restored.units = refund.units;
                    account.balances.insert(refund.balance_id.clone(), restored);
                }
            }
        }

        ctx.check("refund commit")?;
        let accounts: Vec<Account> = accounts.into_values().collect();
        self.store.set_accounts(&accounts).await?;
        info!(
            "Refunded {} balance debit(s) on {} account(s)",
            refunds.len(),
            accounts.len()
        );
        Ok(())
    }
}

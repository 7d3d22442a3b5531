//! Account administration
//!
//! Writes go through the same per-account locks as debits so an admin
//! update never interleaves with a charging call on the same account.

use crate::charging::ChargingEngine;
use crate::context::CallContext;
use crate::diktats::{apply_diktats, remove_balances, RemoveBalanceArgs, SetBalanceArgs};
use ocs_core::error::AppError;
use ocs_core::models::{tenant_id, Account};
use ocs_core::traits::AccountStore;
use ocs_core::AppResult;
use tracing::{info, instrument};

impl<S: AccountStore> ChargingEngine<S> {
    /// # Errors
    ///
    /// `AppError::AccountNotFound` when the account does not exist.
    #[instrument(skip(self))]
    pub async fn get_account(&self, tenant: &str, id: &str) -> AppResult<Account> {
        let tenant = self.tenant_or_default(tenant);
        self.store
            .get_account(tenant, id)
            .await?
            .ok_or_else(|| AppError::AccountNotFound(tenant_id(tenant, id)))
    }

    #[instrument(skip(self))]
    pub async fn list_accounts(&self, tenant: &str) -> AppResult<Vec<Account>> {
        self.store.list_accounts(self.tenant_or_default(tenant)).await
    }

    fn check_account(&self, account: &Account) -> AppResult<()> {
        account.check_integrity()?;
        self.filters
            .check_references(&account.tenant, &account.referenced_filter_ids())
    }

    /// Creates or replaces an account
    ///
    /// # Errors
    ///
    /// - `AppError::Validation` / `AppError::InvalidInput` for a malformed account
    /// - `AppError::BrokenReference` when a filter it names is unknown
    #[instrument(skip(self, ctx, account), fields(account_id = %account.id))]
    pub async fn set_account(&self, ctx: &CallContext, mut account: Account) -> AppResult<()> {
        if account.tenant.is_empty() {
            account.tenant = self.config.default_tenant.clone();
        }
        self.check_account(&account)?;

        let _guard = self.locks.lock([account.tenant_id()], ctx).await?;
        // Once checked, the store write runs to completion past the deadline
        ctx.check("set account")?;
        self.store.set_account(&account).await?;
        info!("Stored account {}", account.tenant_id());
        Ok(())
    }

    #[instrument(skip(self, ctx))]
    pub async fn remove_account(&self, ctx: &CallContext, tenant: &str, id: &str) -> AppResult<()> {
        let tenant = self.tenant_or_default(tenant);
        let key = tenant_id(tenant, id);
        let _guard = self.locks.lock([key.clone()], ctx).await?;
        ctx.check("remove account")?;
        if !self.store.remove_account(tenant, id).await? {
            return Err(AppError::AccountNotFound(key));
        }
        info!("Removed account {}", key);
        Ok(())
    }

    /// Applies balance diktats, creating the account when it is missing
    #[instrument(skip(self, ctx, args), fields(account_id = %args.account_id))]
    pub async fn action_set_balance(
        &self,
        ctx: &CallContext,
        args: SetBalanceArgs,
    ) -> AppResult<Account> {
        if args.account_id.is_empty() {
            return Err(AppError::MissingField("AccountID".to_string()));
        }
        let tenant = self.tenant_or_default(&args.tenant).to_string();
        let key = tenant_id(&tenant, &args.account_id);
        let _guard = self.locks.lock([key.clone()], ctx).await?;

        let mut account = ctx
            .run("load account", self.store.get_account(&tenant, &args.account_id))
            .await?
            .unwrap_or_else(|| Account::new(&tenant, &args.account_id));
        apply_diktats(&mut account, &args.diktats, args.reset)?;
        self.check_account(&account)?;

        ctx.check("set balance")?;
        self.store.set_account(&account).await?;
        info!(
            "Applied {} balance diktat(s) on account {}",
            args.diktats.len(),
            key
        );
        Ok(account)
    }

    /// Removes balances by ID, unknown IDs are ignored
    #[instrument(skip(self, ctx, args), fields(account_id = %args.account_id))]
    pub async fn action_remove_balance(
        &self,
        ctx: &CallContext,
        args: RemoveBalanceArgs,
    ) -> AppResult<Account> {
        if args.account_id.is_empty() {
            return Err(AppError::MissingField("AccountID".to_string()));
        }
        if args.balance_ids.is_empty() {
            return Err(AppError::MissingField("BalanceIDs".to_string()));
        }
        let tenant = self.tenant_or_default(&args.tenant).to_string();
        let key = tenant_id(&tenant, &args.account_id);
        let _guard = self.locks.lock([key.clone()], ctx).await?;

        let mut account = ctx
            .run("load account", self.store.get_account(&tenant, &args.account_id))
            .await?
            .ok_or_else(|| AppError::AccountNotFound(key.clone()))?;
        let removed = remove_balances(&mut account, &args.balance_ids);

        ctx.check("remove balance")?;
        self.store.set_account(&account).await?;
        info!("Removed {} balance(s) from account {}", removed, key);
        Ok(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diktats::BalanceDiktat;
    use crate::filters::FilterS;
    use ocs_cache::MemoryAccountStore;
    use ocs_core::config::EngineConfig;
    use ocs_core::models::{seconds, Balance};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn engine() -> ChargingEngine<MemoryAccountStore> {
        ChargingEngine::new(
            Arc::new(MemoryAccountStore::new()),
            Arc::new(FilterS::new()),
            EngineConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_set_get_remove_account() {
        let engine = engine();
        let ctx = engine.context();
        let account = Account::new("", "1001").with_balance(Balance::new_concrete("CB", dec!(10)));
        engine.set_account(&ctx, account).await.unwrap();

        let stored = engine.get_account("", "1001").await.unwrap();
        assert_eq!(stored.tenant, "cgrates.org");
        assert_eq!(engine.list_accounts("cgrates.org").await.unwrap().len(), 1);

        engine.remove_account(&ctx, "cgrates.org", "1001").await.unwrap();
        assert!(matches!(
            engine.get_account("cgrates.org", "1001").await,
            Err(AppError::AccountNotFound(_))
        ));
        assert!(matches!(
            engine.remove_account(&ctx, "cgrates.org", "1001").await,
            Err(AppError::AccountNotFound(_))
        ));
        assert_eq!(engine.locks().active(), 0);
    }

    #[tokio::test]
    async fn test_expired_deadline_skips_store_write() {
        let engine = engine();
        let ctx = CallContext::with_deadline(tokio::time::Instant::now());
        let account = Account::new("cgrates.org", "1001");

        let result = engine.set_account(&ctx, account).await;
        assert!(matches!(result, Err(AppError::Timeout(_))));
        assert!(engine.store().is_empty());
        assert_eq!(engine.locks().active(), 0);
    }

    #[tokio::test]
    async fn test_set_account_broken_reference() {
        let engine = engine();
        let ctx = engine.context();
        let mut account = Account::new("cgrates.org", "1001");
        account.filter_ids = vec!["FLTR_MISSING".to_string()];

        let result = engine.set_account(&ctx, account).await;
        assert!(matches!(result, Err(AppError::BrokenReference(_))));
        assert!(engine.store().is_empty());
    }

    #[tokio::test]
    async fn test_action_set_balance_creates_account() {
        let engine = engine();
        let ctx = engine.context();
        let args = SetBalanceArgs {
            tenant: String::new(),
            account_id: "1002".to_string(),
            diktats: vec![BalanceDiktat::new("*balance.MONETARY.Units", "5")],
            reset: false,
        };
        engine.action_set_balance(&ctx, args.clone()).await.unwrap();
        let account = engine.action_set_balance(&ctx, args).await.unwrap();
        assert_eq!(account.balances["MONETARY"].units, dec!(10));

        let stored = engine.get_account("cgrates.org", "1002").await.unwrap();
        assert_eq!(stored.balances["MONETARY"].units, dec!(10));
    }

    #[tokio::test]
    async fn test_action_set_balance_rejects_broken_filter() {
        let engine = engine();
        let ctx = engine.context();
        let args = SetBalanceArgs {
            tenant: "cgrates.org".to_string(),
            account_id: "1003".to_string(),
            diktats: vec![BalanceDiktat::new("*balance.AB.FilterIDs", "FLTR_NOPE")],
            reset: false,
        };
        let result = engine.action_set_balance(&ctx, args).await;
        assert!(matches!(result, Err(AppError::BrokenReference(_))));
        assert!(engine.store().is_empty());
    }

    #[tokio::test]
    async fn test_action_remove_balance() {
        let engine = engine();
        let ctx = engine.context();
        let account = Account::new("cgrates.org", "1001")
            .with_balance(Balance::new_abstract("AB", seconds(60)))
            .with_balance(Balance::new_concrete("CB", dec!(1)));
        engine.set_account(&ctx, account).await.unwrap();

        let args = RemoveBalanceArgs {
            tenant: "cgrates.org".to_string(),
            account_id: "1001".to_string(),
            balance_ids: vec!["AB".to_string(), "GONE".to_string()],
        };
        let account = engine.action_remove_balance(&ctx, args).await.unwrap();
        assert_eq!(account.balances.len(), 1);

        let missing = RemoveBalanceArgs {
            tenant: "cgrates.org".to_string(),
            account_id: "9999".to_string(),
            balance_ids: vec!["CB".to_string()],
        };
        assert!(matches!(
            engine.action_remove_balance(&ctx, missing).await,
            Err(AppError::AccountNotFound(_))
        ));
    }
}

//! In-process account store
//!
//! Accounts live in a map guarded by a `parking_lot::RwLock`. Reads hand
//! out clones and a batch write replaces every account under one write
//! lock, so readers see either none or all of a batch.

use async_trait::async_trait;
use ocs_core::models::{tenant_id, Account};
use ocs_core::traits::AccountStore;
use ocs_core::AppResult;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

#[derive(Default)]
pub struct MemoryAccountStore {
    accounts: RwLock<HashMap<String, Account>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-loaded with accounts
    pub fn with_accounts(accounts: impl IntoIterator<Item = Account>) -> Self {
        let store = Self::new();
        {
            let mut map = store.accounts.write();
            for account in accounts {
                map.insert(account.tenant_id(), account);
            }
        }
        store
    }

    pub fn len(&self) -> usize {
        self.accounts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.read().is_empty()
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn get_account(&self, tenant: &str, id: &str) -> AppResult<Option<Account>> {
        Ok(self.accounts.read().get(&tenant_id(tenant, id)).cloned())
    }

    async fn set_accounts(&self, accounts: &[Account]) -> AppResult<()> {
        debug!("Storing {} account(s) in memory", accounts.len());
        let mut map = self.accounts.write();
        for account in accounts {
            map.insert(account.tenant_id(), account.clone());
        }
        Ok(())
    }

    async fn remove_account(&self, tenant: &str, id: &str) -> AppResult<bool> {
        Ok(self.accounts.write().remove(&tenant_id(tenant, id)).is_some())
    }

    async fn list_accounts(&self, tenant: &str) -> AppResult<Vec<Account>> {
        let mut accounts: Vec<Account> = self
            .accounts
            .read()
            .values()
            .filter(|a| a.tenant == tenant)
            .cloned()
            .collect();
        accounts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(accounts)
    }
}

//! Account model
//!
//! A tenant-scoped collection of balances. The account is the unit of
//! locking and persistence: one charging call produces at most one write
//! per account.

use crate::error::AppError;
use crate::models::balance::Balance;
use crate::models::dynamic::{DynamicBlocker, DynamicWeight};
use crate::AppResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use validator::Validate;

/// Builds the `tenant:id` key accounts are stored and locked under
pub fn tenant_id(tenant: &str, id: &str) -> String {
    format!("{}:{}", tenant, id)
}

/// Account entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Account {
    #[validate(length(min = 1, message = "tenant must not be empty"))]
    pub tenant: String,

    #[validate(length(min = 1, message = "account id must not be empty"))]
    pub id: String,

    #[serde(default)]
    pub filter_ids: Vec<String>,

    #[serde(default)]
    pub weights: Vec<DynamicWeight>,

    #[serde(default)]
    pub blockers: Vec<DynamicBlocker>,

    #[serde(default)]
    pub opts: HashMap<String, Value>,

    /// Balances keyed by balance ID
    #[serde(default)]
    pub balances: HashMap<String, Balance>,

    #[serde(default)]
    pub threshold_ids: Vec<String>,
}

impl Account {
    pub fn new(tenant: &str, id: &str) -> Self {
        Self {
            tenant: tenant.to_string(),
            id: id.to_string(),
            filter_ids: Vec::new(),
            weights: Vec::new(),
            blockers: Vec::new(),
            opts: HashMap::new(),
            balances: HashMap::new(),
            threshold_ids: Vec::new(),
        }
    }

    /// Storage and lock key of the account
    pub fn tenant_id(&self) -> String {
        tenant_id(&self.tenant, &self.id)
    }

    /// Inserts or replaces a balance under its own ID
    pub fn with_balance(mut self, balance: Balance) -> Self {
        self.balances.insert(balance.id.clone(), balance);
        self
    }

    pub fn balance(&self, id: &str) -> AppResult<&Balance> {
        self.balances.get(id).ok_or_else(|| AppError::BalanceNotFound {
            account: self.tenant_id(),
            balance: id.to_string(),
        })
    }

    pub fn balance_mut(&mut self, id: &str) -> AppResult<&mut Balance> {
        let account = self.tenant_id();
        self.balances
            .get_mut(id)
            .ok_or_else(|| AppError::BalanceNotFound {
                account,
                balance: id.to_string(),
            })
    }

    /// Every filter ID referenced by the account or its balances
    pub fn referenced_filter_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.filter_ids.iter().map(String::as_str).collect();
        ids.extend(self.weights.iter().flat_map(|w| w.filter_ids.iter().map(String::as_str)));
        ids.extend(self.blockers.iter().flat_map(|b| b.filter_ids.iter().map(String::as_str)));
        for balance in self.balances.values() {
            ids.extend(balance.referenced_filter_ids());
        }
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Structural checks beyond field validation
    ///
    /// Balance map keys must match the balance IDs and every balance must
    /// carry sane numbers.
    pub fn check_integrity(&self) -> AppResult<()> {
        self.validate()?;
        for (key, balance) in &self.balances {
            if key != &balance.id {
                return Err(AppError::InvalidInput(format!(
                    "balance key {} does not match balance id {} on account {}",
                    key,
                    balance.id,
                    self.tenant_id()
                )));
            }
            balance.validate()?;
            balance.check_numbers()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::dynamic::DynamicWeight;
    use rust_decimal_macros::dec;

    fn sample() -> Account {
        Account::new("cgrates.org", "1001")
            .with_balance(Balance::new_abstract("AB", dec!(40)))
            .with_balance(Balance::new_concrete("CB", dec!(213)))
    }

    #[test]
    fn test_tenant_id() {
        assert_eq!(sample().tenant_id(), "cgrates.org:1001");
    }

    #[test]
    fn test_balance_lookup() {
        let mut account = sample();
        assert_eq!(account.balance("AB").unwrap().units, dec!(40));
        account.balance_mut("CB").unwrap().units = dec!(1);
        assert_eq!(account.balances["CB"].units, dec!(1));
        assert!(matches!(
            account.balance("missing"),
            Err(AppError::BalanceNotFound { .. })
        ));
    }

    #[test]
    fn test_integrity_rejects_mismatched_keys() {
        let mut account = sample();
        assert!(account.check_integrity().is_ok());
        account
            .balances
            .insert("OTHER".to_string(), Balance::new_concrete("CB2", dec!(1)));
        assert!(matches!(
            account.check_integrity(),
            Err(AppError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_validation_requires_ids() {
        let account = Account::new("", "1001");
        assert!(matches!(
            account.check_integrity(),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_referenced_filters_deduplicated() {
        let mut account = sample();
        account.filter_ids = vec!["FLTR_1".to_string()];
        account.weights = vec![DynamicWeight::with_filters(&["FLTR_1"], 10.0)];
        assert_eq!(account.referenced_filter_ids(), vec!["FLTR_1"]);
    }

    #[test]
    fn test_serde_roundtrip_keeps_balances() {
        let account = sample();
        let json = serde_json::to_string(&account).unwrap();
        let parsed: Account = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, account);
    }
}

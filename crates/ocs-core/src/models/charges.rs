//! EventCharges ledger
//!
//! The record of one charging call. Entries reference each other by string
//! ID only, so the whole structure serializes as-is and can be replayed by
//! a refund without touching storage:
//!
//! - `charges` lists ChargingIDs in debit order, repeated runs compressed
//! - `accounting` maps a ChargingID to the balance debit it stands for
//! - `unit_factors`, `rating` and `rates` are deduplicated lookup tables

use crate::error::AppError;
use crate::models::account::Account;
use crate::models::balance::UnitFactor;
use crate::models::units::{add_checked, mul_checked};
use crate::AppResult;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use uuid::Uuid;

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// One step of the ordered charge list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeEntry {
    pub charging_id: String,
    /// How many consecutive times this charge applied
    pub compress_factor: u64,
}

/// A debit of one balance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AccountCharge {
    pub account_id: String,
    pub balance_id: String,
    /// Native units taken from the balance
    pub units: Decimal,
    /// Floor of the balance when it was debited, `None` when unlimited
    pub balance_limit: Option<Decimal>,
    pub unit_factor_id: Option<String>,
    #[serde(default)]
    pub attribute_ids: Vec<String>,
    pub rating_id: Option<String>,
    /// Charges that paid for this one (concretes covering an abstract cost)
    #[serde(default)]
    pub joined_charge_ids: Vec<String>,
}

/// A rated usage interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateSInterval {
    pub interval_start: Decimal,
    pub increments: Vec<RateSIncrement>,
    pub compress_factor: u64,
}

/// A run of identical increments inside a rated interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateSIncrement {
    pub increment_start: Decimal,
    pub rate_id: String,
    pub rate_interval_index: usize,
    pub compress_factor: u64,
    /// Usage of a single increment
    pub usage: Decimal,
}

/// Price applied to an interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalRate {
    pub interval_start: Decimal,
    pub fixed_fee: Decimal,
    /// Fee per `unit` of usage
    pub recurrent_fee: Decimal,
    pub unit: Decimal,
    pub increment: Decimal,
}

/// Native units to give back to one balance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceRefund {
    pub account_id: String,
    pub balance_id: String,
    pub units: Decimal,
}

/// Ledger of one charging operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EventCharges {
    /// Usage covered, before unit factors
    pub abstracts: Decimal,
    /// Money consumed
    pub concretes: Decimal,
    pub charges: Vec<ChargeEntry>,
    pub accounting: HashMap<String, AccountCharge>,
    pub unit_factors: HashMap<String, UnitFactor>,
    pub rating: HashMap<String, RateSInterval>,
    pub rates: HashMap<String, IntervalRate>,
    /// Post-operation snapshots keyed by account ID
    pub accounts: HashMap<String, Account>,
}

impl EventCharges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether nothing was charged
    pub fn is_empty(&self) -> bool {
        self.charges.is_empty()
    }

    pub fn unit_factor_id(&mut self, uf: &UnitFactor) -> String {
        if let Some((id, _)) = self.unit_factors.iter().find(|(_, v)| *v == uf) {
            return id.clone();
        }
        let id = new_id();
        self.unit_factors.insert(id.clone(), uf.clone());
        id
    }

    pub fn rate_id(&mut self, rate: &IntervalRate) -> String {
        if let Some((id, _)) = self.rates.iter().find(|(_, v)| *v == rate) {
            return id.clone();
        }
        let id = new_id();
        self.rates.insert(id.clone(), rate.clone());
        id
    }

    pub fn rating_id(&mut self, interval: RateSInterval) -> String {
        if let Some((id, _)) = self.rating.iter().find(|(_, v)| **v == interval) {
            return id.clone();
        }
        let id = new_id();
        self.rating.insert(id.clone(), interval);
        id
    }

    /// Stores an account charge, reusing the ID of an identical one
    pub fn account_charge_id(&mut self, charge: AccountCharge) -> String {
        if let Some((id, _)) = self.accounting.iter().find(|(_, v)| **v == charge) {
            return id.clone();
        }
        let id = new_id();
        self.accounting.insert(id.clone(), charge);
        id
    }

    fn append_charge(&mut self, charging_id: String, compress_factor: u64) {
        if let Some(last) = self.charges.last_mut() {
            if last.charging_id == charging_id {
                last.compress_factor += compress_factor;
                return;
            }
        }
        self.charges.push(ChargeEntry {
            charging_id,
            compress_factor,
        });
    }

    /// Stores a charge and appends it to the ordered charge list
    pub fn record_charge(&mut self, charge: AccountCharge) -> String {
        let id = self.account_charge_id(charge);
        self.append_charge(id.clone(), 1);
        id
    }

    /// Folds another ledger into this one
    ///
    /// Lookup entries are deduplicated by value and the other ledger's IDs
    /// rewritten accordingly. Account snapshots from `other` win.
    pub fn merge(&mut self, other: EventCharges) {
        self.abstracts += other.abstracts;
        self.concretes += other.concretes;

        let mut uf_ids = HashMap::new();
        for (id, uf) in &other.unit_factors {
            uf_ids.insert(id.clone(), self.unit_factor_id(uf));
        }
        let mut rate_ids = HashMap::new();
        for (id, rate) in &other.rates {
            rate_ids.insert(id.clone(), self.rate_id(rate));
        }
        let mut rating_ids = HashMap::new();
        for (id, interval) in &other.rating {
            let mut interval = interval.clone();
            for incr in &mut interval.increments {
                if let Some(new_id) = rate_ids.get(&incr.rate_id) {
                    incr.rate_id = new_id.clone();
                }
            }
            rating_ids.insert(id.clone(), self.rating_id(interval));
        }

        let mut charge_ids: HashMap<String, String> = HashMap::new();
        let mut pending: Vec<&String> = other.accounting.keys().collect();
        pending.sort();
        for id in pending {
            self.merge_account_charge(id, &other, &uf_ids, &rating_ids, &mut charge_ids, 0);
        }

        for entry in &other.charges {
            let id = charge_ids
                .get(&entry.charging_id)
                .cloned()
                .unwrap_or_else(|| entry.charging_id.clone());
            self.append_charge(id, entry.compress_factor);
        }
        self.accounts.extend(other.accounts);
    }

    fn merge_account_charge(
        &mut self,
        id: &str,
        other: &EventCharges,
        uf_ids: &HashMap<String, String>,
        rating_ids: &HashMap<String, String>,
        charge_ids: &mut HashMap<String, String>,
        depth: usize,
    ) -> String {
        if let Some(mapped) = charge_ids.get(id) {
            return mapped.clone();
        }
        let Some(charge) = other.accounting.get(id) else {
            return id.to_string();
        };
        let mut charge = charge.clone();
        if depth <= other.accounting.len() {
            charge.joined_charge_ids = charge
                .joined_charge_ids
                .iter()
                .map(|joined| {
                    self.merge_account_charge(joined, other, uf_ids, rating_ids, charge_ids, depth + 1)
                })
                .collect();
        }
        if let Some(uf) = charge.unit_factor_id.as_ref().and_then(|u| uf_ids.get(u)) {
            charge.unit_factor_id = Some(uf.clone());
        }
        if let Some(rating) = charge.rating_id.as_ref().and_then(|r| rating_ids.get(r)) {
            charge.rating_id = Some(rating.clone());
        }
        let new_id = self.account_charge_id(charge);
        charge_ids.insert(id.to_string(), new_id.clone());
        new_id
    }

    /// Verifies that every ID reference resolves inside the ledger
    pub fn check_references(&self) -> AppResult<()> {
        for entry in &self.charges {
            if !self.accounting.contains_key(&entry.charging_id) {
                return Err(AppError::InvalidInput(format!(
                    "charge {} has no accounting entry",
                    entry.charging_id
                )));
            }
        }
        for (id, charge) in &self.accounting {
            if let Some(uf) = &charge.unit_factor_id {
                if !self.unit_factors.contains_key(uf) {
                    return Err(AppError::InvalidInput(format!(
                        "accounting {} references unknown unit factor {}",
                        id, uf
                    )));
                }
            }
            if let Some(rating) = &charge.rating_id {
                if !self.rating.contains_key(rating) {
                    return Err(AppError::InvalidInput(format!(
                        "accounting {} references unknown rating {}",
                        id, rating
                    )));
                }
            }
            for joined in &charge.joined_charge_ids {
                if !self.accounting.contains_key(joined) {
                    return Err(AppError::InvalidInput(format!(
                        "accounting {} references unknown joined charge {}",
                        id, joined
                    )));
                }
            }
        }
        for (id, interval) in &self.rating {
            for incr in &interval.increments {
                if !self.rates.contains_key(&incr.rate_id) {
                    return Err(AppError::InvalidInput(format!(
                        "rating {} references unknown rate {}",
                        id, incr.rate_id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Native units to give back per balance, joined charges included
    ///
    /// Every charge counts as many times as its compress factor. Results are
    /// sorted by account then balance.
    pub fn refund_debits(&self) -> AppResult<Vec<BalanceRefund>> {
        self.check_references()?;
        let mut totals: BTreeMap<(String, String), Decimal> = BTreeMap::new();
        for entry in &self.charges {
            let mut path = HashSet::new();
            self.collect_debits(
                &entry.charging_id,
                Decimal::from(entry.compress_factor),
                &mut path,
                &mut totals,
            )?;
        }
        Ok(totals
            .into_iter()
            .filter(|(_, units)| !units.is_zero())
            .map(|((account_id, balance_id), units)| BalanceRefund {
                account_id,
                balance_id,
                units,
            })
            .collect())
    }

    fn collect_debits<'a>(
        &'a self,
        charging_id: &'a str,
        times: Decimal,
        path: &mut HashSet<&'a str>,
        totals: &mut BTreeMap<(String, String), Decimal>,
    ) -> AppResult<()> {
        if !path.insert(charging_id) {
            return Err(AppError::InvalidInput(format!(
                "cyclic joined charges at {}",
                charging_id
            )));
        }
        let charge = self.accounting.get(charging_id).ok_or_else(|| {
            AppError::InvalidInput(format!("charge {} has no accounting entry", charging_id))
        })?;
        let total = totals
            .entry((charge.account_id.clone(), charge.balance_id.clone()))
            .or_insert(Decimal::ZERO);
        *total = add_checked(*total, mul_checked(charge.units, times)?)?;
        for joined in &charge.joined_charge_ids {
            self.collect_debits(joined, times, path, totals)?;
        }
        path.remove(charging_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn debit(account: &str, balance: &str, units: Decimal) -> AccountCharge {
        AccountCharge {
            account_id: account.to_string(),
            balance_id: balance.to_string(),
            units,
            ..Default::default()
        }
    }

    #[test]
    fn test_consecutive_identical_charges_compress() {
        let mut ec = EventCharges::new();
        let first = ec.record_charge(debit("1001", "AB", dec!(10)));
        let second = ec.record_charge(debit("1001", "AB", dec!(10)));
        assert_eq!(first, second);
        assert_eq!(ec.charges.len(), 1);
        assert_eq!(ec.charges[0].compress_factor, 2);
        assert_eq!(ec.accounting.len(), 1);

        ec.record_charge(debit("1001", "CB", dec!(1)));
        ec.record_charge(debit("1001", "AB", dec!(10)));
        assert_eq!(ec.charges.len(), 3);
        assert_eq!(ec.accounting.len(), 2);
    }

    #[test]
    fn test_lookup_tables_deduplicate() {
        let mut ec = EventCharges::new();
        let uf = UnitFactor {
            filter_ids: vec![],
            factor: dec!(10),
        };
        assert_eq!(ec.unit_factor_id(&uf), ec.unit_factor_id(&uf.clone()));
        let rate = IntervalRate {
            interval_start: dec!(0),
            fixed_fee: dec!(0.6),
            recurrent_fee: dec!(0.1),
            unit: dec!(1),
            increment: dec!(1),
        };
        let a = ec.rate_id(&rate);
        let b = ec.rate_id(&rate);
        assert_eq!(a, b);
        assert_eq!(ec.rates.len(), 1);
    }

    #[test]
    fn test_refund_debits_uncompress_and_follow_joined() {
        let mut ec = EventCharges::new();
        let payer = ec.account_charge_id(debit("1001", "CB", dec!(1.5)));
        let mut abstract_charge = debit("1001", "AB", dec!(10));
        abstract_charge.joined_charge_ids = vec![payer];
        ec.record_charge(abstract_charge.clone());
        ec.record_charge(abstract_charge);
        ec.record_charge(debit("1002", "CB", dec!(4)));

        let refunds = ec.refund_debits().unwrap();
        assert_eq!(
            refunds,
            vec![
                BalanceRefund {
                    account_id: "1001".to_string(),
                    balance_id: "AB".to_string(),
                    units: dec!(20),
                },
                BalanceRefund {
                    account_id: "1001".to_string(),
                    balance_id: "CB".to_string(),
                    units: dec!(3.0),
                },
                BalanceRefund {
                    account_id: "1002".to_string(),
                    balance_id: "CB".to_string(),
                    units: dec!(4),
                },
            ]
        );
    }

    #[test]
    fn test_check_references_detects_dangling_ids() {
        let mut ec = EventCharges::new();
        let mut charge = debit("1001", "AB", dec!(1));
        charge.rating_id = Some("missing".to_string());
        ec.record_charge(charge);
        assert!(matches!(
            ec.check_references(),
            Err(AppError::InvalidInput(_))
        ));

        let mut ec = EventCharges::new();
        ec.charges.push(ChargeEntry {
            charging_id: "ghost".to_string(),
            compress_factor: 1,
        });
        assert!(ec.refund_debits().is_err());
    }

    #[test]
    fn test_cyclic_joined_charges_rejected() {
        let mut ec = EventCharges::new();
        let mut a = debit("1001", "A", dec!(1));
        a.joined_charge_ids = vec!["b".to_string()];
        let mut b = debit("1001", "B", dec!(1));
        b.joined_charge_ids = vec!["a".to_string()];
        ec.accounting.insert("a".to_string(), a);
        ec.accounting.insert("b".to_string(), b);
        ec.charges.push(ChargeEntry {
            charging_id: "a".to_string(),
            compress_factor: 1,
        });
        assert!(ec.refund_debits().is_err());
    }

    #[test]
    fn test_refund_debits_reports_overflow() {
        let mut ec = EventCharges::new();
        let huge = ec.account_charge_id(debit("1001", "AB", Decimal::MAX));
        ec.charges.push(ChargeEntry {
            charging_id: huge,
            compress_factor: 2,
        });
        assert!(matches!(
            ec.refund_debits(),
            Err(AppError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_merge_sums_and_remaps() {
        let mut left = EventCharges::new();
        left.abstracts = dec!(10);
        left.record_charge(debit("1001", "AB", dec!(10)));

        let mut right = EventCharges::new();
        right.abstracts = dec!(5);
        right.concretes = dec!(0.5);
        let uf = UnitFactor {
            filter_ids: vec![],
            factor: dec!(2),
        };
        let uf_id = right.unit_factor_id(&uf);
        let payer = right.account_charge_id(debit("1002", "CB", dec!(0.5)));
        let mut charge = debit("1001", "AB", dec!(10));
        right.record_charge(charge.clone());
        charge.unit_factor_id = Some(uf_id);
        charge.joined_charge_ids = vec![payer];
        right.record_charge(charge);
        right.accounts.insert("1002".to_string(), Account::new("cgrates.org", "1002"));

        left.merge(right);
        assert_eq!(left.abstracts, dec!(15));
        assert_eq!(left.concretes, dec!(0.5));
        // the identical first charge of `right` compresses into the last one of `left`
        assert_eq!(left.charges.len(), 2);
        assert_eq!(left.charges[0].compress_factor, 2);
        assert_eq!(left.unit_factors.len(), 1);
        assert!(left.accounts.contains_key("1002"));
        assert!(left.check_references().is_ok());

        let refunds = left.refund_debits().unwrap();
        let ab: Decimal = refunds
            .iter()
            .filter(|r| r.balance_id == "AB")
            .map(|r| r.units)
            .sum();
        assert_eq!(ab, dec!(30));
    }
}

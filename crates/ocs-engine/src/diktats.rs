//! Balance diktats
//!
//! Path based writes used by the set-balance action, e.g.
//! `*balance.MONETARY.Units = 10` or `*balance.VOICE.Opts.*balanceLimit = -5`.
//! A diktat on a missing balance creates it from [`Balance::new_default`].

use crate::constants::BALANCE_DIKTAT_PREFIX;
use ocs_core::error::AppError;
use ocs_core::models::{
    parse_cost_increments, parse_dynamic_blockers, parse_dynamic_weights, parse_unit_factors,
    add_checked, parse_usage, Account, Balance,
};
use ocs_core::AppResult;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// One path/value write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceDiktat {
    pub path: String,
    pub value: String,
}

impl BalanceDiktat {
    pub fn new(path: &str, value: &str) -> Self {
        Self {
            path: path.to_string(),
            value: value.to_string(),
        }
    }
}

/// Arguments of the set-balance action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetBalanceArgs {
    #[serde(default)]
    pub tenant: String,
    pub account_id: String,
    pub diktats: Vec<BalanceDiktat>,
    /// Replace `Units` instead of adding to them
    #[serde(default)]
    pub reset: bool,
}

/// Arguments of the remove-balance action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveBalanceArgs {
    #[serde(default)]
    pub tenant: String,
    pub account_id: String,
    pub balance_ids: Vec<String>,
}

fn id_list(value: &str) -> Vec<String> {
    value
        .split(';')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .collect()
}

fn opt_value(value: &str) -> Value {
    let trimmed = value.trim();
    if let Ok(b) = trimmed.parse::<bool>() {
        return Value::Bool(b);
    }
    if Decimal::from_str(trimmed).is_ok() {
        if let Ok(n) = serde_json::Number::from_str(trimmed) {
            return Value::Number(n);
        }
    }
    Value::String(value.to_string())
}

fn units_value(value: &str) -> AppResult<Decimal> {
    let trimmed = value.trim();
    match Decimal::from_str(trimmed) {
        Ok(units) => Ok(units),
        Err(_) => parse_usage(trimmed),
    }
}

/// Applies the diktats in order
///
/// # Errors
///
/// `AppError::InvalidInput` for a path outside `*balance.<ID>.<Field>` or a
/// value that does not parse for its field. The account may be partially
/// modified on error; callers work on a copy.
pub fn apply_diktats(account: &mut Account, diktats: &[BalanceDiktat], reset: bool) -> AppResult<()> {
    if diktats.is_empty() {
        return Err(AppError::MissingField("diktats".to_string()));
    }
    for diktat in diktats {
        apply_diktat(account, diktat, reset)?;
    }
    Ok(())
}

fn apply_diktat(account: &mut Account, diktat: &BalanceDiktat, reset: bool) -> AppResult<()> {
    let invalid = || AppError::InvalidInput(format!("unsupported diktat path: {}", diktat.path));
    let rest = diktat
        .path
        .strip_prefix(BALANCE_DIKTAT_PREFIX)
        .ok_or_else(invalid)?;
    let (balance_id, field) = rest.split_once('.').ok_or_else(invalid)?;
    if balance_id.is_empty() || field.is_empty() {
        return Err(invalid());
    }

    let balance = account
        .balances
        .entry(balance_id.to_string())
        .or_insert_with(|| Balance::new_default(balance_id));
    let value = diktat.value.as_str();
    match field {
        "Units" => {
            let units = units_value(value)?;
            if reset {
                balance.units = units;
            } else {
                balance.units = add_checked(balance.units, units)?;
            }
        }
        "Type" => balance.balance_type = value.parse()?,
        "FilterIDs" => balance.filter_ids = id_list(value),
        "Weights" => balance.weights = parse_dynamic_weights(value)?,
        "Blockers" => balance.blockers = parse_dynamic_blockers(value)?,
        "UnitFactors" => balance.unit_factors = parse_unit_factors(value)?,
        "CostIncrements" => balance.cost_increments = parse_cost_increments(value)?,
        "AttributeIDs" => balance.attribute_ids = id_list(value),
        "RateProfileIDs" => balance.rate_profile_ids = id_list(value),
        other => match other.strip_prefix("Opts.") {
            Some(key) if !key.is_empty() => {
                if value.is_empty() {
                    balance.opts.remove(key);
                } else {
                    balance.opts.insert(key.to_string(), opt_value(value));
                }
            }
            _ => return Err(invalid()),
        },
    }
    Ok(())
}

/// Removes the named balances, ignoring IDs that do not exist
pub fn remove_balances(account: &mut Account, balance_ids: &[String]) -> usize {
    balance_ids
        .iter()
        .filter(|id| account.balances.remove(id.as_str()).is_some())
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocs_core::models::{seconds, BalanceType, OPT_BALANCE_LIMIT};
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_creates_default_balance() {
        let mut account = Account::new("cgrates.org", "1001");
        apply_diktats(
            &mut account,
            &[BalanceDiktat::new("*balance.MONETARY.Units", "10")],
            false,
        )
        .unwrap();
        let balance = &account.balances["MONETARY"];
        assert_eq!(balance.balance_type, BalanceType::Concrete);
        assert_eq!(balance.units, dec!(10));
        assert_eq!(balance.cost_increments.len(), 3);
    }

    #[test]
    fn test_units_add_or_reset() {
        let mut account = Account::new("cgrates.org", "1001")
            .with_balance(Balance::new_abstract("VOICE", seconds(60)));
        apply_diktats(
            &mut account,
            &[BalanceDiktat::new("*balance.VOICE.Units", "30s")],
            false,
        )
        .unwrap();
        assert_eq!(account.balances["VOICE"].units, seconds(90));

        apply_diktats(
            &mut account,
            &[BalanceDiktat::new("*balance.VOICE.Units", "10s")],
            true,
        )
        .unwrap();
        assert_eq!(account.balances["VOICE"].units, seconds(10));
    }

    #[test]
    fn test_units_add_out_of_range() {
        let mut account = Account::new("cgrates.org", "1001")
            .with_balance(Balance::new_concrete("MONETARY", Decimal::MAX));
        let result = apply_diktats(
            &mut account,
            &[BalanceDiktat::new("*balance.MONETARY.Units", "1")],
            false,
        );
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
        assert_eq!(account.balances["MONETARY"].units, Decimal::MAX);
    }

    #[test]
    fn test_structured_fields() {
        let mut account = Account::new("cgrates.org", "1001");
        apply_diktats(
            &mut account,
            &[
                BalanceDiktat::new("*balance.AB.Type", "*abstract"),
                BalanceDiktat::new("*balance.AB.Weights", ";20"),
                BalanceDiktat::new("*balance.AB.Blockers", "*string:~*req.Account:1001;true"),
                BalanceDiktat::new("*balance.AB.UnitFactors", ";10"),
                BalanceDiktat::new("*balance.AB.CostIncrements", ";1000000000;0.6;0.1"),
                BalanceDiktat::new("*balance.AB.FilterIDs", "FLTR_1;FLTR_2"),
                BalanceDiktat::new("*balance.AB.Opts.*balanceLimit", "-100"),
                BalanceDiktat::new("*balance.AB.Opts.*balanceUnlimited", "true"),
            ],
            false,
        )
        .unwrap();
        let balance = &account.balances["AB"];
        assert!(balance.is_abstract());
        assert_eq!(balance.weights[0].weight, 20.0);
        assert!(balance.blockers[0].blocker);
        assert_eq!(balance.unit_factors[0].factor, dec!(10));
        assert_eq!(balance.cost_increments.len(), 1);
        assert_eq!(balance.filter_ids, vec!["FLTR_1", "FLTR_2"]);
        assert_eq!(balance.opts[OPT_BALANCE_LIMIT], json!(-100));
        assert_eq!(balance.opts["*balanceUnlimited"], json!(true));
    }

    #[test]
    fn test_invalid_paths() {
        let mut account = Account::new("cgrates.org", "1001");
        for path in ["*account.X.Units", "*balance.Units", "*balance..Units", "*balance.X.Color"] {
            let result = apply_diktats(&mut account, &[BalanceDiktat::new(path, "1")], false);
            assert!(matches!(result, Err(AppError::InvalidInput(_))), "{}", path);
        }
        assert!(apply_diktats(&mut account, &[], false).is_err());
    }

    #[test]
    fn test_remove_balances() {
        let mut account = Account::new("cgrates.org", "1001")
            .with_balance(Balance::new_abstract("AB", seconds(1)))
            .with_balance(Balance::new_concrete("CB", dec!(1)));
        let removed = remove_balances(&mut account, &["AB".to_string(), "NOPE".to_string()]);
        assert_eq!(removed, 1);
        assert!(account.balances.contains_key("CB"));
        assert!(!account.balances.contains_key("AB"));
    }
}

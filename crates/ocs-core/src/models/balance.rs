//! Balance model
//!
//! A balance is a named store of capacity inside an account. Abstract
//! balances hold usage (time, data, messages); concrete balances hold money.

use crate::error::AppError;
use crate::models::dynamic::{DynamicBlocker, DynamicWeight};
use crate::models::units::{decimal_from_value, NANOS_PER_SECOND};
use crate::AppResult;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use validator::Validate;

/// Option key holding the floor of a balance
pub const OPT_BALANCE_LIMIT: &str = "*balanceLimit";

/// Option key removing the floor of a concrete balance
pub const OPT_BALANCE_UNLIMITED: &str = "*balanceUnlimited";

/// Balance type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum BalanceType {
    /// Usage allowance (seconds, bytes, messages)
    #[serde(rename = "*abstract")]
    Abstract,
    /// Monetary credit
    #[default]
    #[serde(rename = "*concrete")]
    Concrete,
}

impl fmt::Display for BalanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BalanceType::Abstract => write!(f, "*abstract"),
            BalanceType::Concrete => write!(f, "*concrete"),
        }
    }
}

impl FromStr for BalanceType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "*abstract" => Ok(BalanceType::Abstract),
            "*concrete" => Ok(BalanceType::Concrete),
            other => Err(AppError::InvalidInput(format!(
                "unsupported balance type: {}",
                other
            ))),
        }
    }
}

/// Converts requested usage into balance-native units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitFactor {
    #[serde(default)]
    pub filter_ids: Vec<String>,
    pub factor: Decimal,
}

/// Charging granularity and fee model for a matching context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CostIncrement {
    #[serde(default)]
    pub filter_ids: Vec<String>,
    pub increment: Option<Decimal>,
    pub fixed_fee: Option<Decimal>,
    pub recurrent_fee: Option<Decimal>,
}

/// Lower bound of a balance's units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceLimit {
    Floor(Decimal),
    Unlimited,
}

impl BalanceLimit {
    /// Units available above the floor, `None` when unlimited
    pub fn available(&self, units: Decimal) -> Option<Decimal> {
        match self {
            BalanceLimit::Floor(floor) => Some((units - *floor).max(Decimal::ZERO)),
            BalanceLimit::Unlimited => None,
        }
    }

    /// The floor recorded on account charges
    pub fn floor(&self) -> Option<Decimal> {
        match self {
            BalanceLimit::Floor(floor) => Some(*floor),
            BalanceLimit::Unlimited => None,
        }
    }
}

/// Balance entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Balance {
    /// Identifier, unique inside the account
    #[validate(length(min = 1, message = "balance id must not be empty"))]
    pub id: String,

    #[serde(default)]
    pub filter_ids: Vec<String>,

    #[serde(default)]
    pub weights: Vec<DynamicWeight>,

    #[serde(default)]
    pub blockers: Vec<DynamicBlocker>,

    #[serde(rename = "type", default)]
    pub balance_type: BalanceType,

    /// Remaining capacity in native units
    #[serde(default)]
    pub units: Decimal,

    #[serde(default)]
    pub unit_factors: Vec<UnitFactor>,

    #[serde(default)]
    pub opts: HashMap<String, Value>,

    #[serde(default)]
    pub cost_increments: Vec<CostIncrement>,

    #[serde(default)]
    pub attribute_ids: Vec<String>,

    #[serde(default)]
    pub rate_profile_ids: Vec<String>,
}

impl Balance {
    fn empty(id: &str, balance_type: BalanceType, units: Decimal) -> Self {
        Self {
            id: id.to_string(),
            filter_ids: Vec::new(),
            weights: Vec::new(),
            blockers: Vec::new(),
            balance_type,
            units,
            unit_factors: Vec::new(),
            opts: HashMap::new(),
            cost_increments: Vec::new(),
            attribute_ids: Vec::new(),
            rate_profile_ids: Vec::new(),
        }
    }

    /// An abstract balance with no weights, factors or cost increments
    pub fn new_abstract(id: &str, units: Decimal) -> Self {
        Self::empty(id, BalanceType::Abstract, units)
    }

    /// A concrete balance with no weights, factors or cost increments
    pub fn new_concrete(id: &str, units: Decimal) -> Self {
        Self::empty(id, BalanceType::Concrete, units)
    }

    /// The balance created when a diktat targets a missing ID
    ///
    /// Concrete, empty, with free per-ToR increments: one second for
    /// voice, one MiB for data and one unit for SMS.
    pub fn new_default(id: &str) -> Self {
        let mut balance = Self::empty(id, BalanceType::Concrete, Decimal::ZERO);
        balance.cost_increments = vec![
            CostIncrement {
                filter_ids: vec!["*string:~*req.ToR:*voice".to_string()],
                increment: Some(Decimal::from(NANOS_PER_SECOND)),
                fixed_fee: None,
                recurrent_fee: Some(Decimal::ZERO),
            },
            CostIncrement {
                filter_ids: vec!["*string:~*req.ToR:*data".to_string()],
                increment: Some(Decimal::from(1_048_576)),
                fixed_fee: None,
                recurrent_fee: Some(Decimal::ZERO),
            },
            CostIncrement {
                filter_ids: vec!["*string:~*req.ToR:*sms".to_string()],
                increment: Some(Decimal::ONE),
                fixed_fee: None,
                recurrent_fee: Some(Decimal::ZERO),
            },
        ];
        balance
    }

    pub fn is_abstract(&self) -> bool {
        self.balance_type == BalanceType::Abstract
    }

    /// Resolves the floor from `*balanceLimit` / `*balanceUnlimited`
    ///
    /// Abstract balances never go below zero, so their floor is clamped
    /// and the unlimited flag is ignored.
    pub fn limit(&self) -> AppResult<BalanceLimit> {
        if !self.is_abstract() && self.unlimited()? {
            return Ok(BalanceLimit::Unlimited);
        }
        let floor = match self.opts.get(OPT_BALANCE_LIMIT) {
            None | Some(Value::Null) => Decimal::ZERO,
            Some(value @ (Value::Number(_) | Value::String(_))) => decimal_from_value(value)
                .map_err(|_| {
                    AppError::InvalidInput(format!(
                        "unsupported {} format on balance {}",
                        OPT_BALANCE_LIMIT, self.id
                    ))
                })?,
            Some(_) => {
                return Err(AppError::InvalidInput(format!(
                    "unsupported {} format on balance {}",
                    OPT_BALANCE_LIMIT, self.id
                )))
            }
        };
        if self.is_abstract() {
            Ok(BalanceLimit::Floor(floor.max(Decimal::ZERO)))
        } else {
            Ok(BalanceLimit::Floor(floor))
        }
    }

    fn unlimited(&self) -> AppResult<bool> {
        match self.opts.get(OPT_BALANCE_UNLIMITED) {
            None | Some(Value::Null) => Ok(false),
            Some(Value::Bool(b)) => Ok(*b),
            Some(Value::String(s)) => s.trim().parse::<bool>().map_err(|_| {
                AppError::InvalidInput(format!(
                    "unsupported {} format on balance {}",
                    OPT_BALANCE_UNLIMITED, self.id
                ))
            }),
            Some(_) => Err(AppError::InvalidInput(format!(
                "unsupported {} format on balance {}",
                OPT_BALANCE_UNLIMITED, self.id
            ))),
        }
    }

    /// Every filter ID referenced anywhere on the balance
    pub fn referenced_filter_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.filter_ids.iter().map(String::as_str).collect();
        ids.extend(self.weights.iter().flat_map(|w| w.filter_ids.iter().map(String::as_str)));
        ids.extend(self.blockers.iter().flat_map(|b| b.filter_ids.iter().map(String::as_str)));
        ids.extend(self.unit_factors.iter().flat_map(|u| u.filter_ids.iter().map(String::as_str)));
        ids.extend(
            self.cost_increments
                .iter()
                .flat_map(|c| c.filter_ids.iter().map(String::as_str)),
        );
        ids
    }

    /// Numeric sanity: positive factors and increments, non-negative fees
    pub fn check_numbers(&self) -> AppResult<()> {
        for uf in &self.unit_factors {
            if uf.factor <= Decimal::ZERO {
                return Err(AppError::Validation(format!(
                    "unit factor on balance {} must be positive",
                    self.id
                )));
            }
        }
        for ci in &self.cost_increments {
            if matches!(ci.increment, Some(inc) if inc <= Decimal::ZERO) {
                return Err(AppError::Validation(format!(
                    "cost increment on balance {} must be positive",
                    self.id
                )));
            }
            let negative_fee = [ci.fixed_fee, ci.recurrent_fee]
                .iter()
                .flatten()
                .any(|fee| fee.is_sign_negative() && !fee.is_zero());
            if negative_fee {
                return Err(AppError::Validation(format!(
                    "fees on balance {} must not be negative",
                    self.id
                )));
            }
        }
        self.limit().map(|_| ())
    }
}

fn filters_from(part: &str) -> Vec<String> {
    part.split('&')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(String::from)
        .collect()
}

fn optional_decimal(part: &str) -> AppResult<Option<Decimal>> {
    let part = part.trim();
    if part.is_empty() {
        return Ok(None);
    }
    Decimal::from_str(part)
        .map(Some)
        .map_err(|_| AppError::InvalidInput(format!("invalid decimal: {}", part)))
}

/// Parses `fltrs;factor;;factor` into unit factors
pub fn parse_unit_factors(input: &str) -> AppResult<Vec<UnitFactor>> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(Vec::new());
    }
    let parts: Vec<&str> = input.split(';').collect();
    if parts.len() % 2 != 0 {
        return Err(AppError::InvalidInput(format!(
            "invalid unit factors format: {}",
            input
        )));
    }
    parts
        .chunks(2)
        .map(|chunk| {
            let factor = optional_decimal(chunk[1])?.ok_or_else(|| {
                AppError::InvalidInput(format!("missing unit factor in: {}", input))
            })?;
            Ok(UnitFactor {
                filter_ids: filters_from(chunk[0]),
                factor,
            })
        })
        .collect()
}

/// Parses `fltrs;increment;fixed_fee;recurrent_fee` groups into cost increments
pub fn parse_cost_increments(input: &str) -> AppResult<Vec<CostIncrement>> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(Vec::new());
    }
    let parts: Vec<&str> = input.split(';').collect();
    if parts.len() % 4 != 0 {
        return Err(AppError::InvalidInput(format!(
            "invalid cost increments format: {}",
            input
        )));
    }
    parts
        .chunks(4)
        .map(|chunk| {
            Ok(CostIncrement {
                filter_ids: filters_from(chunk[0]),
                increment: optional_decimal(chunk[1])?,
                fixed_fee: optional_decimal(chunk[2])?,
                recurrent_fee: optional_decimal(chunk[3])?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_balance_type_serde() {
        let json = serde_json::to_string(&BalanceType::Abstract).unwrap();
        assert_eq!(json, "\"*abstract\"");
        let parsed: BalanceType = serde_json::from_str("\"*concrete\"").unwrap();
        assert_eq!(parsed, BalanceType::Concrete);
        assert!("*monetary".parse::<BalanceType>().is_err());
    }

    #[test]
    fn test_limit_defaults_to_zero() {
        let balance = Balance::new_concrete("CB", dec!(10));
        assert_eq!(balance.limit().unwrap(), BalanceLimit::Floor(Decimal::ZERO));
    }

    #[test]
    fn test_negative_limit_on_concrete() {
        let mut balance = Balance::new_concrete("CB", dec!(10));
        balance.opts.insert(OPT_BALANCE_LIMIT.to_string(), json!(-200));
        let limit = balance.limit().unwrap();
        assert_eq!(limit, BalanceLimit::Floor(dec!(-200)));
        assert_eq!(limit.available(balance.units), Some(dec!(210)));
    }

    #[test]
    fn test_abstract_limit_clamped() {
        let mut balance = Balance::new_abstract("AB", dec!(10));
        balance.opts.insert(OPT_BALANCE_LIMIT.to_string(), json!(-100.0));
        balance.opts.insert(OPT_BALANCE_UNLIMITED.to_string(), json!(true));
        assert_eq!(balance.limit().unwrap(), BalanceLimit::Floor(Decimal::ZERO));
    }

    #[test]
    fn test_unlimited_concrete() {
        let mut balance = Balance::new_concrete("CB", dec!(0));
        balance.opts.insert(OPT_BALANCE_UNLIMITED.to_string(), json!(true));
        let limit = balance.limit().unwrap();
        assert_eq!(limit, BalanceLimit::Unlimited);
        assert_eq!(limit.available(dec!(-1000)), None);
    }

    #[test]
    fn test_unsupported_limit_format() {
        let mut balance = Balance::new_concrete("CB", dec!(10));
        balance.opts.insert(OPT_BALANCE_LIMIT.to_string(), json!(["1"]));
        assert!(matches!(balance.limit(), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn test_default_balance() {
        let balance = Balance::new_default("CB1");
        assert_eq!(balance.balance_type, BalanceType::Concrete);
        assert_eq!(balance.units, Decimal::ZERO);
        assert_eq!(balance.cost_increments.len(), 3);
        assert_eq!(
            balance.cost_increments[0].increment,
            Some(dec!(1000000000))
        );
    }

    #[test]
    fn test_parse_cost_increments() {
        let increments = parse_cost_increments("fltr1&fltr2;1000000000;0.6;0.1").unwrap();
        assert_eq!(increments.len(), 1);
        assert_eq!(increments[0].filter_ids, vec!["fltr1", "fltr2"]);
        assert_eq!(increments[0].fixed_fee, Some(dec!(0.6)));
        assert_eq!(increments[0].recurrent_fee, Some(dec!(0.1)));

        let open = parse_cost_increments(";1;;0").unwrap();
        assert_eq!(open[0].fixed_fee, None);
        assert!(parse_cost_increments("a;1;2").is_err());
    }

    #[test]
    fn test_parse_unit_factors() {
        let factors = parse_unit_factors(";10;;100").unwrap();
        assert_eq!(factors[1].factor, dec!(100));
        assert!(parse_unit_factors("fltr;").is_err());
    }

    #[test]
    fn test_check_numbers() {
        let mut balance = Balance::new_abstract("AB", dec!(10));
        balance.unit_factors.push(UnitFactor {
            filter_ids: vec![],
            factor: dec!(0),
        });
        assert!(balance.check_numbers().is_err());

        balance.unit_factors.clear();
        balance.cost_increments.push(CostIncrement {
            increment: Some(dec!(1)),
            recurrent_fee: Some(dec!(-0.1)),
            ..Default::default()
        });
        assert!(balance.check_numbers().is_err());
    }

    #[test]
    fn test_referenced_filters() {
        let mut balance = Balance::new_abstract("AB", dec!(10));
        balance.filter_ids = vec!["FLTR_A".to_string()];
        balance.weights = vec![DynamicWeight::with_filters(&["FLTR_B"], 10.0)];
        assert_eq!(balance.referenced_filter_ids(), vec!["FLTR_A", "FLTR_B"]);
    }
}

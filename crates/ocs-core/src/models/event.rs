//! Charging event
//!
//! The request side of every charging call: a flat map of event fields
//! (`~*req.*`) and a map of processing options (`~*opts.*`).

use crate::error::AppError;
use crate::models::units::decimal_from_value;
use crate::AppResult;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use validator::Validate;

/// Option carrying the usage to charge, takes precedence over `*usage`
pub const OPT_ACCOUNT_USAGE: &str = "*acntUsage";

/// Generic usage option
pub const OPT_USAGE: &str = "*usage";

/// Option restricting the candidate accounts
pub const OPT_ACCOUNT_IDS: &str = "*acntProfileIDs";

/// Option skipping the filters of accounts named by `*acntProfileIDs`
pub const OPT_PROFILE_IGNORE_FILTERS: &str = "*profileIgnoreFilters";

/// Event field carrying the usage when no option is set
pub const FIELD_USAGE: &str = "Usage";

const REQ_PREFIX: &str = "*req.";
const OPTS_PREFIX: &str = "*opts.";

/// An event submitted for charging
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, Default)]
pub struct ChargingEvent {
    #[serde(default)]
    pub tenant: String,

    #[validate(length(min = 1, message = "event id must not be empty"))]
    pub id: String,

    #[serde(default)]
    pub event: HashMap<String, Value>,

    #[serde(default)]
    pub opts: HashMap<String, Value>,
}

impl ChargingEvent {
    pub fn new(tenant: &str, id: &str) -> Self {
        Self {
            tenant: tenant.to_string(),
            id: id.to_string(),
            event: HashMap::new(),
            opts: HashMap::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.event.insert(key.to_string(), value.into());
        self
    }

    pub fn with_opt(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.opts.insert(key.to_string(), value.into());
        self
    }

    /// The usage to charge, from `*acntUsage`, `*usage` or the `Usage` field
    pub fn usage(&self) -> AppResult<Decimal> {
        let raw = self
            .opts
            .get(OPT_ACCOUNT_USAGE)
            .or_else(|| self.opts.get(OPT_USAGE))
            .or_else(|| self.event.get(FIELD_USAGE))
            .filter(|v| !v.is_null())
            .ok_or_else(|| AppError::MissingField(FIELD_USAGE.to_string()))?;
        let usage = decimal_from_value(raw)?;
        if usage.is_sign_negative() && !usage.is_zero() {
            return Err(AppError::InvalidInput(format!("negative usage: {}", usage)));
        }
        Ok(usage)
    }

    /// Candidate account IDs named by `*acntProfileIDs`, if any
    pub fn account_ids(&self) -> AppResult<Option<Vec<String>>> {
        let ids: Vec<String> = match self.opts.get(OPT_ACCOUNT_IDS) {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::String(s)) => s
                .split(|c| c == ';' || c == ',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.trim().to_string()),
                    other => Err(AppError::InvalidInput(format!(
                        "invalid account id in {}: {}",
                        OPT_ACCOUNT_IDS, other
                    ))),
                })
                .collect::<AppResult<_>>()?,
            Some(other) => {
                return Err(AppError::InvalidInput(format!(
                    "invalid {} value: {}",
                    OPT_ACCOUNT_IDS, other
                )))
            }
        };
        if ids.is_empty() {
            return Err(AppError::MissingField(OPT_ACCOUNT_IDS.to_string()));
        }
        Ok(Some(ids))
    }

    /// Whether `*profileIgnoreFilters` is set
    ///
    /// Accepts a JSON bool or its string form, absent means `false`.
    pub fn ignore_profile_filters(&self) -> AppResult<bool> {
        match self.opts.get(OPT_PROFILE_IGNORE_FILTERS) {
            None | Some(Value::Null) => Ok(false),
            Some(Value::Bool(flag)) => Ok(*flag),
            Some(Value::String(s)) => s.trim().parse::<bool>().map_err(|_| {
                AppError::InvalidInput(format!(
                    "invalid {} value: {}",
                    OPT_PROFILE_IGNORE_FILTERS, s
                ))
            }),
            Some(other) => Err(AppError::InvalidInput(format!(
                "invalid {} value: {}",
                OPT_PROFILE_IGNORE_FILTERS, other
            ))),
        }
    }

    /// Resolves a field path such as `~*req.Account` or `~*opts.*usage`
    pub fn field(&self, path: &str) -> Option<&Value> {
        let path = path.strip_prefix('~').unwrap_or(path);
        if let Some(key) = path.strip_prefix(REQ_PREFIX) {
            self.event.get(key)
        } else if let Some(key) = path.strip_prefix(OPTS_PREFIX) {
            self.opts.get(key)
        } else {
            None
        }
    }

    /// Resolves a field path to its string form
    pub fn field_as_string(&self, path: &str) -> Option<String> {
        self.field(path).and_then(|value| match value {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::units::seconds;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_usage_precedence() {
        let ev = ChargingEvent::new("cgrates.org", "ev1")
            .with_field(FIELD_USAGE, "1m")
            .with_opt(OPT_USAGE, "30s")
            .with_opt(OPT_ACCOUNT_USAGE, "27s");
        assert_eq!(ev.usage().unwrap(), seconds(27));

        let ev = ChargingEvent::new("cgrates.org", "ev1").with_field(FIELD_USAGE, 1024);
        assert_eq!(ev.usage().unwrap(), dec!(1024));
    }

    #[test]
    fn test_missing_usage() {
        let ev = ChargingEvent::new("cgrates.org", "ev1");
        assert_eq!(
            ev.usage().unwrap_err(),
            AppError::MissingField("Usage".to_string())
        );
    }

    #[test]
    fn test_account_ids() {
        let ev = ChargingEvent::new("cgrates.org", "ev1").with_opt(OPT_ACCOUNT_IDS, "1001;1002");
        assert_eq!(
            ev.account_ids().unwrap(),
            Some(vec!["1001".to_string(), "1002".to_string()])
        );

        let ev = ChargingEvent::new("cgrates.org", "ev1")
            .with_opt(OPT_ACCOUNT_IDS, json!(["1001"]));
        assert_eq!(ev.account_ids().unwrap(), Some(vec!["1001".to_string()]));

        let ev = ChargingEvent::new("cgrates.org", "ev1").with_opt(OPT_ACCOUNT_IDS, "");
        assert!(matches!(ev.account_ids(), Err(AppError::MissingField(_))));

        assert_eq!(
            ChargingEvent::new("cgrates.org", "ev1").account_ids().unwrap(),
            None
        );
    }

    #[test]
    fn test_ignore_profile_filters() {
        let ev = ChargingEvent::new("cgrates.org", "ev1");
        assert!(!ev.ignore_profile_filters().unwrap());

        let ev = ev.with_opt(OPT_PROFILE_IGNORE_FILTERS, true);
        assert!(ev.ignore_profile_filters().unwrap());

        let ev = ChargingEvent::new("cgrates.org", "ev1")
            .with_opt(OPT_PROFILE_IGNORE_FILTERS, "false");
        assert!(!ev.ignore_profile_filters().unwrap());

        let ev = ChargingEvent::new("cgrates.org", "ev1").with_opt(OPT_PROFILE_IGNORE_FILTERS, 1);
        assert!(matches!(
            ev.ignore_profile_filters(),
            Err(AppError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_field_paths() {
        let ev = ChargingEvent::new("cgrates.org", "ev1")
            .with_field("Account", "1001")
            .with_field("Cost", 12)
            .with_opt(OPT_USAGE, "10s");
        assert_eq!(ev.field_as_string("~*req.Account").as_deref(), Some("1001"));
        assert_eq!(ev.field_as_string("~*req.Cost").as_deref(), Some("12"));
        assert_eq!(ev.field_as_string("~*opts.*usage").as_deref(), Some("10s"));
        assert!(ev.field("~*req.Missing").is_none());
        assert!(ev.field("~*vars.Account").is_none());
    }
}

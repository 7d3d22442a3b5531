//! Filter predicate evaluator
//!
//! Filters are referenced by ID. An ID is either an inline rule of the form
//! `<type>:<element>:<value1|value2>` or the ID of a [`Filter`] registered
//! on the evaluator for the tenant. A filter passes when all its rules
//! pass; a rule passes when any of its values matches.

use ocs_core::error::AppError;
use ocs_core::models::{decimal_from_value, parse_usage, tenant_id, ChargingEvent};
use ocs_core::traits::FilterEvaluator;
use ocs_core::AppResult;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Supported rule types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleKind {
    #[serde(rename = "*string")]
    String,
    #[serde(rename = "*notstring")]
    NotString,
    #[serde(rename = "*prefix")]
    Prefix,
    #[serde(rename = "*suffix")]
    Suffix,
    #[serde(rename = "*exists")]
    Exists,
    #[serde(rename = "*notexists")]
    NotExists,
    #[serde(rename = "*gt")]
    Gt,
    #[serde(rename = "*gte")]
    Gte,
    #[serde(rename = "*lt")]
    Lt,
    #[serde(rename = "*lte")]
    Lte,
}

impl FromStr for RuleKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "*string" => RuleKind::String,
            "*notstring" => RuleKind::NotString,
            "*prefix" => RuleKind::Prefix,
            "*suffix" => RuleKind::Suffix,
            "*exists" => RuleKind::Exists,
            "*notexists" => RuleKind::NotExists,
            "*gt" => RuleKind::Gt,
            "*gte" => RuleKind::Gte,
            "*lt" => RuleKind::Lt,
            "*lte" => RuleKind::Lte,
            other => {
                return Err(AppError::FilterParse(format!(
                    "unsupported filter type: {}",
                    other
                )))
            }
        })
    }
}

/// One condition on an event field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterRule {
    #[serde(rename = "type")]
    pub kind: RuleKind,
    pub element: String,
    #[serde(default)]
    pub values: Vec<String>,
}

impl FilterRule {
    /// Parses an inline rule such as `*string:~*req.Account:1001|1002`
    pub fn parse(inline: &str) -> AppResult<Self> {
        let mut parts = inline.splitn(3, ':');
        let (Some(kind), Some(element), Some(values)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(AppError::FilterParse(format!(
                "inline filter needs type, element and values: {}",
                inline
            )));
        };
        let kind = kind.parse::<RuleKind>()?;
        if !element.starts_with("~*req.") && !element.starts_with("~*opts.") {
            return Err(AppError::FilterParse(format!(
                "unsupported filter element: {}",
                element
            )));
        }
        let values: Vec<String> = values
            .split('|')
            .filter(|v| !v.is_empty())
            .map(String::from)
            .collect();
        let needs_values = !matches!(kind, RuleKind::Exists | RuleKind::NotExists);
        if needs_values && values.is_empty() {
            return Err(AppError::FilterParse(format!(
                "filter needs at least one value: {}",
                inline
            )));
        }
        Ok(Self {
            kind,
            element: element.to_string(),
            values,
        })
    }

    pub fn passes(&self, event: &ChargingEvent) -> bool {
        match self.kind {
            RuleKind::String => self.string_match(event),
            RuleKind::NotString => !self.string_match(event),
            RuleKind::Prefix => event
                .field_as_string(&self.element)
                .is_some_and(|field| self.values.iter().any(|v| field.starts_with(v.as_str()))),
            RuleKind::Suffix => event
                .field_as_string(&self.element)
                .is_some_and(|field| self.values.iter().any(|v| field.ends_with(v.as_str()))),
            RuleKind::Exists => self.exists(event),
            RuleKind::NotExists => !self.exists(event),
            RuleKind::Gt => self.compare(event, |field, value| field > value),
            RuleKind::Gte => self.compare(event, |field, value| field >= value),
            RuleKind::Lt => self.compare(event, |field, value| field < value),
            RuleKind::Lte => self.compare(event, |field, value| field <= value),
        }
    }

    fn string_match(&self, event: &ChargingEvent) -> bool {
        event
            .field_as_string(&self.element)
            .is_some_and(|field| self.values.iter().any(|v| *v == field))
    }

    fn exists(&self, event: &ChargingEvent) -> bool {
        event.field(&self.element).is_some_and(|v| !v.is_null())
    }

    fn compare(&self, event: &ChargingEvent, op: impl Fn(Decimal, Decimal) -> bool) -> bool {
        let Some(field) = event
            .field(&self.element)
            .and_then(|v| decimal_from_value(v).ok())
        else {
            return false;
        };
        self.values.iter().any(|v| {
            Decimal::from_str(v)
                .ok()
                .or_else(|| parse_usage(v).ok())
                .is_some_and(|value| op(field, value))
        })
    }
}

/// A named set of rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub tenant: String,
    pub id: String,
    pub rules: Vec<FilterRule>,
}

fn is_inline(filter_id: &str) -> bool {
    filter_id.starts_with('*') && filter_id.matches(':').count() >= 2
}

/// Default filter evaluator with an in-memory registry of named filters
#[derive(Default)]
pub struct FilterS {
    filters: RwLock<HashMap<String, Arc<Filter>>>,
}

impl FilterS {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces a named filter after checking its rules
    pub fn set_filter(&self, filter: Filter) -> AppResult<()> {
        if filter.id.is_empty() || filter.tenant.is_empty() {
            return Err(AppError::MissingField("filter tenant/id".to_string()));
        }
        if filter.rules.is_empty() {
            return Err(AppError::FilterParse(format!(
                "filter {} has no rules",
                filter.id
            )));
        }
        debug!("Registering filter {}:{}", filter.tenant, filter.id);
        self.filters
            .write()
            .insert(tenant_id(&filter.tenant, &filter.id), Arc::new(filter));
        Ok(())
    }

    pub fn remove_filter(&self, tenant: &str, id: &str) -> bool {
        self.filters.write().remove(&tenant_id(tenant, id)).is_some()
    }

    pub fn get_filter(&self, tenant: &str, id: &str) -> Option<Arc<Filter>> {
        self.filters.read().get(&tenant_id(tenant, id)).cloned()
    }

    fn resolve(&self, tenant: &str, filter_id: &str) -> AppResult<Vec<FilterRule>> {
        if is_inline(filter_id) {
            return Ok(vec![FilterRule::parse(filter_id)?]);
        }
        self.get_filter(tenant, filter_id)
            .map(|f| f.rules.clone())
            .ok_or_else(|| AppError::NotFound(format!("filter {}:{}", tenant, filter_id)))
    }
}

impl FilterEvaluator for FilterS {
    fn pass(&self, tenant: &str, filter_ids: &[String], event: &ChargingEvent) -> AppResult<bool> {
        for filter_id in filter_ids {
            let rules = self.resolve(tenant, filter_id)?;
            if !rules.iter().all(|rule| rule.passes(event)) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn check_references(&self, tenant: &str, filter_ids: &[&str]) -> AppResult<()> {
        for filter_id in filter_ids {
            match self.resolve(tenant, filter_id) {
                Ok(_) => {}
                Err(AppError::NotFound(_)) => {
                    warn!("Broken filter reference {} for tenant {}", filter_id, tenant);
                    return Err(AppError::BrokenReference(format!(
                        "filter {}:{}",
                        tenant, filter_id
                    )));
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

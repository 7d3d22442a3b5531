//! Dynamic weights and blockers
//!
//! Both are ordered lists of `(filter_ids, value)` entries. The first entry
//! whose filters all pass for an event supplies the value; an entry without
//! filters always matches.
//!
//! Text form, as used by balance diktats:
//! - weights: `fltrA&fltrB;20;;10` (filters joined by `&`, pairs split by `;`)
//! - blockers: `fltrA;true;;false`

use crate::error::AppError;
use crate::AppResult;
use serde::{Deserialize, Serialize};

/// A weight guarded by filters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DynamicWeight {
    #[serde(default)]
    pub filter_ids: Vec<String>,
    pub weight: f64,
}

impl DynamicWeight {
    pub fn new(weight: f64) -> Self {
        Self {
            filter_ids: Vec::new(),
            weight,
        }
    }

    pub fn with_filters(filter_ids: &[&str], weight: f64) -> Self {
        Self {
            filter_ids: filter_ids.iter().map(|f| f.to_string()).collect(),
            weight,
        }
    }
}

/// A blocker flag guarded by filters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DynamicBlocker {
    #[serde(default)]
    pub filter_ids: Vec<String>,
    pub blocker: bool,
}

impl DynamicBlocker {
    pub fn new(blocker: bool) -> Self {
        Self {
            filter_ids: Vec::new(),
            blocker,
        }
    }

    pub fn with_filters(filter_ids: &[&str], blocker: bool) -> Self {
        Self {
            filter_ids: filter_ids.iter().map(|f| f.to_string()).collect(),
            blocker,
        }
    }
}

/// Entries usable by the first-match resolver
pub trait DynamicEntry {
    type Value: Copy;

    fn filter_ids(&self) -> &[String];
    fn value(&self) -> Self::Value;
}

impl DynamicEntry for DynamicWeight {
    type Value = f64;

    fn filter_ids(&self) -> &[String] {
        &self.filter_ids
    }

    fn value(&self) -> f64 {
        self.weight
    }
}

impl DynamicEntry for DynamicBlocker {
    type Value = bool;

    fn filter_ids(&self) -> &[String] {
        &self.filter_ids
    }

    fn value(&self) -> bool {
        self.blocker
    }
}

fn split_pairs(input: &str, what: &str) -> AppResult<Vec<(Vec<String>, String)>> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(Vec::new());
    }
    let parts: Vec<&str> = input.split(';').collect();
    if parts.len() % 2 != 0 {
        return Err(AppError::InvalidInput(format!(
            "invalid {} format: {}",
            what, input
        )));
    }
    Ok(parts
        .chunks(2)
        .map(|pair| {
            let filters = pair[0]
                .split('&')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(String::from)
                .collect();
            (filters, pair[1].trim().to_string())
        })
        .collect())
}

/// Parses `fltr1&fltr2;10;;5` into dynamic weights
pub fn parse_dynamic_weights(input: &str) -> AppResult<Vec<DynamicWeight>> {
    split_pairs(input, "weights")?
        .into_iter()
        .map(|(filter_ids, value)| {
            let weight = value.parse::<f64>().map_err(|_| {
                AppError::InvalidInput(format!("invalid weight value: {}", value))
            })?;
            Ok(DynamicWeight { filter_ids, weight })
        })
        .collect()
}

/// Parses `fltr1;true;;false` into dynamic blockers
pub fn parse_dynamic_blockers(input: &str) -> AppResult<Vec<DynamicBlocker>> {
    split_pairs(input, "blockers")?
        .into_iter()
        .map(|(filter_ids, value)| {
            let blocker = value.parse::<bool>().map_err(|_| {
                AppError::InvalidInput(format!("invalid blocker value: {}", value))
            })?;
            Ok(DynamicBlocker {
                filter_ids,
                blocker,
            })
        })
        .collect()
}

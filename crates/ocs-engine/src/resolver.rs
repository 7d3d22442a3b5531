//! Dynamic weight and blocker resolution
//!
//! First matching entry wins. Entries without filters always match.

use ocs_core::models::{ChargingEvent, DynamicBlocker, DynamicEntry, DynamicWeight};
use ocs_core::traits::FilterEvaluator;
use ocs_core::AppResult;

/// Value of the first entry whose filters pass, `None` when none does
pub fn resolve<E: DynamicEntry>(
    entries: &[E],
    filters: &dyn FilterEvaluator,
    tenant: &str,
    event: &ChargingEvent,
) -> AppResult<Option<E::Value>> {
    for entry in entries {
        if entry.filter_ids().is_empty() || filters.pass(tenant, entry.filter_ids(), event)? {
            return Ok(Some(entry.value()));
        }
    }
    Ok(None)
}

/// Effective weight of an entity
///
/// An empty list weighs zero. A non-empty list with no matching entry
/// yields `None` and the entity is left out of ordering.
pub fn resolve_weight(
    weights: &[DynamicWeight],
    filters: &dyn FilterEvaluator,
    tenant: &str,
    event: &ChargingEvent,
) -> AppResult<Option<f64>> {
    if weights.is_empty() {
        return Ok(Some(0.0));
    }
    resolve(weights, filters, tenant, event)
}

/// Effective blocker of an entity, `false` when nothing matches
pub fn resolve_blocker(
    blockers: &[DynamicBlocker],
    filters: &dyn FilterEvaluator,
    tenant: &str,
    event: &ChargingEvent,
) -> AppResult<bool> {
    Ok(resolve(blockers, filters, tenant, event)?.unwrap_or(false))
}

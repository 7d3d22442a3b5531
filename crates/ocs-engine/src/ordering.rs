//! Weight ordering of accounts and balances
//!
//! Entities whose filters fail, or whose weights resolve to nothing, are
//! dropped. The rest are sorted by weight, highest first, ties broken by
//! ID so the order is reproducible.

use crate::resolver::resolve_weight;
use ocs_core::models::{Account, Balance, ChargingEvent};
use ocs_core::traits::FilterEvaluator;
use ocs_core::AppResult;
use std::cmp::Ordering;
use tracing::trace;

fn by_weight_then_id(a: (&f64, &str), b: (&f64, &str)) -> Ordering {
    b.0.total_cmp(a.0).then_with(|| a.1.cmp(b.1))
}

/// Eligible accounts in processing order, paired with their weight
///
/// With `*profileIgnoreFilters` set, accounts named by `*acntProfileIDs`
/// skip their own filters. Weights are still resolved.
pub fn order_accounts(
    accounts: Vec<Account>,
    filters: &dyn FilterEvaluator,
    event: &ChargingEvent,
) -> AppResult<Vec<(Account, f64)>> {
    let ignore_filters = event.ignore_profile_filters()? && event.account_ids()?.is_some();
    let mut ordered = Vec::with_capacity(accounts.len());
    for account in accounts {
        if !ignore_filters && !filters.pass(&account.tenant, &account.filter_ids, event)? {
            trace!("Account {} filtered out", account.id);
            continue;
        }
        match resolve_weight(&account.weights, filters, &account.tenant, event)? {
            Some(weight) => ordered.push((account, weight)),
            None => trace!("Account {} has no matching weight", account.id),
        }
    }
    ordered.sort_by(|(a, wa), (b, wb)| by_weight_then_id((wa, a.id.as_str()), (wb, b.id.as_str())));
    Ok(ordered)
}

/// Eligible balances of an account in processing order
pub fn order_balances<'a>(
    account: &'a Account,
    filters: &dyn FilterEvaluator,
    event: &ChargingEvent,
) -> AppResult<Vec<(&'a Balance, f64)>> {
    let mut ordered = Vec::with_capacity(account.balances.len());
    for balance in account.balances.values() {
        if !filters.pass(&account.tenant, &balance.filter_ids, event)? {
            continue;
        }
        if let Some(weight) = resolve_weight(&balance.weights, filters, &account.tenant, event)? {
            ordered.push((balance, weight));
        }
    }
    ordered.sort_by(|(a, wa), (b, wb)| by_weight_then_id((wa, a.id.as_str()), (wb, b.id.as_str())));
    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::FilterS;
    use ocs_core::models::{DynamicWeight, OPT_ACCOUNT_IDS, OPT_PROFILE_IGNORE_FILTERS};
    use rust_decimal_macros::dec;

    fn weighted_balance(id: &str, weight: f64) -> Balance {
        let mut balance = Balance::new_abstract(id, dec!(10));
        balance.weights = vec![DynamicWeight::new(weight)];
        balance
    }

    fn ids(ordered: &[(&Balance, f64)]) -> Vec<String> {
        ordered.iter().map(|(b, _)| b.id.clone()).collect()
    }

    #[test]
    fn test_balances_descending_with_id_tiebreak() {
        let account = Account::new("cgrates.org", "1001")
            .with_balance(weighted_balance("B", 10.0))
            .with_balance(weighted_balance("A", 10.0))
            .with_balance(weighted_balance("C", 30.0))
            .with_balance(Balance::new_concrete("D", dec!(1)));
        let filters = FilterS::new();
        let event = ChargingEvent::new("cgrates.org", "ev");

        let ordered = order_balances(&account, &filters, &event).unwrap();
        assert_eq!(ids(&ordered), vec!["C", "A", "B", "D"]);
        assert_eq!(ordered[3].1, 0.0);
    }

    #[test]
    fn test_non_matching_balances_excluded() {
        let mut hidden = weighted_balance("HIDDEN", 100.0);
        hidden.filter_ids = vec!["*string:~*req.ToR:*data".to_string()];
        let mut unweighted = Balance::new_abstract("NOWEIGHT", dec!(1));
        unweighted.weights = vec![DynamicWeight::with_filters(
            &["*string:~*req.ToR:*data"],
            50.0,
        )];
        let account = Account::new("cgrates.org", "1001")
            .with_balance(hidden)
            .with_balance(unweighted)
            .with_balance(weighted_balance("VISIBLE", 1.0));
        let filters = FilterS::new();
        let event = ChargingEvent::new("cgrates.org", "ev").with_field("ToR", "*voice");

        let ordered = order_balances(&account, &filters, &event).unwrap();
        assert_eq!(ids(&ordered), vec!["VISIBLE"]);
    }

    #[test]
    fn test_accounts_ordering() {
        let mut low = Account::new("cgrates.org", "1001");
        low.weights = vec![DynamicWeight::new(5.0)];
        let mut high = Account::new("cgrates.org", "1002");
        high.weights = vec![DynamicWeight::new(15.0)];
        let mut other = Account::new("cgrates.org", "1003");
        other.filter_ids = vec!["*string:~*req.Account:1003".to_string()];

        let filters = FilterS::new();
        let event = ChargingEvent::new("cgrates.org", "ev").with_field("Account", "1001");
        let ordered = order_accounts(vec![low, other, high], &filters, &event).unwrap();
        let ids: Vec<&str> = ordered.iter().map(|(a, _)| a.id.as_str()).collect();
        assert_eq!(ids, vec!["1002", "1001"]);
    }

    #[test]
    fn test_profile_ignore_filters() {
        let mut account = Account::new("cgrates.org", "AC1");
        account.filter_ids = vec!["*string:~*req.Account:1004".to_string()];
        let filters = FilterS::new();

        let event = ChargingEvent::new("cgrates.org", "ev")
            .with_field("Account", "1003")
            .with_opt(OPT_ACCOUNT_IDS, "AC1");
        let ordered = order_accounts(vec![account.clone()], &filters, &event).unwrap();
        assert!(ordered.is_empty());

        let event = event.with_opt(OPT_PROFILE_IGNORE_FILTERS, true);
        let ordered = order_accounts(vec![account.clone()], &filters, &event).unwrap();
        assert_eq!(ordered.len(), 1);
        assert_eq!(ordered[0].0.id, "AC1");

        // Only accounts named explicitly skip their filters
        let event = ChargingEvent::new("cgrates.org", "ev")
            .with_field("Account", "1003")
            .with_opt(OPT_PROFILE_IGNORE_FILTERS, true);
        let ordered = order_accounts(vec![account], &filters, &event).unwrap();
        assert!(ordered.is_empty());
    }
}

//! Balance selection and debit
//!
//! One [`Debitor`] serves one charging call. It walks accounts and their
//! balances in weight order, honours blockers after each processed entity,
//! mutates the in-memory account copies and records every debit in an
//! [`EventCharges`] ledger. Persisting the copies is left to the caller.

use crate::constants::DEFAULT_UNIT_FACTOR;
use crate::context::CallContext;
use crate::ordering::{order_accounts, order_balances};
use crate::pricing::Pricing;
use crate::resolver::resolve_blocker;
use ocs_core::error::AppError;
use ocs_core::models::{
    mul_checked, Account, AccountCharge, Balance, BalanceLimit, BalanceType, ChargingEvent,
    EventCharges, UnitFactor,
};
use ocs_core::traits::{FilterEvaluator, RatingEngine};
use ocs_core::AppResult;
use rust_decimal::Decimal;
use tracing::{debug, trace, warn};

/// What a charging call consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeKind {
    /// Usage, covered by abstract balances (and concretes paying per usage)
    Abstracts,
    /// A monetary amount, taken from concrete balances
    Concretes,
}

pub struct Debitor<'a> {
    filters: &'a dyn FilterEvaluator,
    rating: &'a dyn RatingEngine,
    ctx: &'a CallContext,
    event: &'a ChargingEvent,
}

impl<'a> Debitor<'a> {
    pub fn new(
        filters: &'a dyn FilterEvaluator,
        rating: &'a dyn RatingEngine,
        ctx: &'a CallContext,
        event: &'a ChargingEvent,
    ) -> Self {
        Self {
            filters,
            rating,
            ctx,
            event,
        }
    }

    /// Charges `amount` across the candidate accounts
    ///
    /// Coverage may be partial. Fails with `NotFound` when no candidate is
    /// eligible for the event.
    pub async fn charge(
        &self,
        accounts: Vec<Account>,
        kind: ChargeKind,
        amount: Decimal,
    ) -> AppResult<EventCharges> {
        let ordered = order_accounts(accounts, self.filters, self.event)?;
        if ordered.is_empty() {
            return Err(AppError::NotFound(format!(
                "no account matches event {}",
                self.event.id
            )));
        }

        let mut ec = EventCharges::new();
        let mut remaining = amount;
        for (mut account, weight) in ordered {
            if remaining <= Decimal::ZERO {
                break;
            }
            debug!(
                "Charging account {} (weight {}) for {} {:?}",
                account.id, weight, remaining, kind
            );
            let covered = match kind {
                ChargeKind::Abstracts => {
                    self.debit_abstracts(&mut account, remaining, &mut ec)
                        .await?
                }
                ChargeKind::Concretes => self.debit_concretes(&mut account, remaining, &mut ec)?,
            };
            remaining -= covered;

            let blocker = resolve_blocker(&account.blockers, self.filters, &account.tenant, self.event)?;
            ec.accounts.insert(account.id.clone(), account);
            if blocker {
                debug!("Account blocker stops processing after {}", covered);
                break;
            }
        }
        Ok(ec)
    }

    async fn debit_abstracts(
        &self,
        account: &mut Account,
        need: Decimal,
        ec: &mut EventCharges,
    ) -> AppResult<Decimal> {
        let order: Vec<(String, BalanceType)> = order_balances(account, self.filters, self.event)?
            .into_iter()
            .map(|(b, _)| (b.id.clone(), b.balance_type))
            .collect();

        let mut remaining = need;
        for (balance_id, balance_type) in order {
            if remaining <= Decimal::ZERO {
                break;
            }
            let covered = match balance_type {
                BalanceType::Abstract => {
                    self.debit_abstract_balance(account, &balance_id, remaining, ec)
                        .await?
                }
                BalanceType::Concrete => {
                    self.debit_concrete_usage(account, &balance_id, remaining, ec)
                        .await?
                }
            };
            remaining -= covered;
            if self.balance_blocks(account, &balance_id)? {
                debug!("Balance {} blocks the rest of account {}", balance_id, account.id);
                break;
            }
        }
        Ok(need - remaining)
    }

    fn debit_concretes(
        &self,
        account: &mut Account,
        amount: Decimal,
        ec: &mut EventCharges,
    ) -> AppResult<Decimal> {
        let order: Vec<String> = order_balances(account, self.filters, self.event)?
            .into_iter()
            .filter(|(b, _)| !b.is_abstract())
            .map(|(b, _)| b.id.clone())
            .collect();

        let mut remaining = amount;
        for balance_id in order {
            if remaining <= Decimal::ZERO {
                break;
            }
            let balance = account.balance(&balance_id)?;
            let limit = balance.limit()?;
            let uf = self.unit_factor(account, balance)?;
            let factor = uf.as_ref().map_or(DEFAULT_UNIT_FACTOR, |u| u.factor);

            if let Some((money, native)) = take_money(limit, balance.units, factor, remaining)? {
                account.balance_mut(&balance_id)?.units -= native;
                let unit_factor_id = uf.map(|u| ec.unit_factor_id(&u));
                ec.record_charge(AccountCharge {
                    account_id: account.id.clone(),
                    balance_id: balance_id.clone(),
                    units: native,
                    balance_limit: limit.floor(),
                    unit_factor_id,
                    attribute_ids: account.balance(&balance_id)?.attribute_ids.clone(),
                    rating_id: None,
                    joined_charge_ids: Vec::new(),
                });
                ec.concretes += money;
                remaining -= money;
            }
            if self.balance_blocks(account, &balance_id)? {
                break;
            }
        }
        Ok(amount - remaining)
    }

    /// Covers usage from an abstract balance, its cost paid by concretes
    async fn debit_abstract_balance(
        &self,
        account: &mut Account,
        balance_id: &str,
        need: Decimal,
        ec: &mut EventCharges,
    ) -> AppResult<Decimal> {
        let balance = account.balance(balance_id)?.clone();
        let limit = balance.limit()?;
        let uf = self.unit_factor(account, &balance)?;
        let factor = uf.as_ref().map_or(DEFAULT_UNIT_FACTOR, |u| u.factor);

        let available = limit.available(balance.units).unwrap_or(balance.units);
        if available <= Decimal::ZERO {
            trace!("Abstract balance {} is empty", balance_id);
            return Ok(Decimal::ZERO);
        }
        let by_units = available / factor;
        let mut usage = need.min(by_units);

        let Some(pricing) = self.pricing(account, &balance, usage).await? else {
            debug!("No pricing for abstract balance {}, skipping", balance_id);
            return Ok(Decimal::ZERO);
        };

        let mut cost = pricing.cost(usage)?;
        let mut payments = Vec::new();
        if cost > Decimal::ZERO {
            let payers = self.payers(account)?;
            if let Some(budget) = self.budget(account, &payers)? {
                if cost > budget {
                    usage = pricing.max_usage(budget, usage)?;
                    cost = pricing.cost(usage)?;
                }
            }
            if usage <= Decimal::ZERO {
                debug!("Concretes of {} cannot pay for {}", account.id, balance_id);
                return Ok(Decimal::ZERO);
            }
            let (paid, charges) = self.pay(account, &payers, cost, ec)?;
            if paid < cost {
                warn!(
                    "Concretes of {} paid {} of {} for balance {}",
                    account.id, paid, cost, balance_id
                );
            }
            cost = paid;
            payments = charges;
        }

        let native = if usage == by_units {
            available
        } else {
            mul_checked(usage, factor)?
        };
        account.balance_mut(balance_id)?.units -= native;

        let unit_factor_id = uf.map(|u| ec.unit_factor_id(&u));
        let rating_id = pricing.record(ec, usage);
        let joined_charge_ids = payments
            .into_iter()
            .map(|payment| ec.account_charge_id(payment))
            .collect();
        ec.record_charge(AccountCharge {
            account_id: account.id.clone(),
            balance_id: balance_id.to_string(),
            units: native,
            balance_limit: limit.floor(),
            unit_factor_id,
            attribute_ids: balance.attribute_ids.clone(),
            rating_id: Some(rating_id),
            joined_charge_ids,
        });
        ec.abstracts += usage;
        ec.concretes += cost;
        debug!(
            "Abstract balance {} covered {} for {}, {} native units",
            balance_id, usage, cost, native
        );
        Ok(usage)
    }

    /// Covers usage from a concrete balance paying for itself
    async fn debit_concrete_usage(
        &self,
        account: &mut Account,
        balance_id: &str,
        need: Decimal,
        ec: &mut EventCharges,
    ) -> AppResult<Decimal> {
        let balance = account.balance(balance_id)?.clone();
        let limit = balance.limit()?;
        let uf = self.unit_factor(account, &balance)?;
        let factor = uf.as_ref().map_or(DEFAULT_UNIT_FACTOR, |u| u.factor);

        let Some(pricing) = self.pricing(account, &balance, need).await? else {
            debug!("No pricing for concrete balance {}, skipping", balance_id);
            return Ok(Decimal::ZERO);
        };

        let (usage, cost, native) = match limit.available(balance.units) {
            None => {
                let cost = pricing.cost(need)?;
                (need, cost, mul_checked(cost, factor)?)
            }
            Some(available) => {
                let capacity = available / factor;
                let usage = pricing.max_usage(capacity, need)?;
                let cost = pricing.cost(usage)?;
                let native = if cost >= capacity {
                    available
                } else {
                    mul_checked(cost, factor)?
                };
                (usage, cost, native)
            }
        };
        if usage <= Decimal::ZERO {
            return Ok(Decimal::ZERO);
        }
        account.balance_mut(balance_id)?.units -= native;

        let unit_factor_id = uf.map(|u| ec.unit_factor_id(&u));
        let rating_id = pricing.record(ec, usage);
        ec.record_charge(AccountCharge {
            account_id: account.id.clone(),
            balance_id: balance_id.to_string(),
            units: native,
            balance_limit: limit.floor(),
            unit_factor_id,
            attribute_ids: balance.attribute_ids.clone(),
            rating_id: Some(rating_id),
            joined_charge_ids: Vec::new(),
        });
        ec.abstracts += usage;
        ec.concretes += cost;
        Ok(usage)
    }

    /// Concrete balances able to pay for abstract costs, in order
    ///
    /// The list ends after the first concrete whose blocker is active.
    fn payers(&self, account: &Account) -> AppResult<Vec<String>> {
        let mut payers = Vec::new();
        for (balance, _) in order_balances(account, self.filters, self.event)? {
            if balance.is_abstract() {
                continue;
            }
            payers.push(balance.id.clone());
            if resolve_blocker(&balance.blockers, self.filters, &account.tenant, self.event)? {
                break;
            }
        }
        Ok(payers)
    }

    /// Money the payers can spend, `None` when one of them is unlimited
    fn budget(&self, account: &Account, payers: &[String]) -> AppResult<Option<Decimal>> {
        let mut budget = Decimal::ZERO;
        for payer_id in payers {
            let payer = account.balance(payer_id)?;
            let factor = self
                .unit_factor(account, payer)?
                .map_or(DEFAULT_UNIT_FACTOR, |u| u.factor);
            match payer.limit()?.available(payer.units) {
                None => return Ok(None),
                Some(available) => budget += available / factor,
            }
        }
        Ok(Some(budget))
    }

    /// Takes `cost` from the payers in order, returns what was paid
    fn pay(
        &self,
        account: &mut Account,
        payers: &[String],
        cost: Decimal,
        ec: &mut EventCharges,
    ) -> AppResult<(Decimal, Vec<AccountCharge>)> {
        let mut left = cost;
        let mut charges = Vec::new();
        for payer_id in payers {
            if left <= Decimal::ZERO {
                break;
            }
            let payer = account.balance(payer_id)?;
            let limit = payer.limit()?;
            let uf = self.unit_factor(account, payer)?;
            let factor = uf.as_ref().map_or(DEFAULT_UNIT_FACTOR, |u| u.factor);
            let Some((money, native)) = take_money(limit, payer.units, factor, left)? else {
                continue;
            };
            let attribute_ids = payer.attribute_ids.clone();
            account.balance_mut(payer_id)?.units -= native;
            left -= money;
            charges.push(AccountCharge {
                account_id: account.id.clone(),
                balance_id: payer_id.clone(),
                units: native,
                balance_limit: limit.floor(),
                unit_factor_id: uf.map(|u| ec.unit_factor_id(&u)),
                attribute_ids,
                rating_id: None,
                joined_charge_ids: Vec::new(),
            });
        }
        Ok((cost - left, charges))
    }

    fn balance_blocks(&self, account: &Account, balance_id: &str) -> AppResult<bool> {
        let balance = account.balance(balance_id)?;
        resolve_blocker(&balance.blockers, self.filters, &account.tenant, self.event)
    }

    fn unit_factor(&self, account: &Account, balance: &Balance) -> AppResult<Option<UnitFactor>> {
        for uf in &balance.unit_factors {
            if uf.filter_ids.is_empty()
                || self.filters.pass(&account.tenant, &uf.filter_ids, self.event)?
            {
                return Ok(Some(uf.clone()));
            }
        }
        Ok(None)
    }

    /// First matching cost increment, else a rate from the rating engine
    async fn pricing(
        &self,
        account: &Account,
        balance: &Balance,
        usage: Decimal,
    ) -> AppResult<Option<Pricing>> {
        for ci in &balance.cost_increments {
            if ci.filter_ids.is_empty()
                || self.filters.pass(&account.tenant, &ci.filter_ids, self.event)?
            {
                return Ok(Some(Pricing::from(ci)));
            }
        }
        let rate = self
            .ctx
            .run(
                "rating",
                self.rating.interval_rate(
                    &account.tenant,
                    &balance.rate_profile_ids,
                    self.event,
                    usage,
                ),
            )
            .await
            .map_err(|err| match err {
                AppError::Rating(msg) => AppError::Rating(format!(
                    "account {} balance {}: {}",
                    account.id, balance.id, msg
                )),
                other => other,
            })?;
        Ok(rate.as_ref().map(Pricing::from))
    }
}

/// Money and native units a concrete balance gives towards `wanted`
///
/// A balance drained to its floor gives exactly its available units.
fn take_money(
    limit: BalanceLimit,
    units: Decimal,
    factor: Decimal,
    wanted: Decimal,
) -> AppResult<Option<(Decimal, Decimal)>> {
    match limit.available(units) {
        None => Ok(Some((wanted, mul_checked(wanted, factor)?))),
        Some(available) if available <= Decimal::ZERO => Ok(None),
        Some(available) => {
            let capacity = available / factor;
            if wanted >= capacity {
                Ok(Some((capacity, available)))
            } else {
                Ok(Some((wanted, mul_checked(wanted, factor)?)))
            }
        }
    }
}

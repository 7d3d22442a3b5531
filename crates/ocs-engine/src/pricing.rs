//! Rating glue
//!
//! Turns a matched cost increment, or an interval rate from the external
//! rating engine, into cost and coverage figures for a usage span:
//!
//! `cost(u) = fixed_fee + ceil(u / increment) * recurrent_fee * increment / unit`

use async_trait::async_trait;
use ocs_core::models::{
    add_checked, mul_checked, ChargingEvent, CostIncrement, EventCharges, IntervalRate,
    RateSIncrement, RateSInterval,
};
use ocs_core::traits::RatingEngine;
use ocs_core::AppResult;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Fee model applied to one balance debit
#[derive(Debug, Clone, PartialEq)]
pub struct Pricing {
    pub increment: Option<Decimal>,
    pub fixed_fee: Decimal,
    pub recurrent_fee: Decimal,
    /// Usage the recurrent fee is quoted for, defaults to the increment
    pub unit: Option<Decimal>,
}

impl From<&CostIncrement> for Pricing {
    fn from(ci: &CostIncrement) -> Self {
        Self {
            increment: ci.increment.filter(|i| *i > Decimal::ZERO),
            fixed_fee: ci.fixed_fee.unwrap_or(Decimal::ZERO),
            recurrent_fee: ci.recurrent_fee.unwrap_or(Decimal::ZERO),
            unit: None,
        }
    }
}

impl From<&IntervalRate> for Pricing {
    fn from(rate: &IntervalRate) -> Self {
        Self {
            increment: Some(rate.increment).filter(|i| *i > Decimal::ZERO),
            fixed_fee: rate.fixed_fee,
            recurrent_fee: rate.recurrent_fee,
            unit: Some(rate.unit).filter(|u| *u > Decimal::ZERO),
        }
    }
}

impl Pricing {
    /// Fee charged for one increment
    pub fn per_increment(&self) -> Decimal {
        match (self.increment, self.unit) {
            (Some(increment), Some(unit)) => self.recurrent_fee * increment / unit,
            _ => self.recurrent_fee,
        }
    }

    /// Number of increments billed for `usage`
    pub fn increments(&self, usage: Decimal) -> Decimal {
        if usage <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        match self.increment {
            Some(increment) => (usage / increment).ceil(),
            None => Decimal::ONE,
        }
    }

    pub fn cost(&self, usage: Decimal) -> AppResult<Decimal> {
        if usage <= Decimal::ZERO {
            return Ok(Decimal::ZERO);
        }
        add_checked(
            self.fixed_fee,
            mul_checked(self.increments(usage), self.per_increment())?,
        )
    }

    /// Largest usage up to `requested` whose cost fits in `budget`
    ///
    /// When `requested` does not fit, the result is a whole number of
    /// increments.
    pub fn max_usage(&self, budget: Decimal, requested: Decimal) -> AppResult<Decimal> {
        if requested <= Decimal::ZERO {
            return Ok(Decimal::ZERO);
        }
        if self.cost(requested)? <= budget {
            return Ok(requested);
        }
        let per_increment = self.per_increment();
        let Some(increment) = self.increment else {
            return Ok(Decimal::ZERO);
        };
        if budget < self.fixed_fee || per_increment <= Decimal::ZERO {
            return Ok(Decimal::ZERO);
        }
        let affordable = ((budget - self.fixed_fee) / per_increment).floor();
        Ok(mul_checked(affordable, increment)?.min(requested))
    }

    /// Interval rate equivalent of this pricing
    pub fn interval_rate(&self) -> IntervalRate {
        let increment = self.increment.unwrap_or(Decimal::ZERO);
        IntervalRate {
            interval_start: Decimal::ZERO,
            fixed_fee: self.fixed_fee,
            recurrent_fee: self.recurrent_fee,
            unit: self.unit.unwrap_or(increment),
            increment,
        }
    }

    /// Records the rating of `usage` into the ledger, returns the rating ID
    pub fn record(&self, ec: &mut EventCharges, usage: Decimal) -> String {
        let rate_id = ec.rate_id(&self.interval_rate());
        let increments = self.increments(usage);
        let (increment_usage, compress_factor) = match self.increment {
            Some(increment) => (increment, increments.to_u64().unwrap_or(u64::MAX)),
            None => (usage, 1),
        };
        ec.rating_id(RateSInterval {
            interval_start: Decimal::ZERO,
            increments: vec![RateSIncrement {
                increment_start: Decimal::ZERO,
                rate_id,
                rate_interval_index: 0,
                compress_factor,
                usage: increment_usage,
            }],
            compress_factor: 1,
        })
    }
}

/// Rating engine used when none is configured: never has a rate
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRatingEngine;

#[async_trait]
impl RatingEngine for NoRatingEngine {
    async fn interval_rate(
        &self,
        _tenant: &str,
        _rate_profile_ids: &[String],
        _event: &ChargingEvent,
        _usage: Decimal,
    ) -> AppResult<Option<IntervalRate>> {
        Ok(None)
    }
}

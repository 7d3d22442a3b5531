//! Domain models for the charging engine
//!
//! This module contains the account/balance data model, the charging event
//! and the EventCharges ledger produced by every charging call.

pub mod account;
pub mod balance;
pub mod charges;
pub mod dynamic;
pub mod event;
pub mod units;

pub use account::{tenant_id, Account};
pub use balance::{
    parse_cost_increments, parse_unit_factors, Balance, BalanceLimit, BalanceType,
    CostIncrement, UnitFactor, OPT_BALANCE_LIMIT, OPT_BALANCE_UNLIMITED,
};
pub use charges::{
    AccountCharge, BalanceRefund, ChargeEntry, EventCharges, IntervalRate, RateSIncrement,
    RateSInterval,
};
pub use dynamic::{
    parse_dynamic_blockers, parse_dynamic_weights, DynamicBlocker, DynamicEntry, DynamicWeight,
};
pub use event::{
    ChargingEvent, FIELD_USAGE, OPT_ACCOUNT_IDS, OPT_ACCOUNT_USAGE, OPT_PROFILE_IGNORE_FILTERS,
    OPT_USAGE,
};
pub use units::{
    add_checked, decimal_from_value, mul_checked, parse_usage, seconds, NANOS_PER_SECOND,
};

// src/simulator.rs
//! Scenario runner for exercising the charging engine without a transport
//!
//! A scenario is a JSON document with:
//! 1. `filters` - named filters registered before anything else
//! 2. `accounts` - upserted through the admin API
//! 3. `requests` - charging calls run concurrently as tokio tasks
//!
//! Each request may ask for its charges to be refunded right after the
//! debit. The report carries every outcome and the final account state.

use ocs_core::error::AppError;
use ocs_core::models::{Account, ChargingEvent};
use ocs_core::traits::AccountStore;
use ocs_engine::{ChargingEngine, Filter, FilterS};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Charging call a scenario request performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    MaxAbstracts,
    DebitAbstracts,
    AuthorizeAbstracts,
    MaxConcretes,
    DebitConcretes,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::MaxAbstracts => write!(f, "max_abstracts"),
            Operation::DebitAbstracts => write!(f, "debit_abstracts"),
            Operation::AuthorizeAbstracts => write!(f, "authorize_abstracts"),
            Operation::MaxConcretes => write!(f, "max_concretes"),
            Operation::DebitConcretes => write!(f, "debit_concretes"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioRequest {
    pub operation: Operation,
    pub event: ChargingEvent,
    /// Refund the returned charges once the call succeeds
    #[serde(default)]
    pub refund: bool,
    #[serde(default)]
    pub delay_before_ms: u64,
}

/// Simulation scenario for batch testing
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub tenant: String,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub requests: Vec<ScenarioRequest>,
}

#[derive(Debug, Serialize)]
pub struct RequestOutcome {
    pub event_id: String,
    pub operation: Operation,
    pub success: bool,
    pub abstracts: Option<Decimal>,
    pub concretes: Option<Decimal>,
    pub charges: usize,
    pub refunded: bool,
    pub error_code: Option<&'static str>,
    pub message: Option<String>,
}

impl RequestOutcome {
    fn failed(request: &ScenarioRequest, err: &AppError) -> Self {
        Self {
            event_id: request.event.id.clone(),
            operation: request.operation,
            success: false,
            abstracts: None,
            concretes: None,
            charges: 0,
            refunded: false,
            error_code: Some(err.error_code()),
            message: Some(err.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ScenarioReport {
    pub name: String,
    pub outcomes: Vec<RequestOutcome>,
    pub accounts: Vec<Account>,
}

/// Runs scenarios against one engine
pub struct ScenarioRunner<S: AccountStore + 'static> {
    engine: Arc<ChargingEngine<S>>,
    filters: Arc<FilterS>,
}

impl<S: AccountStore + 'static> ScenarioRunner<S> {
    pub fn new(engine: Arc<ChargingEngine<S>>, filters: Arc<FilterS>) -> Self {
        Self { engine, filters }
    }

    /// Loads filters and accounts, then runs every request concurrently
    pub async fn run(&self, scenario: Scenario) -> Result<ScenarioReport, AppError> {
        info!(
            "Running scenario '{}': {} account(s), {} request(s)",
            scenario.name,
            scenario.accounts.len(),
            scenario.requests.len()
        );

        for filter in scenario.filters {
            self.filters.set_filter(filter)?;
        }
        for account in scenario.accounts {
            let ctx = self.engine.context();
            self.engine.set_account(&ctx, account).await?;
        }

        let tasks: Vec<_> = scenario
            .requests
            .into_iter()
            .map(|request| {
                let engine = self.engine.clone();
                tokio::spawn(async move { execute(&engine, request).await })
            })
            .collect();

        let mut outcomes = Vec::with_capacity(tasks.len());
        for result in futures::future::join_all(tasks).await {
            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => {
                    error!("Scenario task failed: {}", err);
                    return Err(AppError::Internal(format!("scenario task failed: {}", err)));
                }
            }
        }

        let accounts = self.engine.list_accounts(&scenario.tenant).await?;
        let succeeded = outcomes.iter().filter(|o| o.success).count();
        info!(
            "Scenario '{}' completed: {}/{} request(s) succeeded",
            scenario.name,
            succeeded,
            outcomes.len()
        );
        Ok(ScenarioReport {
            name: scenario.name,
            outcomes,
            accounts,
        })
    }
}

async fn execute<S: AccountStore>(engine: &ChargingEngine<S>, request: ScenarioRequest) -> RequestOutcome {
    if request.delay_before_ms > 0 {
        tokio::time::sleep(std::time::Duration::from_millis(request.delay_before_ms)).await;
    }

    let ctx = engine.context();
    let event = &request.event;
    let result = match request.operation {
        Operation::MaxAbstracts => engine.max_abstracts(&ctx, event).await,
        Operation::DebitAbstracts => engine.debit_abstracts(&ctx, event).await,
        Operation::AuthorizeAbstracts => engine.authorize_abstracts(&ctx, event).await,
        Operation::MaxConcretes => engine.max_concretes(&ctx, event).await,
        Operation::DebitConcretes => engine.debit_concretes(&ctx, event).await,
    };
    let ec = match result {
        Ok(ec) => ec,
        Err(err) => {
            warn!("{} for event {} failed: {}", request.operation, event.id, err);
            return RequestOutcome::failed(&request, &err);
        }
    };

    let mut refunded = false;
    if request.refund {
        if let Err(err) = engine.refund_charges(&ctx, &event.tenant, &ec).await {
            warn!("Refund for event {} failed: {}", event.id, err);
            return RequestOutcome::failed(&request, &err);
        }
        refunded = true;
    }

    RequestOutcome {
        event_id: event.id.clone(),
        operation: request.operation,
        success: true,
        abstracts: Some(ec.abstracts),
        concretes: Some(ec.concretes),
        charges: ec.charges.len(),
        refunded,
        error_code: None,
        message: None,
    }
}

//! OCS Charging Core Library
//!
//! This crate provides the foundational types, traits, and error handling
//! for the account charging engine. It includes:
//!
//! - Domain models (Account, Balance, ChargingEvent, EventCharges)
//! - Collaborator traits (account store, filter evaluator, rating engine)
//! - Unified error handling with stable error codes
//! - Application configuration

pub mod config;
pub mod error;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use error::AppError;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

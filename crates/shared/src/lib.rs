//! Shared ids, errors, and configuration for Moeda.
//!
//! This crate provides common types used across all other crates:
//! - Typed IDs for students, disciplines, transactions, lots and staff
//! - Application-wide error types
//! - Configuration management

pub mod config;
pub mod error;
pub mod types;

pub use config::{AppConfig, LedgerConfig, PolicyConfig, RetryConfig};
pub use error::{AppError, AppResult};

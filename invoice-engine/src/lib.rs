//! Custodial invoice settlement backend with creator-gated release
//!
//! This crate implements an invoice lifecycle engine where funds rest in
//! per-invoice custody until the creator's decision resolves them:
//! - A platform fee is deducted from every payment, flat or percentage
//! - Each paid invoice gets a dedicated custodial account for the remainder
//! - The creator accepts or rejects within a fixed window; acceptance starts
//!   a hold period before funds can be released
//! - Payers recover their funds when the creator never decides
//! - Every state change lands on an append-only audit log

pub mod clock;
pub mod custody;
pub mod error;
pub mod models;
pub mod processor;
pub mod rail;
pub mod settings;

use error::InvoiceError;

/// Result type alias for invoice operations
pub type InvoiceResult<T> = Result<T, InvoiceError>;

//! Error types for the invoice settlement engine
//!
//! Every operation fails synchronously with one of these variants and
//! leaves no partial state behind. Guard failures carry the data a caller
//! needs to diagnose the rejection (offending status, limits, fees).

use thiserror::Error;

use crate::models::{InvoiceId, InvoiceStatus, PartyId};

/// Main error type for invoice operations
#[derive(Error, Debug)]
pub enum InvoiceError {
    /// Caller is not the creator, owner, or controller the operation requires
    #[error("Caller is not authorized for this operation")]
    Unauthorized,

    /// No invoice registered under this identifier
    #[error("Invoice {0} not found")]
    InvoiceNotFound(InvoiceId),

    /// Generic state guard, carrying the offending status
    #[error("Operation not permitted while invoice is {status}")]
    InvalidInvoiceState { status: InvoiceStatus },

    /// Accept or reject attempted outside the paid state
    #[error("Invoice is not awaiting a decision (status: {status})")]
    InvoiceNotPaid { status: InvoiceStatus },

    /// Release attempted on an invoice whose funds already left custody
    #[error("Invoice has already been released")]
    InvoiceAlreadyReleased,

    /// Invoice price does not clear the floor imposed by the fee policy
    #[error("Price must exceed the minimum of {minimum}")]
    PriceBelowMinimum { minimum: u64 },

    /// Payment exceeds the invoice price
    #[error("Payment of {amount} exceeds the invoice price of {price}")]
    ExcessivePayment { amount: u64, price: u64 },

    /// Net proceeds after the fee would be zero
    #[error("Payment does not cover the fee of {fee}")]
    ValueTooLow { fee: u64 },

    /// Creators cannot fund their own invoices
    #[error("Creator cannot pay their own invoice")]
    CreatorCannotPayOwnInvoice,

    /// The validity period since creation has lapsed
    #[error("Invoice is no longer valid for payment")]
    InvoiceNoLongerValid,

    /// The window for the creator's accept/reject decision has closed
    #[error("Acceptance window has elapsed")]
    AcceptanceWindowExceeded,

    /// Release attempted before the hold period ran out
    #[error("Hold period has not yet elapsed")]
    HoldPeriodNotElapsed,

    /// Payer refund requires a paid invoice with an elapsed decision window
    #[error("Invoice is not eligible for a payer refund")]
    NotEligibleForRefund,

    /// The payment rail refused or failed the outbound transfer
    #[error("Fund transfer to {recipient} failed")]
    TransferFailed { recipient: PartyId },

    /// Percentage fee outside the open basis-point range
    #[error("Fee rate of {rate_bps} basis points is outside 1..=10000")]
    FeeRateOutOfRange { rate_bps: u16 },

    /// Flat fee policies require a non-zero deduction
    #[error("Flat fee amount must be non-zero")]
    ZeroFeeAmount,

    /// Hold periods must be non-zero
    #[error("Hold period must be non-zero")]
    ZeroHoldPeriod,

    /// An empty identity was supplied where a real party is required
    #[error("Party identity must not be empty")]
    EmptyPartyId,

    /// Time or balance arithmetic overflowed its stored width
    #[error("Arithmetic overflowed its stored width")]
    ArithmeticOverflow,

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl InvoiceError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }
}

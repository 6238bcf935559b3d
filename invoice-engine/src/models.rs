//! Core data models for the invoice settlement engine
//!
//! This module contains the identifier newtypes, the invoice record and its
//! state machine, the fee policy, and the audit event types shared by the
//! processor and its custodial accounts.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Upper bound of the percentage fee range (100% expressed in basis points)
pub const MAX_FEE_RATE_BPS: u16 = 10_000;

/// Sequential invoice identifier, allocated by the processor starting at 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceId(u64);

impl InvoiceId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for InvoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle of a custodial account, allocated at payment time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(Uuid);

impl AccountId {
    /// Allocate a fresh handle
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn value(self) -> Uuid {
        self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// External party identity (creator, payer, owner, fee receiver)
///
/// An empty identity is never a valid participant; operations reject it
/// wherever an actual party is required.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartyId(String);

impl PartyId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Check whether this is the empty (invalid) identity
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PartyId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PartyId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Seconds since the Unix epoch
///
/// All window arithmetic on timestamps is checked; overflow is reported,
/// never wrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    pub fn as_secs(self) -> u64 {
        self.0
    }

    /// Add a number of seconds, returning `None` on overflow
    pub fn checked_add_secs(self, secs: u64) -> Option<Timestamp> {
        self.0.checked_add(secs).map(Timestamp)
    }

    /// Calendar form for display and export
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        i64::try_from(self.0)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Invoice state machine enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceStatus {
    /// Issued, awaiting payment
    Created,
    /// Funded; net proceeds held in custody, awaiting the creator's decision
    Paid,
    /// Accepted by the creator; releasable once the hold period ends
    Accepted,
    /// Rejected by the creator; payer refunded
    Rejected,
    /// Cancelled by the creator before any payment
    Cancelled,
    /// Refunded to the payer after the acceptance window lapsed
    Refunded,
    /// Net proceeds released to the creator
    Released,
}

impl InvoiceStatus {
    /// Check if this is a terminal state (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Rejected | Self::Cancelled | Self::Refunded | Self::Released
        )
    }

    /// Check if this state allows payment
    pub fn can_pay(&self) -> bool {
        matches!(self, Self::Created)
    }

    /// Check if this state allows cancellation
    pub fn can_cancel(&self) -> bool {
        matches!(self, Self::Created)
    }

    /// Check if this state allows the creator's accept/reject decision
    pub fn can_decide(&self) -> bool {
        matches!(self, Self::Paid)
    }

    /// Check if this state allows release to the creator
    pub fn can_release(&self) -> bool {
        matches!(self, Self::Accepted)
    }

    /// Check if this state allows a payer refund once the window lapses
    pub fn can_refund_after_window(&self) -> bool {
        matches!(self, Self::Paid)
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Paid => "paid",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
            Self::Released => "released",
        };
        f.write_str(s)
    }
}

/// Platform fee deducted from every gross payment
///
/// Exactly one variant is active per processor; the variant in view at
/// payment time determines the deduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeePolicy {
    /// Fixed deduction per payment
    Flat { amount: u64 },
    /// Proportional deduction in basis points (1% = 100), floor-divided
    Percentage { rate_bps: u16 },
}

impl FeePolicy {
    /// Fee taken from a gross payment under this policy
    ///
    /// The percentage path widens to u128 so the multiplication cannot
    /// overflow for any u64 gross amount.
    pub fn fee_for(&self, gross: u64) -> u64 {
        match *self {
            FeePolicy::Flat { amount } => amount,
            FeePolicy::Percentage { rate_bps } => {
                ((gross as u128 * rate_bps as u128) / MAX_FEE_RATE_BPS as u128) as u64
            }
        }
    }
}

/// Invoice record; persists for the life of the processor, terminal states
/// included
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,

    // Parties
    /// Identity that issued the invoice; immutable after creation
    pub creator: PartyId,
    /// Identity that funded it; set exactly once, at payment
    pub payer: Option<PartyId>,

    // Custody reference
    /// Handle of the custodial account; set exactly once, at payment
    pub account: Option<AccountId>,

    // Amounts
    /// Funding ceiling fixed at creation
    pub price: u64,
    /// Net amount placed into custody (gross minus fee)
    pub amount_paid: u64,

    // Release scheduling
    /// Per-invoice hold period in seconds, consumed at acceptance
    pub hold_period_override: Option<u64>,
    /// Earliest release time; set when the creator accepts
    pub release_eligible_at: Option<Timestamp>,

    pub status: InvoiceStatus,

    // Timestamps
    pub created_at: Timestamp,
    /// Funding time; `None` until paid
    pub payment_time: Option<Timestamp>,
    pub updated_at: Timestamp,
}

impl Invoice {
    /// Create a fresh record in the `Created` state
    pub fn new(id: InvoiceId, creator: PartyId, price: u64, now: Timestamp) -> Self {
        Self {
            id,
            creator,
            payer: None,
            account: None,
            price,
            amount_paid: 0,
            hold_period_override: None,
            release_eligible_at: None,
            status: InvoiceStatus::Created,
            created_at: now,
            payment_time: None,
            updated_at: now,
        }
    }
}

/// Processor event for the audit trail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceEvent {
    /// Position in the append-only log, starting at 1
    pub sequence: u64,

    // References
    /// Correlated invoice; `None` only for fee sweeps
    pub invoice_id: Option<InvoiceId>,

    // Actor
    /// Identity whose call produced the event
    pub actor: Option<PartyId>,

    pub kind: InvoiceEventKind,

    // Timestamp (immutable)
    pub occurred_at: Timestamp,
}

/// What a processor event records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceEventKind {
    /// Invoice issued
    Created { creator: PartyId, price: u64 },
    /// Invoice funded; fee retained, net placed into custody
    Paid {
        payer: PartyId,
        gross: u64,
        fee: u64,
        net: u64,
        account: AccountId,
    },
    /// Creator accepted; release scheduled
    Accepted { release_eligible_at: Timestamp },
    /// Creator rejected
    Rejected,
    /// Creator cancelled before payment
    Cancelled,
    /// Custody balance paid out to the creator
    Released { recipient: PartyId, amount: u64 },
    /// Custody balance returned to the payer
    Refunded { recipient: PartyId, amount: u64 },
    /// Owner overrode the hold period of one invoice
    HoldPeriodSet { hold_period_secs: u64 },
    /// Owner pushed an accepted invoice's release time later
    ReleaseTimeExtended { release_eligible_at: Timestamp },
    /// Accrued fees swept to the fee receiver
    FeesWithdrawn { receiver: PartyId, amount: u64 },
}

/// Account event for the custodial account's own audit trail
///
/// Accounts keep these independently of the processor log, so each
/// account's funding and payout history stands on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountEvent {
    pub invoice_id: InvoiceId,
    pub kind: AccountEventKind,
    pub occurred_at: Timestamp,
}

/// What an account event records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountEventKind {
    /// Net proceeds placed into custody at construction
    Deposited { amount: u64 },
    /// Full balance disbursed to the creator
    PaidToCreator { recipient: PartyId, amount: u64 },
    /// Full balance returned to the payer
    RefundedToPayer { recipient: PartyId, amount: u64 },
}

//! Payment rail - outbound settlement toward external parties
//!
//! Custody balances live inside the engine; the rail is the seam through
//! which value leaves it. A rail call is the only step of any operation
//! that can fail after guards have passed, and a failure always aborts the
//! whole operation.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::InvoiceResult;
use crate::error::InvoiceError;
use crate::models::PartyId;

/// Outbound transfer interface
///
/// Implementations must either credit the full amount or fail; partial
/// credits are not representable.
#[async_trait]
pub trait PaymentRail: Send + Sync {
    async fn credit(&self, recipient: &PartyId, amount: u64) -> InvoiceResult<()>;
}

/// In-memory rail for development and tests
///
/// Keeps a per-recipient ledger of credited funds and can be told to refuse
/// specific recipients, standing in for an unreachable endpoint.
#[derive(Default)]
pub struct MemoryRail {
    balances: RwLock<HashMap<PartyId, u64>>,
    refusals: RwLock<HashSet<PartyId>>,
}

impl MemoryRail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total credited to `recipient` so far
    pub async fn balance_of(&self, recipient: &PartyId) -> u64 {
        self.balances
            .read()
            .await
            .get(recipient)
            .copied()
            .unwrap_or(0)
    }

    /// Sum of everything disbursed through this rail
    pub async fn total_credited(&self) -> u64 {
        self.balances.read().await.values().sum()
    }

    /// Make future credits to `recipient` fail
    pub async fn refuse(&self, recipient: &PartyId) {
        self.refusals.write().await.insert(recipient.clone());
    }

    /// Lift a refusal set by [`MemoryRail::refuse`]
    pub async fn allow(&self, recipient: &PartyId) {
        self.refusals.write().await.remove(recipient);
    }
}

#[async_trait]
impl PaymentRail for MemoryRail {
    async fn credit(&self, recipient: &PartyId, amount: u64) -> InvoiceResult<()> {
        if self.refusals.read().await.contains(recipient) {
            return Err(InvoiceError::TransferFailed {
                recipient: recipient.clone(),
            });
        }

        let mut balances = self.balances.write().await;
        let balance = balances.entry(recipient.clone()).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or(InvoiceError::ArithmeticOverflow)?;

        Ok(())
    }
}

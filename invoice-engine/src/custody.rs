//! Custodial accounts - per-invoice fund custody
//!
//! One account is created for each invoice that gets paid. It holds that
//! invoice's net proceeds, answers only to the controller that created it,
//! and pays out at most once: the full balance to the creator on release,
//! or back to the payer on rejection or timeout. Accounts keep their own
//! funding and payout records, independent of the processor's log.

use std::sync::Arc;

use tracing::info;

use crate::InvoiceResult;
use crate::error::InvoiceError;
use crate::models::{AccountEvent, AccountEventKind, AccountId, InvoiceId, PartyId, Timestamp};
use crate::rail::PaymentRail;

/// Custody holding for one invoice's net proceeds
pub struct CustodialAccount {
    id: AccountId,
    invoice_id: InvoiceId,

    // Parties
    creator: PartyId,
    payer: PartyId,
    /// The only identity allowed to instruct a payout
    controller: PartyId,

    balance: u64,
    rail: Arc<dyn PaymentRail>,
    events: Vec<AccountEvent>,
}

impl CustodialAccount {
    /// Create an account holding `deposit` for one invoice
    ///
    /// The deposit is recorded as the account's first event. Callers
    /// guarantee the deposit is non-zero.
    pub fn new(
        invoice_id: InvoiceId,
        creator: PartyId,
        payer: PartyId,
        controller: PartyId,
        deposit: u64,
        rail: Arc<dyn PaymentRail>,
        now: Timestamp,
    ) -> Self {
        let id = AccountId::generate();
        let events = vec![AccountEvent {
            invoice_id,
            kind: AccountEventKind::Deposited { amount: deposit },
            occurred_at: now,
        }];

        info!(
            "Custodial account {} holds {} for invoice {}",
            id, deposit, invoice_id
        );

        Self {
            id,
            invoice_id,
            creator,
            payer,
            controller,
            balance: deposit,
            rail,
            events,
        }
    }

    /// Disburse the entire balance to the creator's payout identity
    ///
    /// The transfer either moves the full balance or fails leaving it
    /// untouched. Once drained, further payouts move nothing.
    pub async fn pay_to_creator(
        &mut self,
        caller: &PartyId,
        recipient: &PartyId,
        now: Timestamp,
    ) -> InvoiceResult<u64> {
        let amount = self.drain(caller, recipient).await?;

        self.events.push(AccountEvent {
            invoice_id: self.invoice_id,
            kind: AccountEventKind::PaidToCreator {
                recipient: recipient.clone(),
                amount,
            },
            occurred_at: now,
        });

        info!(
            "Account {}: paid {} to creator {}",
            self.id, amount, recipient
        );

        Ok(amount)
    }

    /// Return the entire balance to the payer
    pub async fn refund_to_payer(
        &mut self,
        caller: &PartyId,
        recipient: &PartyId,
        now: Timestamp,
    ) -> InvoiceResult<u64> {
        let amount = self.drain(caller, recipient).await?;

        self.events.push(AccountEvent {
            invoice_id: self.invoice_id,
            kind: AccountEventKind::RefundedToPayer {
                recipient: recipient.clone(),
                amount,
            },
            occurred_at: now,
        });

        info!(
            "Account {}: refunded {} to payer {}",
            self.id, amount, recipient
        );

        Ok(amount)
    }

    /// Move the balance out through the rail after the controller check
    async fn drain(&mut self, caller: &PartyId, recipient: &PartyId) -> InvoiceResult<u64> {
        if caller != &self.controller {
            return Err(InvoiceError::Unauthorized);
        }

        let amount = self.balance;
        self.rail.credit(recipient, amount).await?;
        self.balance = 0;

        Ok(amount)
    }

    pub fn id(&self) -> AccountId {
        self.id
    }

    pub fn invoice_id(&self) -> InvoiceId {
        self.invoice_id
    }

    pub fn creator(&self) -> &PartyId {
        &self.creator
    }

    pub fn payer(&self) -> &PartyId {
        &self.payer
    }

    /// Remaining custody balance (0 once paid out)
    pub fn balance(&self) -> u64 {
        self.balance
    }

    /// The account's own funding and payout records
    pub fn events(&self) -> &[AccountEvent] {
        &self.events
    }
}

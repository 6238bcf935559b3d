//! Invoice processor - registry, fee policy, and the lifecycle state machine
//!
//! This module owns every invoice record, the custodial account attached to
//! each funded invoice, the accrued platform fees, and the audit log. All
//! operations take the calling identity explicitly and run as one atomic
//! unit under a single lock: guards first, then state changes, then the
//! outbound fund movement, with a rollback under the same lock if the rail
//! refuses the transfer.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::InvoiceResult;
use crate::clock::Clock;
use crate::custody::CustodialAccount;
use crate::error::InvoiceError;
use crate::models::{
    AccountEvent, AccountId, FeePolicy, Invoice, InvoiceEvent, InvoiceEventKind, InvoiceId,
    InvoiceStatus, MAX_FEE_RATE_BPS, PartyId, Timestamp,
};
use crate::rail::PaymentRail;

/// Seconds in one day
const SECS_PER_DAY: u64 = 86_400;

/// Flat deduction per payment under the default policy
pub const DEFAULT_FLAT_FEE: u64 = 1;
/// Three days to accept or reject after payment
pub const DEFAULT_ACCEPTANCE_WINDOW_SECS: u64 = 3 * SECS_PER_DAY;
/// Unpaid invoices lapse 180 days after creation
pub const DEFAULT_VALIDITY_PERIOD_SECS: u64 = 180 * SECS_PER_DAY;
/// One week between acceptance and release eligibility
pub const DEFAULT_HOLD_PERIOD_SECS: u64 = 7 * SECS_PER_DAY;
/// Price floor applied under percentage fee policies
pub const DEFAULT_MIN_INVOICE_PRICE: u64 = 100;

/// Configuration for the invoice processor
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Active fee policy; exactly one variant per deployment
    pub fee_policy: FeePolicy,
    /// Identity the accrued fees are swept to
    pub fee_receiver: PartyId,
    /// Hold period applied at acceptance when an invoice has no override
    pub default_hold_period_secs: u64,
    /// How long after payment the creator may accept or reject
    pub acceptance_window_secs: u64,
    /// How long after creation an invoice remains payable
    pub validity_period_secs: u64,
    /// Price floor for new invoices under the percentage policy
    pub min_invoice_price: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            fee_policy: FeePolicy::Flat {
                amount: DEFAULT_FLAT_FEE,
            },
            fee_receiver: PartyId::new("treasury"),
            default_hold_period_secs: DEFAULT_HOLD_PERIOD_SECS, // 1 week
            acceptance_window_secs: DEFAULT_ACCEPTANCE_WINDOW_SECS, // 3 days
            validity_period_secs: DEFAULT_VALIDITY_PERIOD_SECS, // 180 days
            min_invoice_price: DEFAULT_MIN_INVOICE_PRICE,
        }
    }
}

/// Mutable ledger guarded by one lock
///
/// Every operation holds the lock for its whole duration, so invoice,
/// account, and fee effects commit together or not at all.
struct LedgerState {
    invoices: HashMap<InvoiceId, Invoice>,
    accounts: HashMap<AccountId, CustodialAccount>,
    next_invoice_id: u64,
    fee_balance: u64,
    fee_policy: FeePolicy,
    fee_receiver: PartyId,
    default_hold_period_secs: u64,
    events: Vec<InvoiceEvent>,
}

/// Main processor that coordinates the invoice lifecycle
pub struct InvoiceProcessor {
    /// Administrative identity fixed at construction
    owner: PartyId,
    /// Identity this processor presents to its custodial accounts; the
    /// accounts accept payout instructions from no one else
    controller: PartyId,
    acceptance_window_secs: u64,
    validity_period_secs: u64,
    min_invoice_price: u64,
    state: RwLock<LedgerState>,
    /// Rail for outbound settlement
    rail: Arc<dyn PaymentRail>,
    /// Time source for window guards
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for InvoiceProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvoiceProcessor")
            .field("owner", &self.owner)
            .field("acceptance_window_secs", &self.acceptance_window_secs)
            .field("validity_period_secs", &self.validity_period_secs)
            .field("min_invoice_price", &self.min_invoice_price)
            .finish_non_exhaustive()
    }
}

impl InvoiceProcessor {
    /// Create a new processor owned by `owner`
    ///
    /// The whole configuration is validated up front. The controller
    /// identity gating this processor's accounts is generated here and
    /// never handed out.
    pub fn new(
        owner: PartyId,
        config: ProcessorConfig,
        rail: Arc<dyn PaymentRail>,
        clock: Arc<dyn Clock>,
    ) -> InvoiceResult<Self> {
        if owner.is_empty() {
            return Err(InvoiceError::EmptyPartyId);
        }
        if config.fee_receiver.is_empty() {
            return Err(InvoiceError::EmptyPartyId);
        }
        validate_fee_policy(&config.fee_policy)?;
        if config.default_hold_period_secs == 0 {
            return Err(InvoiceError::ZeroHoldPeriod);
        }
        if config.acceptance_window_secs == 0 || config.validity_period_secs == 0 {
            return Err(InvoiceError::config(
                "acceptance window and validity period must be non-zero",
            ));
        }

        let controller = PartyId::new(format!("processor:{}", Uuid::new_v4()));

        info!("Invoice processor initialized (owner: {})", owner);

        Ok(Self {
            owner,
            controller,
            acceptance_window_secs: config.acceptance_window_secs,
            validity_period_secs: config.validity_period_secs,
            min_invoice_price: config.min_invoice_price,
            state: RwLock::new(LedgerState {
                invoices: HashMap::new(),
                accounts: HashMap::new(),
                next_invoice_id: 1,
                fee_balance: 0,
                fee_policy: config.fee_policy,
                fee_receiver: config.fee_receiver,
                default_hold_period_secs: config.default_hold_period_secs,
                events: Vec::new(),
            }),
            rail,
            clock,
        })
    }

    /// Issue a new invoice for `price`, returning its sequential ID
    pub async fn create_invoice(&self, caller: &PartyId, price: u64) -> InvoiceResult<InvoiceId> {
        if caller.is_empty() {
            return Err(InvoiceError::EmptyPartyId);
        }

        let now = self.clock.now();
        let mut state = self.state.write().await;

        // The floor depends on the active policy: a flat fee must be
        // strictly covered, a percentage policy uses the configured minimum
        match state.fee_policy {
            FeePolicy::Flat { amount } => {
                if price <= amount {
                    return Err(InvoiceError::PriceBelowMinimum { minimum: amount });
                }
            }
            FeePolicy::Percentage { .. } => {
                if price < self.min_invoice_price {
                    return Err(InvoiceError::PriceBelowMinimum {
                        minimum: self.min_invoice_price,
                    });
                }
            }
        }

        let id = InvoiceId::new(state.next_invoice_id);
        state.next_invoice_id += 1;
        state.invoices.insert(id, Invoice::new(id, caller.clone(), price, now));

        record_event(
            &mut state,
            Some(id),
            Some(caller.clone()),
            InvoiceEventKind::Created {
                creator: caller.clone(),
                price,
            },
            now,
        );

        info!("Invoice {} created by {} for {}", id, caller, price);

        Ok(id)
    }

    /// Fund a created invoice with a gross `amount`
    ///
    /// The fee under the current policy is retained by the processor and
    /// the remainder moves into a fresh custodial account dedicated to this
    /// invoice.
    pub async fn pay_invoice(
        &self,
        caller: &PartyId,
        invoice_id: InvoiceId,
        amount: u64,
    ) -> InvoiceResult<Invoice> {
        if caller.is_empty() {
            return Err(InvoiceError::EmptyPartyId);
        }

        info!("Paying invoice {}: {} from {}", invoice_id, amount, caller);

        let now = self.clock.now();
        let mut state = self.state.write().await;

        // Validate against the current record
        let invoice = state
            .invoices
            .get(&invoice_id)
            .ok_or(InvoiceError::InvoiceNotFound(invoice_id))?;
        if !invoice.status.can_pay() {
            return Err(InvoiceError::InvalidInvoiceState {
                status: invoice.status,
            });
        }
        if caller == &invoice.creator {
            return Err(InvoiceError::CreatorCannotPayOwnInvoice);
        }
        if amount > invoice.price {
            return Err(InvoiceError::ExcessivePayment {
                amount,
                price: invoice.price,
            });
        }
        let pay_deadline = invoice
            .created_at
            .checked_add_secs(self.validity_period_secs)
            .ok_or(InvoiceError::ArithmeticOverflow)?;
        if now > pay_deadline {
            return Err(InvoiceError::InvoiceNoLongerValid);
        }
        let creator = invoice.creator.clone();

        // Split the gross payment
        let fee = state.fee_policy.fee_for(amount);
        if amount <= fee {
            return Err(InvoiceError::ValueTooLow { fee });
        }
        let net = amount - fee;
        let new_fee_balance = state
            .fee_balance
            .checked_add(fee)
            .ok_or(InvoiceError::ArithmeticOverflow)?;

        // Open the custodial account for the net proceeds
        let account = CustodialAccount::new(
            invoice_id,
            creator,
            caller.clone(),
            self.controller.clone(),
            net,
            Arc::clone(&self.rail),
            now,
        );
        let account_id = account.id();
        state.accounts.insert(account_id, account);
        state.fee_balance = new_fee_balance;

        // Update the invoice record
        let invoice = state
            .invoices
            .get_mut(&invoice_id)
            .ok_or(InvoiceError::InvoiceNotFound(invoice_id))?;
        invoice.payer = Some(caller.clone());
        invoice.account = Some(account_id);
        invoice.amount_paid = net;
        invoice.payment_time = Some(now);
        invoice.status = InvoiceStatus::Paid;
        invoice.updated_at = now;
        let snapshot = invoice.clone();

        record_event(
            &mut state,
            Some(invoice_id),
            Some(caller.clone()),
            InvoiceEventKind::Paid {
                payer: caller.clone(),
                gross: amount,
                fee,
                net,
                account: account_id,
            },
            now,
        );

        info!(
            "Invoice {} paid: gross {}, fee {}, net {} in custody",
            invoice_id, amount, fee, net
        );

        Ok(snapshot)
    }

    /// Accept or reject a paid invoice as its creator
    ///
    /// Accepting schedules release after the hold period; rejecting refunds
    /// the payer immediately. Both are only possible while the acceptance
    /// window is open.
    pub async fn creator_decision(
        &self,
        caller: &PartyId,
        invoice_id: InvoiceId,
        accept: bool,
    ) -> InvoiceResult<Invoice> {
        info!(
            "Decision on invoice {} by {}: {}",
            invoice_id,
            caller,
            if accept { "accept" } else { "reject" }
        );

        let now = self.clock.now();
        let mut state = self.state.write().await;

        let invoice = state
            .invoices
            .get(&invoice_id)
            .ok_or(InvoiceError::InvoiceNotFound(invoice_id))?;

        // The window closes first, whoever asks. An invoice that was never
        // paid has no payment time and counts from the epoch, so its window
        // reads as closed rather than as never opened.
        let funded_at = invoice.payment_time.unwrap_or(Timestamp::ZERO);
        let decision_deadline = funded_at
            .checked_add_secs(self.acceptance_window_secs)
            .ok_or(InvoiceError::ArithmeticOverflow)?;
        if now > decision_deadline {
            return Err(InvoiceError::AcceptanceWindowExceeded);
        }
        if caller != &invoice.creator {
            return Err(InvoiceError::Unauthorized);
        }
        if !invoice.status.can_decide() {
            return Err(InvoiceError::InvoiceNotPaid {
                status: invoice.status,
            });
        }

        if accept {
            let hold_secs = invoice
                .hold_period_override
                .unwrap_or(state.default_hold_period_secs);
            let release_at = now
                .checked_add_secs(hold_secs)
                .ok_or(InvoiceError::ArithmeticOverflow)?;

            let invoice = state
                .invoices
                .get_mut(&invoice_id)
                .ok_or(InvoiceError::InvoiceNotFound(invoice_id))?;
            invoice.status = InvoiceStatus::Accepted;
            invoice.release_eligible_at = Some(release_at);
            invoice.updated_at = now;
            let snapshot = invoice.clone();

            record_event(
                &mut state,
                Some(invoice_id),
                Some(caller.clone()),
                InvoiceEventKind::Accepted {
                    release_eligible_at: release_at,
                },
                now,
            );

            info!(
                "Invoice {} accepted; release eligible at {}",
                invoice_id, release_at
            );

            Ok(snapshot)
        } else {
            self.refund(&mut state, invoice_id, InvoiceStatus::Rejected, caller, now)
                .await
        }
    }

    /// Cancel an unpaid invoice as its creator
    pub async fn cancel_invoice(
        &self,
        caller: &PartyId,
        invoice_id: InvoiceId,
    ) -> InvoiceResult<Invoice> {
        let now = self.clock.now();
        let mut state = self.state.write().await;

        let invoice = state
            .invoices
            .get(&invoice_id)
            .ok_or(InvoiceError::InvoiceNotFound(invoice_id))?;
        if caller != &invoice.creator {
            return Err(InvoiceError::Unauthorized);
        }
        if !invoice.status.can_cancel() {
            return Err(InvoiceError::InvalidInvoiceState {
                status: invoice.status,
            });
        }

        let invoice = state
            .invoices
            .get_mut(&invoice_id)
            .ok_or(InvoiceError::InvoiceNotFound(invoice_id))?;
        invoice.status = InvoiceStatus::Cancelled;
        invoice.updated_at = now;
        let snapshot = invoice.clone();

        record_event(
            &mut state,
            Some(invoice_id),
            Some(caller.clone()),
            InvoiceEventKind::Cancelled,
            now,
        );

        info!("Invoice {} cancelled by {}", invoice_id, caller);

        Ok(snapshot)
    }

    /// Release an accepted invoice's custody balance to the creator
    pub async fn release_invoice(
        &self,
        caller: &PartyId,
        invoice_id: InvoiceId,
    ) -> InvoiceResult<Invoice> {
        info!("Releasing invoice {}", invoice_id);

        let now = self.clock.now();
        let mut state = self.state.write().await;

        let invoice = state
            .invoices
            .get(&invoice_id)
            .ok_or(InvoiceError::InvoiceNotFound(invoice_id))?;
        if invoice.status == InvoiceStatus::Released {
            return Err(InvoiceError::InvoiceAlreadyReleased);
        }
        if !invoice.status.can_release() {
            return Err(InvoiceError::InvalidInvoiceState {
                status: invoice.status,
            });
        }
        if caller != &invoice.creator {
            return Err(InvoiceError::Unauthorized);
        }
        let eligible_at = invoice
            .release_eligible_at
            .ok_or(InvoiceError::InvalidInvoiceState {
                status: invoice.status,
            })?;
        if now < eligible_at {
            return Err(InvoiceError::HoldPeriodNotElapsed);
        }
        let creator = invoice.creator.clone();
        let prior_status = invoice.status;
        let prior_updated = invoice.updated_at;
        let account_id = invoice
            .account
            .ok_or(InvoiceError::InvalidInvoiceState { status: prior_status })?;
        let mut account =
            state
                .accounts
                .remove(&account_id)
                .ok_or(InvoiceError::InvalidInvoiceState {
                    status: prior_status,
                })?;

        // Status commits ahead of the fund movement
        let invoice = state
            .invoices
            .get_mut(&invoice_id)
            .ok_or(InvoiceError::InvoiceNotFound(invoice_id))?;
        invoice.status = InvoiceStatus::Released;
        invoice.updated_at = now;

        let outcome = account.pay_to_creator(&self.controller, &creator, now).await;
        state.accounts.insert(account_id, account);

        match outcome {
            Ok(amount) => {
                record_event(
                    &mut state,
                    Some(invoice_id),
                    Some(caller.clone()),
                    InvoiceEventKind::Released {
                        recipient: creator.clone(),
                        amount,
                    },
                    now,
                );

                info!(
                    "Invoice {} released: {} paid to creator {}",
                    invoice_id, amount, creator
                );

                state
                    .invoices
                    .get(&invoice_id)
                    .cloned()
                    .ok_or(InvoiceError::InvoiceNotFound(invoice_id))
            }
            Err(err) => {
                warn!(
                    "Invoice {}: release transfer failed, rolling back to {}",
                    invoice_id, prior_status
                );
                if let Some(invoice) = state.invoices.get_mut(&invoice_id) {
                    invoice.status = prior_status;
                    invoice.updated_at = prior_updated;
                }
                Err(err)
            }
        }
    }

    /// Refund the payer of a paid invoice whose acceptance window lapsed
    ///
    /// Anyone may trigger this; it is the payer's safety valve against an
    /// unresponsive creator.
    pub async fn refund_payer_after_window(
        &self,
        caller: &PartyId,
        invoice_id: InvoiceId,
    ) -> InvoiceResult<Invoice> {
        info!("Window refund requested for invoice {}", invoice_id);

        let now = self.clock.now();
        let mut state = self.state.write().await;

        let invoice = state
            .invoices
            .get(&invoice_id)
            .ok_or(InvoiceError::InvoiceNotFound(invoice_id))?;
        if !invoice.status.can_refund_after_window() {
            return Err(InvoiceError::NotEligibleForRefund);
        }
        let funded_at = invoice.payment_time.unwrap_or(Timestamp::ZERO);
        let window_end = funded_at
            .checked_add_secs(self.acceptance_window_secs)
            .ok_or(InvoiceError::ArithmeticOverflow)?;
        if now < window_end {
            return Err(InvoiceError::NotEligibleForRefund);
        }

        self.refund(&mut state, invoice_id, InvoiceStatus::Refunded, caller, now)
            .await
    }

    /// Override the hold period one invoice will get at acceptance
    ///
    /// Owner-only, and only while the invoice still awaits its decision.
    pub async fn set_invoice_hold_period(
        &self,
        caller: &PartyId,
        invoice_id: InvoiceId,
        hold_period_secs: u64,
    ) -> InvoiceResult<()> {
        if caller != &self.owner {
            return Err(InvoiceError::Unauthorized);
        }
        if hold_period_secs == 0 {
            return Err(InvoiceError::ZeroHoldPeriod);
        }

        let now = self.clock.now();
        let mut state = self.state.write().await;

        let invoice = state
            .invoices
            .get_mut(&invoice_id)
            .ok_or(InvoiceError::InvoiceNotFound(invoice_id))?;
        if !matches!(invoice.status, InvoiceStatus::Created | InvoiceStatus::Paid) {
            return Err(InvoiceError::InvalidInvoiceState {
                status: invoice.status,
            });
        }
        invoice.hold_period_override = Some(hold_period_secs);
        invoice.updated_at = now;

        record_event(
            &mut state,
            Some(invoice_id),
            Some(caller.clone()),
            InvoiceEventKind::HoldPeriodSet { hold_period_secs },
            now,
        );

        info!(
            "Invoice {}: hold period override set to {}s",
            invoice_id, hold_period_secs
        );

        Ok(())
    }

    /// Push an accepted invoice's release eligibility later
    ///
    /// The delta is unsigned, so the release time can only move forward.
    pub async fn extend_invoice_release_time(
        &self,
        caller: &PartyId,
        invoice_id: InvoiceId,
        additional_secs: u64,
    ) -> InvoiceResult<Timestamp> {
        if caller != &self.owner {
            return Err(InvoiceError::Unauthorized);
        }

        let now = self.clock.now();
        let mut state = self.state.write().await;

        let invoice = state
            .invoices
            .get_mut(&invoice_id)
            .ok_or(InvoiceError::InvoiceNotFound(invoice_id))?;
        if invoice.status != InvoiceStatus::Accepted {
            return Err(InvoiceError::InvalidInvoiceState {
                status: invoice.status,
            });
        }
        let current = invoice
            .release_eligible_at
            .ok_or(InvoiceError::InvalidInvoiceState {
                status: invoice.status,
            })?;
        let extended = current
            .checked_add_secs(additional_secs)
            .ok_or(InvoiceError::ArithmeticOverflow)?;
        invoice.release_eligible_at = Some(extended);
        invoice.updated_at = now;

        record_event(
            &mut state,
            Some(invoice_id),
            Some(caller.clone()),
            InvoiceEventKind::ReleaseTimeExtended {
                release_eligible_at: extended,
            },
            now,
        );

        info!(
            "Invoice {}: release time extended to {}",
            invoice_id, extended
        );

        Ok(extended)
    }

    /// Replace the fee policy
    ///
    /// Applies to payments made after the change; each payment is charged
    /// under the policy in view at payment time.
    pub async fn set_fee_policy(&self, caller: &PartyId, policy: FeePolicy) -> InvoiceResult<()> {
        if caller != &self.owner {
            return Err(InvoiceError::Unauthorized);
        }
        validate_fee_policy(&policy)?;

        let mut state = self.state.write().await;
        state.fee_policy = policy;

        info!("Fee policy set to {:?}", policy);

        Ok(())
    }

    /// Replace the default hold period for future acceptances
    pub async fn set_default_hold_period(
        &self,
        caller: &PartyId,
        hold_period_secs: u64,
    ) -> InvoiceResult<()> {
        if caller != &self.owner {
            return Err(InvoiceError::Unauthorized);
        }
        if hold_period_secs == 0 {
            return Err(InvoiceError::ZeroHoldPeriod);
        }

        let mut state = self.state.write().await;
        state.default_hold_period_secs = hold_period_secs;

        info!("Default hold period set to {}s", hold_period_secs);

        Ok(())
    }

    /// Replace the identity accrued fees are swept to
    pub async fn set_fee_receiver(&self, caller: &PartyId, receiver: PartyId) -> InvoiceResult<()> {
        if caller != &self.owner {
            return Err(InvoiceError::Unauthorized);
        }
        if receiver.is_empty() {
            return Err(InvoiceError::EmptyPartyId);
        }

        let mut state = self.state.write().await;
        info!("Fee receiver set to {}", receiver);
        state.fee_receiver = receiver;

        Ok(())
    }

    /// Sweep the accrued platform fees to the fee receiver
    ///
    /// Callable by the owner or the receiver itself. A zero balance sweeps
    /// nothing and records nothing.
    pub async fn withdraw_fees(&self, caller: &PartyId) -> InvoiceResult<u64> {
        let now = self.clock.now();
        let mut state = self.state.write().await;

        if caller != &self.owner && caller != &state.fee_receiver {
            return Err(InvoiceError::Unauthorized);
        }

        let amount = state.fee_balance;
        if amount == 0 {
            return Ok(0);
        }
        let receiver = state.fee_receiver.clone();

        // Balance zeroes ahead of the transfer and is restored on failure
        state.fee_balance = 0;
        if let Err(err) = self.rail.credit(&receiver, amount).await {
            warn!(
                "Fee sweep of {} to {} failed, restoring balance",
                amount, receiver
            );
            state.fee_balance = amount;
            return Err(err);
        }

        record_event(
            &mut state,
            None,
            Some(caller.clone()),
            InvoiceEventKind::FeesWithdrawn {
                receiver: receiver.clone(),
                amount,
            },
            now,
        );

        info!("Fees withdrawn: {} to {}", amount, receiver);

        Ok(amount)
    }

    /// Get an invoice record by ID
    pub async fn get_invoice(&self, invoice_id: InvoiceId) -> InvoiceResult<Invoice> {
        self.state
            .read()
            .await
            .invoices
            .get(&invoice_id)
            .cloned()
            .ok_or(InvoiceError::InvoiceNotFound(invoice_id))
    }

    /// ID the next created invoice will receive
    pub async fn next_invoice_id(&self) -> InvoiceId {
        InvoiceId::new(self.state.read().await.next_invoice_id)
    }

    /// Number of invoices ever created
    pub async fn total_invoices(&self) -> u64 {
        self.state.read().await.invoices.len() as u64
    }

    /// Current fee policy
    pub async fn fee_policy(&self) -> FeePolicy {
        self.state.read().await.fee_policy
    }

    /// Current fee receiver
    pub async fn fee_receiver(&self) -> PartyId {
        self.state.read().await.fee_receiver.clone()
    }

    /// Accrued, not yet swept platform fees
    pub async fn fee_balance(&self) -> u64 {
        self.state.read().await.fee_balance
    }

    /// Hold period applied when an accepted invoice has no override
    pub async fn default_hold_period_secs(&self) -> u64 {
        self.state.read().await.default_hold_period_secs
    }

    /// Remaining custody balance of an invoice's account (0 once paid out)
    pub async fn account_balance(&self, invoice_id: InvoiceId) -> InvoiceResult<u64> {
        let state = self.state.read().await;
        let invoice = state
            .invoices
            .get(&invoice_id)
            .ok_or(InvoiceError::InvoiceNotFound(invoice_id))?;
        let account_id = invoice
            .account
            .ok_or(InvoiceError::InvalidInvoiceState {
                status: invoice.status,
            })?;
        Ok(state
            .accounts
            .get(&account_id)
            .map(|account| account.balance())
            .unwrap_or(0))
    }

    /// The custodial account's own funding and payout records
    pub async fn account_events(&self, invoice_id: InvoiceId) -> InvoiceResult<Vec<AccountEvent>> {
        let state = self.state.read().await;
        let invoice = state
            .invoices
            .get(&invoice_id)
            .ok_or(InvoiceError::InvoiceNotFound(invoice_id))?;
        let account_id = invoice
            .account
            .ok_or(InvoiceError::InvalidInvoiceState {
                status: invoice.status,
            })?;
        Ok(state
            .accounts
            .get(&account_id)
            .map(|account| account.events().to_vec())
            .unwrap_or_default())
    }

    /// Sum of every custody balance still held, for conservation audits
    pub async fn open_custody_total(&self) -> u64 {
        self.state
            .read()
            .await
            .accounts
            .values()
            .map(|account| account.balance())
            .sum()
    }

    /// Snapshot of the whole processor log
    pub async fn events(&self) -> Vec<InvoiceEvent> {
        self.state.read().await.events.clone()
    }

    /// Processor log records correlated to one invoice
    pub async fn invoice_events(&self, invoice_id: InvoiceId) -> Vec<InvoiceEvent> {
        self.state
            .read()
            .await
            .events
            .iter()
            .filter(|event| event.invoice_id == Some(invoice_id))
            .cloned()
            .collect()
    }

    /// Serialize the processor log for external audit sinks
    pub async fn export_events(&self) -> InvoiceResult<String> {
        let state = self.state.read().await;
        Ok(serde_json::to_string_pretty(&state.events)?)
    }

    /// Administrative identity of this processor
    pub fn owner(&self) -> &PartyId {
        &self.owner
    }

    /// Move a paid invoice to its refunding terminal state and return the
    /// custody balance to the payer
    ///
    /// Status is written before the transfer and rolled back under the same
    /// lock if the rail refuses it.
    async fn refund(
        &self,
        state: &mut LedgerState,
        invoice_id: InvoiceId,
        terminal: InvoiceStatus,
        actor: &PartyId,
        now: Timestamp,
    ) -> InvoiceResult<Invoice> {
        let invoice = state
            .invoices
            .get(&invoice_id)
            .ok_or(InvoiceError::InvoiceNotFound(invoice_id))?;
        let prior_status = invoice.status;
        let prior_updated = invoice.updated_at;
        let payer = invoice
            .payer
            .clone()
            .ok_or(InvoiceError::InvalidInvoiceState {
                status: prior_status,
            })?;
        let account_id = invoice
            .account
            .ok_or(InvoiceError::InvalidInvoiceState {
                status: prior_status,
            })?;
        let mut account =
            state
                .accounts
                .remove(&account_id)
                .ok_or(InvoiceError::InvalidInvoiceState {
                    status: prior_status,
                })?;

        // Status commits ahead of the fund movement
        let invoice = state
            .invoices
            .get_mut(&invoice_id)
            .ok_or(InvoiceError::InvoiceNotFound(invoice_id))?;
        invoice.status = terminal;
        invoice.updated_at = now;

        let outcome = account.refund_to_payer(&self.controller, &payer, now).await;
        state.accounts.insert(account_id, account);

        match outcome {
            Ok(amount) => {
                if terminal == InvoiceStatus::Rejected {
                    record_event(
                        state,
                        Some(invoice_id),
                        Some(actor.clone()),
                        InvoiceEventKind::Rejected,
                        now,
                    );
                }
                record_event(
                    state,
                    Some(invoice_id),
                    Some(actor.clone()),
                    InvoiceEventKind::Refunded {
                        recipient: payer.clone(),
                        amount,
                    },
                    now,
                );

                info!(
                    "Invoice {} {}: refunded {} to payer {}",
                    invoice_id, terminal, amount, payer
                );

                state
                    .invoices
                    .get(&invoice_id)
                    .cloned()
                    .ok_or(InvoiceError::InvoiceNotFound(invoice_id))
            }
            Err(err) => {
                warn!(
                    "Invoice {}: refund transfer failed, rolling back to {}",
                    invoice_id, prior_status
                );
                if let Some(invoice) = state.invoices.get_mut(&invoice_id) {
                    invoice.status = prior_status;
                    invoice.updated_at = prior_updated;
                }
                Err(err)
            }
        }
    }
}

/// Record one event on the append-only processor log
fn record_event(
    state: &mut LedgerState,
    invoice_id: Option<InvoiceId>,
    actor: Option<PartyId>,
    kind: InvoiceEventKind,
    now: Timestamp,
) {
    let sequence = state.events.len() as u64 + 1;
    state.events.push(InvoiceEvent {
        sequence,
        invoice_id,
        actor,
        kind,
        occurred_at: now,
    });
}

/// Validate a fee policy against its variant's range
fn validate_fee_policy(policy: &FeePolicy) -> InvoiceResult<()> {
    match *policy {
        FeePolicy::Flat { amount } => {
            if amount == 0 {
                return Err(InvoiceError::ZeroFeeAmount);
            }
        }
        FeePolicy::Percentage { rate_bps } => {
            if rate_bps == 0 || rate_bps > MAX_FEE_RATE_BPS {
                return Err(InvoiceError::FeeRateOutOfRange { rate_bps });
            }
        }
    }
    Ok(())
}

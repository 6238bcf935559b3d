//! Deployment settings loaded from defaults, an optional file, and the
//! environment

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::InvoiceResult;
use crate::error::InvoiceError;
use crate::models::{FeePolicy, PartyId};
use crate::processor::{
    DEFAULT_ACCEPTANCE_WINDOW_SECS, DEFAULT_FLAT_FEE, DEFAULT_HOLD_PERIOD_SECS,
    DEFAULT_MIN_INVOICE_PRICE, DEFAULT_VALIDITY_PERIOD_SECS, ProcessorConfig,
};

/// Which fee policy variant a deployment runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeMode {
    Flat,
    Percentage,
}

/// Flat view of the processor configuration, suitable for files and
/// environment variables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Selects the fee variant; the matching field below supplies its value
    pub fee_mode: FeeMode,
    /// Fee per payment when `fee_mode` is `flat`
    pub flat_fee: u64,
    /// Fee rate in basis points when `fee_mode` is `percentage`
    pub fee_rate_bps: u16,
    /// Identity the accrued fees are swept to
    pub fee_receiver: String,
    /// Hold period applied at acceptance when an invoice has no override
    pub default_hold_period_secs: u64,
    /// How long after payment the creator may accept or reject
    pub acceptance_window_secs: u64,
    /// How long after creation an invoice remains payable
    pub validity_period_secs: u64,
    /// Price floor for new invoices under the percentage policy
    pub min_invoice_price: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            fee_mode: FeeMode::Flat,
            flat_fee: DEFAULT_FLAT_FEE,
            fee_rate_bps: 100, // 1%
            fee_receiver: "treasury".to_string(),
            default_hold_period_secs: DEFAULT_HOLD_PERIOD_SECS,
            acceptance_window_secs: DEFAULT_ACCEPTANCE_WINDOW_SECS,
            validity_period_secs: DEFAULT_VALIDITY_PERIOD_SECS,
            min_invoice_price: DEFAULT_MIN_INVOICE_PRICE,
        }
    }
}

impl EngineSettings {
    /// Load settings, layering an optional `invoice-engine` file and
    /// `INVOICE_ENGINE_*` environment variables over the defaults
    pub fn load() -> InvoiceResult<Self> {
        let defaults = Config::try_from(&EngineSettings::default())
            .map_err(|e| InvoiceError::config(e.to_string()))?;
        let merged = Config::builder()
            .add_source(defaults)
            .add_source(File::with_name("invoice-engine").required(false))
            .add_source(Environment::with_prefix("INVOICE_ENGINE").try_parsing(true))
            .build()
            .map_err(|e| InvoiceError::config(e.to_string()))?;
        merged
            .try_deserialize()
            .map_err(|e| InvoiceError::config(e.to_string()))
    }

    /// Convert into the processor configuration
    ///
    /// Range checks happen when the processor is constructed, not here.
    pub fn into_config(self) -> ProcessorConfig {
        let fee_policy = match self.fee_mode {
            FeeMode::Flat => FeePolicy::Flat {
                amount: self.flat_fee,
            },
            FeeMode::Percentage => FeePolicy::Percentage {
                rate_bps: self.fee_rate_bps,
            },
        };
        ProcessorConfig {
            fee_policy,
            fee_receiver: PartyId::new(self.fee_receiver),
            default_hold_period_secs: self.default_hold_period_secs,
            acceptance_window_secs: self.acceptance_window_secs,
            validity_period_secs: self.validity_period_secs,
            min_invoice_price: self.min_invoice_price,
        }
    }
}

//! Payment provider abstraction: invoice creation, balance transfers, and
//! exchange rates. The real client speaks the Crypto Pay HTTP API; the demo
//! provider fakes the same surface in memory.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::Asset;
use thiserror::Error;

pub mod client;
pub mod demo;
pub mod webhook;

pub use client::CryptoPayClient;
pub use demo::DemoProvider;

#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("Provider request timed out")]
    Timeout,

    #[error("Provider rate limit hit")]
    RateLimited,

    #[error("Provider rejected credentials")]
    Unauthorized,

    #[error("Asset not supported by provider")]
    InvalidAsset,

    #[error("Provider rejected destination address")]
    InvalidAddress,

    #[error("Provider object not found")]
    NotFound,

    #[error("Provider balance too low to dispatch")]
    InsufficientHouse,

    #[error("Malformed provider response: {0}")]
    Malformed(String),

    #[error("Provider HTTP error {status}: {message}")]
    Http { status: u16, message: String },
}

impl ProviderError {
    /// Transient errors are worth retrying; everything else is terminal for
    /// the attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Timeout | ProviderError::RateLimited)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Active,
    Paid,
    Expired,
}

/// Provider-side invoice. Amounts are crypto-denominated strings on the
/// wire; we parse them at the edge.
#[derive(Debug, Clone, Deserialize)]
pub struct Invoice {
    pub invoice_id: i64,
    pub status: InvoiceStatus,
    pub asset: String,
    pub amount: String,
    #[serde(alias = "bot_invoice_url")]
    pub pay_url: String,
    pub created_at: Option<String>,
    pub paid_at: Option<String>,
}

impl Invoice {
    pub fn crypto_amount(&self) -> Result<f64, ProviderError> {
        self.amount
            .parse::<f64>()
            .map_err(|_| ProviderError::Malformed(format!("bad invoice amount {:?}", self.amount)))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateInvoice {
    pub asset: Asset,
    /// Crypto amount, 8 decimal places.
    pub amount: String,
    pub description: String,
    pub expires_in_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    Completed,
    Failed,
}

/// Outbound transfer receipt.
#[derive(Debug, Clone, Deserialize)]
pub struct Transfer {
    pub transfer_id: i64,
    pub spend_id: String,
    pub status: TransferStatus,
    pub tx_hash: Option<String>,
    #[serde(default)]
    pub confirmations: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateTransfer {
    pub asset: Asset,
    /// Crypto amount, 8 decimal places.
    pub amount: String,
    pub destination_address: String,
    /// Idempotency key; the provider must collapse duplicate spend_ids.
    pub spend_id: String,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeRate {
    pub source: String,
    pub target: String,
    pub rate: f64,
}

/// Everything the coordinators need from a payment backend.
#[async_trait]
pub trait PayProvider: Send + Sync {
    async fn create_invoice(&self, req: CreateInvoice) -> Result<Invoice, ProviderError>;

    async fn get_invoice(&self, invoice_id: i64) -> Result<Invoice, ProviderError>;

    async fn transfer(&self, req: CreateTransfer) -> Result<Transfer, ProviderError>;

    /// Look up a previously dispatched transfer by its idempotency key.
    async fn get_transfer(&self, spend_id: &str) -> Result<Transfer, ProviderError>;

    /// USD rates for all supported assets.
    async fn get_rates(&self) -> Result<Vec<ExchangeRate>, ProviderError>;
}

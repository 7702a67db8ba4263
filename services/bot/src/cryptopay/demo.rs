//! In-memory provider for demo mode: no network, invoices "pay" on first
//! poll, transfers complete instantly with a fake hash.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use super::{
    CreateInvoice, CreateTransfer, ExchangeRate, Invoice, InvoiceStatus, PayProvider,
    ProviderError, Transfer, TransferStatus,
};

pub struct DemoProvider {
    next_invoice_id: AtomicI64,
    next_transfer_id: AtomicI64,
    invoices: Mutex<HashMap<i64, Invoice>>,
    transfers: Mutex<HashMap<String, Transfer>>,
}

impl DemoProvider {
    pub fn new() -> Self {
        Self {
            next_invoice_id: AtomicI64::new(1),
            next_transfer_id: AtomicI64::new(1),
            invoices: Mutex::new(HashMap::new()),
            transfers: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for DemoProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PayProvider for DemoProvider {
    async fn create_invoice(&self, req: CreateInvoice) -> Result<Invoice, ProviderError> {
        let id = self.next_invoice_id.fetch_add(1, Ordering::Relaxed);
        let invoice = Invoice {
            invoice_id: id,
            status: InvoiceStatus::Active,
            asset: req.asset.ticker().to_string(),
            amount: req.amount,
            pay_url: format!("https://demo.invalid/pay/{}", id),
            created_at: None,
            paid_at: None,
        };
        self.invoices
            .lock()
            .expect("demo invoice map poisoned")
            .insert(id, invoice.clone());
        Ok(invoice)
    }

    async fn get_invoice(&self, invoice_id: i64) -> Result<Invoice, ProviderError> {
        let mut invoices = self.invoices.lock().expect("demo invoice map poisoned");
        let invoice = invoices.get_mut(&invoice_id).ok_or(ProviderError::NotFound)?;
        // Demo payments clear on the first status check.
        invoice.status = InvoiceStatus::Paid;
        Ok(invoice.clone())
    }

    async fn transfer(&self, req: CreateTransfer) -> Result<Transfer, ProviderError> {
        let mut transfers = self.transfers.lock().expect("demo transfer map poisoned");
        if let Some(existing) = transfers.get(&req.spend_id) {
            return Ok(existing.clone());
        }
        let transfer = Transfer {
            transfer_id: self.next_transfer_id.fetch_add(1, Ordering::Relaxed),
            spend_id: req.spend_id.clone(),
            status: TransferStatus::Completed,
            tx_hash: Some(format!("demo-{}", Uuid::new_v4())),
            confirmations: 6,
        };
        transfers.insert(req.spend_id, transfer.clone());
        Ok(transfer)
    }

    async fn get_transfer(&self, spend_id: &str) -> Result<Transfer, ProviderError> {
        self.transfers
            .lock()
            .expect("demo transfer map poisoned")
            .get(spend_id)
            .cloned()
            .ok_or(ProviderError::NotFound)
    }

    async fn get_rates(&self) -> Result<Vec<ExchangeRate>, ProviderError> {
        Ok(vec![
            ExchangeRate {
                source: "LTC".into(),
                target: "USD".into(),
                rate: 70.0,
            },
            ExchangeRate {
                source: "TON".into(),
                target: "USD".into(),
                rate: 5.0,
            },
            ExchangeRate {
                source: "SOL".into(),
                target: "USD".into(),
                rate: 150.0,
            },
        ])
    }
}

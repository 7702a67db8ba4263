//! HTTP client for the Crypto Pay API
//!
//! Timeouts and rate limits are retried with exponential backoff up to the
//! configured attempt budget; every other error surfaces immediately.

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use shared::constants::{PROVIDER_MAX_RETRIES, PROVIDER_TIMEOUT_SECS};

use super::{
    CreateInvoice, CreateTransfer, ExchangeRate, Invoice, PayProvider, ProviderError, Transfer,
};
use crate::retry::RetryStrategy;

pub struct CryptoPayClient {
    http: Client,
    base_url: String,
    retry: RetryStrategy,
}

#[derive(Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    error: Option<ApiErrorBody>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    name: String,
}

#[derive(Deserialize)]
struct Items<T> {
    items: Vec<T>,
}

impl CryptoPayClient {
    pub fn new(base_url: String, api_token: &str) -> Result<Self, ProviderError> {
        let mut headers = reqwest::header::HeaderMap::new();
        let mut token = reqwest::header::HeaderValue::from_str(api_token)
            .map_err(|_| ProviderError::Unauthorized)?;
        token.set_sensitive(true);
        headers.insert("Crypto-Pay-API-Token", token);

        let http = Client::builder()
            .timeout(Duration::from_secs(PROVIDER_TIMEOUT_SECS))
            .default_headers(headers)
            .build()
            .map_err(|e| ProviderError::Http {
                status: 0,
                message: e.to_string(),
            })?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry: RetryStrategy::new(PROVIDER_MAX_RETRIES),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<T, ProviderError> {
        let url = format!("{}/api/{}", self.base_url, method);
        let mut backoff = self.retry.create_backoff();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match self.call_once(&url, &body).await {
                Ok(result) => return Ok(result),
                Err(e) if self.retry.is_retryable(&e) && self.retry.should_retry(attempt) => {
                    let delay = backoff.next_backoff().unwrap_or(Duration::from_secs(10));
                    tracing::warn!(
                        method = %method,
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Provider call failed, retrying"
                    );
                    metrics::counter!("provider_retries_total", "method" => method.to_string())
                        .increment(1);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    metrics::counter!("provider_errors_total", "method" => method.to_string())
                        .increment(1);
                    return Err(e);
                }
            }
        }
    }

    async fn call_once<T: DeserializeOwned>(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<T, ProviderError> {
        let resp = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    ProviderError::Timeout
                } else {
                    ProviderError::Http {
                        status: 0,
                        message: e.to_string(),
                    }
                }
            })?;

        let status = resp.status();
        match status.as_u16() {
            401 | 403 => return Err(ProviderError::Unauthorized),
            429 => return Err(ProviderError::RateLimited),
            502 | 503 | 504 => return Err(ProviderError::Timeout),
            _ => {}
        }

        let envelope: ApiResponse<T> = resp
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        if envelope.ok {
            envelope
                .result
                .ok_or_else(|| ProviderError::Malformed("ok response without result".into()))
        } else {
            let err = envelope.error.unwrap_or(ApiErrorBody {
                code: 0,
                name: String::new(),
            });
            Err(classify_api_error(status.as_u16(), &err))
        }
    }
}

fn classify_api_error(status: u16, err: &ApiErrorBody) -> ProviderError {
    let name = err.name.to_ascii_uppercase();
    if name.contains("ASSET") {
        ProviderError::InvalidAsset
    } else if name.contains("ADDRESS") {
        ProviderError::InvalidAddress
    } else if name.contains("NOT_FOUND") {
        ProviderError::NotFound
    } else if name.contains("ENOUGH") || name.contains("INSUFFICIENT") {
        ProviderError::InsufficientHouse
    } else {
        ProviderError::Http {
            status,
            message: format!("{} ({})", err.name, err.code),
        }
    }
}

#[async_trait]
impl PayProvider for CryptoPayClient {
    async fn create_invoice(&self, req: CreateInvoice) -> Result<Invoice, ProviderError> {
        self.call(
            "createInvoice",
            json!({
                "asset": req.asset.ticker(),
                "amount": req.amount,
                "description": req.description,
                "expires_in": req.expires_in_secs,
            }),
        )
        .await
    }

    async fn get_invoice(&self, invoice_id: i64) -> Result<Invoice, ProviderError> {
        let found: Items<Invoice> = self
            .call(
                "getInvoices",
                json!({ "invoice_ids": invoice_id.to_string() }),
            )
            .await?;
        found
            .items
            .into_iter()
            .next()
            .ok_or(ProviderError::NotFound)
    }

    async fn transfer(&self, req: CreateTransfer) -> Result<Transfer, ProviderError> {
        self.call(
            "transfer",
            json!({
                "asset": req.asset.ticker(),
                "amount": req.amount,
                "destination_address": req.destination_address,
                "spend_id": req.spend_id,
                "comment": req.comment,
            }),
        )
        .await
    }

    async fn get_transfer(&self, spend_id: &str) -> Result<Transfer, ProviderError> {
        let found: Items<Transfer> = self
            .call("getTransfers", json!({ "spend_id": spend_id }))
            .await?;
        found
            .items
            .into_iter()
            .next()
            .ok_or(ProviderError::NotFound)
    }

    async fn get_rates(&self) -> Result<Vec<ExchangeRate>, ProviderError> {
        let rates: Vec<ExchangeRate> = self.call("getExchangeRates", json!({})).await?;
        Ok(rates.into_iter().filter(|r| r.target == "USD").collect())
    }
}

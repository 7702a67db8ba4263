//! Provider webhook endpoint.
//!
//! The HMAC signature over the raw body is checked before anything is
//! parsed; a bad or missing signature is a 401. After that the endpoint
//! always answers 200 so the provider stops re-delivering: crediting is
//! idempotent and a transient processing failure heals on the next retry
//! or poll.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};

use crate::cryptopay::webhook::{parse_update, verify_signature, SIGNATURE_HEADER};
use crate::state::AppState;

pub async fn cryptopay_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if !verify_signature(&state.config.cryptopay.webhook_secret, &body, signature) {
        tracing::warn!("Webhook rejected: bad signature");
        metrics::counter!("webhook_bad_signature_total").increment(1);
        return StatusCode::UNAUTHORIZED;
    }

    let update = match parse_update(&body) {
        Ok(update) => update,
        Err(e) => {
            tracing::warn!(error = %e, "Webhook body unparseable");
            return StatusCode::OK;
        }
    };

    if !update.is_invoice_paid() {
        tracing::debug!(update_type = %update.update_type, "Ignoring webhook update");
        return StatusCode::OK;
    }

    match state.deposits.on_invoice_paid(update.payload.invoice_id).await {
        Ok(Some(credited)) if credited.duplicate => {
            tracing::debug!(
                invoice_id = update.payload.invoice_id,
                "Webhook replay, already credited"
            );
        }
        Ok(Some(_)) => {}
        Ok(None) => {}
        Err(e) => {
            // Still 200: the reference index makes the retry safe.
            tracing::error!(
                invoice_id = update.payload.invoice_id,
                error = %e,
                "Webhook credit failed, awaiting redelivery"
            );
        }
    }
    StatusCode::OK
}

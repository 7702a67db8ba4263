//! Webhook payload verification and parsing.
//!
//! The provider signs the raw request body with HMAC-SHA256 under the
//! shared webhook secret and sends the hex digest in the
//! `Crypto-Pay-API-Signature` header. Verification runs before any parsing
//! and is constant-time.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use super::{Invoice, ProviderError};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "Crypto-Pay-API-Signature";

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookUpdate {
    pub update_id: i64,
    pub update_type: String,
    pub payload: Invoice,
}

impl WebhookUpdate {
    pub fn is_invoice_paid(&self) -> bool {
        self.update_type == "invoice_paid"
    }
}

/// Check the hex HMAC signature over the raw body.
pub fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(body);
    mac.verify_slice(&signature).is_ok()
}

pub fn parse_update(body: &[u8]) -> Result<WebhookUpdate, ProviderError> {
    serde_json::from_slice(body).map_err(|e| ProviderError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn test_valid_signature_accepted() {
        let body = br#"{"update_id":1}"#;
        let sig = sign("topsecret", body);
        assert!(verify_signature("topsecret", body, &sig));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let body = br#"{"update_id":1}"#;
        let sig = sign("topsecret", body);
        assert!(!verify_signature("other", body, &sig));
    }

    #[test]
    fn test_tampered_body_rejected() {
        let sig = sign("topsecret", br#"{"update_id":1}"#);
        assert!(!verify_signature("topsecret", br#"{"update_id":2}"#, &sig));
    }

    #[test]
    fn test_non_hex_signature_rejected() {
        assert!(!verify_signature("topsecret", b"{}", "not-hex!"));
    }

    #[test]
    fn test_parse_invoice_paid() {
        let body = br#"{
            "update_id": 42,
            "update_type": "invoice_paid",
            "payload": {
                "invoice_id": 7,
                "status": "paid",
                "asset": "LTC",
                "amount": "0.71428571",
                "pay_url": "https://pay.invalid/7",
                "created_at": null,
                "paid_at": "2025-01-01T00:00:00Z"
            }
        }"#;
        let update = parse_update(body).unwrap();
        assert!(update.is_invoice_paid());
        assert_eq!(update.payload.invoice_id, 7);
        assert!((update.payload.crypto_amount().unwrap() - 0.71428571).abs() < 1e-12);
    }
}

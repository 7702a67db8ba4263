/// Supported crypto assets and on-chain address validation
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unsupported asset: {0}")]
pub struct UnsupportedAsset(pub String);

/// Assets the payment provider accepts for deposits and withdrawals.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum Asset {
    Ltc,
    Ton,
    Sol,
}

static LTC_ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[LM3][a-km-zA-HJ-NP-Z1-9]{26,33}$|^ltc1[qpzry9x8gf2tvdw0s3jn54khce6mua7l]{39,59}$",
    )
    .unwrap()
});

static TON_ADDRESS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^UQ[a-zA-Z0-9_-]{46,}$").unwrap());

static SOL_ADDRESS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[1-9A-HJ-NP-Za-km-z]{32,44}$").unwrap());

impl Asset {
    pub const ALL: [Asset; 3] = [Asset::Ltc, Asset::Ton, Asset::Sol];

    pub fn ticker(&self) -> &'static str {
        match self {
            Asset::Ltc => "LTC",
            Asset::Ton => "TON",
            Asset::Sol => "SOL",
        }
    }

    /// Format check only; no checksum or on-chain existence validation.
    pub fn validate_address(&self, address: &str) -> bool {
        match self {
            Asset::Ltc => LTC_ADDRESS.is_match(address),
            Asset::Ton => TON_ADDRESS.is_match(address),
            Asset::Sol => SOL_ADDRESS.is_match(address),
        }
    }
}

impl std::str::FromStr for Asset {
    type Err = UnsupportedAsset;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LTC" => Ok(Asset::Ltc),
            "TON" => Ok(Asset::Ton),
            "SOL" => Ok(Asset::Sol),
            other => Err(UnsupportedAsset(other.to_string())),
        }
    }
}

impl std::fmt::Display for Asset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.ticker())
    }
}

/// Crypto quantities travel as 8-decimal strings on the provider wire.
pub fn format_crypto_amount(amount: f64) -> String {
    format!("{:.8}", amount)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ltc_accepts_legacy_and_bech32() {
        let a = Asset::Ltc;
        assert!(a.validate_address("LVg2kJoFNg45Nbpy53h7Fe1wKyeXVRhMH9"));
        assert!(a.validate_address("MJRSgZ3UUFcTBTBAaN38XAXvZLwRe8WVw7"));
        assert!(a.validate_address(&format!("ltc1{}", "q".repeat(39))));
        assert!(!a.validate_address("0x52908400098527886E0F7030069857D2E4169EE7"));
        assert!(!a.validate_address("LVg2"));
    }

    #[test]
    fn ton_requires_uq_prefix() {
        let addr = format!("UQ{}", "A1-_".repeat(12)); // 48 chars after prefix
        assert!(Asset::Ton.validate_address(&addr));
        assert!(!Asset::Ton.validate_address("EQabcdef"));
    }

    #[test]
    fn sol_is_base58_of_plausible_length() {
        assert!(Asset::Sol.validate_address("7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU"));
        assert!(!Asset::Sol.validate_address("0OIl")); // excluded alphabet
        assert!(!Asset::Sol.validate_address("abc"));
    }

    #[test]
    fn parses_tickers_case_insensitively() {
        use std::str::FromStr;
        assert_eq!(Asset::from_str("ltc").unwrap(), Asset::Ltc);
        assert_eq!(Asset::from_str("TON").unwrap(), Asset::Ton);
        assert!(Asset::from_str("USDT").is_err());
    }

    #[test]
    fn crypto_amounts_carry_eight_decimals() {
        assert_eq!(format_crypto_amount(50.0 / 70.0), "0.71428571");
        assert_eq!(format_crypto_amount(1.4), "1.40000000");
    }
}

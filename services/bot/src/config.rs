use serde::Deserialize;
use shared::Cents;
use std::env;

use crate::domain::UserId;

/// Which exchange rate a confirmed deposit is credited at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreditRatePolicy {
    /// Re-read the oracle when the invoice is paid (default).
    Confirmation,
    /// Honor the rate captured when the invoice was quoted.
    Quote,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub bot_token: String,
    pub db_path: String,
    pub demo_mode: bool,
    pub port: u16,
    pub metrics_port: u16,
    pub owner_user_id: UserId,
    pub admin_user_ids: Vec<UserId>,
    pub cryptopay: CryptoPayConfig,
    pub deposits: DepositConfig,
    pub withdrawals: WithdrawalConfig,
    pub games: GameConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CryptoPayConfig {
    pub base_url: String,
    pub api_token: String,
    pub webhook_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DepositConfig {
    pub min: Cents,
    pub max: Cents,
    pub credit_rate: CreditRatePolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WithdrawalConfig {
    pub min: Cents,
    pub max: Cents,
    pub daily_max: Cents,
    pub fee_bps: i64,
    pub cooldown_secs: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GameConfig {
    pub max_bet: Cents,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let demo_mode = env::var("DEMO_MODE")
            .unwrap_or_else(|_| "false".to_string())
            .eq_ignore_ascii_case("true");

        let api_token = if demo_mode {
            env::var("CRYPTOBOT_API_TOKEN").unwrap_or_default()
        } else {
            env::var("CRYPTOBOT_API_TOKEN").expect("CRYPTOBOT_API_TOKEN must be set")
        };

        let admin_user_ids = env::var("ADMIN_USER_IDS")
            .unwrap_or_default()
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.trim().parse())
            .collect::<std::result::Result<Vec<UserId>, _>>()?;

        Ok(Config {
            bot_token: env::var("BOT_TOKEN").expect("BOT_TOKEN must be set"),
            db_path: env::var("DB_PATH").unwrap_or_else(|_| "casino.db".to_string()),
            demo_mode,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8001".to_string())
                .parse()?,
            metrics_port: env::var("METRICS_PORT")
                .unwrap_or_else(|_| "9001".to_string())
                .parse()?,
            owner_user_id: env::var("OWNER_USER_ID")
                .unwrap_or_else(|_| "0".to_string())
                .parse()?,
            admin_user_ids,
            cryptopay: CryptoPayConfig {
                base_url: env::var("CRYPTOBOT_BASE_URL")
                    .unwrap_or_else(|_| "https://pay.crypt.bot".to_string()),
                api_token,
                webhook_secret: env::var("CRYPTOBOT_WEBHOOK_SECRET").unwrap_or_default(),
            },
            deposits: DepositConfig {
                min: Cents::new(shared::DEPOSIT_MIN_CENTS),
                max: Cents::new(shared::DEPOSIT_MAX_CENTS),
                credit_rate: match env::var("DEPOSIT_CREDIT_RATE")
                    .unwrap_or_else(|_| "confirmation".to_string())
                    .to_ascii_lowercase()
                    .as_str()
                {
                    "quote" => CreditRatePolicy::Quote,
                    _ => CreditRatePolicy::Confirmation,
                },
            },
            withdrawals: WithdrawalConfig {
                min: parse_usd_env("MIN_WITHDRAWAL_USD", "1.00")?,
                max: parse_usd_env("MAX_WITHDRAWAL_USD", "10000")?,
                daily_max: parse_usd_env("MAX_WITHDRAWAL_USD_DAILY", "10000")?,
                fee_bps: parse_fraction_bps("WITHDRAWAL_FEE_PERCENT", "0.02")?,
                cooldown_secs: env::var("WITHDRAWAL_COOLDOWN_SECONDS")
                    .unwrap_or_else(|_| "300".to_string())
                    .parse()?,
            },
            games: GameConfig {
                max_bet: parse_usd_env("MAX_BET_PER_GAME", "1000")?,
            },
        })
    }

    pub fn is_owner(&self, user_id: UserId) -> bool {
        user_id == self.owner_user_id && user_id != 0
    }

    pub fn is_admin(&self, user_id: UserId) -> bool {
        self.is_owner(user_id) || self.admin_user_ids.contains(&user_id)
    }
}

fn parse_usd_env(key: &str, default: &str) -> anyhow::Result<Cents> {
    let raw: f64 = env::var(key).unwrap_or_else(|_| default.to_string()).parse()?;
    Cents::from_f64_dollars(raw).map_err(|e| anyhow::anyhow!("{}: {}", key, e))
}

/// Fractions in env (e.g. 0.02 = 2%) become basis points internally.
fn parse_fraction_bps(key: &str, default: &str) -> anyhow::Result<i64> {
    let raw: f64 = env::var(key).unwrap_or_else(|_| default.to_string()).parse()?;
    if !(0.0..1.0).contains(&raw) {
        anyhow::bail!("{} must be a fraction in [0, 1)", key);
    }
    Ok((raw * shared::BPS_DENOMINATOR as f64).round() as i64)
}

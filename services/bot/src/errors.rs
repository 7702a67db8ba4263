use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use shared::Cents;

use crate::cryptopay::ProviderError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // User errors: shown verbatim to the player.
    #[error("Insufficient balance")]
    InsufficientFunds,

    #[error("Amount out of bounds: must be between {min} and {max}")]
    AmountOutOfBounds { min: Cents, max: Cents },

    #[error("Invalid {asset} address")]
    InvalidAddress { asset: shared::Asset },

    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("Please wait {remaining_secs}s before the next withdrawal")]
    CooldownActive { remaining_secs: i64 },

    #[error("Prompt superseded or expired")]
    PromptSuperseded,

    #[error("Account is banned")]
    UserBanned,

    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    // Transient system errors: retried internally, then surfaced generically.
    #[error("Exchange rate unavailable")]
    RateUnavailable,

    #[error("Payment provider error: {0}")]
    Provider(#[from] ProviderError),

    // Hard system errors: never retried blindly, alert the operator.
    #[error("Database error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Accounting invariant violated: {0}")]
    AccountingInvariant(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }

    /// Stable machine-readable code, used for logging and metrics labels.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InsufficientFunds => "INSUFFICIENT_FUNDS",
            AppError::AmountOutOfBounds { .. } => "AMOUNT_OUT_OF_BOUNDS",
            AppError::InvalidAddress { .. } => "INVALID_ADDRESS",
            AppError::LimitExceeded(_) => "LIMIT_EXCEEDED",
            AppError::CooldownActive { .. } => "COOLDOWN_ACTIVE",
            AppError::PromptSuperseded => "PROMPT_SUPERSEDED",
            AppError::UserBanned => "USER_BANNED",
            AppError::InvalidSelection(_) => "INVALID_SELECTION",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::RateUnavailable => "RATE_UNAVAILABLE",
            AppError::Provider(_) => "PROVIDER_ERROR",
            AppError::Storage(_) => "STORAGE_ERROR",
            AppError::AccountingInvariant(_) => "ACCOUNTING_INVARIANT",
            AppError::Internal(_) => "INTERNAL",
        }
    }

    /// True for errors the user can fix; these are never logged as failures.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            AppError::InsufficientFunds
                | AppError::AmountOutOfBounds { .. }
                | AppError::InvalidAddress { .. }
                | AppError::LimitExceeded(_)
                | AppError::CooldownActive { .. }
                | AppError::PromptSuperseded
                | AppError::UserBanned
                | AppError::InvalidSelection(_)
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::InsufficientFunds
            | AppError::AmountOutOfBounds { .. }
            | AppError::InvalidAddress { .. }
            | AppError::LimitExceeded(_)
            | AppError::CooldownActive { .. }
            | AppError::PromptSuperseded
            | AppError::UserBanned
            | AppError::InvalidSelection(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::RateUnavailable | AppError::Provider(_) => {
                tracing::warn!(error = %self, "Transient upstream failure");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Temporary issue, try again".to_string(),
                )
            }
            AppError::Storage(e) => {
                tracing::error!("Database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }
            AppError::AccountingInvariant(msg) => {
                tracing::error!(detail = %msg, "Accounting invariant violated");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        metrics::counter!("errors_total", "code" => self.code()).increment(1);

        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

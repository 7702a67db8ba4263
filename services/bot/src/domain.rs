use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{Asset, Cents};

/// Chat-platform user id, opaque to us.
pub type UserId = i64;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    pub balance: Cents,
    pub games_played: i64,
    pub total_wagered: Cents,
    pub total_won: Cents,
    pub total_deposited: Cents,
    pub total_withdrawn: Cents,
    pub current_win_streak: i64,
    pub max_win_streak: i64,
    pub biggest_win: Cents,
    pub referral_code: Option<String>,
    pub referred_by: Option<UserId>,
    pub last_bonus_claim: Option<DateTime<Utc>>,
    pub banned: bool,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

/// Ledger transaction kind; one row per balance-changing event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TxKind {
    Deposit,
    Withdrawal,
    Bet,
    Win,
    Bonus,
    ReferralCommission,
    AdminAdjust,
    HouseOperation,
    Refund,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

/// Append-only ledger row. `amount` is signed: positive credits the user.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LedgerTx {
    pub id: String,
    pub user_id: UserId,
    pub kind: TxKind,
    pub subkind: String,
    pub amount: Cents,
    pub crypto_asset: Option<Asset>,
    pub crypto_amount: Option<f64>,
    pub exchange_rate: Option<f64>,
    pub fee: Option<Cents>,
    pub balance_before: Cents,
    pub balance_after: Cents,
    pub reference_id: Option<String>,
    pub game_session_id: Option<String>,
    pub status: TxStatus,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

/// Optional metadata attached to a ledger operation.
#[derive(Debug, Clone, Default)]
pub struct TxMeta {
    pub crypto_asset: Option<Asset>,
    pub crypto_amount: Option<f64>,
    pub exchange_rate: Option<f64>,
    pub fee: Option<Cents>,
    /// External id; unique-indexed, duplicate inserts collapse to the
    /// original row (webhook idempotency).
    pub reference_id: Option<String>,
    pub game_session_id: Option<String>,
    pub description: String,
}

impl TxMeta {
    pub fn described(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn with_reference(mut self, reference_id: impl Into<String>) -> Self {
        self.reference_id = Some(reference_id.into());
        self
    }
}

/// Emitted after a ledger transaction commits; never on rollback.
#[derive(Debug, Clone)]
pub struct LedgerEvent {
    pub tx_id: String,
    pub user_id: UserId,
    pub kind: TxKind,
    pub amount: Cents,
    pub fee: Option<Cents>,
    pub balance_after: Cents,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
pub enum GameKind {
    #[serde(rename = "slots")]
    #[sqlx(rename = "slots")]
    Slots,
    #[serde(rename = "dice")]
    #[sqlx(rename = "dice")]
    Dice,
    #[serde(rename = "blackjack")]
    #[sqlx(rename = "blackjack")]
    Blackjack,
    #[serde(rename = "coinflip")]
    #[sqlx(rename = "coinflip")]
    Coinflip,
    #[serde(rename = "dice-predict")]
    #[sqlx(rename = "dice-predict")]
    DicePredict,
    #[serde(rename = "basketball-predict")]
    #[sqlx(rename = "basketball-predict")]
    BasketballPredict,
    #[serde(rename = "soccer-predict")]
    #[sqlx(rename = "soccer-predict")]
    SoccerPredict,
    #[serde(rename = "bowling-predict")]
    #[sqlx(rename = "bowling-predict")]
    BowlingPredict,
    #[serde(rename = "darts-predict")]
    #[sqlx(rename = "darts-predict")]
    DartsPredict,
    #[serde(rename = "basketball-1v1")]
    #[sqlx(rename = "basketball-1v1")]
    Basketball1v1,
    #[serde(rename = "dice-1v1")]
    #[sqlx(rename = "dice-1v1")]
    Dice1v1,
}

impl GameKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameKind::Slots => "slots",
            GameKind::Dice => "dice",
            GameKind::Blackjack => "blackjack",
            GameKind::Coinflip => "coinflip",
            GameKind::DicePredict => "dice-predict",
            GameKind::BasketballPredict => "basketball-predict",
            GameKind::SoccerPredict => "soccer-predict",
            GameKind::BowlingPredict => "bowling-predict",
            GameKind::DartsPredict => "darts-predict",
            GameKind::Basketball1v1 => "basketball-1v1",
            GameKind::Dice1v1 => "dice-1v1",
        }
    }
}

impl std::fmt::Display for GameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ResultLabel {
    Win,
    Loss,
    Tie,
    Partial,
}

/// Settled game round. Created after the bet debit, closed before the win
/// credit, inside one ledger transaction group.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct GameSession {
    pub id: String,
    pub user_id: UserId,
    pub game_kind: GameKind,
    pub variant: Option<String>,
    pub bet_amount: Cents,
    pub win_amount: Cents,
    pub net_result: Cents,
    pub multiplier_bps: i64,
    /// Structured selections/outcome/animation payload, JSON-encoded.
    pub game_data: String,
    pub result_label: ResultLabel,
    pub created_at: DateTime<Utc>,
}

/// Input to the ledger when settling a game.
#[derive(Debug, Clone)]
pub struct NewGameSession {
    pub game_kind: GameKind,
    pub variant: Option<String>,
    pub bet_amount: Cents,
    pub win_amount: Cents,
    pub multiplier_bps: i64,
    pub game_data: serde_json::Value,
    pub result_label: ResultLabel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum DepositState {
    Quoted,
    AwaitingPayment,
    Paid,
    Expired,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Deposit {
    pub id: String,
    pub user_id: UserId,
    pub asset: Asset,
    pub crypto_amount: f64,
    pub fiat_amount: Cents,
    pub rate_at_quote: f64,
    pub invoice_id: String,
    pub pay_url: String,
    pub state: DepositState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum WithdrawalState {
    Pending,
    Dispatching,
    Dispatched,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Withdrawal {
    pub id: String,
    pub user_id: UserId,
    pub asset: Asset,
    pub fiat_amount: Cents,
    pub fee: Cents,
    pub net_fiat: Cents,
    pub net_crypto: f64,
    pub destination_address: String,
    pub rate_at_request: f64,
    /// Provider idempotency key, fixed at request time (demo mode included).
    pub spend_id: String,
    pub state: WithdrawalState,
    pub tx_hash: Option<String>,
    pub error_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

/// The single house bookkeeping row; mirrors every player-facing flow.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct HouseAggregate {
    pub balance: Cents,
    pub total_player_losses: Cents,
    pub total_player_wins: Cents,
    pub total_deposits: Cents,
    pub total_withdrawals: Cents,
    pub total_fees_collected: Cents,
    pub total_bonuses_paid: Cents,
    pub games_played_today: i64,
    pub revenue_today: Cents,
    pub profit_today: Cents,
    pub last_updated: DateTime<Utc>,
    pub last_daily_reset: DateTime<Utc>,
}

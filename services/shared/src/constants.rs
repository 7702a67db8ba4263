/// Shared constants for the casino wagering and ledger engine
///
/// Centralizes the magic numbers so the ledger, game engine, and payment
/// coordinators cannot drift apart.

/// House edge applied to every prediction payout, in basis points (5%).
///
/// payout multiplier = (|options| / selections) * (1 - edge)
pub const HOUSE_EDGE_BPS: i64 = 500;

/// Basis-point denominator used throughout payout math.
pub const BPS_DENOMINATOR: i64 = 10_000;

/// Minimum prediction-game bet in cents ($0.50).
pub const BET_MIN_CENTS: i64 = 50;

/// Minimum deposit in cents ($1).
pub const DEPOSIT_MIN_CENTS: i64 = 100;

/// Maximum deposit in cents ($10,000).
///
/// Anti-whale limit: a single invoice cannot exceed the amount the house
/// can plausibly cover in payouts.
pub const DEPOSIT_MAX_CENTS: i64 = 1_000_000;

/// Provider invoice lifetime in seconds (1 hour).
pub const INVOICE_TTL_SECS: i64 = 3_600;

/// Exchange-rate cache TTL in seconds.
///
/// Rates older than this are re-fetched; a fetch failure rejects the
/// operation rather than serving stale data.
pub const RATE_CACHE_TTL_SECS: u64 = 30;

/// Typed-prompt lifetime in seconds (5 minutes).
///
/// A reply to a prompt older than this is rejected as expired.
pub const PROMPT_TTL_SECS: i64 = 300;

/// Withdrawal fee floor in cents.
pub const WITHDRAWAL_MIN_FEE_CENTS: i64 = 1;

/// Provider confirmations required before a withdrawal is final.
pub const REQUIRED_CONFIRMATIONS: u32 = 6;

/// 1v1 duel round cap; a match that reaches it settles as a loss-free tie.
pub const DUEL_MAX_ROUNDS: u32 = 20;

/// Points needed to win a 1v1 duel.
pub const DUEL_TARGET_SCORE: u32 = 3;

/// 1v1 duel payout multiplier in basis points (1.90x).
///
/// Ties score no point for either side, so the round win chance is
/// symmetric; 2.0 fair odds less the house edge.
pub const DUEL_WIN_MULTIPLIER_BPS: i64 = 19_000;

/// Payment provider request timeout in seconds.
pub const PROVIDER_TIMEOUT_SECS: u64 = 15;

/// Maximum retry attempts for retryable provider failures.
pub const PROVIDER_MAX_RETRIES: u32 = 3;

/// Referral commission on confirmed deposits, in basis points (1%).
pub const REFERRAL_COMMISSION_BPS: i64 = 100;

/// Weekly loyalty bonus in cents ($10).
pub const WEEKLY_BONUS_CENTS: i64 = 1_000;

/// Days between weekly bonus claims.
pub const WEEKLY_BONUS_INTERVAL_DAYS: i64 = 7;

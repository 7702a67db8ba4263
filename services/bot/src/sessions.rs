//! Typed-prompt store for multi-step chat flows ("send the amount", "send
//! the address"). One live prompt per user: issuing a new one supersedes
//! the old, and replies to stale or expired prompts are rejected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use shared::constants::PROMPT_TTL_SECS;
use shared::{Asset, Cents};

use crate::domain::{GameKind, UserId};
use crate::errors::{AppError, Result};

pub type PromptId = u64;

#[derive(Debug, Clone, PartialEq)]
pub enum PromptKind {
    DepositAmount {
        asset: Asset,
    },
    WithdrawAmount {
        asset: Asset,
    },
    WithdrawAddress {
        asset: Asset,
        fiat: Cents,
    },
    BetAmount {
        game: GameKind,
        selections: Vec<usize>,
    },
    AdminAdjust {
        target: UserId,
    },
    /// Stake debited, waiting for the platform animation value.
    AwaitRoll {
        game: GameKind,
        selections: Vec<usize>,
        bet: Cents,
        bet_tx_id: String,
    },
}

#[derive(Debug, Clone)]
struct PendingPrompt {
    id: PromptId,
    kind: PromptKind,
    issued_at: Instant,
}

#[derive(Clone)]
pub struct SessionStore {
    prompts: Arc<Mutex<HashMap<UserId, PendingPrompt>>>,
    next_id: Arc<AtomicU64>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            prompts: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            ttl: Duration::from_secs(PROMPT_TTL_SECS as u64),
        }
    }

    #[cfg(test)]
    fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            ..Self::new()
        }
    }

    /// Issue a prompt, superseding any live one for the user.
    pub fn prompt(&self, user_id: UserId, kind: PromptKind) -> PromptId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut prompts = self.prompts.lock().expect("prompt map poisoned");
        prompts.insert(
            user_id,
            PendingPrompt {
                id,
                kind,
                issued_at: Instant::now(),
            },
        );
        id
    }

    /// Consume the user's live prompt. `expected` of `Some(id)` enforces
    /// the reply is to that exact prompt; a mismatch or an expired prompt
    /// fails without consuming anything newer.
    pub fn take(&self, user_id: UserId, expected: Option<PromptId>) -> Result<PromptKind> {
        let mut prompts = self.prompts.lock().expect("prompt map poisoned");
        let current = prompts.get(&user_id).ok_or(AppError::PromptSuperseded)?;

        if let Some(expected) = expected {
            if current.id != expected {
                return Err(AppError::PromptSuperseded);
            }
        }
        if current.issued_at.elapsed() > self.ttl {
            prompts.remove(&user_id);
            return Err(AppError::PromptSuperseded);
        }

        let taken = prompts.remove(&user_id).ok_or(AppError::PromptSuperseded)?;
        Ok(taken.kind)
    }

    pub fn peek(&self, user_id: UserId) -> Option<PromptKind> {
        let prompts = self.prompts.lock().expect("prompt map poisoned");
        prompts
            .get(&user_id)
            .filter(|p| p.issued_at.elapsed() <= self.ttl)
            .map(|p| p.kind.clone())
    }

    pub fn clear(&self, user_id: UserId) {
        self.prompts
            .lock()
            .expect("prompt map poisoned")
            .remove(&user_id);
    }

    fn evict_expired(&self) -> usize {
        let mut prompts = self.prompts.lock().expect("prompt map poisoned");
        let before = prompts.len();
        prompts.retain(|_, p| p.issued_at.elapsed() <= self.ttl);
        before - prompts.len()
    }

    /// Eviction loop; keeps the map from accumulating abandoned flows.
    pub async fn run_evictor(self) {
        let mut tick = tokio::time::interval(Duration::from_secs(60));
        loop {
            tick.tick().await;
            let evicted = self.evict_expired();
            if evicted > 0 {
                tracing::debug!(evicted, "Evicted expired prompts");
            }
        }
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

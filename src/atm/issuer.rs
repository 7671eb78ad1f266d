//! ATM Code Issuer
//!
//! # Generation
//!
//! ```text
//! NONE → GENERATING → ACTIVE → {EXPIRED | CONSUMED}
//! ```
//!
//! 1. Ownership is checked before anything is recorded.
//! 2. The whole generation runs under the idempotency guard and a
//!    per-account lock, so at most one generation per account is running.
//! 3. Balance is checked, then the daily limit is reserved on the ledger
//!    (conditional, keyed by the idempotency key).
//! 4. Only after the reservation succeeds is the prior ACTIVE code retired
//!    and the new one installed. A failed generation leaves everything as it
//!    was.
//!
//! Reservations are not released when a code expires unused.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use super::code::{AtmWithdrawalCode, CodeStatus, generate_code};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::idempotency::{Fingerprint, IdempotencyGuard, IdempotencyKey, KeyGenerator};
use crate::ledger::{AccountId, AccountLedger, AccountSnapshot, OwnerId};
use crate::money::MinorUnits;

/// Retired codes kept per account for redemption diagnostics
const RETIRED_HISTORY: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AtmCodeReceipt {
    pub code: AtmWithdrawalCode,
    pub idempotency_key: IdempotencyKey,
}

#[derive(Debug, Default)]
struct AccountCodes {
    current: Option<AtmWithdrawalCode>,
    retired: VecDeque<AtmWithdrawalCode>,
}

impl AccountCodes {
    fn retire_current(&mut self) {
        if let Some(mut prior) = self.current.take() {
            if prior.status == CodeStatus::Active {
                prior.status = CodeStatus::Expired;
            }
            self.retired.push_front(prior);
            self.retired.truncate(RETIRED_HISTORY);
        }
    }
}

pub struct AtmCodeIssuer {
    ledger: Arc<dyn AccountLedger>,
    clock: Arc<dyn Clock>,
    codes: DashMap<AccountId, AccountCodes>,
    account_locks: DashMap<AccountId, Arc<Mutex<()>>>,
    guard: IdempotencyGuard<AtmWithdrawalCode>,
    keys: KeyGenerator,
    validity: chrono::Duration,
    digits: u32,
    retention: chrono::Duration,
    ledger_timeout: Duration,
}

impl AtmCodeIssuer {
    pub fn new(
        ledger: Arc<dyn AccountLedger>,
        clock: Arc<dyn Clock>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            guard: IdempotencyGuard::new(
                clock.clone(),
                config.idempotency_retention(),
                config.ledger_timeout(),
            ),
            ledger,
            clock,
            codes: DashMap::new(),
            account_locks: DashMap::new(),
            keys: KeyGenerator::new(),
            validity: config.atm_code_validity(),
            digits: config.atm_code_digits,
            retention: config.idempotency_retention(),
            ledger_timeout: config.ledger_timeout(),
        }
    }

    /// Generate a withdrawal code for `amount` on `account_id`
    ///
    /// Idempotent by key: a retried generation returns the code issued by the
    /// first one, as it stands now, without reserving the limit again.
    pub async fn generate(
        &self,
        caller: OwnerId,
        account_id: AccountId,
        amount: MinorUnits,
        key: Option<IdempotencyKey>,
    ) -> Result<AtmCodeReceipt, EngineError> {
        if amount == 0 {
            return Err(EngineError::InvalidAmount(
                "amount must be greater than zero".to_string(),
            ));
        }

        let account = self.read_account(account_id).await?;
        if account.owner_id != caller {
            warn!(account_id, caller, "ATM code requested for foreign account");
            return Err(EngineError::Forbidden);
        }

        let key = key.unwrap_or_else(|| self.keys.generate());
        let fingerprint =
            Fingerprint::of(&["atm", &account_id.to_string(), &amount.to_string()]);

        let issued = self
            .guard
            .submit(caller, &key, fingerprint, || {
                self.issue(caller, account_id, amount, &key)
            })
            .await?;

        Ok(AtmCodeReceipt {
            code: self.latest(issued),
            idempotency_key: key,
        })
    }

    async fn issue(
        &self,
        caller: OwnerId,
        account_id: AccountId,
        amount: MinorUnits,
        key: &IdempotencyKey,
    ) -> Result<AtmWithdrawalCode, EngineError> {
        let lock = self.account_lock(account_id);
        let _held = lock.lock().await;

        let account = self.read_account(account_id).await?;
        if account.locked {
            return Err(EngineError::AccountLocked);
        }
        if amount > account.available_balance {
            debug!(account_id, amount, "ATM code rejected, insufficient balance");
            return Err(EngineError::InsufficientBalance);
        }

        let usage = self
            .ledger
            .reserve_daily_withdrawal(&key.request_id(caller), account_id, amount)
            .await
            .map_err(|e| {
                if e.is_ambiguous() {
                    EngineError::StatusUnknown {
                        idempotency_key: key.to_string(),
                    }
                } else {
                    EngineError::from(e)
                }
            })?;

        let now = self.clock.now();
        let mut slot = self.codes.entry(account_id).or_default();
        let previous = slot.current.as_ref().map(|c| c.code.clone());
        let code = AtmWithdrawalCode::issue(
            generate_code(self.digits, previous.as_deref()),
            account_id,
            amount,
            now,
            self.validity,
        );

        if slot
            .current
            .as_ref()
            .is_some_and(|c| c.status == CodeStatus::Active)
        {
            info!(account_id, "Prior ATM code expired by regeneration");
        }
        slot.retire_current();
        slot.current = Some(code.clone());

        info!(
            account_id,
            amount,
            daily_used = usage.used,
            daily_limit = usage.limit,
            expires_at = %code.expires_at,
            "ATM code issued"
        );
        Ok(code)
    }

    fn account_lock(&self, account_id: AccountId) -> Arc<Mutex<()>> {
        self.account_locks.entry(account_id).or_default().clone()
    }

    async fn read_account(&self, account_id: AccountId) -> Result<AccountSnapshot, EngineError> {
        tokio::time::timeout(self.ledger_timeout, self.ledger.account(account_id))
            .await
            .map_err(|_| EngineError::Ledger("account read timed out".to_string()))?
            .map_err(EngineError::from)
    }

    /// An issued code as it stands now: replaced, redeemed or lapsed
    fn latest(&self, issued: AtmWithdrawalCode) -> AtmWithdrawalCode {
        let now = self.clock.now();
        let same =
            |c: &AtmWithdrawalCode| c.code == issued.code && c.issued_at == issued.issued_at;

        if let Some(mut slot) = self.codes.get_mut(&issued.account_id) {
            if let Some(current) = slot.current.as_mut().filter(|c| same(c)) {
                current.refresh(now);
                return current.clone();
            }
            if let Some(retired) = slot.retired.iter().find(|c| same(c)) {
                return retired.clone();
            }
        }

        // Forgotten by the sweep
        let mut code = issued;
        code.refresh(now);
        code
    }

    /// Latest code for the account, with expiry applied
    pub fn status(&self, account_id: AccountId) -> Option<AtmWithdrawalCode> {
        let now = self.clock.now();
        let mut slot = self.codes.get_mut(&account_id)?;
        let current = slot.current.as_mut()?;
        if current.refresh(now) {
            info!(account_id, "ATM code expired");
        }
        Some(current.clone())
    }

    /// Stream remaining seconds of the ACTIVE code, once per second
    ///
    /// Ends after sending zero, or when the code is replaced or consumed.
    /// The stream is advisory; expiry is decided by [`Self::status`].
    pub fn countdown(
        self: &Arc<Self>,
        account_id: AccountId,
    ) -> Result<mpsc::Receiver<u64>, EngineError> {
        let code = self
            .status(account_id)
            .filter(|c| c.status == CodeStatus::Active)
            .ok_or(EngineError::NoActiveCode)?;

        let (tx, rx) = mpsc::channel(4);
        let issuer = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                ticker.tick().await;
                let remaining = match issuer.status(account_id) {
                    Some(c) if c.code == code.code => c.remaining_seconds(issuer.clock.now()),
                    _ => 0,
                };
                if tx.send(remaining).await.is_err() || remaining == 0 {
                    break;
                }
            }
            debug!(account_id, "ATM countdown finished");
        });
        Ok(rx)
    }

    /// Terminal-side redemption: ACTIVE → CONSUMED
    pub fn redeem(
        &self,
        account_id: AccountId,
        code: &str,
    ) -> Result<AtmWithdrawalCode, EngineError> {
        let now = self.clock.now();
        let mut slot = self
            .codes
            .get_mut(&account_id)
            .ok_or(EngineError::NoActiveCode)?;

        if slot.retired.iter().any(|c| c.code == code)
            && slot.current.as_ref().is_none_or(|c| c.code != code)
        {
            warn!(account_id, "Redemption attempted with a retired code");
            return Err(EngineError::CodeExpired);
        }

        let current = slot.current.as_mut().ok_or(EngineError::NoActiveCode)?;
        current.refresh(now);
        if current.code != code {
            warn!(account_id, "Redemption code mismatch");
            return Err(EngineError::CodeMismatch);
        }
        match current.status {
            CodeStatus::Active => {
                current.status = CodeStatus::Consumed;
                info!(account_id, amount = current.amount, "ATM code redeemed");
                Ok(current.clone())
            }
            CodeStatus::Expired => Err(EngineError::CodeExpired),
            CodeStatus::Consumed => Err(EngineError::NoActiveCode),
        }
    }

    /// Expire lapsed codes and forget old terminal ones; returns how many expired
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut expired = 0;
        for mut slot in self.codes.iter_mut() {
            if let Some(current) = slot.current.as_mut()
                && current.refresh(now)
            {
                expired += 1;
            }
        }
        self.codes.retain(|_, slot| {
            slot.retired
                .retain(|c| now < c.expires_at + self.retention);
            slot.current
                .as_ref()
                .is_some_and(|c| !c.status.is_terminal() || now < c.expires_at + self.retention)
        });
        if expired > 0 {
            info!(count = expired, "ATM codes expired by sweep");
        }
        expired
    }

    /// Drop generation records past retention
    pub fn purge_idempotency(&self) -> usize {
        self.guard.purge_expired()
    }

    /// Ledger dispatches performed by generation (replays excluded)
    pub fn generations(&self) -> u64 {
        self.guard.dispatches()
    }
}

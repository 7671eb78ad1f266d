//! In-memory Account Ledger
//!
//! Honors the full [`AccountLedger`] contract (atomic transfer, request-id
//! deduplication, ledger-side PIN lock, conditional daily reservation).
//! Used by the sandbox binary and by tests; fault hooks let tests simulate a
//! slow ledger, an unavailable ledger, or a response lost after apply.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    AccountHolder, AccountId, AccountLedger, AccountSnapshot, DailyWithdrawal, LedgerDestination,
    LedgerError, LedgerReceipt, LedgerTransfer, OwnerId, PinCheck, Settlement,
};
use crate::clock::Clock;
use crate::money::MinorUnits;

/// Consecutive PIN mismatches after which the ledger locks an account
pub const DEFAULT_PIN_LOCK_THRESHOLD: u32 = 5;

/// Seed definition of one account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryAccount {
    pub account_id: AccountId,
    pub owner_id: OwnerId,
    pub account_number: String,
    pub holder_name: String,
    pub balance: MinorUnits,
    pub pin: String,
    pub daily_withdrawal_limit: MinorUnits,
    #[serde(default)]
    pub daily_withdrawal_used: MinorUnits,
}

struct AccountEntry {
    seed: MemoryAccount,
    failed_pins: u32,
    locked: bool,
    usage_day: NaiveDate,
}

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<AccountId, AccountEntry>,
    by_number: HashMap<String, AccountId>,
    /// Processed transfers by request_id
    receipts: HashMap<String, LedgerReceipt>,
    /// Processed reservations by request_id
    reservations: HashMap<String, DailyWithdrawal>,
}

pub struct MemoryLedger {
    state: Mutex<LedgerState>,
    clock: Arc<dyn Clock>,
    pin_lock_threshold: u32,
    latency: Mutex<Duration>,
    read_latency: Mutex<Duration>,
    fail_next: AtomicUsize,
    lose_next: AtomicUsize,
    transfers_applied: AtomicUsize,
    pin_checks: AtomicUsize,
}

impl MemoryLedger {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            clock,
            pin_lock_threshold: DEFAULT_PIN_LOCK_THRESHOLD,
            latency: Mutex::new(Duration::ZERO),
            read_latency: Mutex::new(Duration::ZERO),
            fail_next: AtomicUsize::new(0),
            lose_next: AtomicUsize::new(0),
            transfers_applied: AtomicUsize::new(0),
            pin_checks: AtomicUsize::new(0),
        }
    }

    pub fn with_accounts(clock: Arc<dyn Clock>, accounts: Vec<MemoryAccount>) -> Self {
        let ledger = Self::new(clock);
        for account in accounts {
            ledger.add_account(account);
        }
        ledger
    }

    pub fn add_account(&self, account: MemoryAccount) {
        let today = self.clock.now().date_naive();
        let mut state = self.lock();
        state
            .by_number
            .insert(account.account_number.clone(), account.account_id);
        state.accounts.insert(
            account.account_id,
            AccountEntry {
                seed: account,
                failed_pins: 0,
                locked: false,
                usage_day: today,
            },
        );
    }

    /// Current balance (test/inspection helper)
    pub fn balance(&self, account_id: AccountId) -> Option<MinorUnits> {
        self.lock()
            .accounts
            .get(&account_id)
            .map(|a| a.seed.balance)
    }

    /// Number of transfers actually applied (dedup replays excluded)
    pub fn transfers_applied(&self) -> usize {
        self.transfers_applied.load(Ordering::SeqCst)
    }

    /// Number of PIN comparisons performed
    pub fn pin_checks(&self) -> usize {
        self.pin_checks.load(Ordering::SeqCst)
    }

    /// Delay every mutating call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap_or_else(|e| e.into_inner()) = latency;
    }

    /// Delay every account read by `latency`
    pub fn set_read_latency(&self, latency: Duration) {
        *self.read_latency.lock().unwrap_or_else(|e| e.into_inner()) = latency;
    }

    /// Fail the next `n` transfers with `Unavailable` before applying
    pub fn fail_next_transfers(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Apply the next `n` transfers but report `Timeout` to the caller
    pub fn lose_next_responses(&self, n: usize) {
        self.lose_next.store(n, Ordering::SeqCst);
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock().unwrap_or_else(|e| e.into_inner());
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn take_one(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn roll_day(entry: &mut AccountEntry, today: NaiveDate) {
        if entry.usage_day != today {
            entry.usage_day = today;
            entry.seed.daily_withdrawal_used = 0;
        }
    }

    fn apply_transfer(&self, request: &LedgerTransfer) -> Result<LedgerReceipt, LedgerError> {
        let mut state = self.lock();

        if let Some(receipt) = state.receipts.get(&request.request_id) {
            debug!(request_id = %request.request_id, "Transfer already processed");
            return Ok(receipt.clone());
        }

        let source = state
            .accounts
            .get(&request.source)
            .ok_or(LedgerError::AccountNotFound(request.source))?;
        if source.locked {
            return Err(LedgerError::AccountLocked);
        }
        if source.seed.balance < request.amount {
            return Err(LedgerError::InsufficientFunds);
        }

        let settlement = match &request.destination {
            LedgerDestination::Internal { account_id } => {
                if !state.accounts.contains_key(account_id) {
                    return Err(LedgerError::Rejected(format!(
                        "destination account {} not found",
                        account_id
                    )));
                }
                Settlement::Settled
            }
            LedgerDestination::External { .. } => Settlement::HandedOff,
        };

        // Both sides validated; apply debit and credit under the same lock
        if let Some(source) = state.accounts.get_mut(&request.source) {
            source.seed.balance -= request.amount;
        }
        if let LedgerDestination::Internal { account_id } = &request.destination
            && let Some(dest) = state.accounts.get_mut(account_id)
        {
            dest.seed.balance = dest.seed.balance.saturating_add(request.amount);
        }

        let receipt = LedgerReceipt {
            reference_id: Uuid::new_v4().to_string(),
            settlement,
        };
        state
            .receipts
            .insert(request.request_id.clone(), receipt.clone());
        self.transfers_applied.fetch_add(1, Ordering::SeqCst);

        info!(
            request_id = %request.request_id,
            reference_id = %receipt.reference_id,
            source = request.source,
            amount = request.amount,
            "Ledger transfer applied"
        );
        Ok(receipt)
    }
}

#[async_trait]
impl AccountLedger for MemoryLedger {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn find_by_number(
        &self,
        account_number: &str,
    ) -> Result<Option<AccountHolder>, LedgerError> {
        let state = self.lock();
        Ok(state
            .by_number
            .get(account_number)
            .and_then(|id| state.accounts.get(id))
            .map(|entry| AccountHolder {
                account_id: entry.seed.account_id,
                account_number: entry.seed.account_number.clone(),
                display_name: entry.seed.holder_name.clone(),
            }))
    }

    async fn account(&self, account_id: AccountId) -> Result<AccountSnapshot, LedgerError> {
        let read_latency = *self.read_latency.lock().unwrap_or_else(|e| e.into_inner());
        if !read_latency.is_zero() {
            tokio::time::sleep(read_latency).await;
        }

        let state = self.lock();
        let entry = state
            .accounts
            .get(&account_id)
            .ok_or(LedgerError::AccountNotFound(account_id))?;
        Ok(AccountSnapshot {
            account_id,
            owner_id: entry.seed.owner_id,
            account_number: entry.seed.account_number.clone(),
            available_balance: entry.seed.balance,
            locked: entry.locked,
        })
    }

    async fn transfer(&self, request: &LedgerTransfer) -> Result<LedgerReceipt, LedgerError> {
        self.simulate_latency().await;

        if Self::take_one(&self.fail_next) {
            warn!(request_id = %request.request_id, "Simulated ledger outage");
            return Err(LedgerError::Unavailable("simulated outage".into()));
        }

        let receipt = self.apply_transfer(request)?;

        if Self::take_one(&self.lose_next) {
            warn!(request_id = %request.request_id, "Simulated lost ledger response");
            return Err(LedgerError::Timeout);
        }
        Ok(receipt)
    }

    async fn verify_pin(&self, account_id: AccountId, pin: &str) -> Result<PinCheck, LedgerError> {
        self.pin_checks.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        let entry = state
            .accounts
            .get_mut(&account_id)
            .ok_or(LedgerError::AccountNotFound(account_id))?;

        if entry.locked {
            return Ok(PinCheck::Locked);
        }
        if entry.seed.pin == pin {
            entry.failed_pins = 0;
            return Ok(PinCheck::Match);
        }

        entry.failed_pins += 1;
        if entry.failed_pins >= self.pin_lock_threshold {
            entry.locked = true;
            warn!(account_id, "Account locked after repeated PIN failures");
            return Ok(PinCheck::Locked);
        }
        Ok(PinCheck::Mismatch)
    }

    async fn daily_withdrawal(
        &self,
        account_id: AccountId,
    ) -> Result<DailyWithdrawal, LedgerError> {
        let today = self.clock.now().date_naive();
        let mut state = self.lock();
        let entry = state
            .accounts
            .get_mut(&account_id)
            .ok_or(LedgerError::AccountNotFound(account_id))?;
        Self::roll_day(entry, today);
        Ok(DailyWithdrawal {
            used: entry.seed.daily_withdrawal_used,
            limit: entry.seed.daily_withdrawal_limit,
        })
    }

    async fn reserve_daily_withdrawal(
        &self,
        request_id: &str,
        account_id: AccountId,
        amount: MinorUnits,
    ) -> Result<DailyWithdrawal, LedgerError> {
        self.simulate_latency().await;

        let today = self.clock.now().date_naive();
        let mut state = self.lock();
        if let Some(usage) = state.reservations.get(request_id) {
            return Ok(*usage);
        }

        let entry = state
            .accounts
            .get_mut(&account_id)
            .ok_or(LedgerError::AccountNotFound(account_id))?;
        Self::roll_day(entry, today);

        let usage = DailyWithdrawal {
            used: entry.seed.daily_withdrawal_used,
            limit: entry.seed.daily_withdrawal_limit,
        };
        if !usage.allows(amount) {
            return Err(LedgerError::DailyLimitExceeded {
                limit: usage.limit,
                used: usage.used,
                requested: amount,
            });
        }

        entry.seed.daily_withdrawal_used += amount;
        let usage = DailyWithdrawal {
            used: entry.seed.daily_withdrawal_used,
            limit: entry.seed.daily_withdrawal_limit,
        };
        state.reservations.insert(request_id.to_string(), usage);
        Ok(usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn account(id: AccountId, number: &str, balance: MinorUnits) -> MemoryAccount {
        MemoryAccount {
            account_id: id,
            owner_id: id * 10,
            account_number: number.to_string(),
            holder_name: format!("Holder {}", id),
            balance,
            pin: "1234".to_string(),
            daily_withdrawal_limit: 100_000,
            daily_withdrawal_used: 0,
        }
    }

    fn ledger() -> (Arc<ManualClock>, MemoryLedger) {
        let clock = Arc::new(ManualClock::starting_now());
        let ledger = MemoryLedger::with_accounts(
            clock.clone(),
            vec![
                account(1, "1000000001", 50_000),
                account(2, "1000000002", 0),
            ],
        );
        (clock, ledger)
    }

    fn internal(request_id: &str, amount: MinorUnits) -> LedgerTransfer {
        LedgerTransfer {
            request_id: request_id.to_string(),
            source: 1,
            destination: LedgerDestination::Internal { account_id: 2 },
            amount,
        }
    }

    #[tokio::test]
    async fn test_transfer_is_atomic_and_deduplicated() {
        let (_, ledger) = ledger();

        let first = ledger.transfer(&internal("req-1", 10_000)).await.unwrap();
        let replay = ledger.transfer(&internal("req-1", 10_000)).await.unwrap();

        assert_eq!(first, replay);
        assert_eq!(first.settlement, Settlement::Settled);
        assert_eq!(ledger.balance(1), Some(40_000));
        assert_eq!(ledger.balance(2), Some(10_000));
        assert_eq!(ledger.transfers_applied(), 1);
    }

    #[tokio::test]
    async fn test_transfer_insufficient_funds_applies_nothing() {
        let (_, ledger) = ledger();
        let result = ledger.transfer(&internal("req-2", 60_000)).await;
        assert_eq!(result, Err(LedgerError::InsufficientFunds));
        assert_eq!(ledger.balance(1), Some(50_000));
        assert_eq!(ledger.transfers_applied(), 0);
    }

    #[tokio::test]
    async fn test_lost_response_still_applied_once() {
        let (_, ledger) = ledger();
        ledger.lose_next_responses(1);

        let lost = ledger.transfer(&internal("req-3", 5_000)).await;
        assert_eq!(lost, Err(LedgerError::Timeout));

        let retried = ledger.transfer(&internal("req-3", 5_000)).await;
        assert!(retried.is_ok());
        assert_eq!(ledger.balance(1), Some(45_000));
        assert_eq!(ledger.transfers_applied(), 1);
    }

    #[tokio::test]
    async fn test_pin_lock_after_threshold() {
        let (_, ledger) = ledger();
        for _ in 0..DEFAULT_PIN_LOCK_THRESHOLD - 1 {
            assert_eq!(ledger.verify_pin(1, "0000").await, Ok(PinCheck::Mismatch));
        }
        assert_eq!(ledger.verify_pin(1, "0000").await, Ok(PinCheck::Locked));
        // Correct PIN no longer helps
        assert_eq!(ledger.verify_pin(1, "1234").await, Ok(PinCheck::Locked));
    }

    #[tokio::test]
    async fn test_daily_reservation_is_conditional_and_rolls_over() {
        let (clock, ledger) = ledger();

        let usage = ledger
            .reserve_daily_withdrawal("res-1", 1, 60_000)
            .await
            .unwrap();
        assert_eq!(usage.used, 60_000);

        let over = ledger.reserve_daily_withdrawal("res-2", 1, 50_000).await;
        assert!(matches!(over, Err(LedgerError::DailyLimitExceeded { .. })));

        // Replay returns the original usage without reserving again
        let replay = ledger
            .reserve_daily_withdrawal("res-1", 1, 60_000)
            .await
            .unwrap();
        assert_eq!(replay.used, 60_000);

        clock.advance(chrono::Duration::days(1));
        let usage = ledger.daily_withdrawal(1).await.unwrap();
        assert_eq!(usage.used, 0);
    }
}

//! Account Ledger Service
//!
//! The engine never mutates balances itself. Every balance read, debit/credit,
//! PIN comparison and daily-withdrawal reservation goes through
//! [`AccountLedger`].
//!
//! # Contract
//!
//! 1. **Atomicity**: `transfer` applies the source debit together with the
//!    destination credit (or the external handoff), or not at all.
//! 2. **Idempotency**: `transfer` and `reserve_daily_withdrawal` are keyed by
//!    `request_id`; calling again with the same id returns the original result
//!    without applying anything twice.
//! 3. **Explicit failure**: `Timeout`/`Unavailable` mean "unknown", every other
//!    error means nothing was applied.

pub mod memory;

pub use memory::{MemoryAccount, MemoryLedger};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::money::MinorUnits;

/// Ledger account identifier
pub type AccountId = u64;

/// Authenticated caller identifier (account owner)
pub type OwnerId = u64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Insufficient funds")]
    InsufficientFunds,

    #[error("Daily withdrawal limit exceeded")]
    DailyLimitExceeded { limit: u64, used: u64, requested: u64 },

    #[error("Account locked")]
    AccountLocked,

    #[error("Ledger timed out")]
    Timeout,

    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    #[error("Ledger rejected request: {0}")]
    Rejected(String),
}

impl LedgerError {
    /// Outcome of the call is unknown (may or may not have been applied)
    #[inline]
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, LedgerError::Timeout | LedgerError::Unavailable(_))
    }
}

/// Public identity of an account, as returned by a number lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountHolder {
    pub account_id: AccountId,
    pub account_number: String,
    pub display_name: String,
}

/// Point-in-time view of an account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSnapshot {
    pub account_id: AccountId,
    pub owner_id: OwnerId,
    pub account_number: String,
    pub available_balance: MinorUnits,
    pub locked: bool,
}

/// Result of a ledger-side PIN comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinCheck {
    Match,
    Mismatch,
    /// The ledger has locked the account after repeated failures
    Locked,
}

/// Daily withdrawal usage for one account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyWithdrawal {
    pub used: MinorUnits,
    pub limit: MinorUnits,
}

impl DailyWithdrawal {
    #[inline]
    pub fn remaining(&self) -> MinorUnits {
        self.limit.saturating_sub(self.used)
    }

    /// Would reserving `amount` stay within the limit?
    #[inline]
    pub fn allows(&self, amount: MinorUnits) -> bool {
        self.used
            .checked_add(amount)
            .is_some_and(|total| total <= self.limit)
    }
}

/// Where the credit side of a transfer lands
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LedgerDestination {
    /// Same-institution account, credited atomically with the debit
    Internal { account_id: AccountId },
    /// Partner-network account, debited and handed off to the network
    External {
        institution_code: String,
        account_number: String,
    },
}

/// Atomic debit-and-credit request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerTransfer {
    /// Deduplication key; equal ids are applied at most once
    pub request_id: String,
    pub source: AccountId,
    pub destination: LedgerDestination,
    pub amount: MinorUnits,
}

/// How far the ledger got with a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Settlement {
    /// Debit and credit both applied
    Settled,
    /// Debit applied, credit handed to the external network
    HandedOff,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerReceipt {
    pub reference_id: String,
    pub settlement: Settlement,
}

/// Account Ledger Service
///
/// All mutating methods MUST be idempotent by `request_id`.
#[async_trait]
pub trait AccountLedger: Send + Sync {
    /// Get ledger name for logging
    fn name(&self) -> &'static str;

    /// Look up an account by its public account number
    async fn find_by_number(
        &self,
        account_number: &str,
    ) -> Result<Option<AccountHolder>, LedgerError>;

    /// Read an account (owner, balance)
    async fn account(&self, account_id: AccountId) -> Result<AccountSnapshot, LedgerError>;

    /// Apply an atomic transfer
    ///
    /// # Idempotency
    /// If already processed with this request_id, return the original receipt.
    async fn transfer(&self, request: &LedgerTransfer) -> Result<LedgerReceipt, LedgerError>;

    /// Compare a PIN against the stored authorization secret
    async fn verify_pin(&self, account_id: AccountId, pin: &str) -> Result<PinCheck, LedgerError>;

    /// Read the current daily withdrawal usage
    async fn daily_withdrawal(&self, account_id: AccountId)
    -> Result<DailyWithdrawal, LedgerError>;

    /// Reserve `amount` against the daily withdrawal limit
    ///
    /// Conditional: fails with `DailyLimitExceeded` instead of going over.
    ///
    /// # Idempotency
    /// If already processed with this request_id, return the original usage.
    async fn reserve_daily_withdrawal(
        &self,
        request_id: &str,
        account_id: AccountId,
        amount: MinorUnits,
    ) -> Result<DailyWithdrawal, LedgerError>;
}

//! PIN Authenticator
//!
//! The ledger owns the secret and the account-level lock. This layer rejects
//! malformed PINs locally and caps consecutive failures per flow.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::EngineError;
use crate::ledger::{AccountId, AccountLedger, PinCheck};

pub const PIN_LENGTH: usize = 4;

/// Exactly four ASCII digits
pub fn validate_pin_format(pin: &str) -> Result<(), EngineError> {
    if pin.len() == PIN_LENGTH && pin.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(EngineError::MalformedPin)
    }
}

/// Consecutive-failure counter owned by one flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinAttempts {
    failed: u8,
    max: u8,
}

impl PinAttempts {
    pub fn new(max: u8) -> Self {
        Self {
            failed: 0,
            max: max.max(1),
        }
    }

    pub fn failed(&self) -> u8 {
        self.failed
    }

    pub fn remaining(&self) -> u8 {
        self.max.saturating_sub(self.failed)
    }

    pub fn is_exhausted(&self) -> bool {
        self.failed >= self.max
    }

    fn record_failure(&mut self) {
        self.failed = self.failed.saturating_add(1);
    }

    fn reset(&mut self) {
        self.failed = 0;
    }
}

pub struct PinAuthenticator {
    ledger: Arc<dyn AccountLedger>,
    timeout: Duration,
}

impl PinAuthenticator {
    pub fn new(ledger: Arc<dyn AccountLedger>, timeout: Duration) -> Self {
        Self { ledger, timeout }
    }

    /// Check `pin` for `account_id`, charging failures to `attempts`
    ///
    /// A malformed PIN or an unreachable ledger does not consume an attempt.
    pub async fn authorize(
        &self,
        account_id: AccountId,
        pin: &str,
        attempts: &mut PinAttempts,
    ) -> Result<(), EngineError> {
        if attempts.is_exhausted() {
            return Err(EngineError::PinAttemptsExceeded);
        }
        validate_pin_format(pin)?;

        let check = tokio::time::timeout(self.timeout, self.ledger.verify_pin(account_id, pin))
            .await
            .map_err(|_| EngineError::Ledger("PIN verification timed out".to_string()))??;

        match check {
            PinCheck::Match => {
                attempts.reset();
                info!(account_id, "PIN authorized");
                Ok(())
            }
            PinCheck::Mismatch => {
                attempts.record_failure();
                warn!(
                    account_id,
                    failed = attempts.failed(),
                    remaining = attempts.remaining(),
                    "PIN mismatch"
                );
                if attempts.is_exhausted() {
                    Err(EngineError::PinAttemptsExceeded)
                } else {
                    Err(EngineError::InvalidPin {
                        remaining_attempts: attempts.remaining(),
                    })
                }
            }
            PinCheck::Locked => {
                warn!(account_id, "PIN rejected, account locked by ledger");
                Err(EngineError::AccountLocked)
            }
        }
    }
}

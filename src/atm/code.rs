//! ATM withdrawal code value type

use std::fmt;

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::rngs::OsRng;
use serde::Serialize;

use crate::ledger::AccountId;
use crate::money::MinorUnits;

/// Code lifecycle
///
/// ```text
/// ACTIVE → EXPIRED   (validity elapsed, or replaced by a newer code)
///        → CONSUMED  (redeemed at a terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CodeStatus {
    Active,
    Expired,
    Consumed,
}

impl CodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeStatus::Active => "ACTIVE",
            CodeStatus::Expired => "EXPIRED",
            CodeStatus::Consumed => "CONSUMED",
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CodeStatus::Active)
    }
}

impl fmt::Display for CodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AtmWithdrawalCode {
    pub code: String,
    pub account_id: AccountId,
    pub amount: MinorUnits,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: CodeStatus,
}

impl AtmWithdrawalCode {
    pub fn issue(
        code: String,
        account_id: AccountId,
        amount: MinorUnits,
        issued_at: DateTime<Utc>,
        validity: chrono::Duration,
    ) -> Self {
        Self {
            code,
            account_id,
            amount,
            issued_at,
            expires_at: issued_at + validity,
            status: CodeStatus::Active,
        }
    }

    /// Validity is judged on issue time plus window, never on a client timer
    #[inline]
    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whole seconds left, rounded up; zero once expired or no longer active
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> u64 {
        if self.status != CodeStatus::Active {
            return 0;
        }
        let millis = (self.expires_at - now).num_milliseconds();
        if millis <= 0 {
            0
        } else {
            (millis as u64).div_ceil(1000)
        }
    }

    /// Lazily move ACTIVE → EXPIRED; returns true if the status changed
    pub fn refresh(&mut self, now: DateTime<Utc>) -> bool {
        if self.status == CodeStatus::Active && self.is_past_expiry(now) {
            self.status = CodeStatus::Expired;
            return true;
        }
        false
    }
}

/// Fresh zero-padded numeric code from the OS CSPRNG, different from `previous`
pub fn generate_code(digits: u32, previous: Option<&str>) -> String {
    let digits = digits.clamp(4, 12);
    let upper = 10u64.pow(digits);
    loop {
        let value = OsRng.gen_range(0..upper);
        let code = format!("{:0width$}", value, width = digits as usize);
        if previous != Some(code.as_str()) {
            return code;
        }
    }
}

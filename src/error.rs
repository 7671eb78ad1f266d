//! Engine Error Types
//!
//! Every failure the engine reports to a caller. Each variant belongs to one
//! [`ErrorClass`], which tells the caller what kind of recovery is possible.

use thiserror::Error;

use crate::ledger::LedgerError;
use crate::money::MoneyError;

/// Recovery class of an [`EngineError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Rejected synchronously, never reached the ledger
    Validation,
    /// Recipient lookup failed; correct the input or retry later
    Resolution,
    /// PIN / ownership problems; capped retries, then terminal
    Authorization,
    /// Balance or daily limit; retry with a smaller amount
    Limit,
    /// Idempotency conflicts; never retried by the engine
    Conflict,
    /// Outcome unknown; re-query by idempotency key
    Infrastructure,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Validation => "VALIDATION",
            ErrorClass::Resolution => "RESOLUTION",
            ErrorClass::Authorization => "AUTHORIZATION",
            ErrorClass::Limit => "LIMIT",
            ErrorClass::Conflict => "CONFLICT",
            ErrorClass::Infrastructure => "INFRASTRUCTURE",
        }
    }
}

/// Engine error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    // === Validation Errors ===
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("PIN must be exactly 4 digits")]
    MalformedPin,

    #[error("Invalid account number: {0}")]
    MalformedAccountNumber(String),

    #[error("Destination account number is required")]
    MissingDestination,

    #[error("Source and destination account cannot be the same")]
    SameAccount,

    #[error("Invalid idempotency key")]
    MalformedIdempotencyKey,

    #[error("Idempotency key differs from the one used on the prior attempt")]
    IdempotencyKeyChanged,

    #[error("Transfer flow not found: {0}")]
    FlowNotFound(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Source account not found")]
    SourceAccountNotFound,

    // === Resolution Errors ===
    #[error("Recipient account not found")]
    RecipientNotFound,

    #[error("Bank network unavailable after {attempts} attempts, try again later")]
    NetworkUnavailable { attempts: u32 },

    // === Authorization Errors ===
    #[error("Account does not belong to caller")]
    Forbidden,

    #[error("Invalid PIN ({remaining_attempts} attempts remaining)")]
    InvalidPin { remaining_attempts: u8 },

    #[error("Account is locked")]
    AccountLocked,

    #[error("Too many incorrect PIN attempts")]
    PinAttemptsExceeded,

    // === Limit Errors ===
    #[error("Insufficient balance")]
    InsufficientBalance,

    #[error("Daily withdrawal limit exceeded (limit {limit}, used {used}, requested {requested})")]
    DailyLimitExceeded { limit: u64, used: u64, requested: u64 },

    // === Withdrawal Code Errors ===
    #[error("No active withdrawal code")]
    NoActiveCode,

    #[error("Withdrawal code has expired")]
    CodeExpired,

    #[error("Withdrawal code does not match")]
    CodeMismatch,

    // === Conflict Errors ===
    #[error("Idempotency key reused with a different request")]
    KeyReuse,

    #[error("A request with this idempotency key is already in flight")]
    RequestInFlight,

    #[error("Submission already dispatched for this flow")]
    SubmissionInProgress,

    // === Infrastructure Errors ===
    #[error("Outcome unknown, check status with idempotency key {idempotency_key}")]
    StatusUnknown { idempotency_key: String },

    #[error("Ledger error: {0}")]
    Ledger(String),
}

impl EngineError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidAmount(_) => "INVALID_AMOUNT",
            EngineError::MalformedPin => "MALFORMED_PIN",
            EngineError::MalformedAccountNumber(_) => "MALFORMED_ACCOUNT_NUMBER",
            EngineError::MissingDestination => "MISSING_DESTINATION",
            EngineError::SameAccount => "SAME_ACCOUNT",
            EngineError::MalformedIdempotencyKey => "MALFORMED_IDEMPOTENCY_KEY",
            EngineError::IdempotencyKeyChanged => "IDEMPOTENCY_KEY_CHANGED",
            EngineError::FlowNotFound(_) => "FLOW_NOT_FOUND",
            EngineError::InvalidStateTransition(_) => "INVALID_STATE_TRANSITION",
            EngineError::SourceAccountNotFound => "SOURCE_ACCOUNT_NOT_FOUND",
            EngineError::RecipientNotFound => "RECIPIENT_NOT_FOUND",
            EngineError::NetworkUnavailable { .. } => "NETWORK_UNAVAILABLE",
            EngineError::Forbidden => "FORBIDDEN",
            EngineError::InvalidPin { .. } => "INVALID_PIN",
            EngineError::AccountLocked => "ACCOUNT_LOCKED",
            EngineError::PinAttemptsExceeded => "PIN_ATTEMPTS_EXCEEDED",
            EngineError::InsufficientBalance => "INSUFFICIENT_BALANCE",
            EngineError::DailyLimitExceeded { .. } => "DAILY_LIMIT_EXCEEDED",
            EngineError::NoActiveCode => "NO_ACTIVE_CODE",
            EngineError::CodeExpired => "CODE_EXPIRED",
            EngineError::CodeMismatch => "CODE_MISMATCH",
            EngineError::KeyReuse => "IDEMPOTENCY_KEY_REUSE",
            EngineError::RequestInFlight => "REQUEST_IN_FLIGHT",
            EngineError::SubmissionInProgress => "SUBMISSION_IN_PROGRESS",
            EngineError::StatusUnknown { .. } => "STATUS_UNKNOWN",
            EngineError::Ledger(_) => "LEDGER_ERROR",
        }
    }

    /// Recovery class
    pub fn class(&self) -> ErrorClass {
        match self {
            EngineError::InvalidAmount(_)
            | EngineError::MalformedPin
            | EngineError::MalformedAccountNumber(_)
            | EngineError::MissingDestination
            | EngineError::SameAccount
            | EngineError::MalformedIdempotencyKey
            | EngineError::IdempotencyKeyChanged
            | EngineError::FlowNotFound(_)
            | EngineError::InvalidStateTransition(_)
            | EngineError::SourceAccountNotFound
            | EngineError::NoActiveCode
            | EngineError::CodeExpired
            | EngineError::CodeMismatch => ErrorClass::Validation,
            EngineError::RecipientNotFound | EngineError::NetworkUnavailable { .. } => {
                ErrorClass::Resolution
            }
            EngineError::Forbidden
            | EngineError::InvalidPin { .. }
            | EngineError::AccountLocked
            | EngineError::PinAttemptsExceeded => ErrorClass::Authorization,
            EngineError::InsufficientBalance | EngineError::DailyLimitExceeded { .. } => {
                ErrorClass::Limit
            }
            EngineError::KeyReuse
            | EngineError::RequestInFlight
            | EngineError::SubmissionInProgress => ErrorClass::Conflict,
            EngineError::StatusUnknown { .. } | EngineError::Ledger(_) => {
                ErrorClass::Infrastructure
            }
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            EngineError::Forbidden => 403,
            EngineError::FlowNotFound(_) | EngineError::NoActiveCode => 404,
            EngineError::KeyReuse
            | EngineError::RequestInFlight
            | EngineError::SubmissionInProgress
            | EngineError::InvalidStateTransition(_) => 409,
            EngineError::AccountLocked | EngineError::PinAttemptsExceeded => 423,
            EngineError::InvalidPin { .. } => 401,
            EngineError::InsufficientBalance
            | EngineError::DailyLimitExceeded { .. }
            | EngineError::RecipientNotFound
            | EngineError::SourceAccountNotFound
            | EngineError::CodeExpired
            | EngineError::CodeMismatch => 422,
            EngineError::NetworkUnavailable { .. } => 503,
            EngineError::StatusUnknown { .. } => 504,
            EngineError::Ledger(_) => 502,
            _ => 400,
        }
    }

    /// Terminal for the current flow: retrying from AUTHORIZE is not allowed
    pub fn is_terminal_for_flow(&self) -> bool {
        matches!(
            self,
            EngineError::AccountLocked | EngineError::PinAttemptsExceeded | EngineError::Forbidden
        )
    }
}

impl From<MoneyError> for EngineError {
    fn from(e: MoneyError) -> Self {
        EngineError::InvalidAmount(e.to_string())
    }
}

impl From<LedgerError> for EngineError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::AccountNotFound(_) => EngineError::SourceAccountNotFound,
            LedgerError::InsufficientFunds => EngineError::InsufficientBalance,
            LedgerError::DailyLimitExceeded {
                limit,
                used,
                requested,
            } => EngineError::DailyLimitExceeded {
                limit,
                used,
                requested,
            },
            LedgerError::AccountLocked => EngineError::AccountLocked,
            LedgerError::Timeout | LedgerError::Unavailable(_) | LedgerError::Rejected(_) => {
                EngineError::Ledger(e.to_string())
            }
        }
    }
}

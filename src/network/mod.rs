//! External Bank Network
//!
//! Recipient identity lookup for partner institutions. The network may be
//! slow or unreachable; callers bound every lookup with a timeout and retry
//! `Unavailable`/`Timeout` with backoff.

pub mod http;
pub mod directory;

pub use directory::{DirectoryEntry, StaticBankNetwork};
pub use http::HttpBankNetwork;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Bank network unavailable: {0}")]
    Unavailable(String),

    #[error("Bank network timed out")]
    Timeout,

    #[error("Invalid response from bank network: {0}")]
    InvalidResponse(String),
}

impl NetworkError {
    /// Worth another attempt after backoff
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, NetworkError::Unavailable(_) | NetworkError::Timeout)
    }
}

/// Identity confirmed by a partner institution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalIdentity {
    pub account_name: String,
    pub institution_name: String,
}

/// External Bank Network
#[async_trait]
pub trait BankNetwork: Send + Sync {
    /// Get network name for logging
    fn name(&self) -> &'static str;

    /// Look up an account at a partner institution
    ///
    /// `Ok(None)` means the institution answered and the account does not exist.
    async fn lookup(
        &self,
        institution_code: &str,
        account_number: &str,
    ) -> Result<Option<ExternalIdentity>, NetworkError>;
}

/// Scripted network for testing
#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    pub struct ScriptedNetwork {
        /// Responses handed out in order; the last one repeats
        script: Mutex<VecDeque<Result<Option<ExternalIdentity>, NetworkError>>>,
        delay: Mutex<Duration>,
        calls: AtomicUsize,
    }

    impl ScriptedNetwork {
        pub fn new(script: Vec<Result<Option<ExternalIdentity>, NetworkError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                delay: Mutex::new(Duration::ZERO),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn found(account_name: &str, institution_name: &str) -> Self {
            Self::new(vec![Ok(Some(ExternalIdentity {
                account_name: account_name.to_string(),
                institution_name: institution_name.to_string(),
            }))])
        }

        pub fn set_delay(&self, delay: Duration) {
            *self.delay.lock().unwrap() = delay;
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BankNetwork for ScriptedNetwork {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn lookup(
            &self,
            _institution_code: &str,
            _account_number: &str,
        ) -> Result<Option<ExternalIdentity>, NetworkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            let delay = *self.delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script
                    .front()
                    .cloned()
                    .unwrap_or(Err(NetworkError::Unavailable("empty script".into())))
            }
        }
    }
}

#[cfg(test)]
pub use mock::ScriptedNetwork;

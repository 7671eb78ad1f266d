//! Recipient Resolver
//!
//! Turns a raw account number (plus optional routing info) into a
//! [`VerifiedRecipient`]. Home-institution accounts are looked up on the
//! ledger; partner accounts go through the [`BankNetwork`] with bounded
//! retries.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::ledger::{AccountId, AccountLedger, LedgerDestination};
use crate::network::{BankNetwork, NetworkError};

/// Partner-bank routing for a destination account
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoutingInfo {
    pub institution_code: String,
}

impl RoutingInfo {
    pub fn new(institution_code: impl Into<String>) -> Self {
        Self {
            institution_code: institution_code.into(),
        }
    }
}

/// Recipient identity confirmed to exist
///
/// Immutable once built; a flow drops it when the account number is edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifiedRecipient {
    pub display_name: String,
    pub account_number_masked: String,
    pub institution_name: String,
    pub is_internal: bool,
    pub verified_at: DateTime<Utc>,
    /// Ledger-side target for the credit leg
    #[serde(skip)]
    pub destination: LedgerDestination,
}

impl VerifiedRecipient {
    /// Internal ledger account, if the recipient is at the home institution
    pub fn internal_account(&self) -> Option<AccountId> {
        match self.destination {
            LedgerDestination::Internal { account_id } => Some(account_id),
            LedgerDestination::External { .. } => None,
        }
    }
}

/// Keep the last four characters, star out the rest
pub fn mask_account_number(number: &str) -> String {
    let visible = number.len().saturating_sub(4);
    number
        .char_indices()
        .map(|(i, c)| if i < visible { '*' } else { c })
        .collect()
}

/// Account numbers are ASCII digits of at least `min_len` characters
pub fn validate_account_number(number: &str, min_len: usize) -> Result<(), EngineError> {
    if number.is_empty() {
        return Err(EngineError::MissingDestination);
    }
    if !number.bytes().all(|b| b.is_ascii_digit()) {
        return Err(EngineError::MalformedAccountNumber(
            "must contain digits only".to_string(),
        ));
    }
    if number.len() < min_len {
        return Err(EngineError::MalformedAccountNumber(format!(
            "must be at least {} digits",
            min_len
        )));
    }
    Ok(())
}

pub struct RecipientResolver {
    ledger: Arc<dyn AccountLedger>,
    network: Arc<dyn BankNetwork>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl RecipientResolver {
    pub fn new(
        ledger: Arc<dyn AccountLedger>,
        network: Arc<dyn BankNetwork>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            ledger,
            network,
            clock,
            config,
        }
    }

    /// Routing that names the home institution counts as internal
    pub fn is_internal(&self, routing: Option<&RoutingInfo>) -> bool {
        routing.is_none_or(|r| r.institution_code == self.config.home_institution_code)
    }

    pub async fn resolve(
        &self,
        account_number: &str,
        routing: Option<&RoutingInfo>,
    ) -> Result<VerifiedRecipient, EngineError> {
        let account_number = account_number.trim();
        validate_account_number(account_number, self.config.min_account_number_len)?;

        match routing {
            Some(r) if !self.is_internal(Some(r)) => {
                self.resolve_external(account_number, &r.institution_code)
                    .await
            }
            _ => self.resolve_internal(account_number).await,
        }
    }

    async fn resolve_internal(
        &self,
        account_number: &str,
    ) -> Result<VerifiedRecipient, EngineError> {
        let lookup = tokio::time::timeout(
            self.config.resolution_timeout(),
            self.ledger.find_by_number(account_number),
        )
        .await
        .map_err(|_| EngineError::Ledger("account lookup timed out".to_string()))?
        .map_err(|e| EngineError::Ledger(e.to_string()))?;

        let holder = lookup.ok_or_else(|| {
            debug!(ledger = self.ledger.name(), "Internal recipient not found");
            EngineError::RecipientNotFound
        })?;

        info!(account_id = holder.account_id, "Internal recipient verified");
        Ok(VerifiedRecipient {
            display_name: holder.display_name,
            account_number_masked: mask_account_number(&holder.account_number),
            institution_name: self.config.home_institution_name.clone(),
            is_internal: true,
            verified_at: self.clock.now(),
            destination: LedgerDestination::Internal {
                account_id: holder.account_id,
            },
        })
    }

    async fn resolve_external(
        &self,
        account_number: &str,
        institution_code: &str,
    ) -> Result<VerifiedRecipient, EngineError> {
        let max_attempts = self.config.resolution_max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let result = tokio::time::timeout(
                self.config.resolution_timeout(),
                self.network.lookup(institution_code, account_number),
            )
            .await
            .unwrap_or(Err(NetworkError::Timeout));

            match result {
                Ok(Some(identity)) => {
                    info!(institution_code, attempt, "External recipient verified");
                    return Ok(VerifiedRecipient {
                        display_name: identity.account_name,
                        account_number_masked: mask_account_number(account_number),
                        institution_name: identity.institution_name,
                        is_internal: false,
                        verified_at: self.clock.now(),
                        destination: LedgerDestination::External {
                            institution_code: institution_code.to_string(),
                            account_number: account_number.to_string(),
                        },
                    });
                }
                Ok(None) => {
                    debug!(institution_code, "External recipient not found");
                    return Err(EngineError::RecipientNotFound);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        network = self.network.name(),
                        institution_code,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Bank network lookup failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(
                        network = self.network.name(),
                        institution_code,
                        attempt,
                        error = %e,
                        "Bank network lookup gave up"
                    );
                    return Err(EngineError::NetworkUnavailable { attempts: attempt });
                }
            }
        }

        Err(EngineError::NetworkUnavailable {
            attempts: max_attempts,
        })
    }

    /// Exponential backoff: base, 2*base, 4*base, ...
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(10);
        self.config.resolution_backoff() * factor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ledger::{MemoryAccount, MemoryLedger};
    use crate::network::ScriptedNetwork;

    fn config() -> EngineConfig {
        EngineConfig {
            resolution_backoff_ms: 1,
            resolution_timeout_ms: 200,
            ..EngineConfig::default()
        }
    }

    fn resolver(network: Arc<ScriptedNetwork>) -> RecipientResolver {
        let clock = Arc::new(ManualClock::starting_now());
        let ledger = MemoryLedger::with_accounts(
            clock.clone(),
            vec![MemoryAccount {
                account_id: 7,
                owner_id: 70,
                account_number: "1000000007".to_string(),
                holder_name: "Ada Obi".to_string(),
                balance: 10_000,
                pin: "1234".to_string(),
                daily_withdrawal_limit: 100_000,
                daily_withdrawal_used: 0,
            }],
        );
        RecipientResolver::new(Arc::new(ledger), network, clock, config())
    }

    #[test]
    fn test_mask_account_number() {
        assert_eq!(mask_account_number("1000000007"), "******0007");
        assert_eq!(mask_account_number("123"), "123");
    }

    #[test]
    fn test_validate_account_number() {
        assert_eq!(
            validate_account_number("", 10),
            Err(EngineError::MissingDestination)
        );
        assert!(matches!(
            validate_account_number("12345", 10),
            Err(EngineError::MalformedAccountNumber(_))
        ));
        assert!(matches!(
            validate_account_number("10000000x7", 10),
            Err(EngineError::MalformedAccountNumber(_))
        ));
        assert!(validate_account_number("1000000007", 10).is_ok());
    }

    #[tokio::test]
    async fn test_internal_lookup() {
        let network = Arc::new(ScriptedNetwork::found("unused", "unused"));
        let resolver = resolver(network.clone());

        let recipient = resolver.resolve("1000000007", None).await.unwrap();
        assert!(recipient.is_internal);
        assert_eq!(recipient.display_name, "Ada Obi");
        assert_eq!(recipient.account_number_masked, "******0007");
        assert_eq!(recipient.internal_account(), Some(7));
        assert_eq!(network.calls(), 0);

        // Home institution code is internal too
        let recipient = resolver
            .resolve("1000000007", Some(&RoutingInfo::new("000")))
            .await
            .unwrap();
        assert!(recipient.is_internal);
    }

    #[tokio::test]
    async fn test_internal_not_found() {
        let resolver = resolver(Arc::new(ScriptedNetwork::found("x", "y")));
        assert_eq!(
            resolver.resolve("1999999999", None).await,
            Err(EngineError::RecipientNotFound)
        );
    }

    #[tokio::test]
    async fn test_external_lookup() {
        let network = Arc::new(ScriptedNetwork::found("Lin Park", "Partner Bank"));
        let resolver = resolver(network.clone());

        let recipient = resolver
            .resolve("2000000001", Some(&RoutingInfo::new("058")))
            .await
            .unwrap();
        assert!(!recipient.is_internal);
        assert_eq!(recipient.institution_name, "Partner Bank");
        assert_eq!(recipient.internal_account(), None);
        assert_eq!(network.calls(), 1);
    }

    #[tokio::test]
    async fn test_external_retries_then_succeeds() {
        let network = Arc::new(ScriptedNetwork::new(vec![
            Err(NetworkError::Unavailable("503".into())),
            Err(NetworkError::Timeout),
            Ok(Some(crate::network::ExternalIdentity {
                account_name: "Lin Park".into(),
                institution_name: "Partner Bank".into(),
            })),
        ]));
        let resolver = resolver(network.clone());

        let recipient = resolver
            .resolve("2000000001", Some(&RoutingInfo::new("058")))
            .await
            .unwrap();
        assert_eq!(recipient.display_name, "Lin Park");
        assert_eq!(network.calls(), 3);
    }

    #[tokio::test]
    async fn test_external_exhausts_attempts() {
        let network = Arc::new(ScriptedNetwork::new(vec![Err(NetworkError::Unavailable(
            "down".into(),
        ))]));
        let resolver = resolver(network.clone());

        let result = resolver
            .resolve("2000000001", Some(&RoutingInfo::new("058")))
            .await;
        assert_eq!(result, Err(EngineError::NetworkUnavailable { attempts: 3 }));
        assert_eq!(network.calls(), 3);
    }

    #[tokio::test]
    async fn test_external_slow_network_times_out() {
        let network = Arc::new(ScriptedNetwork::found("Lin Park", "Partner Bank"));
        network.set_delay(Duration::from_secs(5));
        let resolver = resolver(network.clone());

        let result = resolver
            .resolve("2000000001", Some(&RoutingInfo::new("058")))
            .await;
        assert_eq!(result, Err(EngineError::NetworkUnavailable { attempts: 3 }));
    }

    #[tokio::test]
    async fn test_invalid_response_is_not_retried() {
        let network = Arc::new(ScriptedNetwork::new(vec![Err(
            NetworkError::InvalidResponse("garbage".into()),
        )]));
        let resolver = resolver(network.clone());

        let result = resolver
            .resolve("2000000001", Some(&RoutingInfo::new("058")))
            .await;
        assert_eq!(result, Err(EngineError::NetworkUnavailable { attempts: 1 }));
        assert_eq!(network.calls(), 1);
    }
}

//! Transfer Core Types

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::idempotency::IdempotencyKey;
use crate::ledger::{AccountId, Settlement};
use crate::money::MinorUnits;
use crate::recipient::RoutingInfo;

/// Flow handle - ULID-based, passed back by the caller on every step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct FlowHandle(ulid::Ulid);

impl FlowHandle {
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }
}

impl Default for FlowHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FlowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FlowHandle {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ulid::Ulid::from_string(s)
            .map(Self)
            .map_err(|_| EngineError::FlowNotFound(s.to_string()))
    }
}

impl TryFrom<String> for FlowHandle {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FlowHandle> for String {
    fn from(handle: FlowHandle) -> Self {
        handle.to_string()
    }
}

/// Which verification path the destination takes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DestinationKind {
    Internal,
    External { routing: RoutingInfo },
}

impl DestinationKind {
    pub fn routing(&self) -> Option<&RoutingInfo> {
        match self {
            DestinationKind::Internal => None,
            DestinationKind::External { routing } => Some(routing),
        }
    }
}

/// Raw destination as entered by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub account_number: String,
    #[serde(default)]
    pub routing: Option<RoutingInfo>,
}

/// One-shot transfer request carrying every input of a flow
#[derive(Clone, Deserialize)]
pub struct TransferIntent {
    pub source_account_id: AccountId,
    pub destination_account_number: String,
    #[serde(default)]
    pub destination_routing: Option<RoutingInfo>,
    pub amount: rust_decimal::Decimal,
    pub pin_code: String,
    #[serde(default)]
    pub client_idempotency_key: Option<IdempotencyKey>,
}

impl fmt::Debug for TransferIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferIntent")
            .field("source_account_id", &self.source_account_id)
            .field("destination_account_number", &self.destination_account_number)
            .field("destination_routing", &self.destination_routing)
            .field("amount", &self.amount)
            .field("pin_code", &"****")
            .field("client_idempotency_key", &self.client_idempotency_key)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    /// Credited on the home ledger
    Completed,
    /// Debited and handed to the partner network
    Pending,
    Failed,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Completed => "COMPLETED",
            OutcomeStatus::Pending => "PENDING",
            OutcomeStatus::Failed => "FAILED",
        }
    }
}

impl From<Settlement> for OutcomeStatus {
    fn from(settlement: Settlement) -> Self {
        match settlement {
            Settlement::Settled => OutcomeStatus::Completed,
            Settlement::HandedOff => OutcomeStatus::Pending,
        }
    }
}

/// Result of a submission; never changes once produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub reference_id: Option<String>,
    pub status: OutcomeStatus,
    pub amount: MinorUnits,
    pub failure_reason: Option<EngineError>,
}

impl TransferOutcome {
    pub fn settled(reference_id: String, settlement: Settlement, amount: MinorUnits) -> Self {
        Self {
            reference_id: Some(reference_id),
            status: settlement.into(),
            amount,
            failure_reason: None,
        }
    }

    pub fn failed(reason: EngineError, amount: MinorUnits) -> Self {
        Self {
            reference_id: None,
            status: OutcomeStatus::Failed,
            amount,
            failure_reason: Some(reason),
        }
    }
}

/// Submission result plus the key to re-query it by
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub outcome: TransferOutcome,
    pub idempotency_key: IdempotencyKey,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_handle_parse() {
        let handle = FlowHandle::new();
        let parsed: FlowHandle = handle.to_string().parse().unwrap();
        assert_eq!(handle, parsed);

        assert_eq!(
            "nope".parse::<FlowHandle>(),
            Err(EngineError::FlowNotFound("nope".into()))
        );
    }

    #[test]
    fn test_intent_debug_hides_pin() {
        let intent = TransferIntent {
            source_account_id: 1,
            destination_account_number: "1000000002".into(),
            destination_routing: None,
            amount: rust_decimal::Decimal::new(5000, 2),
            pin_code: "9876".into(),
            client_idempotency_key: None,
        };
        let debug = format!("{:?}", intent);
        assert!(!debug.contains("9876"));
        assert!(debug.contains("****"));
    }

    #[test]
    fn test_settlement_maps_to_status() {
        assert_eq!(
            OutcomeStatus::from(Settlement::Settled),
            OutcomeStatus::Completed
        );
        assert_eq!(
            OutcomeStatus::from(Settlement::HandedOff),
            OutcomeStatus::Pending
        );
    }

    #[test]
    fn test_destination_kind_serde() {
        let kind: DestinationKind =
            serde_json::from_str(r#"{"type":"external","routing":{"institution_code":"058"}}"#)
                .unwrap();
        assert_eq!(kind.routing().unwrap().institution_code, "058");

        let kind: DestinationKind = serde_json::from_str(r#"{"type":"internal"}"#).unwrap();
        assert_eq!(kind, DestinationKind::Internal);
    }
}

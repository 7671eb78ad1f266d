//! One transfer flow instance

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use super::state::FlowState;
use super::types::{DestinationKind, FlowHandle, OutcomeStatus, TransferOutcome};
use crate::error::EngineError;
use crate::idempotency::IdempotencyKey;
use crate::ledger::{AccountId, OwnerId};
use crate::money::MinorUnits;
use crate::pin::PinAttempts;
use crate::recipient::VerifiedRecipient;

/// Progress of a single user-initiated transfer
#[derive(Debug, Clone)]
pub struct TransferFlow {
    pub(super) handle: FlowHandle,
    pub(super) caller: OwnerId,
    pub(super) source_account_id: AccountId,
    pub(super) state: FlowState,
    pub(super) destination: Option<DestinationKind>,
    pub(super) account_number: Option<String>,
    pub(super) recipient: Option<VerifiedRecipient>,
    pub(super) amount: Option<MinorUnits>,
    pub(super) pin_attempts: PinAttempts,
    /// Fixed at the first dispatch; every retry of this flow reuses it
    pub(super) idempotency_key: Option<IdempotencyKey>,
    pub(super) outcome: Option<TransferOutcome>,
    pub(super) created_at: DateTime<Utc>,
    pub(super) updated_at: DateTime<Utc>,
}

impl TransferFlow {
    pub fn new(
        caller: OwnerId,
        source_account_id: AccountId,
        max_pin_attempts: u8,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            handle: FlowHandle::new(),
            caller,
            source_account_id,
            state: FlowState::SelectDestinationType,
            destination: None,
            account_number: None,
            recipient: None,
            amount: None,
            pin_attempts: PinAttempts::new(max_pin_attempts),
            idempotency_key: None,
            outcome: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn handle(&self) -> FlowHandle {
        self.handle
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn recipient(&self) -> Option<&VerifiedRecipient> {
        self.recipient.as_ref()
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub(super) fn transition(
        &mut self,
        next: FlowState,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        if !self.state.can_transition_to(next) {
            return Err(EngineError::InvalidStateTransition(format!(
                "{} -> {}",
                self.state, next
            )));
        }
        debug!(flow = %self.handle, from = %self.state, to = %next, "Flow transition");
        self.state = next;
        self.updated_at = now;
        Ok(())
    }

    /// Require the flow to be in `expected`
    pub(super) fn expect_state(&self, expected: FlowState) -> Result<(), EngineError> {
        if self.state != expected {
            return Err(EngineError::InvalidStateTransition(format!(
                "expected {}, flow is {}",
                expected, self.state
            )));
        }
        Ok(())
    }

    /// Drop everything derived from the old destination
    pub(super) fn clear_destination(&mut self) {
        self.recipient = None;
        self.amount = None;
    }

    pub(super) fn fail(
        &mut self,
        reason: EngineError,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        self.transition(FlowState::Failed, now)?;
        self.outcome = Some(TransferOutcome::failed(reason, self.amount.unwrap_or(0)));
        Ok(())
    }

    /// The failure that put this flow in FAILED, if any
    pub fn failure(&self) -> Option<&EngineError> {
        self.outcome
            .as_ref()
            .filter(|_| self.state == FlowState::Failed)
            .and_then(|o| o.failure_reason.as_ref())
    }

    pub fn snapshot(&self) -> FlowSnapshot {
        let failure = self.failure();
        FlowSnapshot {
            handle: self.handle,
            caller: self.caller,
            state: self.state,
            source_account_id: self.source_account_id,
            destination: self.destination.clone(),
            recipient: self.recipient.clone(),
            amount: self.amount,
            remaining_pin_attempts: self.pin_attempts.remaining(),
            idempotency_key: self.idempotency_key.clone(),
            reference_id: self.outcome.as_ref().and_then(|o| o.reference_id.clone()),
            outcome_status: self.outcome.as_ref().map(|o| o.status),
            failure_code: failure.map(|e| e.code()),
            failure_message: failure.map(|e| e.to_string()),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Read-only view of a flow for callers
#[derive(Debug, Clone, Serialize)]
pub struct FlowSnapshot {
    pub handle: FlowHandle,
    pub caller: OwnerId,
    pub state: FlowState,
    pub source_account_id: AccountId,
    pub destination: Option<DestinationKind>,
    pub recipient: Option<VerifiedRecipient>,
    pub amount: Option<MinorUnits>,
    pub remaining_pin_attempts: u8,
    pub idempotency_key: Option<IdempotencyKey>,
    pub reference_id: Option<String>,
    pub outcome_status: Option<OutcomeStatus>,
    pub failure_code: Option<&'static str>,
    pub failure_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_flow_starts_at_destination_type() {
        let flow = TransferFlow::new(10, 1, 3, Utc::now());
        assert_eq!(flow.state(), FlowState::SelectDestinationType);
        assert_eq!(flow.snapshot().remaining_pin_attempts, 3);
    }

    #[test]
    fn test_invalid_transition_is_rejected() {
        let mut flow = TransferFlow::new(10, 1, 3, Utc::now());
        let err = flow.transition(FlowState::Submit, Utc::now()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidStateTransition(_)));
        assert_eq!(flow.state(), FlowState::SelectDestinationType);
    }

    #[test]
    fn test_fail_records_reason() {
        let now = Utc::now();
        let mut flow = TransferFlow::new(10, 1, 3, now);
        flow.state = FlowState::Authorize;
        flow.amount = Some(500);

        flow.fail(EngineError::PinAttemptsExceeded, now).unwrap();

        let snapshot = flow.snapshot();
        assert_eq!(snapshot.state, FlowState::Failed);
        assert_eq!(snapshot.failure_code, Some("PIN_ATTEMPTS_EXCEEDED"));
        assert_eq!(snapshot.outcome_status, Some(OutcomeStatus::Failed));
    }
}

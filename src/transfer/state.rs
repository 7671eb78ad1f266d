//! Transfer flow FSM states
//!
//! Transitions are validated here and nowhere else; the orchestrator asks
//! [`FlowState::can_transition_to`] before every move.

use std::fmt;

use serde::Serialize;

/// Transfer flow states
///
/// Terminal states: SUCCESS (60). FAILED (-10) is re-enterable only through
/// `retry_authorization`, and only when the failure is not terminal for the
/// flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum FlowState {
    /// Caller picks internal vs external destination
    SelectDestinationType = 0,

    /// Destination account number being entered or edited
    EnterAccountDetails = 10,

    /// Recipient resolution running
    AwaitVerification = 20,

    /// Recipient verified; amount is collected here
    RecipientVerified = 30,

    /// Waiting for a valid PIN
    Authorize = 40,

    /// Authorized and ready to dispatch (or dispatching)
    Submit = 50,

    /// Terminal: ledger accepted the transfer
    Success = 60,

    /// Failed; see the flow's failure reason
    Failed = -10,
}

impl FlowState {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, FlowState::Success)
    }

    /// States in which the destination may be edited
    #[inline]
    pub fn is_editable(&self) -> bool {
        matches!(
            self,
            FlowState::EnterAccountDetails
                | FlowState::RecipientVerified
                | FlowState::Authorize
                | FlowState::Submit
        )
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(FlowState::SelectDestinationType),
            10 => Some(FlowState::EnterAccountDetails),
            20 => Some(FlowState::AwaitVerification),
            30 => Some(FlowState::RecipientVerified),
            40 => Some(FlowState::Authorize),
            50 => Some(FlowState::Submit),
            60 => Some(FlowState::Success),
            -10 => Some(FlowState::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FlowState::SelectDestinationType => "SELECT_DESTINATION_TYPE",
            FlowState::EnterAccountDetails => "ENTER_ACCOUNT_DETAILS",
            FlowState::AwaitVerification => "AWAIT_VERIFICATION",
            FlowState::RecipientVerified => "RECIPIENT_VERIFIED",
            FlowState::Authorize => "AUTHORIZE",
            FlowState::Submit => "SUBMIT",
            FlowState::Success => "SUCCESS",
            FlowState::Failed => "FAILED",
        }
    }

    /// Allowed moves
    ///
    /// ```text
    /// SELECT_DESTINATION_TYPE → ENTER_ACCOUNT_DETAILS → AWAIT_VERIFICATION
    ///   → RECIPIENT_VERIFIED → AUTHORIZE → SUBMIT → SUCCESS
    ///
    /// AWAIT_VERIFICATION → ENTER_ACCOUNT_DETAILS      (lookup failed)
    /// RECIPIENT_VERIFIED | AUTHORIZE | SUBMIT
    ///   → ENTER_ACCOUNT_DETAILS                       (destination edited)
    /// AUTHORIZE | SUBMIT → FAILED → AUTHORIZE         (retry)
    /// ```
    pub fn can_transition_to(&self, next: FlowState) -> bool {
        use FlowState::*;
        match (self, next) {
            (SelectDestinationType, EnterAccountDetails) => true,
            (EnterAccountDetails, SelectDestinationType | EnterAccountDetails) => true,
            (EnterAccountDetails, AwaitVerification) => true,
            (AwaitVerification, RecipientVerified | EnterAccountDetails) => true,
            (RecipientVerified, Authorize) => true,
            (Authorize, Submit | Failed) => true,
            (Submit, Success | Failed) => true,
            (Failed, Authorize) => true,
            // Destination edits before dispatch
            (s, EnterAccountDetails) if s.is_editable() => true,
            _ => false,
        }
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

//! Direct Transfer FSM
//!
//! Sequences recipient resolution, amount validation, PIN authorization and
//! ledger submission for one transfer.
//!
//! # State Machine
//!
//! ```text
//! SELECT_DESTINATION_TYPE → ENTER_ACCOUNT_DETAILS → AWAIT_VERIFICATION
//!   → RECIPIENT_VERIFIED → AUTHORIZE → SUBMIT → SUCCESS
//!                              ↑          ↓
//!                              └──── FAILED
//! ```
//!
//! Editing the destination before dispatch returns the flow to
//! ENTER_ACCOUNT_DETAILS and discards the verified recipient.

pub mod flow;
pub mod orchestrator;
pub mod state;
pub mod types;


pub use flow::{FlowSnapshot, TransferFlow};
pub use orchestrator::TransferOrchestrator;
pub use state::FlowState;
pub use types::{
    Destination, DestinationKind, FlowHandle, OutcomeStatus, SubmitReceipt, TransferIntent,
    TransferOutcome,
};

//! funds_flow - Funds-Movement Workflow Engine
//!
//! Verified direct transfers and cardless ATM withdrawal codes on top of an
//! external account ledger, with exactly-once submission under client retries.
//!
//! # Modules
//!
//! - [`money`] - Minor-unit amounts and decimal parsing
//! - [`error`] - Engine error taxonomy
//! - [`ledger`] - Account ledger boundary (+ in-memory implementation)
//! - [`network`] - Interbank name-enquiry boundary
//! - [`idempotency`] - Exactly-once execution per idempotency key
//! - [`recipient`] - Recipient resolution with bounded retries
//! - [`pin`] - PIN attempt tracking
//! - [`atm`] - Cardless withdrawal codes
//! - [`transfer`] - Direct transfer FSM and orchestrator
//! - [`service`] - Public operations over all of the above
//! - [`worker`] - Periodic maintenance
//! - [`gateway`] - HTTP API

// Core types - must be first!
pub mod clock;
pub mod error;
pub mod money;

// Configuration and logging
pub mod config;
pub mod logging;

// External boundaries
pub mod ledger;
pub mod network;

// Engine components
pub mod atm;
pub mod idempotency;
pub mod pin;
pub mod recipient;
pub mod transfer;

// Service layer
pub mod gateway;
pub mod service;
pub mod worker;

// Convenient re-exports at crate root
pub use error::{EngineError, ErrorClass};
pub use idempotency::IdempotencyKey;
pub use money::MinorUnits;
pub use service::FundsService;
pub use transfer::{Destination, FlowHandle, FlowState, TransferIntent, TransferOutcome};

//! Cardless withdrawal codes
//!
//! An account holds at most one ACTIVE code. Codes are single use and expire
//! on the engine clock.

pub mod code;
pub mod issuer;


pub use code::{AtmWithdrawalCode, CodeStatus};
pub use issuer::{AtmCodeIssuer, AtmCodeReceipt};

//! Request deduplication
//!
//! Every mutating call (transfer submission, ATM code generation) runs under
//! an [`IdempotencyKey`]. The [`IdempotencyGuard`] records the outcome per key
//! so that client retries replay instead of re-executing.

pub mod guard;
pub mod key;

pub use guard::{IdempotencyGuard, IdempotencyRecord, RecordState, RecordStatus};
pub use key::{Fingerprint, IdempotencyKey, KeyGenerator};

//! Batch verification: reconcile a database record with its ledger record.

pub mod coordinator;
pub mod error;
pub mod result;

pub use coordinator::VerificationCoordinator;
pub use error::VerifyError;
pub use result::{VerificationReason, VerificationResult};

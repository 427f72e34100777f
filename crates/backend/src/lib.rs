//! Database side of AsaliTrace: record types, the [`TraceBackend`] trait,
//! a REST client for the hosted backend and an in-memory implementation.

pub mod backend;
pub mod error;
pub mod http;
pub mod memory;
pub mod model;

pub use backend::TraceBackend;
pub use error::BackendError;
pub use http::{HttpBackend, TokenStore, DEFAULT_API_URL, LOGIN_ROUTE};
pub use memory::InMemoryBackend;
pub use model::{
    chain_description, BatchRecord, BatchStatus, CertificateRecord, CreatedBatch, LabTestRecord,
    NewBatch, NewCertificate, NewLabTest, RecordOutcome,
};

/// All errors that can be returned by a [`TraceBackend`](crate::TraceBackend).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The session expired or was never established. Stored tokens have
    /// already been cleared; the user has to log in again.
    #[error("authentication required: log in again at {login_route}")]
    Unauthorized { login_route: String },

    #[error("{resource} '{id}' not found")]
    NotFound { resource: String, id: String },

    /// The backend refused the request body.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The backend could not reach its ledger node.
    #[error("ledger node unavailable: {0}")]
    ChainUnavailable(String),

    /// The backend reached the ledger but the write failed.
    #[error("ledger write failed: {0}")]
    ChainWrite(String),

    /// Any other non-success status.
    #[error("backend returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("cannot reach backend: {0}")]
    Transport(String),

    #[error("unexpected backend response: {0}")]
    Decode(String),
}

impl BackendError {
    pub fn not_found(resource: &str, id: impl ToString) -> Self {
        BackendError::NotFound {
            resource: resource.to_string(),
            id: id.to_string(),
        }
    }
}

use episync_models::Service;
use episync_services::ServiceError;
use std::path::PathBuf;
use thiserror::Error;

/// Pass-level failures. Per-item problems travel in the plan's omissions and
/// the applier's outcomes instead, so anything surfacing here aborts work.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("authentication expired for {service}: {detail}")]
    AuthExpired { service: Service, detail: String },

    #[error("{service} unavailable: {detail}")]
    RemoteUnavailable { service: Service, detail: String },

    #[error("sync ledger at {path} is corrupt: {detail}")]
    LedgerCorrupt { path: PathBuf, detail: String },

    #[error("failed to write sync ledger at {path}: {detail}")]
    LedgerWriteFailed { path: PathBuf, detail: String },

    #[error("another sync pass is already running")]
    PassInProgress,
}

impl SyncError {
    /// Lift a client error into a pass-level error against `service`.
    pub fn from_service(service: Service, err: ServiceError) -> Self {
        match err {
            ServiceError::AuthExpired(detail) => SyncError::AuthExpired { service, detail },
            other => SyncError::RemoteUnavailable {
                service,
                detail: other.to_string(),
            },
        }
    }

    /// Whether the watch loop may keep going after this error. Ledger
    /// problems mean unknown sync state and end the loop.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            SyncError::LedgerCorrupt { .. } | SyncError::LedgerWriteFailed { .. }
        )
    }
}

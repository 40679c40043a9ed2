pub mod apply;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod normalize;
pub mod orchestrator;
pub mod reconcile;

pub use apply::{ApplyReport, WriteOutcome};
pub use error::SyncError;
pub use identity::{IdentityResolver, Resolution};
pub use ledger::{LedgerEntry, LedgerStats, SyncLedger};
pub use orchestrator::{PassReport, SyncOrchestrator};
pub use reconcile::{reconcile, ReconcileInput};

pub mod event;
pub mod item;
pub mod options;
pub mod plan;
pub mod service;

pub use event::{EventKey, ShowRating, WatchEvent};
pub use item::ItemKey;
pub use options::{ConflictStrategy, SyncDirection};
pub use plan::{ConfirmedEvent, Omission, PlannedWrite, SkipReason, SyncPlan, WriteOp};
pub use service::Service;

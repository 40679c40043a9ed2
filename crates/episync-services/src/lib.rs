pub mod error;
pub mod serializd;
pub mod trakt;
pub mod traits;

pub use error::ServiceError;
pub use serializd::SerializdClient;
pub use trakt::TraktClient;
pub use traits::{HistoryPage, RawShowRating, RawWatchRecord, TrackingService};

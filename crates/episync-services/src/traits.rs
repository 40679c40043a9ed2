use crate::error::ServiceError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use episync_models::{Service, WatchEvent};

/// A watch record as the service reports it, before normalization. Ratings
/// are still on the service's native scale; the normalizer owns the rescale
/// and the rewatch ordinals.
#[derive(Debug, Clone, PartialEq)]
pub struct RawWatchRecord {
    pub origin: Service,
    /// TMDB id of the movie, or of the show for episode records.
    pub tmdb_id: Option<u64>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub title: Option<String>,
    pub watched_at: DateTime<Utc>,
    /// Native-scale rating as reported; `Some(0)` is meaningful on Serializd.
    pub native_rating: Option<u8>,
    pub last_modified: DateTime<Utc>,
    /// Service-side record id, when the service exposes one.
    pub native_id: Option<u64>,
}

/// A show-level rating with no episode row behind it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawShowRating {
    pub origin: Service,
    pub tmdb_show_id: Option<u64>,
    pub title: Option<String>,
    pub native_rating: u8,
    pub last_modified: DateTime<Utc>,
}

/// Result of one incremental history fetch: everything at or after the
/// caller's cursor, plus the cursor to persist for the next pass.
#[derive(Debug, Clone, Default)]
pub struct HistoryPage {
    pub records: Vec<RawWatchRecord>,
    pub next_cursor: Option<DateTime<Utc>>,
}

/// The contract every remote tracker fulfils. Read methods are used during
/// the fetch phase; write methods by the applier. Implementations map their
/// own wire failures onto `ServiceError` so retry policy lives in one place.
#[async_trait]
pub trait TrackingService: Send + Sync {
    fn service(&self) -> Service;

    async fn authenticate(&mut self) -> Result<(), ServiceError>;
    fn is_authenticated(&self) -> bool;

    /// Fetch watch history at or after `since` (everything when `None`),
    /// with per-event ratings already joined in.
    async fn fetch_watch_history(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<HistoryPage, ServiceError>;

    /// Show-level ratings that have no per-episode representation.
    async fn fetch_show_ratings(&self) -> Result<Vec<RawShowRating>, ServiceError>;

    /// Record a new watch. Returns the service-side record id when the
    /// service reports one.
    async fn create_watch_event(&self, event: &WatchEvent) -> Result<Option<u64>, ServiceError>;

    /// Set or clear the rating on an existing watch. `native_id` is the
    /// target-side record when known.
    async fn update_rating(
        &self,
        event: &WatchEvent,
        native_id: Option<u64>,
        rating: Option<u8>,
    ) -> Result<(), ServiceError>;

    /// Move an existing watch to a new timestamp.
    async fn update_timestamp(
        &self,
        event: &WatchEvent,
        native_id: Option<u64>,
        watched_at: DateTime<Utc>,
    ) -> Result<(), ServiceError>;
}

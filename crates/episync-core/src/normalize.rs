use crate::identity::{IdentityResolver, Resolution};
use chrono::NaiveDate;
use episync_models::{ItemKey, Omission, ShowRating, SkipReason, WatchEvent};
use episync_services::{RawShowRating, RawWatchRecord};
use std::collections::HashMap;
use tracing::debug;

/// Map a service-native rating into the canonical 0-10 scale. Both services
/// rate 1-10; Serializd reports 0 for unrated. Exact for every representable
/// value, so rescaling round-trips.
pub fn rescale_from_native(native: Option<u8>) -> Option<u8> {
    native.and_then(|r| if r == 0 { None } else { Some(r.min(10)) })
}

/// Map a canonical rating back to the native wire value. `None` becomes 0,
/// which both services treat as "unrated".
pub fn rescale_to_native(canonical: Option<u8>) -> u8 {
    canonical.unwrap_or(0)
}

#[derive(Debug, Default)]
pub struct NormalizeOutput {
    pub events: Vec<WatchEvent>,
    pub omissions: Vec<Omission>,
}

/// Turn one service's raw records into canonical watch events: identities
/// resolved, ratings rescaled, events ordered by (watched_at, insertion
/// order), and rewatch ordinals assigned per item and calendar day.
pub fn normalize(records: &[RawWatchRecord], resolver: &mut IdentityResolver) -> NormalizeOutput {
    let mut out = NormalizeOutput::default();

    for record in records {
        let item = match resolver.resolve(record) {
            Resolution::Resolved(item) => item,
            Resolution::Unmatched(detail) => {
                out.omissions.push(Omission {
                    key: None,
                    skip: SkipReason::UnresolvedIdentity { detail },
                });
                continue;
            }
        };
        out.events.push(WatchEvent {
            item,
            title: record.title.clone(),
            watched_at: record.watched_at,
            rewatch: 0,
            rating: rescale_from_native(record.native_rating),
            origin: record.origin,
            last_modified: record.last_modified,
            native_id: record.native_id,
        });
    }

    // Stable sort keeps source insertion order for equal timestamps, which
    // makes the rewatch ordinals deterministic.
    out.events.sort_by_key(|e| e.watched_at);

    let mut seen: HashMap<(ItemKey, NaiveDate), u32> = HashMap::new();
    for event in &mut out.events {
        let slot = seen
            .entry((event.item, event.watched_at.date_naive()))
            .or_insert(0);
        event.rewatch = *slot;
        *slot += 1;
    }

    debug!(
        events = out.events.len(),
        unmatched = out.omissions.len(),
        "normalized watch records"
    );
    out
}

/// Show-level ratings kept apart from episode events so the reconciler can
/// report them rather than invent watches for them.
pub fn normalize_show_ratings(raw: &[RawShowRating]) -> (Vec<ShowRating>, Vec<Omission>) {
    let mut ratings = Vec::new();
    let mut omissions = Vec::new();
    for r in raw {
        let tmdb_show_id = match r.tmdb_show_id {
            Some(id) => id,
            None => {
                omissions.push(Omission {
                    key: None,
                    skip: SkipReason::UnresolvedIdentity {
                        detail: format!(
                            "show rating for '{}' has no TMDB id",
                            r.title.as_deref().unwrap_or("<untitled>")
                        ),
                    },
                });
                continue;
            }
        };
        if let Some(rating) = rescale_from_native(Some(r.native_rating)) {
            ratings.push(ShowRating {
                tmdb_show_id,
                title: r.title.clone(),
                rating,
                origin: r.origin,
                last_modified: r.last_modified,
            });
        }
    }
    (ratings, omissions)
}

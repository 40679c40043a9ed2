use crate::event::{EventKey, WatchEvent};
use crate::service::Service;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Operation proposed against one service's write API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum WriteOp {
    Create,
    UpdateRating {
        rating: Option<u8>,
    },
    UpdateTimestamp {
        watched_at: DateTime<Utc>,
    },
}

/// A single proposed write. `event` carries the canonical values to write;
/// `target_native_id` is the target-side record to update, when known from
/// the counterpart event or the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlannedWrite {
    pub target: Service,
    pub event: WatchEvent,
    pub op: WriteOp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_native_id: Option<u64>,
}

impl fmt::Display for PlannedWrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.op {
            WriteOp::Create => write!(
                f,
                "create {} on {} (watched {}{})",
                self.event.key(),
                self.target,
                self.event.watched_at.format("%Y-%m-%d"),
                match self.event.rating {
                    Some(r) => format!(", rating {}", r),
                    None => String::new(),
                }
            ),
            WriteOp::UpdateRating { rating } => write!(
                f,
                "update rating of {} on {} to {}",
                self.event.key(),
                self.target,
                rating.map_or_else(|| "unrated".to_string(), |r| r.to_string())
            ),
            WriteOp::UpdateTimestamp { watched_at } => write!(
                f,
                "update timestamp of {} on {} to {}",
                self.event.key(),
                self.target,
                watched_at.to_rfc3339()
            ),
        }
    }
}

/// Why an item produced no write this pass. These are reported, never
/// silently dropped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum SkipReason {
    /// Could not be correlated between the services with enough confidence.
    UnresolvedIdentity { detail: String },
    /// Show-level rating with no backing episode watch data.
    UnsupportedShowRating { tmdb_show_id: u64 },
    /// Permanently excluded by the ledger (e.g. season missing on the target).
    Excluded { detail: String },
    /// The winning value exists but the target cannot represent it.
    UnsupportedField { detail: String },
}

/// A matched pair that needed no write. Recorded so the ledger learns the
/// event is present on both sides and can link the native ids.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfirmedEvent {
    pub key: EventKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,
    pub watched_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trakt_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serializd_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Omission {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<EventKey>,
    pub skip: SkipReason,
}

/// The full output of one reconcile call: proposed writes plus everything
/// deliberately left alone. Deterministic for identical inputs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SyncPlan {
    pub writes: Vec<PlannedWrite>,
    pub omitted: Vec<Omission>,
    /// Divergence-free matched pairs; no write needed, but the ledger
    /// records them as confirmed present on both sides.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub confirmed: Vec<ConfirmedEvent>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn writes_for(&self, target: Service) -> impl Iterator<Item = &PlannedWrite> {
        self.writes.iter().filter(move |w| w.target == target)
    }

    /// Stable ordering by (target, event key, op discriminant) so two plans
    /// built from the same inputs compare byte-identical.
    pub fn sort(&mut self) {
        self.writes.sort_by(|a, b| {
            (a.target, a.event.key(), op_rank(&a.op)).cmp(&(b.target, b.event.key(), op_rank(&b.op)))
        });
        self.omitted.sort_by(|a, b| {
            (a.key, format!("{:?}", a.skip)).cmp(&(b.key, format!("{:?}", b.skip)))
        });
        self.confirmed.sort_by_key(|c| c.key);
    }
}

fn op_rank(op: &WriteOp) -> u8 {
    match op {
        WriteOp::Create => 0,
        WriteOp::UpdateRating { .. } => 1,
        WriteOp::UpdateTimestamp { .. } => 2,
    }
}

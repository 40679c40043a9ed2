use crate::ledger::SyncLedger;
use episync_models::{
    ConfirmedEvent, ConflictStrategy, EventKey, ItemKey, Omission, PlannedWrite, Service,
    ShowRating, SkipReason, SyncDirection, SyncPlan, WatchEvent, WriteOp,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

pub struct ReconcileInput<'a> {
    pub trakt: &'a [WatchEvent],
    pub serializd: &'a [WatchEvent],
    pub show_ratings: &'a [ShowRating],
    pub ledger: &'a SyncLedger,
    pub strategy: ConflictStrategy,
    pub direction: SyncDirection,
}

/// Compute the writes that would make both sides agree. Pure and
/// deterministic: sorted maps, sorted output, no clock, no I/O. Running it
/// twice on the same inputs yields identical plans, and running it on
/// already-reconciled inputs yields an empty one.
pub fn reconcile(input: ReconcileInput<'_>) -> SyncPlan {
    let trakt: BTreeMap<EventKey, &WatchEvent> =
        input.trakt.iter().map(|e| (e.key(), e)).collect();
    let serializd: BTreeMap<EventKey, &WatchEvent> =
        input.serializd.iter().map(|e| (e.key(), e)).collect();

    let keys: BTreeSet<EventKey> = trakt.keys().chain(serializd.keys()).copied().collect();

    let mut plan = SyncPlan::default();

    for key in keys {
        if let Some(reason) = input.ledger.exclusion(&key) {
            plan.omitted.push(Omission {
                key: Some(key),
                skip: SkipReason::Excluded {
                    detail: reason.clone(),
                },
            });
            continue;
        }

        match (trakt.get(&key), serializd.get(&key)) {
            (Some(t), Some(s)) => reconcile_pair(&input, t, s, &mut plan),
            (Some(present), None) => reconcile_one_sided(&input, present, &mut plan),
            (None, Some(present)) => reconcile_one_sided(&input, present, &mut plan),
            (None, None) => unreachable!("key came from one of the two maps"),
        }
    }

    // Show-level ratings have no episode rows to anchor a watch on, so they
    // are never written, only reported.
    for rating in input.show_ratings {
        plan.omitted.push(Omission {
            key: None,
            skip: SkipReason::UnsupportedShowRating {
                tmdb_show_id: rating.tmdb_show_id,
            },
        });
    }

    plan.sort();
    debug!(
        writes = plan.writes.len(),
        omitted = plan.omitted.len(),
        "reconciled"
    );
    plan
}

/// Order (winner, loser) under the configured strategy. A newest-wins tie
/// goes to Trakt so the outcome is independent of input order.
fn pick<'a>(
    strategy: ConflictStrategy,
    t: &'a WatchEvent,
    s: &'a WatchEvent,
) -> (&'a WatchEvent, &'a WatchEvent) {
    match strategy {
        ConflictStrategy::TraktWins => (t, s),
        ConflictStrategy::SerializdWins => (s, t),
        ConflictStrategy::NewestWins => {
            if s.last_modified > t.last_modified {
                (s, t)
            } else {
                (t, s)
            }
        }
    }
}

/// The event exists on both sides: never a create, possibly field updates.
fn reconcile_pair(
    input: &ReconcileInput<'_>,
    t: &WatchEvent,
    s: &WatchEvent,
    plan: &mut SyncPlan,
) {
    // No divergence: confirm the pair so the ledger links the native ids
    // and future passes compare against a baseline.
    if t.rating == s.rating && t.watched_at == s.watched_at {
        plan.confirmed.push(ConfirmedEvent {
            key: t.key(),
            rating: t.rating,
            watched_at: t.watched_at,
            trakt_id: t.native_id,
            serializd_id: s.native_id,
        });
        return;
    }

    // Ratings. A value on exactly one side is carried over, not contested.
    match (t.rating, s.rating) {
        (Some(tr), Some(sr)) if tr != sr => {
            let (winner, loser) = pick(input.strategy, t, s);
            push_rating(input, winner, loser, winner.rating, plan);
        }
        (Some(_), None) => push_rating(input, t, s, t.rating, plan),
        (None, Some(_)) => push_rating(input, s, t, s.rating, plan),
        _ => {}
    }

    // Timestamps. Keys match on the calendar day, so only time-of-day can
    // diverge here.
    if t.watched_at != s.watched_at {
        let (winner, loser) = pick(input.strategy, t, s);
        push_timestamp(input, winner, loser.origin, loser.native_id, plan);
    }
}

/// The event exists on one side only. With a ledger entry this is a linked
/// event whose other half simply was not re-fetched; without one it is new.
fn reconcile_one_sided(input: &ReconcileInput<'_>, present: &WatchEvent, plan: &mut SyncPlan) {
    let key = present.key();
    let target = present.origin.other();

    match input.ledger.lookup(&key) {
        Some(linked) => {
            // Compare against the last confirmed values; only changes since
            // then need to travel.
            let target_native_id = match target {
                Service::Trakt => linked.trakt_id,
                Service::Serializd => linked.serializd_id,
            };
            if present.rating != linked.rating {
                if input.direction.allows_from(present.origin) {
                    plan.writes.push(PlannedWrite {
                        target,
                        event: present.clone(),
                        op: WriteOp::UpdateRating {
                            rating: present.rating,
                        },
                        target_native_id,
                    });
                }
            }
            if present.watched_at != linked.watched_at {
                push_timestamp(input, present, target, target_native_id, plan);
            }
        }
        None => {
            if !input.direction.allows_from(present.origin) {
                return;
            }
            if matches!(present.item, ItemKey::Movie { .. }) && target == Service::Serializd {
                plan.omitted.push(Omission {
                    key: Some(key),
                    skip: SkipReason::UnsupportedField {
                        detail: "movies cannot be logged on serializd".to_string(),
                    },
                });
                return;
            }
            plan.writes.push(PlannedWrite {
                target,
                event: present.clone(),
                op: WriteOp::Create,
                target_native_id: None,
            });
        }
    }
}

fn push_rating(
    input: &ReconcileInput<'_>,
    winner: &WatchEvent,
    loser: &WatchEvent,
    rating: Option<u8>,
    plan: &mut SyncPlan,
) {
    if !input.direction.allows_from(winner.origin) {
        return;
    }
    plan.writes.push(PlannedWrite {
        target: loser.origin,
        event: winner.clone(),
        op: WriteOp::UpdateRating { rating },
        target_native_id: loser.native_id,
    });
}

fn push_timestamp(
    input: &ReconcileInput<'_>,
    winner: &WatchEvent,
    target: Service,
    target_native_id: Option<u64>,
    plan: &mut SyncPlan,
) {
    if !input.direction.allows_from(winner.origin) {
        return;
    }
    // Serializd stores dates only; a time-of-day difference within the same
    // day cannot be written there.
    if target == Service::Serializd {
        plan.omitted.push(Omission {
            key: Some(winner.key()),
            skip: SkipReason::UnsupportedField {
                detail: "time of day is not representable on serializd".to_string(),
            },
        });
        return;
    }
    plan.writes.push(PlannedWrite {
        target,
        event: winner.clone(),
        op: WriteOp::UpdateTimestamp {
            watched_at: winner.watched_at,
        },
        target_native_id,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerEntry;
    use chrono::{DateTime, Utc};
    use std::path::PathBuf;

    fn event(
        origin: Service,
        episode: u32,
        watched_at: &str,
        rating: Option<u8>,
    ) -> WatchEvent {
        let watched_at: DateTime<Utc> = watched_at.parse().unwrap();
        WatchEvent {
            item: ItemKey::Episode {
                tmdb_show_id: 100,
                season: 1,
                episode,
            },
            title: Some("Show".to_string()),
            watched_at,
            rewatch: 0,
            rating,
            origin,
            last_modified: watched_at,
            native_id: Some(u64::from(episode) * 10),
        }
    }

    fn empty_ledger() -> SyncLedger {
        SyncLedger::new(PathBuf::from("/tmp/ledger.json"))
    }

    fn run(
        trakt: &[WatchEvent],
        serializd: &[WatchEvent],
        ledger: &SyncLedger,
        strategy: ConflictStrategy,
        direction: SyncDirection,
    ) -> SyncPlan {
        reconcile(ReconcileInput {
            trakt,
            serializd,
            show_ratings: &[],
            ledger,
            strategy,
            direction,
        })
    }

    #[test]
    fn test_one_sided_new_event_creates_on_other_side() {
        let ledger = empty_ledger();
        let trakt = vec![event(Service::Trakt, 1, "2024-03-01T20:00:00Z", Some(8))];
        let plan = run(&trakt, &[], &ledger, ConflictStrategy::TraktWins, SyncDirection::Both);

        assert_eq!(plan.writes.len(), 1);
        assert_eq!(plan.writes[0].target, Service::Serializd);
        assert_eq!(plan.writes[0].op, WriteOp::Create);
    }

    #[test]
    fn test_identical_sides_yield_empty_plan() {
        let ledger = empty_ledger();
        let t = vec![event(Service::Trakt, 1, "2024-03-01T20:00:00Z", Some(8))];
        let s = vec![event(Service::Serializd, 1, "2024-03-01T20:00:00Z", Some(8))];
        let plan = run(&t, &s, &ledger, ConflictStrategy::TraktWins, SyncDirection::Both);
        assert!(plan.is_empty());

        // The pair is confirmed with both native ids so the ledger can link them
        assert_eq!(plan.confirmed.len(), 1);
        assert_eq!(plan.confirmed[0].trakt_id, Some(10));
        assert_eq!(plan.confirmed[0].serializd_id, Some(10));
    }

    #[test]
    fn test_idempotence_applying_plan_converges() {
        // Apply the planned rating to the loser, re-reconcile, expect empty.
        let ledger = empty_ledger();
        let t = vec![event(Service::Trakt, 1, "2024-03-01T20:00:00Z", Some(8))];
        let mut s = vec![event(Service::Serializd, 1, "2024-03-01T20:00:00Z", Some(5))];
        let plan = run(&t, &s, &ledger, ConflictStrategy::TraktWins, SyncDirection::Both);
        assert_eq!(plan.writes.len(), 1);

        s[0].rating = Some(8);
        let plan2 = run(&t, &s, &ledger, ConflictStrategy::TraktWins, SyncDirection::Both);
        assert!(plan2.is_empty());
    }

    #[test]
    fn test_conflict_resolved_by_strategy() {
        let ledger = empty_ledger();
        let t = vec![event(Service::Trakt, 1, "2024-03-01T20:00:00Z", Some(8))];
        let s = vec![event(Service::Serializd, 1, "2024-03-01T20:00:00Z", Some(5))];

        let plan = run(&t, &s, &ledger, ConflictStrategy::SerializdWins, SyncDirection::Both);
        assert_eq!(plan.writes.len(), 1);
        assert_eq!(plan.writes[0].target, Service::Trakt);
        assert_eq!(plan.writes[0].op, WriteOp::UpdateRating { rating: Some(5) });
    }

    #[test]
    fn test_conflict_symmetry() {
        // Swapping the sides and mirroring the strategy mirrors the plan.
        let ledger = empty_ledger();
        let t = vec![event(Service::Trakt, 1, "2024-03-01T20:00:00Z", Some(8))];
        let s = vec![event(Service::Serializd, 1, "2024-03-01T20:00:00Z", Some(5))];

        let forward = run(&t, &s, &ledger, ConflictStrategy::TraktWins, SyncDirection::Both);
        let mirrored = run(&t, &s, &ledger, ConflictStrategy::SerializdWins, SyncDirection::Both);

        assert_eq!(forward.writes.len(), 1);
        assert_eq!(mirrored.writes.len(), 1);
        assert_eq!(forward.writes[0].target, Service::Serializd);
        assert_eq!(mirrored.writes[0].target, Service::Trakt);
        assert_eq!(forward.writes[0].op, WriteOp::UpdateRating { rating: Some(8) });
        assert_eq!(mirrored.writes[0].op, WriteOp::UpdateRating { rating: Some(5) });
    }

    #[test]
    fn test_newest_wins_tie_goes_to_trakt() {
        let ledger = empty_ledger();
        let t = vec![event(Service::Trakt, 1, "2024-03-01T20:00:00Z", Some(8))];
        let s = vec![event(Service::Serializd, 1, "2024-03-01T20:00:00Z", Some(5))];

        let plan = run(&t, &s, &ledger, ConflictStrategy::NewestWins, SyncDirection::Both);
        assert_eq!(plan.writes[0].target, Service::Serializd);
        assert_eq!(plan.writes[0].op, WriteOp::UpdateRating { rating: Some(8) });
    }

    #[test]
    fn test_newest_wins_prefers_later_modification() {
        let ledger = empty_ledger();
        let t = vec![event(Service::Trakt, 1, "2024-03-01T20:00:00Z", Some(8))];
        let mut s = vec![event(Service::Serializd, 1, "2024-03-01T20:00:00Z", Some(5))];
        s[0].last_modified = "2024-03-05T00:00:00Z".parse().unwrap();

        let plan = run(&t, &s, &ledger, ConflictStrategy::NewestWins, SyncDirection::Both);
        assert_eq!(plan.writes[0].target, Service::Trakt);
        assert_eq!(plan.writes[0].op, WriteOp::UpdateRating { rating: Some(5) });
    }

    #[test]
    fn test_one_sided_rating_is_carried_not_contested() {
        // Strategy says trakt wins, but serializd has the only rating; it
        // must still travel to trakt.
        let ledger = empty_ledger();
        let t = vec![event(Service::Trakt, 1, "2024-03-01T20:00:00Z", None)];
        let s = vec![event(Service::Serializd, 1, "2024-03-01T20:00:00Z", Some(7))];

        let plan = run(&t, &s, &ledger, ConflictStrategy::TraktWins, SyncDirection::Both);
        assert_eq!(plan.writes.len(), 1);
        assert_eq!(plan.writes[0].target, Service::Trakt);
        assert_eq!(plan.writes[0].op, WriteOp::UpdateRating { rating: Some(7) });
    }

    #[test]
    fn test_direction_filter_suppresses_writes() {
        let ledger = empty_ledger();
        let s = vec![event(Service::Serializd, 1, "2024-03-01T20:00:00Z", None)];
        let plan = run(
            &[],
            &s,
            &ledger,
            ConflictStrategy::TraktWins,
            SyncDirection::TraktToSerializd,
        );
        assert!(plan.is_empty());
    }

    #[test]
    fn test_rewatches_are_independent() {
        let ledger = empty_ledger();
        let mut first = event(Service::Trakt, 1, "2024-03-01T10:00:00Z", None);
        let mut second = event(Service::Trakt, 1, "2024-03-01T20:00:00Z", None);
        first.rewatch = 0;
        second.rewatch = 1;
        // Serializd only has the first watch
        let mut s_first = event(Service::Serializd, 1, "2024-03-01T10:00:00Z", None);
        s_first.rewatch = 0;

        let plan = run(
            &[first, second],
            &[s_first],
            &ledger,
            ConflictStrategy::TraktWins,
            SyncDirection::Both,
        );
        // Only the second watch is missing; the first is never merged into it
        assert_eq!(plan.writes.len(), 1);
        assert_eq!(plan.writes[0].op, WriteOp::Create);
        assert_eq!(plan.writes[0].event.rewatch, 1);
    }

    #[test]
    fn test_excluded_key_is_reported_not_written() {
        let mut ledger = empty_ledger();
        let t = vec![event(Service::Trakt, 1, "2024-03-01T20:00:00Z", None)];
        ledger.exclude(&t[0].key(), "season missing on serializd".to_string());

        let plan = run(&t, &[], &ledger, ConflictStrategy::TraktWins, SyncDirection::Both);
        assert!(plan.writes.is_empty());
        assert_eq!(plan.omitted.len(), 1);
        assert!(matches!(
            plan.omitted[0].skip,
            SkipReason::Excluded { .. }
        ));
    }

    #[test]
    fn test_ledger_linked_rating_change_propagates() {
        // Serializd was not re-fetched; trakt changed its rating since the
        // last confirmation.
        let mut ledger = empty_ledger();
        let t = vec![event(Service::Trakt, 1, "2024-03-01T20:00:00Z", Some(9))];
        ledger.upsert(LedgerEntry {
            key: t[0].key(),
            rating: Some(6),
            watched_at: t[0].watched_at,
            trakt_id: Some(10),
            serializd_id: Some(77),
            confirmed_at: "2024-03-02T00:00:00Z".parse().unwrap(),
        });

        let plan = run(&t, &[], &ledger, ConflictStrategy::TraktWins, SyncDirection::Both);
        assert_eq!(plan.writes.len(), 1);
        assert_eq!(plan.writes[0].target, Service::Serializd);
        assert_eq!(plan.writes[0].op, WriteOp::UpdateRating { rating: Some(9) });
        assert_eq!(plan.writes[0].target_native_id, Some(77));
    }

    #[test]
    fn test_ledger_linked_unchanged_event_is_quiet() {
        let mut ledger = empty_ledger();
        let t = vec![event(Service::Trakt, 1, "2024-03-01T20:00:00Z", Some(6))];
        ledger.upsert(LedgerEntry {
            key: t[0].key(),
            rating: Some(6),
            watched_at: t[0].watched_at,
            trakt_id: Some(10),
            serializd_id: Some(77),
            confirmed_at: "2024-03-02T00:00:00Z".parse().unwrap(),
        });

        let plan = run(&t, &[], &ledger, ConflictStrategy::TraktWins, SyncDirection::Both);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_show_rating_reported_as_unsupported() {
        let ledger = empty_ledger();
        let show_ratings = vec![ShowRating {
            tmdb_show_id: 100,
            title: Some("Show".to_string()),
            rating: 9,
            origin: Service::Trakt,
            last_modified: "2024-03-01T00:00:00Z".parse().unwrap(),
        }];
        let plan = reconcile(ReconcileInput {
            trakt: &[],
            serializd: &[],
            show_ratings: &show_ratings,
            ledger: &ledger,
            strategy: ConflictStrategy::TraktWins,
            direction: SyncDirection::Both,
        });
        assert!(plan.writes.is_empty());
        assert!(matches!(
            plan.omitted[0].skip,
            SkipReason::UnsupportedShowRating { tmdb_show_id: 100 }
        ));
    }

    #[test]
    fn test_time_of_day_divergence_toward_serializd_is_unsupported() {
        let ledger = empty_ledger();
        let t = vec![event(Service::Trakt, 1, "2024-03-01T20:00:00Z", None)];
        let s = vec![event(Service::Serializd, 1, "2024-03-01T00:00:00Z", None)];

        let plan = run(&t, &s, &ledger, ConflictStrategy::TraktWins, SyncDirection::Both);
        assert!(plan.writes.is_empty());
        assert!(matches!(
            plan.omitted[0].skip,
            SkipReason::UnsupportedField { .. }
        ));
    }

    #[test]
    fn test_time_of_day_divergence_toward_trakt_is_written() {
        let ledger = empty_ledger();
        let t = vec![event(Service::Trakt, 1, "2024-03-01T20:00:00Z", None)];
        let s = vec![event(Service::Serializd, 1, "2024-03-01T00:00:00Z", None)];

        let plan = run(&t, &s, &ledger, ConflictStrategy::SerializdWins, SyncDirection::Both);
        assert_eq!(plan.writes.len(), 1);
        assert_eq!(plan.writes[0].target, Service::Trakt);
        assert!(matches!(
            plan.writes[0].op,
            WriteOp::UpdateTimestamp { .. }
        ));
    }

    #[test]
    fn test_determinism_under_input_reordering() {
        let ledger = empty_ledger();
        let t = vec![
            event(Service::Trakt, 1, "2024-03-01T20:00:00Z", Some(8)),
            event(Service::Trakt, 2, "2024-03-02T20:00:00Z", None),
        ];
        let t_rev: Vec<_> = t.iter().rev().cloned().collect();

        let a = run(&t, &[], &ledger, ConflictStrategy::TraktWins, SyncDirection::Both);
        let b = run(&t_rev, &[], &ledger, ConflictStrategy::TraktWins, SyncDirection::Both);
        assert_eq!(a, b);
    }

    #[test]
    fn test_movie_create_toward_serializd_is_unsupported() {
        let ledger = empty_ledger();
        let watched_at: DateTime<Utc> = "2024-03-01T20:00:00Z".parse().unwrap();
        let movie = WatchEvent {
            item: ItemKey::Movie { tmdb_id: 500 },
            title: Some("Film".to_string()),
            watched_at,
            rewatch: 0,
            rating: None,
            origin: Service::Trakt,
            last_modified: watched_at,
            native_id: Some(1),
        };
        let plan = run(
            &[movie],
            &[],
            &ledger,
            ConflictStrategy::TraktWins,
            SyncDirection::Both,
        );
        assert!(plan.writes.is_empty());
        assert!(matches!(
            plan.omitted[0].skip,
            SkipReason::UnsupportedField { .. }
        ));
    }
}

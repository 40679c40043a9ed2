use crate::error::SyncError;
use episync_models::{PlannedWrite, Service, SyncPlan, WriteOp};
use episync_services::{ServiceError, TrackingService};
use std::time::Duration;
use tracing::{info, warn};

const MAX_RETRIES: u32 = 3;
const BACKOFF_BASE_SECS: u64 = 1;
const BACKOFF_CAP_SECS: u64 = 60;

/// What happened to one planned write.
#[derive(Debug)]
pub enum WriteOutcome {
    Applied {
        write: PlannedWrite,
        /// Target-side record id, when the service reported one.
        native_id: Option<u64>,
    },
    /// Dry run; nothing was sent.
    Skipped { write: PlannedWrite },
    /// The target cannot represent this event at all. The orchestrator
    /// excludes the key so it is never proposed again.
    Unsupported { write: PlannedWrite, detail: String },
    Failed { write: PlannedWrite, reason: String },
}

#[derive(Debug, Default)]
pub struct ApplyReport {
    pub outcomes: Vec<WriteOutcome>,
    /// Set when the plan was cut short; only auth expiry does that.
    pub aborted: Option<SyncError>,
}

impl ApplyReport {
    pub fn applied(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, WriteOutcome::Applied { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, WriteOutcome::Failed { .. }))
            .count()
    }
}

/// Apply the plan one write at a time. Transient failures are retried with
/// exponential backoff (rate limits honor the server's retry-after);
/// exhausted writes fail individually and the rest of the plan continues.
/// Auth expiry aborts everything that remains. A dry run records every
/// write as `Skipped` without touching either client.
pub async fn apply(
    plan: &SyncPlan,
    trakt: &dyn TrackingService,
    serializd: &dyn TrackingService,
    dry_run: bool,
) -> ApplyReport {
    let mut report = ApplyReport::default();

    for write in &plan.writes {
        if dry_run {
            report.outcomes.push(WriteOutcome::Skipped {
                write: write.clone(),
            });
            continue;
        }

        let client: &dyn TrackingService = match write.target {
            Service::Trakt => trakt,
            Service::Serializd => serializd,
        };

        match apply_one(client, write).await {
            Ok(native_id) => {
                info!(write = %write, "applied");
                report.outcomes.push(WriteOutcome::Applied {
                    write: write.clone(),
                    native_id,
                });
            }
            Err(ServiceError::Unsupported(detail)) => {
                warn!(write = %write, detail = %detail, "target cannot represent event, excluding");
                report.outcomes.push(WriteOutcome::Unsupported {
                    write: write.clone(),
                    detail,
                });
            }
            Err(err @ ServiceError::AuthExpired(_)) => {
                warn!(write = %write, error = %err, "authentication expired, aborting remaining writes");
                report.outcomes.push(WriteOutcome::Failed {
                    write: write.clone(),
                    reason: err.to_string(),
                });
                report.aborted = Some(SyncError::from_service(write.target, err));
                break;
            }
            Err(err) => {
                warn!(write = %write, error = %err, "write failed");
                report.outcomes.push(WriteOutcome::Failed {
                    write: write.clone(),
                    reason: err.to_string(),
                });
            }
        }
    }

    report
}

async fn apply_one(
    client: &dyn TrackingService,
    write: &PlannedWrite,
) -> Result<Option<u64>, ServiceError> {
    let mut attempt = 0u32;
    loop {
        let result = execute(client, write).await;
        match result {
            Ok(native_id) => return Ok(native_id),
            Err(err) if err.is_transient() && attempt < MAX_RETRIES => {
                let delay = match &err {
                    ServiceError::RateLimited {
                        retry_after: Some(secs),
                    } => *secs,
                    _ => (BACKOFF_BASE_SECS << attempt).min(BACKOFF_CAP_SECS),
                };
                warn!(
                    write = %write,
                    attempt,
                    delay_secs = delay,
                    error = %err,
                    "transient failure, backing off"
                );
                tokio::time::sleep(Duration::from_secs(delay)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

async fn execute(
    client: &dyn TrackingService,
    write: &PlannedWrite,
) -> Result<Option<u64>, ServiceError> {
    match &write.op {
        WriteOp::Create => client.create_watch_event(&write.event).await,
        WriteOp::UpdateRating { rating } => {
            client
                .update_rating(&write.event, write.target_native_id, *rating)
                .await?;
            Ok(write.target_native_id)
        }
        WriteOp::UpdateTimestamp { watched_at } => {
            client
                .update_timestamp(&write.event, write.target_native_id, *watched_at)
                .await?;
            Ok(write.target_native_id)
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use episync_services::{HistoryPage, RawShowRating};
    use episync_models::WatchEvent;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted service: each write pops the next canned result. Fetches
    /// return whatever history was preloaded.
    pub struct MockService {
        service: Service,
        pub history: Vec<episync_services::RawWatchRecord>,
        pub write_results: Mutex<VecDeque<Result<Option<u64>, ServiceError>>>,
        pub write_count: Mutex<usize>,
    }

    impl MockService {
        pub fn new(service: Service) -> Self {
            Self {
                service,
                history: Vec::new(),
                write_results: Mutex::new(VecDeque::new()),
                write_count: Mutex::new(0),
            }
        }

        pub fn script(&self, result: Result<Option<u64>, ServiceError>) {
            self.write_results.lock().unwrap().push_back(result);
        }

        pub fn writes(&self) -> usize {
            *self.write_count.lock().unwrap()
        }

        fn next_result(&self) -> Result<Option<u64>, ServiceError> {
            *self.write_count.lock().unwrap() += 1;
            self.write_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(None))
        }
    }

    #[async_trait]
    impl TrackingService for MockService {
        fn service(&self) -> Service {
            self.service
        }

        async fn authenticate(&mut self) -> Result<(), ServiceError> {
            Ok(())
        }

        fn is_authenticated(&self) -> bool {
            true
        }

        async fn fetch_watch_history(
            &self,
            _since: Option<DateTime<Utc>>,
        ) -> Result<HistoryPage, ServiceError> {
            let next_cursor = self.history.iter().map(|r| r.watched_at).max();
            Ok(HistoryPage {
                records: self.history.clone(),
                next_cursor,
            })
        }

        async fn fetch_show_ratings(&self) -> Result<Vec<RawShowRating>, ServiceError> {
            Ok(Vec::new())
        }

        async fn create_watch_event(
            &self,
            _event: &WatchEvent,
        ) -> Result<Option<u64>, ServiceError> {
            self.next_result()
        }

        async fn update_rating(
            &self,
            _event: &WatchEvent,
            _native_id: Option<u64>,
            _rating: Option<u8>,
        ) -> Result<(), ServiceError> {
            self.next_result().map(|_| ())
        }

        async fn update_timestamp(
            &self,
            _event: &WatchEvent,
            _native_id: Option<u64>,
            _watched_at: DateTime<Utc>,
        ) -> Result<(), ServiceError> {
            self.next_result().map(|_| ())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockService;
    use super::*;
    use chrono::{DateTime, Utc};
    use episync_models::{ItemKey, WatchEvent};

    fn planned(target: Service, op: WriteOp) -> PlannedWrite {
        let watched_at: DateTime<Utc> = "2024-03-01T20:00:00Z".parse().unwrap();
        PlannedWrite {
            target,
            event: WatchEvent {
                item: ItemKey::Episode {
                    tmdb_show_id: 100,
                    season: 1,
                    episode: 1,
                },
                title: None,
                watched_at,
                rewatch: 0,
                rating: Some(8),
                origin: target.other(),
                last_modified: watched_at,
                native_id: None,
            },
            op,
            target_native_id: None,
        }
    }

    fn plan(writes: Vec<PlannedWrite>) -> SyncPlan {
        SyncPlan {
            writes,
            ..SyncPlan::default()
        }
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let trakt = MockService::new(Service::Trakt);
        let serializd = MockService::new(Service::Serializd);
        let plan = plan(vec![
            planned(Service::Serializd, WriteOp::Create),
            planned(Service::Trakt, WriteOp::UpdateRating { rating: Some(4) }),
        ]);

        let report = apply(&plan, &trakt, &serializd, true).await;
        assert_eq!(report.outcomes.len(), 2);
        assert!(report
            .outcomes
            .iter()
            .all(|o| matches!(o, WriteOutcome::Skipped { .. })));
        assert_eq!(trakt.writes(), 0);
        assert_eq!(serializd.writes(), 0);
    }

    #[tokio::test]
    async fn test_applied_reports_native_id() {
        let trakt = MockService::new(Service::Trakt);
        let serializd = MockService::new(Service::Serializd);
        serializd.script(Ok(Some(42)));

        let plan = plan(vec![planned(Service::Serializd, WriteOp::Create)]);
        let report = apply(&plan, &trakt, &serializd, false).await;

        assert_eq!(report.applied(), 1);
        match &report.outcomes[0] {
            WriteOutcome::Applied { native_id, .. } => assert_eq!(*native_id, Some(42)),
            other => panic!("expected Applied, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transient_failure_retries_then_succeeds() {
        let trakt = MockService::new(Service::Trakt);
        let serializd = MockService::new(Service::Serializd);
        serializd.script(Err(ServiceError::RateLimited {
            retry_after: Some(0),
        }));
        serializd.script(Ok(Some(7)));

        let plan = plan(vec![planned(Service::Serializd, WriteOp::Create)]);
        let report = apply(&plan, &trakt, &serializd, false).await;

        assert_eq!(report.applied(), 1);
        assert_eq!(serializd.writes(), 2);
    }

    #[tokio::test]
    async fn test_permanent_failure_does_not_stop_the_plan() {
        let trakt = MockService::new(Service::Trakt);
        let serializd = MockService::new(Service::Serializd);
        serializd.script(Err(ServiceError::Protocol("boom".to_string())));
        serializd.script(Ok(None));

        let plan = plan(vec![
            planned(Service::Serializd, WriteOp::Create),
            planned(Service::Serializd, WriteOp::UpdateRating { rating: None }),
        ]);
        let report = apply(&plan, &trakt, &serializd, false).await;

        assert_eq!(report.failed(), 1);
        assert_eq!(report.applied(), 1);
        assert!(report.aborted.is_none());
    }

    #[tokio::test]
    async fn test_unsupported_target_reported_without_retry() {
        let trakt = MockService::new(Service::Trakt);
        let serializd = MockService::new(Service::Serializd);
        serializd.script(Err(ServiceError::Unsupported(
            "serializd: show 100 has no season 1".to_string(),
        )));

        let plan = plan(vec![planned(Service::Serializd, WriteOp::Create)]);
        let report = apply(&plan, &trakt, &serializd, false).await;

        assert_eq!(serializd.writes(), 1);
        assert!(report.aborted.is_none());
        assert!(matches!(
            &report.outcomes[0],
            WriteOutcome::Unsupported { .. }
        ));
    }

    #[tokio::test]
    async fn test_auth_expiry_aborts_remaining_writes() {
        let trakt = MockService::new(Service::Trakt);
        let serializd = MockService::new(Service::Serializd);
        serializd.script(Err(ServiceError::AuthExpired("token gone".to_string())));

        let plan = plan(vec![
            planned(Service::Serializd, WriteOp::Create),
            planned(Service::Serializd, WriteOp::Create),
            planned(Service::Trakt, WriteOp::UpdateRating { rating: Some(2) }),
        ]);
        let report = apply(&plan, &trakt, &serializd, false).await;

        assert_eq!(report.outcomes.len(), 1);
        assert!(matches!(report.aborted, Some(SyncError::AuthExpired { .. })));
        assert_eq!(trakt.writes(), 0);
        assert_eq!(serializd.writes(), 1);
    }
}

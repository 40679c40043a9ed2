use crate::apply::{apply, ApplyReport, WriteOutcome};
use crate::error::SyncError;
use crate::identity::IdentityResolver;
use crate::ledger::{LedgerEntry, SyncLedger};
use crate::normalize::{normalize, normalize_show_ratings};
use crate::reconcile::{reconcile, ReconcileInput};
use chrono::Utc;
use episync_models::{ConfirmedEvent, ConflictStrategy, Service, SyncDirection, SyncPlan, WriteOp};
use episync_services::TrackingService;
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Mutex};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
enum PassState {
    Idle,
    Fetching,
    Normalizing,
    Reconciling,
    Applying,
    UpdatingLedger,
    Sleeping,
}

impl fmt::Display for PassState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PassState::Idle => "idle",
            PassState::Fetching => "fetching",
            PassState::Normalizing => "normalizing",
            PassState::Reconciling => "reconciling",
            PassState::Applying => "applying",
            PassState::UpdatingLedger => "updating_ledger",
            PassState::Sleeping => "sleeping",
        };
        f.write_str(s)
    }
}

fn transition(state: PassState) {
    info!(state = %state, "sync state");
}

/// Everything one pass produced, for display and exit codes.
#[derive(Debug)]
pub struct PassReport {
    pub plan: SyncPlan,
    pub outcomes: ApplyReport,
    pub trakt_fetched: usize,
    pub serializd_fetched: usize,
    pub dry_run: bool,
    pub duration: Duration,
}

/// Drives the pass state machine over the two clients, the ledger, and the
/// reconciler. Owns the single-pass guard; everything else it touches is
/// loaded fresh per pass.
pub struct SyncOrchestrator {
    trakt: Box<dyn TrackingService>,
    serializd: Box<dyn TrackingService>,
    ledger_path: PathBuf,
    identity_path: PathBuf,
    direction: SyncDirection,
    strategy: ConflictStrategy,
    dry_run: bool,
    full_fetch: bool,
    interval: Duration,
    fetch_timeout: Duration,
    pass_guard: Mutex<()>,
}

impl SyncOrchestrator {
    pub fn new(
        trakt: Box<dyn TrackingService>,
        serializd: Box<dyn TrackingService>,
        ledger_path: PathBuf,
        identity_path: PathBuf,
    ) -> Self {
        Self {
            trakt,
            serializd,
            ledger_path,
            identity_path,
            direction: SyncDirection::default(),
            strategy: ConflictStrategy::default(),
            dry_run: false,
            full_fetch: false,
            interval: Duration::from_secs(3600),
            fetch_timeout: Duration::from_secs(120),
            pass_guard: Mutex::new(()),
        }
    }

    pub fn with_direction(mut self, direction: SyncDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Ignore saved cursors and re-fetch everything this pass.
    pub fn with_full_fetch(mut self, full_fetch: bool) -> Self {
        self.full_fetch = full_fetch;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    /// Authenticate both clients. Run before the first pass; failures map
    /// to `AuthExpired` for the offending service.
    pub async fn authenticate(&mut self) -> Result<(), SyncError> {
        self.trakt
            .authenticate()
            .await
            .map_err(|e| SyncError::from_service(Service::Trakt, e))?;
        self.serializd
            .authenticate()
            .await
            .map_err(|e| SyncError::from_service(Service::Serializd, e))?;
        Ok(())
    }

    /// One full pass. Refuses to overlap with another in-flight pass.
    pub async fn run_once(&self) -> Result<PassReport, SyncError> {
        let _guard = self
            .pass_guard
            .try_lock()
            .map_err(|_| SyncError::PassInProgress)?;
        let started = Instant::now();

        let mut ledger = SyncLedger::load(self.ledger_path.clone())?;

        transition(PassState::Fetching);
        let (trakt_cursor, serializd_cursor) = if self.full_fetch {
            (None, None)
        } else {
            (
                ledger.cursor(Service::Trakt),
                ledger.cursor(Service::Serializd),
            )
        };

        let fetch_trakt = async {
            let page = tokio::time::timeout(
                self.fetch_timeout,
                self.trakt.fetch_watch_history(trakt_cursor),
            )
            .await
            .map_err(|_| fetch_timeout_error(Service::Trakt))?
            .map_err(|e| SyncError::from_service(Service::Trakt, e))?;
            let show_ratings =
                tokio::time::timeout(self.fetch_timeout, self.trakt.fetch_show_ratings())
                    .await
                    .map_err(|_| fetch_timeout_error(Service::Trakt))?
                    .map_err(|e| SyncError::from_service(Service::Trakt, e))?;
            Ok::<_, SyncError>((page, show_ratings))
        };
        let fetch_serializd = async {
            tokio::time::timeout(
                self.fetch_timeout,
                self.serializd.fetch_watch_history(serializd_cursor),
            )
            .await
            .map_err(|_| fetch_timeout_error(Service::Serializd))?
            .map_err(|e| SyncError::from_service(Service::Serializd, e))
        };
        let ((trakt_page, raw_show_ratings), serializd_page) =
            tokio::try_join!(fetch_trakt, fetch_serializd)?;

        transition(PassState::Normalizing);
        let mut resolver = IdentityResolver::new(self.identity_path.clone());
        if let Err(e) = resolver.load() {
            // The alias map is a cache; losing it costs resolution quality,
            // not correctness
            warn!(error = %e, "could not load identity aliases, starting fresh");
        }

        let trakt_norm = normalize(&trakt_page.records, &mut resolver);
        let serializd_norm = normalize(&serializd_page.records, &mut resolver);
        let (show_ratings, rating_omissions) = normalize_show_ratings(&raw_show_ratings);

        transition(PassState::Reconciling);
        let mut plan = reconcile(ReconcileInput {
            trakt: &trakt_norm.events,
            serializd: &serializd_norm.events,
            show_ratings: &show_ratings,
            ledger: &ledger,
            strategy: self.strategy,
            direction: self.direction,
        });
        plan.omitted.extend(trakt_norm.omissions);
        plan.omitted.extend(serializd_norm.omissions);
        plan.omitted.extend(rating_omissions);

        transition(PassState::Applying);
        let outcomes = apply(&plan, &*self.trakt, &*self.serializd, self.dry_run).await;

        if !self.dry_run {
            transition(PassState::UpdatingLedger);
            for outcome in &outcomes.outcomes {
                match outcome {
                    // Permanently unrepresentable on the target: never
                    // propose this key again
                    WriteOutcome::Unsupported { write, detail } => {
                        ledger.exclude(&write.event.key(), detail.clone());
                    }
                    other => record_outcome(&mut ledger, other),
                }
            }
            record_confirmed(&mut ledger, &plan.confirmed);
            update_stats(&mut ledger, &outcomes);
            ledger.set_cursor(Service::Trakt, trakt_page.next_cursor.or(trakt_cursor));
            ledger.set_cursor(
                Service::Serializd,
                serializd_page.next_cursor.or(serializd_cursor),
            );
            ledger.save()?;

            if let Err(e) = resolver.save() {
                warn!(error = %e, "could not persist identity aliases");
            }
        }

        transition(PassState::Idle);

        let report = PassReport {
            trakt_fetched: trakt_page.records.len(),
            serializd_fetched: serializd_page.records.len(),
            dry_run: self.dry_run,
            duration: started.elapsed(),
            plan,
            outcomes,
        };

        if let Some(aborted) = report.outcomes.aborted.as_ref() {
            warn!(error = %aborted, "pass cut short");
        }
        info!(
            applied = report.outcomes.applied(),
            failed = report.outcomes.failed(),
            omitted = report.plan.omitted.len(),
            duration_ms = report.duration.as_millis() as u64,
            "pass complete"
        );
        Ok(report)
    }

    /// Watch mode: run passes until `shutdown` fires. Recoverable pass
    /// failures are logged and the loop sleeps on; ledger failures end it.
    pub async fn run(&self, mut shutdown: oneshot::Receiver<()>) -> Result<(), SyncError> {
        loop {
            match self.run_once().await {
                Ok(_) => {}
                Err(e) if e.is_recoverable() => {
                    warn!(error = %e, "sync pass failed, will retry after interval");
                }
                Err(e) => return Err(e),
            }

            transition(PassState::Sleeping);
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    return Ok(());
                }
            }
        }
    }
}

fn fetch_timeout_error(service: Service) -> SyncError {
    SyncError::RemoteUnavailable {
        service,
        detail: "fetch timed out".to_string(),
    }
}

/// Fold an applied write back into the ledger so the next pass sees it as
/// already reconciled.
fn record_outcome(ledger: &mut SyncLedger, outcome: &WriteOutcome) {
    let (write, native_id) = match outcome {
        WriteOutcome::Applied { write, native_id } => (write, *native_id),
        _ => return,
    };

    let key = write.event.key();
    let mut entry = ledger.lookup(&key).cloned().unwrap_or(LedgerEntry {
        key,
        rating: write.event.rating,
        watched_at: write.event.watched_at,
        trakt_id: None,
        serializd_id: None,
        confirmed_at: write.event.last_modified,
    });

    // Origin-side id came with the event; target-side id from the write.
    match write.event.origin {
        Service::Trakt => entry.trakt_id = write.event.native_id.or(entry.trakt_id),
        Service::Serializd => entry.serializd_id = write.event.native_id.or(entry.serializd_id),
    }
    let target_id = native_id.or(write.target_native_id);
    match write.target {
        Service::Trakt => entry.trakt_id = target_id.or(entry.trakt_id),
        Service::Serializd => entry.serializd_id = target_id.or(entry.serializd_id),
    }

    match &write.op {
        WriteOp::Create => {
            entry.rating = write.event.rating;
            entry.watched_at = write.event.watched_at;
        }
        WriteOp::UpdateRating { rating } => entry.rating = *rating,
        WriteOp::UpdateTimestamp { watched_at } => entry.watched_at = *watched_at,
    }
    entry.confirmed_at = Utc::now();
    ledger.upsert(entry);
}

/// Events found identical on both sides produce no write, but the ledger
/// still records them so future passes have a baseline and linked ids.
fn record_confirmed(ledger: &mut SyncLedger, confirmed: &[ConfirmedEvent]) {
    for c in confirmed {
        let mut entry = ledger.lookup(&c.key).cloned().unwrap_or(LedgerEntry {
            key: c.key,
            rating: c.rating,
            watched_at: c.watched_at,
            trakt_id: None,
            serializd_id: None,
            confirmed_at: c.watched_at,
        });
        entry.rating = c.rating;
        entry.watched_at = c.watched_at;
        entry.trakt_id = c.trakt_id.or(entry.trakt_id);
        entry.serializd_id = c.serializd_id.or(entry.serializd_id);
        entry.confirmed_at = Utc::now();
        ledger.upsert(entry);
    }
}

fn update_stats(ledger: &mut SyncLedger, outcomes: &ApplyReport) {
    let stats = ledger.stats_mut();
    stats.passes_run += 1;
    for outcome in &outcomes.outcomes {
        if let WriteOutcome::Applied { write, .. } = outcome {
            match (&write.op, write.target) {
                (WriteOp::Create, Service::Trakt) => stats.created_on_trakt += 1,
                (WriteOp::Create, Service::Serializd) => stats.created_on_serializd += 1,
                _ => stats.conflicts_resolved += 1,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::mock::MockService;
    use episync_models::Service;
    use episync_services::RawWatchRecord;

    fn raw(origin: Service, episode: u32, watched_at: &str, rating: Option<u8>) -> RawWatchRecord {
        RawWatchRecord {
            origin,
            tmdb_id: Some(100),
            season: Some(1),
            episode: Some(episode),
            title: Some("Show".to_string()),
            watched_at: watched_at.parse().unwrap(),
            native_rating: rating,
            last_modified: watched_at.parse().unwrap(),
            native_id: Some(u64::from(episode)),
        }
    }

    fn orchestrator(
        trakt: MockService,
        serializd: MockService,
        dir: &tempfile::TempDir,
    ) -> SyncOrchestrator {
        SyncOrchestrator::new(
            Box::new(trakt),
            Box::new(serializd),
            dir.path().join("ledger.json"),
            dir.path().join("aliases.json"),
        )
    }

    #[tokio::test]
    async fn test_pass_creates_missing_event_and_updates_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let mut trakt = MockService::new(Service::Trakt);
        trakt.history = vec![raw(Service::Trakt, 1, "2024-03-01T20:00:00Z", Some(8))];
        let serializd = MockService::new(Service::Serializd);
        serializd.script(Ok(Some(500)));

        let orch = orchestrator(trakt, serializd, &dir);
        let report = orch.run_once().await.unwrap();

        assert_eq!(report.trakt_fetched, 1);
        assert_eq!(report.outcomes.applied(), 1);

        let ledger = SyncLedger::load(dir.path().join("ledger.json")).unwrap();
        assert_eq!(ledger.entry_count(), 1);
        assert_eq!(ledger.stats().created_on_serializd, 1);
        assert!(ledger.cursor(Service::Trakt).is_some());
        let entry = ledger.entries().next().unwrap();
        assert_eq!(entry.serializd_id, Some(500));
        assert_eq!(entry.trakt_id, Some(1));
    }

    #[tokio::test]
    async fn test_dry_run_leaves_no_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let mut trakt = MockService::new(Service::Trakt);
        trakt.history = vec![raw(Service::Trakt, 1, "2024-03-01T20:00:00Z", None)];
        let serializd = MockService::new(Service::Serializd);

        let orch = orchestrator(trakt, serializd, &dir).with_dry_run(true);
        let report = orch.run_once().await.unwrap();

        assert_eq!(report.plan.writes.len(), 1);
        assert!(!dir.path().join("ledger.json").exists());
    }

    #[tokio::test]
    async fn test_second_pass_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();

        {
            let mut trakt = MockService::new(Service::Trakt);
            trakt.history = vec![raw(Service::Trakt, 1, "2024-03-01T20:00:00Z", None)];
            let serializd = MockService::new(Service::Serializd);
            serializd.script(Ok(Some(500)));
            let orch = orchestrator(trakt, serializd, &dir);
            assert_eq!(orch.run_once().await.unwrap().outcomes.applied(), 1);
        }

        // Both sides now report the event; nothing further to do
        let mut trakt = MockService::new(Service::Trakt);
        trakt.history = vec![raw(Service::Trakt, 1, "2024-03-01T20:00:00Z", None)];
        let mut serializd = MockService::new(Service::Serializd);
        serializd.history = vec![raw(Service::Serializd, 1, "2024-03-01T20:00:00Z", None)];

        let orch = orchestrator(trakt, serializd, &dir);
        let report = orch.run_once().await.unwrap();
        assert!(report.plan.is_empty());
        assert_eq!(report.outcomes.applied(), 0);
    }

    #[tokio::test]
    async fn test_confirmed_pair_recorded_in_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let mut trakt = MockService::new(Service::Trakt);
        trakt.history = vec![raw(Service::Trakt, 1, "2024-03-01T20:00:00Z", None)];
        let mut serializd = MockService::new(Service::Serializd);
        serializd.history = vec![raw(Service::Serializd, 1, "2024-03-01T20:00:00Z", None)];
        serializd.history[0].native_id = Some(900);

        let orch = orchestrator(trakt, serializd, &dir);
        let report = orch.run_once().await.unwrap();

        // No write was needed, but the event is confirmed on both sides
        assert!(report.plan.writes.is_empty());

        let ledger = SyncLedger::load(dir.path().join("ledger.json")).unwrap();
        assert_eq!(ledger.entry_count(), 1);
        let entry = ledger.entries().next().unwrap();
        assert_eq!(entry.trakt_id, Some(1));
        assert_eq!(entry.serializd_id, Some(900));
    }

    #[tokio::test]
    async fn test_unsupported_create_is_excluded_from_future_passes() {
        let dir = tempfile::tempdir().unwrap();

        {
            let mut trakt = MockService::new(Service::Trakt);
            trakt.history = vec![raw(Service::Trakt, 1, "2024-03-01T20:00:00Z", None)];
            let serializd = MockService::new(Service::Serializd);
            serializd.script(Err(episync_services::ServiceError::Unsupported(
                "serializd: show 100 has no season 1".to_string(),
            )));
            let orch = orchestrator(trakt, serializd, &dir);
            orch.run_once().await.unwrap();
        }

        let ledger = SyncLedger::load(dir.path().join("ledger.json")).unwrap();
        assert_eq!(ledger.exclusions().count(), 1);

        // Re-fetching the same event must not re-propose the write
        let mut trakt = MockService::new(Service::Trakt);
        trakt.history = vec![raw(Service::Trakt, 1, "2024-03-01T20:00:00Z", None)];
        let serializd = MockService::new(Service::Serializd);
        let orch = orchestrator(trakt, serializd, &dir).with_full_fetch(true);
        let report = orch.run_once().await.unwrap();

        assert!(report.plan.writes.is_empty());
        assert!(matches!(
            report.plan.omitted[0].skip,
            episync_models::SkipReason::Excluded { .. }
        ));
    }

    #[tokio::test]
    async fn test_corrupt_ledger_aborts_pass() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ledger.json"), "not json").unwrap();

        let orch = orchestrator(
            MockService::new(Service::Trakt),
            MockService::new(Service::Serializd),
            &dir,
        );
        match orch.run_once().await {
            Err(SyncError::LedgerCorrupt { .. }) => {}
            other => panic!("expected LedgerCorrupt, got {:?}", other.map(|_| ())),
        }
    }
}

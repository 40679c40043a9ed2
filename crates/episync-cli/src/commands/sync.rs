use crate::output::{Output, OutputFormat};
use episync_config::PathManager;
use episync_core::{PassReport, SyncOrchestrator, WriteOutcome};
use episync_models::{ConflictStrategy, SkipReason, SyncDirection};
use episync_services::{SerializdClient, TraktClient};
use serde_json::json;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::error;

pub struct SyncArgs {
    pub direction: Option<SyncDirection>,
    pub strategy: Option<ConflictStrategy>,
    pub dry_run: bool,
    pub full: bool,
    pub watch: bool,
    pub interval_minutes: Option<u64>,
}

pub async fn run_sync(args: SyncArgs, output: &Output) -> color_eyre::Result<()> {
    let paths = PathManager::default();
    paths
        .ensure_directories()
        .map_err(|e| color_eyre::eyre::eyre!(e))?;
    let config = super::load_config(&paths)?;

    let trakt = TraktClient::new(
        config.trakt.client_id.clone(),
        config.trakt.client_secret.clone(),
        config.trakt.username.clone(),
    );
    let serializd = SerializdClient::new(
        config.serializd.email.clone(),
        config.serializd.username.clone(),
    );

    let direction = args.direction.unwrap_or(config.sync.direction);
    let strategy = args.strategy.unwrap_or(config.sync.strategy);
    let interval = args
        .interval_minutes
        .map(|m| Duration::from_secs(m * 60))
        .unwrap_or(Duration::from_secs(config.sync.interval_secs));

    let mut orchestrator = SyncOrchestrator::new(
        Box::new(trakt),
        Box::new(serializd),
        paths.ledger_file(),
        paths.identity_map_file(),
    )
    .with_direction(direction)
    .with_strategy(strategy)
    .with_dry_run(args.dry_run)
    .with_full_fetch(args.full)
    .with_interval(interval)
    .with_fetch_timeout(Duration::from_secs(config.sync.fetch_timeout_secs));

    orchestrator.authenticate().await?;

    if args.watch {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c");
            }
            let _ = shutdown_tx.send(());
        });

        output.println(format!(
            "Watching; syncing every {} minutes. Ctrl-C to stop.",
            interval.as_secs() / 60
        ));
        orchestrator.run(shutdown_rx).await?;
        output.success("Stopped.");
        return Ok(());
    }

    let report = orchestrator.run_once().await?;
    render_report(&report, output);
    Ok(())
}

fn render_report(report: &PassReport, output: &Output) {
    if output.format() != OutputFormat::Human {
        output.json(&report_json(report));
        return;
    }

    output.println(format!(
        "Fetched {} events from trakt, {} from serializd.",
        report.trakt_fetched, report.serializd_fetched
    ));

    if report.plan.is_empty() && report.plan.omitted.is_empty() {
        output.success("Everything is in sync.");
        return;
    }

    if report.dry_run {
        output.println(format!(
            "Dry run: {} write(s) would be applied.",
            report.plan.writes.len()
        ));
        for write in &report.plan.writes {
            output.println(format!("  {}", write));
        }
    } else {
        for outcome in &report.outcomes.outcomes {
            match outcome {
                WriteOutcome::Applied { write, .. } => output.success(format!("{}", write)),
                WriteOutcome::Failed { write, reason } => {
                    output.error(format!("{}: {}", write, reason))
                }
                WriteOutcome::Unsupported { write, detail } => {
                    output.warn(format!("{}: {} (excluded from future passes)", write, detail))
                }
                WriteOutcome::Skipped { write } => output.println(format!("skipped: {}", write)),
            }
        }
        output.println(format!(
            "Applied {}, failed {}.",
            report.outcomes.applied(),
            report.outcomes.failed()
        ));
    }

    for omission in &report.plan.omitted {
        let detail = match &omission.skip {
            SkipReason::UnresolvedIdentity { detail } => format!("unresolved identity: {}", detail),
            SkipReason::UnsupportedShowRating { tmdb_show_id } => format!(
                "show-level rating on tmdb:{} has no episode data to attach to",
                tmdb_show_id
            ),
            SkipReason::Excluded { detail } => format!("excluded: {}", detail),
            SkipReason::UnsupportedField { detail } => detail.clone(),
        };
        match &omission.key {
            Some(key) => output.warn(format!("{}: {}", key, detail)),
            None => output.warn(detail),
        }
    }
}

fn report_json(report: &PassReport) -> serde_json::Value {
    let outcomes: Vec<serde_json::Value> = report
        .outcomes
        .outcomes
        .iter()
        .map(|o| match o {
            WriteOutcome::Applied { write, native_id } => json!({
                "status": "applied",
                "write": write,
                "native_id": native_id,
            }),
            WriteOutcome::Skipped { write } => json!({ "status": "skipped", "write": write }),
            WriteOutcome::Unsupported { write, detail } => json!({
                "status": "unsupported",
                "write": write,
                "detail": detail,
            }),
            WriteOutcome::Failed { write, reason } => json!({
                "status": "failed",
                "write": write,
                "reason": reason,
            }),
        })
        .collect();

    json!({
        "type": "pass_report",
        "dry_run": report.dry_run,
        "fetched": {
            "trakt": report.trakt_fetched,
            "serializd": report.serializd_fetched,
        },
        "plan": report.plan,
        "outcomes": outcomes,
        "applied": report.outcomes.applied(),
        "failed": report.outcomes.failed(),
        "duration_ms": report.duration.as_millis() as u64,
    })
}

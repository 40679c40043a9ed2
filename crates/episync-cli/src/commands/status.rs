use crate::output::{Output, OutputFormat};
use episync_config::PathManager;
use episync_core::SyncLedger;
use episync_models::Service;
use serde_json::json;

pub fn run_status(output: &Output) -> color_eyre::Result<()> {
    let paths = PathManager::default();
    let ledger = SyncLedger::load(paths.ledger_file())?;

    if output.format() != OutputFormat::Human {
        let exclusions: Vec<_> = ledger
            .exclusions()
            .map(|(key, reason)| json!({ "key": key, "reason": reason }))
            .collect();
        output.json(&json!({
            "type": "status",
            "entries": ledger.entry_count(),
            "cursors": {
                "trakt": ledger.cursor(Service::Trakt),
                "serializd": ledger.cursor(Service::Serializd),
            },
            "stats": ledger.stats(),
            "exclusions": exclusions,
        }));
        return Ok(());
    }

    output.println(format!("Ledger entries: {}", ledger.entry_count()));
    for service in [Service::Trakt, Service::Serializd] {
        match ledger.cursor(service) {
            Some(cursor) => output.println(format!("{} cursor: {}", service, cursor.to_rfc3339())),
            None => output.println(format!("{} cursor: none (full fetch next pass)", service)),
        }
    }

    let stats = ledger.stats();
    output.println(format!(
        "Passes run: {}, created on trakt: {}, created on serializd: {}, conflicts resolved: {}",
        stats.passes_run,
        stats.created_on_trakt,
        stats.created_on_serializd,
        stats.conflicts_resolved
    ));

    let exclusions: Vec<_> = ledger.exclusions().collect();
    if exclusions.is_empty() {
        output.println("No excluded events.");
    } else {
        output.println(format!("Excluded events ({}):", exclusions.len()));
        for (key, reason) in exclusions {
            output.println(format!("  {} ({})", key, reason));
        }
    }
    Ok(())
}

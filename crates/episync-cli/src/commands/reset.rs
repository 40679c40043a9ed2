use crate::output::Output;
use episync_config::PathManager;
use episync_core::{SyncError, SyncLedger};
use std::io::{self, BufRead, Write};

pub fn run_reset(yes: bool, output: &Output) -> color_eyre::Result<()> {
    let paths = PathManager::default();
    let ledger_path = paths.ledger_file();

    if !yes {
        print!(
            "This discards all sync state at {} (next sync re-fetches everything). Continue? [y/N] ",
            ledger_path.display()
        );
        io::stdout().flush()?;
        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        if !matches!(answer.trim().to_lowercase().as_str(), "y" | "yes") {
            output.println("Aborted.");
            return Ok(());
        }
    }

    match SyncLedger::load(ledger_path.clone()) {
        Ok(mut ledger) => {
            ledger.reset();
            ledger.save()?;
        }
        // A corrupt file is exactly what reset is for; just drop it
        Err(SyncError::LedgerCorrupt { .. }) => {
            std::fs::remove_file(&ledger_path)?;
        }
        Err(e) => return Err(e.into()),
    }

    output.success("Sync state cleared.");
    Ok(())
}

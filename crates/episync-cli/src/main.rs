use clap::{ArgAction, Parser, Subcommand};
use commands::{auth, reset, status, sync};
use episync_models::{ConflictStrategy, SyncDirection};

mod commands;
mod logging;
mod output;

#[derive(Parser)]
#[command(name = "episync")]
#[command(about = "Keep your Trakt and Serializd watch history in step")]
#[command(version)]
struct Cli {
    /// Enable verbose output (use multiple times for more verbosity: -v, -vv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output format
    #[arg(long, global = true, default_value = "human", value_enum)]
    output: output::OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile watch history between the two services
    #[command(
        long_about = "Fetch watch history from Trakt and Serializd, reconcile the two against the sync ledger, and apply the resulting writes. Defaults come from config.toml; flags override per run."
    )]
    Sync {
        /// Which direction to write in
        #[arg(long, value_name = "DIRECTION")]
        direction: Option<SyncDirection>,

        /// How to resolve conflicting field values
        #[arg(long, value_name = "STRATEGY")]
        strategy: Option<ConflictStrategy>,

        /// Preview the plan without writing anything
        #[arg(long, action = ArgAction::SetTrue)]
        dry_run: bool,

        /// Ignore saved cursors and re-fetch full history
        #[arg(long, action = ArgAction::SetTrue)]
        full: bool,

        /// Keep running, syncing every interval until interrupted
        #[arg(long, action = ArgAction::SetTrue)]
        watch: bool,

        /// Minutes between passes in watch mode
        #[arg(long, value_name = "MINUTES")]
        interval: Option<u64>,
    },
    /// Show ledger state: cursors, counters, exclusions
    Status,
    /// Authenticate against a service
    Auth {
        #[command(subcommand)]
        cmd: AuthCommands,
    },
    /// Discard the sync ledger (next sync starts from scratch)
    ResetState {
        /// Skip the confirmation prompt
        #[arg(long, action = ArgAction::SetTrue)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum AuthCommands {
    /// Run the Trakt OAuth device flow
    Trakt {
        /// Discard saved tokens and authorize from scratch
        #[arg(long, action = ArgAction::SetTrue)]
        force: bool,
    },
    /// Log in to Serializd (prompts for the password)
    Serializd,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    logging::init_logging(cli.verbose, cli.quiet)
        .map_err(|e| color_eyre::eyre::eyre!("{}", e))?;

    let output = output::Output::new(cli.output, cli.quiet);

    match cli.command {
        Commands::Sync {
            direction,
            strategy,
            dry_run,
            full,
            watch,
            interval,
        } => {
            sync::run_sync(
                sync::SyncArgs {
                    direction,
                    strategy,
                    dry_run,
                    full,
                    watch,
                    interval_minutes: interval,
                },
                &output,
            )
            .await
        }
        Commands::Status => status::run_status(&output),
        Commands::Auth { cmd } => match cmd {
            AuthCommands::Trakt { force } => auth::run_auth_trakt(force, &output).await,
            AuthCommands::Serializd => auth::run_auth_serializd(&output).await,
        },
        Commands::ResetState { yes } => reset::run_reset(yes, &output),
    }
}

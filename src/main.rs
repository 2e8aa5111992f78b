use alerter::TelegramAlerter;
use clap::{Parser, Subcommand};
use configuration::Config;
use engine::{CycleScheduler, FixedPriceSource, HoldDecision, shared_run_state};
use execution::{DirectRouter, ExecutionPipeline};
use ledger::{LedgerStore, PgLedger, connect, run_migrations};
use reconciler::{ReconcileScope, Reconciler};
use server::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use venue::SimulatedVenue;

/// The execution and reconciliation engine for managed trading positions.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file stem (reads `<name>.toml` if present).
    #[arg(long, default_value = "meridian")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the cycle scheduler and the control API until interrupted.
    Run,
    /// Run a single reconciliation pass and print the corrections.
    Reconcile,
    /// Print the last cycle, live positions and open anomalies.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let file_appender = tracing_appender::rolling::daily("logs", "meridian.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(file_writer.and(std::io::stdout))
        .init();

    let config = configuration::load_config_from(&cli.config)?;

    let pool = connect().await?;
    run_migrations(&pool).await?;
    let ledger: Arc<dyn LedgerStore> = Arc::new(PgLedger::new(pool));

    // The built-in venue is the paper venue; a live adapter plugs into the
    // same seam.
    let venue = Arc::new(SimulatedVenue::new());

    match cli.command {
        Commands::Run => run_engine(config, ledger, venue).await,
        Commands::Reconcile => run_reconcile(config, ledger, venue).await,
        Commands::Status => print_status(ledger).await,
    }
}

async fn run_engine(
    config: Config,
    ledger: Arc<dyn LedgerStore>,
    venue: Arc<SimulatedVenue>,
) -> anyhow::Result<()> {
    let pipeline = Arc::new(ExecutionPipeline::new(
        ledger.clone(),
        venue.clone(),
        Arc::new(DirectRouter),
        config.execution.clone(),
        config.reconciliation.dust_tolerance,
    ));
    let reconciler = Arc::new(Reconciler::new(
        ledger.clone(),
        venue.clone(),
        config.reconciliation.clone(),
    ));
    let alerter = TelegramAlerter::new(&config.telegram).map(Arc::new);
    let prices = Arc::new(FixedPriceSource::new());
    let run_state = shared_run_state();

    let (scheduler, handle) = CycleScheduler::new(
        ledger.clone(),
        pipeline,
        reconciler,
        Arc::new(HoldDecision),
        prices,
        alerter,
        config.engine.clone(),
        run_state.clone(),
    );

    let state = Arc::new(AppState {
        scheduler: handle,
        ledger: ledger.clone(),
        run_state,
    });
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tokio::spawn(async move {
        if let Err(e) = server::run_server(addr, state).await {
            tracing::error!(error = %e, "control API exited");
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let engine_task = tokio::spawn(scheduler.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    tracing::info!("interrupt received; shutting down");
    shutdown_tx.send(true)?;
    engine_task.await??;
    Ok(())
}

async fn run_reconcile(
    config: Config,
    ledger: Arc<dyn LedgerStore>,
    venue: Arc<SimulatedVenue>,
) -> anyhow::Result<()> {
    let reconciler = Reconciler::new(ledger, venue, config.reconciliation.clone());
    let corrections = reconciler.reconcile(&ReconcileScope::Full).await?;
    if corrections.is_empty() {
        println!("Ledger and venue agree; no corrections needed.");
        return Ok(());
    }
    println!("Applied {} correction(s):", corrections.len());
    for c in corrections {
        println!(
            "  {:<12} {:>14} ledger {} -> venue {}",
            c.action.as_str(),
            c.instrument,
            c.ledger_qty,
            c.venue_qty
        );
    }
    Ok(())
}

async fn print_status(ledger: Arc<dyn LedgerStore>) -> anyhow::Result<()> {
    match ledger.last_cycle().await? {
        Some(cycle) => {
            let outcome = cycle
                .outcome
                .map(|o| o.as_str().to_string())
                .unwrap_or_else(|| "in progress".to_string());
            println!(
                "Last cycle: seq {} started {} [{}], {} order(s)",
                cycle.seq,
                cycle.started_at,
                outcome,
                cycle.order_ids.len()
            );
        }
        None => println!("No cycles recorded yet."),
    }

    let positions = ledger.live_positions().await?;
    if positions.is_empty() {
        println!("No live positions.");
    } else {
        println!("Live positions:");
        for p in positions {
            println!(
                "  {:<14} {:>18} @ {:<12} [{}]",
                p.instrument, p.quantity, p.entry_price, p.status
            );
        }
    }

    let anomalies = ledger.open_anomalies().await?;
    if !anomalies.is_empty() {
        println!("Open anomalies:");
        for a in anomalies {
            println!("  {:<14} {} (raised {})", a.instrument, a.reason, a.raised_at);
        }
    }
    Ok(())
}

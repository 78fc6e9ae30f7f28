use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use danceflow::{
    open_store, DanceflowConfig, DanceflowEvent, EventDebugger, EventFilter, MockVerifier,
    RawLandmarkFrame, SessionEngine, SessionStore, SessionSummary, VerificationWorker,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "danceflow")]
#[command(about = "Scores dance practice sessions from pose and face landmarks")]
#[command(version)]
#[command(long_about = "Danceflow scores posture and facial expression for each landmark frame, \
records practice sessions, and keeps their summaries per dance form. Frames are replayed \
from JSON-lines files produced by a landmark detector.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "danceflow.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record one session from a JSON-lines file of landmark frames
    Replay {
        /// File with one raw landmark frame per line
        #[arg(short, long)]
        input: PathBuf,

        /// Dance form the session belongs to
        #[arg(long)]
        dance: String,

        /// Lecture being practised
        #[arg(long)]
        lecture: String,
    },
    /// List stored sessions, newest first
    List {
        #[arg(long)]
        dance: Option<String>,
    },
    /// Show one stored session
    Show { session_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let _log_guard = init_logging(&args)?;

    info!("Starting Danceflow v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match DanceflowConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        eprintln!("✗ Configuration validation failed: {}", e);
        std::process::exit(1);
    }

    if args.validate_config {
        info!("Configuration validation successful");
        println!("✓ Configuration is valid");
        return Ok(());
    }

    let store = open_store(&config.store)
        .await
        .context("failed to open session store")?;

    match args.command {
        Some(Command::Replay {
            input,
            dance,
            lecture,
        }) => replay(config, store, &input, dance, lecture).await,
        Some(Command::List { dance }) => list(store.as_ref(), dance.as_deref()).await,
        Some(Command::Show { session_id }) => show(store.as_ref(), &session_id).await,
        None => {
            let stats = store.stats().await;
            println!(
                "{} sessions in {} collections ({} of {} bytes used)",
                stats.total_sessions, stats.collections, stats.total_bytes, stats.quota_bytes
            );
            Ok(())
        }
    }
}

async fn replay(
    config: DanceflowConfig,
    store: Arc<dyn SessionStore>,
    input: &Path,
    dance: String,
    lecture: String,
) -> Result<()> {
    let verification = config.verification.clone();
    let engine = SessionEngine::builder()
        .with_config(config)
        .with_store(Arc::clone(&store))
        .build()?;

    let collector_token = CancellationToken::new();
    let collector = spawn_event_collector(&engine, collector_token.clone());

    let mut worker = if verification.enabled {
        let verifier = Arc::new(MockVerifier::from_config(&verification));
        let mut worker = VerificationWorker::new(verifier, Arc::clone(&store), engine.event_bus());
        worker.start()?;
        Some(worker)
    } else {
        None
    };
    let mut verifications = engine.subscribe_filtered(
        EventFilter::EventTypes(vec!["session_verified"]),
        "replay",
    );

    let file = File::open(input)
        .await
        .with_context(|| format!("failed to open {}", input.display()))?;
    let mut lines = BufReader::new(file).lines();

    engine.arm(dance, lecture).await?;
    let session_id = engine.start().await?;
    println!("Recording session {}", session_id);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut line_number = 0usize;
    let mut skipped = 0usize;
    let mut recorded = 0usize;
    let cancelled = loop {
        let line = tokio::select! {
            _ = &mut ctrl_c => break true,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break false;
        };
        line_number += 1;
        if line.trim().is_empty() {
            continue;
        }

        let raw: RawLandmarkFrame = match serde_json::from_str(&line) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Line {}: not a landmark frame: {}", line_number, e);
                skipped += 1;
                continue;
            }
        };
        match engine.ingest(raw).await {
            Ok(score) if score.recorded => recorded += 1,
            Ok(_) => {}
            Err(e) => {
                debug!("Line {}: {}", line_number, e);
                skipped += 1;
            }
        }
    };

    if cancelled {
        info!("Interrupted, cancelling session {}", session_id);
        engine.cancel().await;
        println!("✗ Session {} cancelled", session_id);
    } else {
        match engine.stop().await?.wait().await {
            Ok(summary) => {
                print_summary(&summary);
                if worker.is_some() {
                    let wait = Duration::from_millis(verification.delay_ms) + Duration::from_secs(5);
                    let outcome = tokio::time::timeout(wait, async {
                        loop {
                            match verifications.recv_past_lag().await {
                                Ok(DanceflowEvent::SessionVerified { session_id: id, verified })
                                    if id == session_id =>
                                {
                                    return Some(verified)
                                }
                                Ok(_) => continue,
                                Err(e) => {
                                    debug!("No verification result: {}", e);
                                    return None;
                                }
                            }
                        }
                    })
                    .await;
                    match outcome {
                        Ok(Some(verified)) => println!("  verified:  {}", verified),
                        Ok(None) => {}
                        Err(_) => warn!("Verification did not finish in time"),
                    }
                }
            }
            Err(e) => {
                error!("Session {} was not saved: {}", session_id, e);
                println!("✗ Session {} aborted: {}", session_id, e);
            }
        }
    }

    if let Some(worker) = worker.as_mut() {
        worker.stop().await;
    }

    collector_token.cancel();
    let (debugger, missed) = collector.await?;
    println!(
        "Frames: {} read, {} recorded, {} skipped",
        line_number, recorded, skipped
    );
    if missed > 0 {
        println!("Event summary missed {} events (collector lagged)", missed);
    }
    debugger.print_summary();

    Ok(())
}

/// Count every event published during a replay, plus how many were lost to lag
fn spawn_event_collector(
    engine: &SessionEngine,
    token: CancellationToken,
) -> tokio::task::JoinHandle<(EventDebugger, u64)> {
    let mut receiver = engine.subscribe_filtered(EventFilter::All, "metrics");
    tokio::spawn(async move {
        let mut debugger = EventDebugger::new(64);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                event = receiver.recv_past_lag() => match event {
                    Ok(event) => debugger.record_event(event),
                    Err(e) => {
                        debug!("Event collector stopped: {}", e);
                        break;
                    }
                },
            }
        }
        for event in receiver.drain() {
            debugger.record_event(event);
        }
        if receiver.skipped() > 0 {
            warn!("Event collector missed {} events", receiver.skipped());
        }
        let missed = receiver.skipped();
        (debugger, missed)
    })
}

async fn list(store: &dyn SessionStore, dance: Option<&str>) -> Result<()> {
    let sessions = store.list(dance).await?;
    if sessions.is_empty() {
        println!("No sessions stored");
        return Ok(());
    }
    for summary in sessions {
        println!(
            "{}  {}  {:<12} {:<16} avg {:>3}  peak {:>3}{}",
            summary.created_at.format("%Y-%m-%d %H:%M"),
            summary.session_id,
            summary.dance_id,
            summary.lecture_id,
            summary.average_score,
            summary.peak_score,
            if summary.verified { "  ✓" } else { "" }
        );
    }
    Ok(())
}

async fn show(store: &dyn SessionStore, session_id: &str) -> Result<()> {
    match store.get(session_id).await {
        Ok(summary) => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            eprintln!("✗ {}", e);
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}

fn print_summary(summary: &SessionSummary) {
    println!("✓ Session {} saved", summary.session_id);
    println!("  dance:     {} / {}", summary.dance_id, summary.lecture_id);
    println!("  duration:  {:.1}s", summary.duration_ms as f64 / 1000.0);
    println!("  average:   {}", summary.average_score);
    println!("  peak:      {}", summary.peak_score);
    println!("  frames:    {}", summary.frame_count);
    println!("  trend:     {:?}", summary.trend);
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    // Determine log level based on flags
    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("danceflow={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    let (file_layer, guard) = match &args.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "danceflow.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer).boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# Danceflow Configuration File");
    println!("# This is the default configuration with all available options");
    println!("# Any key can be overridden with DANCEFLOW__<SECTION>__<KEY>");
    println!();
    print!("{}", DanceflowConfig::default().to_toml()?);
    Ok(())
}

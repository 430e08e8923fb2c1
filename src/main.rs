mod checklist;
mod config;
mod decision;
mod event;
mod hook;
mod mailbox;
mod monitor;
mod oracle;
mod question;
mod relay;
mod signals;
mod source;
mod tailer;
mod window;

use clap::{Args, Parser, Subcommand};
use config::{expand_home, MonitorConfig, SourceMode};
use mailbox::{Mailbox, MonitorLock};
use monitor::Monitor;
use oracle::ChatOracle;
use relay::CommandRelay;
use source::{PollingSource, ReactiveSource};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tailer::LogCursor;
use tracing_subscriber::EnvFilter;

/// Watches an AI coding agent's activity log, asks a local model whether the
/// agent is still on task, and hands corrective directives back to the agent
/// through a mailbox file read by its prompt hook.
#[derive(Parser, Debug)]
#[command(name = "ontask", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "ontask.toml", global = true)]
    config: PathBuf,

    /// Debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Monitor the activity log until interrupted
    Watch(WatchArgs),
    /// Print and clear the pending directive (run from the agent's prompt hook)
    Hook {
        /// Mailbox file (overrides config)
        #[arg(long)]
        mailbox: Option<PathBuf>,
    },
    /// Print the pending directive without clearing it
    Peek {
        /// Mailbox file (overrides config)
        #[arg(long)]
        mailbox: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct WatchArgs {
    /// Task the agent was given (default: from config, else the first logged prompt)
    #[arg(value_name = "INSTRUCTION")]
    instruction: Vec<String>,

    /// Activity log to tail (overrides config)
    #[arg(long)]
    log: Option<PathBuf>,

    /// Mailbox file (overrides config)
    #[arg(long)]
    mailbox: Option<PathBuf>,

    /// How new log lines are discovered (overrides config)
    #[arg(long, value_enum)]
    mode: Option<SourceMode>,

    /// Poll interval in seconds (overrides config)
    #[arg(long)]
    interval: Option<u64>,

    /// Number of recent events shown to the oracle (overrides config)
    #[arg(long)]
    window: Option<usize>,

    /// Evaluate after this many new events (overrides config)
    #[arg(long)]
    batch: Option<usize>,

    /// Minimum off-task confidence that triggers an intervention (overrides config)
    #[arg(long)]
    threshold: Option<f64>,

    /// Skip the oracle reachability check at startup
    #[arg(long)]
    no_probe: bool,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // The hook shares the agent's terminal; keep it quiet unless asked.
    let quiet = cli.quiet || matches!(cli.command, Command::Hook { .. });
    init_logging(cli.verbose, quiet);
    tracing::debug!(?cli, "parsed CLI arguments");

    match cli.command {
        Command::Hook { mailbox } => {
            let mailbox = mailbox_for(&cli.config, mailbox);
            hook::deliver(&mailbox, &mut std::io::stdout().lock());
            ExitCode::SUCCESS
        }
        Command::Peek { mailbox } => {
            let mailbox = mailbox_for(&cli.config, mailbox);
            match hook::peek(&mailbox, &mut std::io::stdout().lock()) {
                Ok(true) => ExitCode::SUCCESS,
                Ok(false) => {
                    eprintln!("mailbox {} is empty", mailbox.path().display());
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("error: {e}");
                    ExitCode::FAILURE
                }
            }
        }
        Command::Watch(args) => {
            let config = match MonitorConfig::load(&cli.config) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("error: {e}");
                    return ExitCode::FAILURE;
                }
            };
            match watch(config, args).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    tracing::error!(error = %e, "monitor failed");
                    eprintln!("error: {e}");
                    ExitCode::FAILURE
                }
            }
        }
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let default_level = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

/// Mailbox for the hook and peek commands. A broken config must not stop the
/// hook, so it falls back to the default location.
fn mailbox_for(config_path: &Path, cli_override: Option<PathBuf>) -> Mailbox {
    if let Some(path) = cli_override {
        return Mailbox::new(expand_home(&path));
    }
    match MonitorConfig::load(config_path) {
        Ok(config) => Mailbox::new(config.mailbox.path),
        Err(e) => {
            tracing::warn!(error = %e, "ignoring unreadable config, using default mailbox");
            Mailbox::new(MonitorConfig::default().mailbox.path)
        }
    }
}

fn apply_overrides(config: &mut MonitorConfig, args: &WatchArgs) {
    if !args.instruction.is_empty() {
        config.task.instruction = Some(args.instruction.join(" "));
    }
    if let Some(log) = &args.log {
        config.log.path = expand_home(log);
    }
    if let Some(mailbox) = &args.mailbox {
        config.mailbox.path = expand_home(mailbox);
    }
    if let Some(mode) = args.mode {
        config.log.mode = mode;
    }
    if let Some(interval) = args.interval {
        config.log.poll_interval_secs = interval;
    }
    if let Some(window) = args.window {
        config.window.capacity = window;
    }
    if let Some(batch) = args.batch {
        config.window.batch_size = batch;
    }
    if let Some(threshold) = args.threshold {
        config.decision.threshold = threshold;
    }
    if args.no_probe {
        config.oracle.probe_on_start = false;
    }
}

fn print_settings(config: &MonitorConfig) {
    println!("ontask v{}", env!("CARGO_PKG_VERSION"));
    println!(
        "Log:        {} ({:?}, every {}s, start at {:?})",
        config.log.path.display(),
        config.log.mode,
        config.log.poll_interval_secs,
        config.log.start_at,
    );
    println!("Mailbox:    {}", config.mailbox.path.display());
    println!(
        "Window:     {} events, evaluate every {}",
        config.window.capacity, config.window.batch_size
    );
    println!("Threshold:  {}", config.decision.threshold);
    println!(
        "Oracle:     {} (model {}, timeout {}s, probe {})",
        config.oracle.base_url,
        config.oracle.model,
        config.oracle.timeout_secs,
        config.oracle.probe_on_start
    );
    println!(
        "Task:       {}",
        config
            .task
            .instruction
            .as_deref()
            .unwrap_or(if config.task.adopt_first_event {
                "(first logged prompt)"
            } else {
                "(none)"
            })
    );
    if let Some(checklist) = &config.task.checklist {
        println!("Checklist:  {}", checklist.display());
    }
    println!(
        "Questions:  {} (answer at confidence {})",
        if config.questions.enabled { "on" } else { "off" },
        config.questions.confidence_threshold
    );
    if !config.relay.command.is_empty() {
        println!(
            "Relay:      {} (timeout {}s)",
            config.relay.command.join(" "),
            config.relay.timeout_secs
        );
    }
    println!("Dry run: config validated, not running.");
}

async fn watch(
    mut config: MonitorConfig,
    args: WatchArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    apply_overrides(&mut config, &args);
    config.validate()?;

    if args.dry_run {
        print_settings(&config);
        return Ok(());
    }

    let mailbox = Mailbox::new(config.mailbox.path.clone());
    let lock = MonitorLock::acquire(&mailbox)?;
    tracing::debug!(lock = %lock.path().display(), "monitor lock held");

    let oracle = Arc::new(ChatOracle::new(&config.oracle)?);
    if config.oracle.probe_on_start {
        tracing::info!(endpoint = %oracle.endpoint(), "checking oracle");
        monitor::probe(oracle.as_ref()).await.map_err(|e| {
            format!(
                "oracle at {} is not usable: {e} (start the model server, or pass --no-probe)",
                oracle.endpoint()
            )
        })?;
    }

    let relay = CommandRelay::from_config(&config.relay);
    let monitor = Monitor::new(&config, oracle, relay);

    let cursor = LogCursor::open(&config.log.path, config.log.start_at);
    let interval = Duration::from_secs(config.log.poll_interval_secs);

    let stats = match config.log.mode {
        SourceMode::Reactive => {
            // Notifications do the work; the timer only covers dropped ones.
            let fallback = interval.saturating_mul(6);
            match ReactiveSource::new(cursor.clone(), fallback) {
                Ok(source) => monitor.run(source, signals::shutdown_signal()).await,
                Err(e) => {
                    tracing::warn!(error = %e, "filesystem notifications unavailable, polling instead");
                    let source = PollingSource::new(cursor, interval);
                    monitor.run(source, signals::shutdown_signal()).await
                }
            }
        }
        SourceMode::Polling => {
            let source = PollingSource::new(cursor, interval);
            monitor.run(source, signals::shutdown_signal()).await
        }
    };

    println!(
        "Summary: {} events, {} evaluations ({} failed), {} interventions, {} answers",
        stats.events, stats.evaluations, stats.failures, stats.interventions, stats.answers
    );
    Ok(())
}

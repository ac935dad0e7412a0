//! Entry point: CLI parsing, file logging, hooks, and the dashboard run.
//!
//! Logs go to a file; the terminal belongs to the dashboard.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use coffee::collector::Collector;
use coffee::event::EventReader;
use coffee::persist::SnapshotStore;
use coffee::probe::{CommandRunner, NetworkProbe, PowerProbe, SystemRunner};
use coffee::tui::{self, Tui};
use coffee::{load_config, App, KeepAwakeController, RefreshLoop, Shutdown};

/// Keep the machine awake and watch time, power, and network at a glance.
#[derive(Parser, Debug)]
#[command(name = "coffee", version, about)]
struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(short, long, env = "COFFEE_CONFIG")]
    config: Option<PathBuf>,

    /// Log file (defaults to $TMPDIR/coffee.log)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Show the dashboard without preventing sleep
    #[arg(long)]
    no_keep_awake: bool,

    /// Do not read or write cached probe results on disk
    #[arg(long)]
    no_persist: bool,
}

/// File-based tracing. The guard must live until exit so logs flush.
fn setup_tracing(cli: &Cli) -> WorkerGuard {
    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("coffee={level}")));

    let log_file = cli
        .log_file
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("coffee.log"));
    let dir = log_file
        .parent()
        .map_or_else(std::env::temp_dir, std::path::Path::to_path_buf);
    let name = log_file
        .file_name()
        .map_or_else(|| "coffee.log".into(), std::ffi::OsStr::to_os_string);

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(writer).with_ansi(false).with_target(true))
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tui::install_hooks()?;
    let _log_guard = setup_tracing(&cli);

    let mut config = load_config(cli.config.as_deref()).wrap_err("invalid configuration")?;
    if cli.no_keep_awake {
        config.keep_awake.enabled = false;
    }
    if cli.no_persist {
        config.persist.enabled = false;
    }
    info!(version = env!("CARGO_PKG_VERSION"), ?config, "starting coffee");

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
    let store = config.persist.resolved_dir().map(SnapshotStore::new);
    let refresh = RefreshLoop::new(
        PowerProbe::new(Arc::clone(&runner), &config, store.clone()),
        NetworkProbe::new(Arc::clone(&runner), &config, store),
        Collector::new(),
        &config,
    );
    let keep_awake = KeepAwakeController::new(config.keep_awake.clone(), runner, config.probe_timeout());

    // The signal listener is the only task spawned before the terminal is
    // ours; the keep-awake child and the event reader wait for it.
    let shutdown = Shutdown::new();
    shutdown.listen_for_signals();

    let mut terminal = Tui::enter()?;
    let mut events = EventReader::with_terminal(config.tick(), &shutdown);
    let mut app = App::new(refresh, keep_awake, shutdown, config.shutdown_grace());
    app.run(&mut events, &mut terminal).await;
    terminal.exit();

    info!("coffee exited cleanly");
    Ok(())
}

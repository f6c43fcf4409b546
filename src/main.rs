use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use usb_linkd::adb::DebugBridgeRegistry;
use usb_linkd::bootstrap::bootstrap;
use usb_linkd::config::DaemonConfig;
use usb_linkd::coordinator;
use usb_linkd::events::EventBus;
use usb_linkd::link::{LinkStateTracker, SwitchEvent, SwitchMonitor, SwitchPaths};
use usb_linkd::oem::OemOverrideTable;
use usb_linkd::properties::{FilePropertyStore, PollConfig};
use usb_linkd::settings::{watch_settings, StaticSettings};

/// Log level for the daemon
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

/// usb-linkd command line arguments
#[derive(Parser, Debug)]
#[command(name = "usb-linkd")]
#[command(version, about = "USB peripheral-link state daemon", long_about = None)]
struct CliArgs {
    /// Directory backing the property store
    #[arg(short = 'd', long, value_name = "DIR", default_value = "/var/lib/usb-linkd/properties")]
    property_dir: PathBuf,

    /// File of bootMode:fromSet:toSet OEM override lines
    #[arg(long, value_name = "FILE")]
    oem_overrides: Option<PathBuf>,

    /// Override the usb_connected switch state file
    #[arg(long, value_name = "FILE")]
    connected_switch: Option<PathBuf>,

    /// Override the usb_configuration switch state file
    #[arg(long, value_name = "FILE")]
    configuration_switch: Option<PathBuf>,

    /// Override the usb_mass_storage legacy switch state file
    #[arg(long, value_name = "FILE")]
    legacy_switch: Option<PathBuf>,

    /// Disconnect debounce window in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 1000)]
    debounce_ms: u64,

    /// Acknowledgement poll interval in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 50)]
    poll_interval_ms: u64,

    /// Maximum acknowledgement poll attempts
    #[arg(long, value_name = "N", default_value_t = 20)]
    poll_attempts: u32,

    /// Switch state polling cadence in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 500)]
    monitor_interval_ms: u64,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl CliArgs {
    fn daemon_config(&self) -> DaemonConfig {
        let mut switch_paths = SwitchPaths::default();
        if let Some(path) = &self.connected_switch {
            switch_paths.connected_state = path.clone();
        }
        if let Some(path) = &self.configuration_switch {
            switch_paths.configuration_state = path.clone();
        }
        if let Some(path) = &self.legacy_switch {
            switch_paths.legacy_state = path.clone();
        }

        DaemonConfig {
            property_dir: self.property_dir.clone(),
            switch_paths,
            oem_override_file: self.oem_overrides.clone(),
            debounce: Duration::from_millis(self.debounce_ms),
            poll: PollConfig {
                interval: Duration::from_millis(self.poll_interval_ms),
                max_attempts: self.poll_attempts,
            },
            monitor_interval: Duration::from_millis(self.monitor_interval_ms),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting usb-linkd v{}", env!("CARGO_PKG_VERSION"));

    let config = args.daemon_config();
    tracing::info!("Property directory: {}", config.property_dir.display());

    let store = Arc::new(FilePropertyStore::new(&config.property_dir)?);

    let oem = match &config.oem_override_file {
        Some(path) => {
            let table = OemOverrideTable::load(path)?;
            tracing::info!("Loaded OEM override table from {}", path.display());
            table
        }
        None => OemOverrideTable::default(),
    };
    let oem = Arc::new(oem);

    // one-time startup reconciliation
    let outcome = bootstrap(store.as_ref(), oem.as_ref(), &config.switch_paths);
    let initial_link = outcome.state.link;
    tracing::info!(
        "Bootstrapped: functions={} link={} wiring={:?}",
        outcome.state.default_functions,
        initial_link,
        outcome.wiring
    );

    let events = Arc::new(EventBus::new());
    let settings = Arc::new(StaticSettings::new(outcome.state.adb_enabled));

    let (usb, coordinator_task) = coordinator::spawn(
        outcome.state,
        store.clone(),
        oem.clone(),
        settings.clone(),
        DebugBridgeRegistry::new(None),
        events.clone(),
        config.debounce,
        config.poll,
    );

    // migrated legacy ADB flag becomes the first explicit request
    if let Some(enable) = outcome.adb_migration {
        usb.set_adb_enabled(enable).await?;
    }
    usb.update_state(initial_link).await?;

    // hardware events: bundled sysfs poller feeding the tracker
    let (switch_tx, switch_rx) = mpsc::channel::<SwitchEvent>(16);
    let monitor = SwitchMonitor::new(
        config.switch_paths.clone(),
        outcome.wiring,
        config.monitor_interval,
        switch_tx,
    );
    monitor.spawn();
    spawn_link_tracker(
        switch_rx,
        LinkStateTracker::new(outcome.wiring, initial_link.connected(), initial_link.configured()),
        usb.clone(),
    );

    let _settings_watcher = watch_settings(settings.clone(), usb.clone());
    spawn_event_logger(events.clone());

    // daemon startup is our boot-completed signal
    usb.boot_completed().await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
        _ = coordinator_task => {
            tracing::error!("Coordinator task exited unexpectedly");
        }
    }

    if let Ok(snapshot) = usb.snapshot().await {
        tracing::info!("Final state: {}", serde_json::to_string(&snapshot)?);
    }
    tracing::info!("usb-linkd shutdown complete");
    Ok(())
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "usb_linkd=error",
        LogLevel::Warn => "usb_linkd=warn",
        LogLevel::Info => "usb_linkd=info",
        LogLevel::Debug => "usb_linkd=debug",
        LogLevel::Trace => "usb_linkd=trace",
    };

    // environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

/// Forward normalized switch events from the monitor into the coordinator
fn spawn_link_tracker(
    mut rx: mpsc::Receiver<SwitchEvent>,
    mut tracker: LinkStateTracker,
    usb: coordinator::UsbCoordinator,
) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Some(link) = tracker.on_switch_event(&event) {
                if usb.update_state(link).await.is_err() {
                    break;
                }
            }
        }
        tracing::info!("link tracker stopped");
    });
}

/// Log every published event as a JSON line
fn spawn_event_logger(events: Arc<EventBus>) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => tracing::info!(target: "usb_linkd::events", "{}", json),
                    Err(e) => tracing::warn!("failed to serialize event: {}", e),
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("event logger lagged by {} events", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

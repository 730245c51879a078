use clap::Parser;
use pkg_constants::paths::{DEFAULT_CONFIG, DEFAULT_DATA_DIR};
use pkg_constants::unidling::{DEFAULT_EVENT_TIMEOUT_SECS, DEFAULT_GRACE_PERIOD_SECS};
use pkg_controllers::bridge::BackendEmptyBridge;
use pkg_controllers::dispatcher::Dispatcher;
use pkg_controllers::grace_period::GracePeriodQueue;
use pkg_controllers::idle_status::IdleStatusController;
use pkg_controllers::informer::ServiceInformer;
use pkg_controllers::store::{StoreControllerEventStore, StoreEventRecorder, StoreServiceAnnotator};
use pkg_controllers::vip_registry::VipRegistry;
use pkg_state::client::StateStore;
use pkg_types::config::{UnidlerConfigFile, load_config_file};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "unidler", about = "Service idling/unidling controller")]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, default_value = DEFAULT_CONFIG)]
    config: String,

    /// Directory for SlateDB state storage
    #[arg(long)]
    data_dir: Option<String>,

    /// Seconds a Service stays in GracePeriod after being unidled
    #[arg(long)]
    grace_period_secs: Option<u64>,

    /// Timeout for a single controller event list/delete, in seconds
    #[arg(long)]
    event_timeout_secs: Option<u64>,

    /// Log output format: "text" or "json"
    #[arg(long)]
    log_format: Option<String>,
}

fn init_tracing(format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config file (returns defaults if file not found)
    let file_cfg: UnidlerConfigFile = load_config_file(&cli.config)?;

    // Merge: CLI args > config file > defaults
    let log_format = cli
        .log_format
        .or(file_cfg.log_format)
        .unwrap_or_else(|| "text".to_string());
    init_tracing(&log_format);
    info!("Config file: {}", cli.config);

    let data_dir = cli
        .data_dir
        .or(file_cfg.data_dir)
        .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());
    let grace_period = Duration::from_secs(
        cli.grace_period_secs
            .or(file_cfg.grace_period_secs)
            .unwrap_or(DEFAULT_GRACE_PERIOD_SECS),
    );
    let event_timeout = Duration::from_secs(
        cli.event_timeout_secs
            .or(file_cfg.event_timeout_secs)
            .unwrap_or(DEFAULT_EVENT_TIMEOUT_SECS),
    );

    info!("Starting unidler");
    info!("  Data dir:      {}", data_dir);
    info!("  Grace period:  {}s", grace_period.as_secs());
    info!("  Event timeout: {}s", event_timeout.as_secs());

    let store = StateStore::new(&data_dir).await?;
    let cancel = CancellationToken::new();

    let registry = VipRegistry::new();
    let (grace_queue, expired) = GracePeriodQueue::start();

    let mut informer = ServiceInformer::new(store.clone());
    let idle_status = Arc::new(IdleStatusController::new(
        Arc::new(StoreServiceAnnotator::new(store.clone())),
        Arc::new(informer.lister()),
        grace_queue,
        grace_period,
    ));
    informer.add_event_handler(Arc::new(registry.clone()));
    informer.add_event_handler(idle_status.clone());

    // Fill the VIP registry before any backend-empty event is looked up.
    let informer_handle = informer.start(cancel.clone()).await?;
    info!("VIP registry populated with {} entries", registry.len());

    let bridge = Arc::new(BackendEmptyBridge::new(
        Arc::new(StoreControllerEventStore::new(store.clone())),
        registry,
        Arc::new(StoreEventRecorder::new(store.clone())),
        event_timeout,
    ));
    let events = bridge.start_feed().await?;
    let dispatcher_handle = Dispatcher::new(bridge, idle_status, events, expired).start(cancel.clone());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    cancel.cancel();

    let _ = dispatcher_handle.await;
    let _ = informer_handle.await;
    store.close().await?;

    Ok(())
}

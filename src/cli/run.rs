//! Run command implementation

use crate::api::{create_router, AppState};
use crate::cli::manifests::load_manifests;
use crate::cli::output::{format_imports_json, format_imports_table, ImportView};
use crate::cli::RunArgs;
use crate::config::{LogFormat, LoggingConfig, VmImportConfig};
use crate::controller::Controller;
use crate::metrics::ImportPhase;
use crate::provider::DefaultProviderFactory;
use crate::reconciler::{ImportReconciler, ReconcileSettings, SystemClock};
use crate::resources::VirtualMachineImport;
use crate::store::ObjectStore;
use crate::validation::ValidationEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How often the run loop checks whether every import has settled.
const SETTLE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Load configuration with CLI overrides
pub fn load_config_with_overrides(
    args: &RunArgs,
) -> Result<VmImportConfig, Box<dyn std::error::Error>> {
    let mut config = if args.config.exists() {
        VmImportConfig::load(Some(&args.config))?
    } else {
        tracing::debug!("Config file not found, using defaults");
        VmImportConfig::default()
    };

    config = config.with_env_overrides();

    // CLI overrides (highest priority)
    if let Some(workers) = args.workers {
        config.controller.workers = workers;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(ref log_level) = args.log_level {
        config.logging.level = log_level.clone();
    }
    if args.no_server {
        config.server.enabled = false;
    }

    Ok(config)
}

/// Initialize tracing based on configuration
pub fn init_tracing(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let filter_str = crate::logging::build_filter_directives(config);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    match config.format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
                .try_init()?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .try_init()?;
        }
    }

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for CTRL+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down...");
        }
    }
}

/// Whether every import request in the store has settled.
pub fn all_settled(store: &ObjectStore) -> Result<bool, Box<dyn std::error::Error>> {
    let requests = store.list::<VirtualMachineImport>(None)?;
    Ok(requests.iter().all(|r| ImportPhase::of(r).is_settled()))
}

async fn wait_until_settled(store: &ObjectStore) {
    let mut interval = tokio::time::interval(SETTLE_POLL_INTERVAL);
    loop {
        interval.tick().await;
        match all_settled(store) {
            Ok(true) => {
                tracing::info!("All import requests settled");
                return;
            }
            Ok(false) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to list import requests"),
        }
    }
}

async fn start_server(
    config: &VmImportConfig,
    store: Arc<ObjectStore>,
    cancel_token: CancellationToken,
) -> Result<(Arc<AppState>, JoinHandle<()>), Box<dyn std::error::Error>> {
    let app_state = Arc::new(AppState::new(store));
    let app = create_router(
        Arc::clone(&app_state),
        Duration::from_secs(config.server.request_timeout_seconds),
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Probe and metrics server listening");

    let handle = tokio::spawn(async move {
        let shutdown = async move { cancel_token.cancelled().await };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            tracing::error!(error = %e, "Probe server failed");
        }
    });
    Ok((app_state, handle))
}

/// Main run command handler
pub async fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load, merge and validate configuration
    let config = load_config_with_overrides(&args)?;
    config.validate()?;

    // 2. Initialize tracing
    init_tracing(&config.logging)?;
    tracing::info!("Starting vmimport controller");
    tracing::debug!(?config, "Loaded configuration");

    // 3. Load manifests into the object store
    let store = Arc::new(ObjectStore::new());
    let loaded = load_manifests(&args.manifests, &store)?;
    tracing::info!(
        objects = loaded,
        manifests = %args.manifests.display(),
        "Manifests loaded"
    );

    // 4. Build the reconciler
    let validator = Arc::new(ValidationEngine::new(config.check_actions()?));
    let providers = Arc::new(DefaultProviderFactory::new(
        config.providers.request_timeout(),
    )?);
    let reconciler = Arc::new(ImportReconciler::new(
        Arc::clone(&store),
        providers,
        validator,
        Arc::new(SystemClock),
        ReconcileSettings::from_config(&config),
    ));

    // 5. Probe server (if enabled) and controller
    let cancel_token = CancellationToken::new();
    let server = if config.server.enabled {
        Some(start_server(&config, Arc::clone(&store), cancel_token.clone()).await?)
    } else {
        tracing::info!("Probe server disabled");
        None
    };

    let controller = Controller::new(reconciler, &config.controller);
    let controller_handle = controller.start(cancel_token.clone());
    if let Some((app_state, _)) = &server {
        app_state.mark_ready();
    }

    // 6. Run until settled, interrupted or timed out
    let deadline = async {
        match args.timeout {
            Some(seconds) => tokio::time::sleep(Duration::from_secs(seconds)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        _ = wait_until_settled(&store) => {}
        _ = shutdown_signal() => {}
        _ = deadline => {
            tracing::warn!("Timed out waiting for imports to settle");
        }
    }

    // 7. Cleanup
    cancel_token.cancel();
    tracing::info!("Waiting for controller to stop");
    controller_handle.await?;
    if let Some((_, handle)) = server {
        handle.await?;
    }

    // 8. Summary
    let requests = store.list::<VirtualMachineImport>(None)?;
    let views: Vec<ImportView> = requests.iter().map(ImportView::from).collect();
    if args.json {
        println!("{}", format_imports_json(&views)?);
    } else {
        println!("{}", format_imports_table(&views));
    }

    tracing::info!("vmimport controller stopped");
    Ok(())
}

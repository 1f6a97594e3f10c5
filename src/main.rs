//! Timeout Capture - feedback countdown with automatic capture
//!
//! This is the main entry point for the timeout-capture application.

use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use timeout_capture::{
    api::create_router,
    config::{Command, Config, ServeArgs, WatchArgs},
    state::{ReceiverState, Session},
    tasks::{run_input, run_view},
    ui::Document,
    utils::shutdown_signal,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // Initialize tracing with appropriate log level; stdout belongs to the terminal view
    tracing_subscriber::fmt()
        .with_env_filter(format!("timeout_capture={},tower_http=info", config.log_level()))
        .with_writer(std::io::stderr)
        .init();

    info!("Starting timeout-capture v{}", env!("CARGO_PKG_VERSION"));

    match config.command {
        Command::Watch(args) => watch(args).await,
        Command::Serve(args) => serve(args).await,
    }
}

async fn watch(args: WatchArgs) -> anyhow::Result<()> {
    info!(
        "Configuration: endpoint={}, timeout={:?}, warning={}s, max_backups={}",
        args.endpoint, args.timeout, args.warning, args.max_backups
    );

    let document = Arc::new(Document::with_standard_layout());
    let session = Arc::new(Session::from_args(&args, Arc::clone(&document))?);
    let view = tokio::spawn(run_view(document));

    session.start();
    info!("Type feedback and press Enter");
    info!("Commands: :submit, :timeout N, :image PATH, :hide, :show, :quit");

    tokio::select! {
        result = run_input(Arc::clone(&session)) => {
            if let Err(e) = result {
                error!("Input error: {:#}", e);
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
        }
    }

    session.shutdown().await;
    view.abort();
    Ok(())
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    info!("Configuration: host={}, port={}, fail_first={}", args.host, args.port, args.fail_first);

    let state = Arc::new(
        ReceiverState::new(args.host.clone(), args.port).with_failures(args.fail_first),
    );
    let app = create_router(state);

    // Bind to the specified address
    let addr = args.address();
    let listener = TcpListener::bind(&addr).await?;

    info!("Receiver running on http://{}", addr);
    info!("Endpoints:");
    info!("  POST /submit_feedback - Feedback form or session-closed notice");
    info!("  GET  /status          - Counts of received feedback");
    info!("  GET  /health          - Health check");

    // Setup graceful shutdown
    let server = axum::serve(listener, app);

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
        }
    }

    info!("Receiver shutdown complete");
    Ok(())
}

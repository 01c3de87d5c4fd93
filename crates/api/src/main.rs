use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shim_api::config::ServerConfig;
use shim_api::state::AppState;
use shim_api::{router, serverless};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "shim_api=debug,shim_comfyui=debug,shim_core=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env().expect("Invalid configuration");
    tracing::info!(
        host = %config.host,
        port = %config.port,
        comfy = %config.comfy_api_url,
        roots = ?config.workflow.roots,
        "Loaded server configuration"
    );
    if config.auth.is_misconfigured() {
        tracing::warn!(
            "SHIM_REQUIRE_API_KEY is on but SHIM_API_KEY is unset; /run and /status will refuse every request"
        );
    }

    // --- App state ---
    let state = AppState::new(config.clone()).expect("Failed to build engine client");

    // `shim-api serverless` runs one job envelope from stdin and exits.
    if std::env::args().nth(1).as_deref() == Some("serverless") {
        run_serverless_job(&state).await;
        return;
    }

    let app = router::build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    tracing::info!("Graceful shutdown complete");
}

/// Read a `{"input": {...}}` envelope from stdin and print the result.
async fn run_serverless_job(state: &AppState) {
    let mut raw = String::new();
    tokio::io::stdin()
        .read_to_string(&mut raw)
        .await
        .expect("Failed to read job from stdin");

    let job = serde_json::from_str(&raw).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Job envelope is not valid JSON");
        serde_json::Value::Null
    });
    let result = serverless::handle(state, job).await;

    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(format!("{result}\n").as_bytes())
        .await
        .expect("Failed to write result");
    stdout.flush().await.expect("Failed to flush stdout");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}

mod api;
mod config;
mod range;
mod scan;
mod state;
mod utils;
mod watch;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use api::api_router;
use config::{config_path_from_env, load_or_create_config, resolve_music_root, resolve_path};
use library::Library;
use scan::start_index;
use state::AppState;
use tower_http::request_id::{MakeRequestUuid, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = config_path_from_env();
    let (config, created) = load_or_create_config(&config_path)?;
    if created {
        info!("Created default config at {:?}", config_path);
    } else {
        info!("Loaded config from {:?}", config_path);
    }

    let music_root = resolve_music_root(&config_path, &config.music_root);
    std::fs::create_dir_all(&music_root)?;
    let index_path = resolve_path(&config_path, config.index_path.trim());
    let extensions = config.extensions();
    info!(
        "Music root {} (extensions: {})",
        music_root.display(),
        extensions.join(", ")
    );

    let library = Library::open(music_root, index_path, extensions);
    if library.store().recovery_path().exists() {
        info!(
            "Serving recovery index from {:?} until the first scan completes",
            library.store().recovery_path()
        );
    }

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let body_limit = config.max_upload_bytes;
    let state = AppState::new(library, config);
    start_index(state.clone());

    let app = Router::new()
        .nest("/api/v1", api_router(state))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Listening on {}", bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(err) => {
                warn!("Failed to install terminate signal handler: {}", err);
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", err);
        }
    }

    info!("Shutdown signal received.");
}

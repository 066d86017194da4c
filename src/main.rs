use gravitas::accounts::TokenStore;
use gravitas::config::{Config, UpstreamConfig};
use gravitas::error::ProxyError;
use gravitas::server::router::{ProxyState, proxy_router};
use mimalloc::MiMalloc;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::{net::TcpListener, signal};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Exit codes: 0 clean shutdown, 1 configuration or bind failure,
/// 2 unrecoverable token-store corruption.
const EXIT_CONFIG: u8 = 1;
const EXIT_TOKEN_STORE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let cfg = match Config::load() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.proxy.log_level.clone()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_level(true)
                .with_target(false),
        )
        .init();

    let store = match TokenStore::load(cfg.accounts_path()) {
        Ok(store) => store,
        Err(err @ ProxyError::TokenStoreCorrupt(_)) => {
            error!("{err}");
            return ExitCode::from(EXIT_TOKEN_STORE);
        }
        Err(err) => {
            error!("failed to load token store: {err}");
            return ExitCode::from(EXIT_TOKEN_STORE);
        }
    };

    let upstream_cfg = Arc::new(UpstreamConfig::default());
    let oauth_http = gravitas::oauth::oauth_http_client(Duration::from_secs(
        cfg.streaming.connect_timeout_secs,
    ));

    let account = gravitas::accounts::spawn(
        store,
        upstream_cfg.clone(),
        oauth_http,
        cfg.auth.account_email.clone(),
    )
    .await;

    let addr = SocketAddr::from((cfg.proxy.host, cfg.proxy.port));
    let cfg = Arc::new(cfg);

    info!(
        listen = %addr,
        log_level = %cfg.proxy.log_level,
        haiku = %cfg.models.haiku.target,
        sonnet = %cfg.models.sonnet.target,
        opus = %cfg.models.opus.target,
        force_disable_streaming = cfg.streaming.force_disable,
        "starting gravitas proxy"
    );

    let state = ProxyState::new(cfg, upstream_cfg, account);
    let app = proxy_router(state);

    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("failed to bind {addr}: {err}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    info!("HTTP server listening on {addr}");
    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    if let Err(err) = served {
        error!("server error: {err}");
        return ExitCode::from(EXIT_CONFIG);
    }

    info!("server has shut down gracefully");
    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

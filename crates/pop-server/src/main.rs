//! Pop server binary.

use pop_server::config::{self, Config, LoggingConfig};
use pop_server::{app, start_tasks, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// The config file named on the command line, then `POP_CONFIG_PATH`, then
/// `config.toml`. Returns the path and where it came from.
fn config_path() -> (String, &'static str) {
    let non_blank = |value: &String| !value.trim().is_empty();
    if let Some(path) = std::env::args().nth(1).filter(non_blank) {
        return (path, "argument");
    }
    match std::env::var("POP_CONFIG_PATH").ok().filter(non_blank) {
        Some(path) => (path, "POP_CONFIG_PATH"),
        None => ("config.toml".to_string(), "default"),
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_new(&logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

fn open_database(config: &Config) -> pop_db::DbPool {
    let settings = pop_db::DbRuntimeSettings {
        busy_timeout_ms: config.database.busy_timeout_ms,
        pool_max_size: config.database.pool_max_size,
    };
    let pool = pop_db::create_pool(&config.database.path, settings)
        .expect("cannot open the database, check database.path");
    let conn = pool.get().expect("cannot get a database connection");
    let applied = pop_db::run_migrations(&conn).expect("database migrations failed");
    tracing::info!(path = %config.database.path, applied, "database ready");
    drop(conn);
    pool
}

#[tokio::main]
async fn main() {
    let (path, source) = config_path();
    let config = config::load_config(Some(path.as_str())).expect("invalid configuration");
    init_tracing(&config.logging);
    tracing::info!(%path, source, "configuration loaded");

    let pool = open_database(&config);
    let (state, links) = AppState::new(pool, &config).expect("cannot restore server state");
    let state = Arc::new(state);
    tracing::info!(
        public_key = %state.server_key.public_key(),
        client_address = %state.greeting.client_address,
        server_address = %state.greeting.server_address,
        "server identity"
    );

    start_tasks(state.clone(), &config, links);

    let addr = SocketAddr::new(config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("cannot bind the listen address");
    tracing::info!(%addr, "listening");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
    tracing::info!("shut down");
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("cannot listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => tracing::info!("interrupted, shutting down"),
        () = terminate => tracing::info!("terminated, shutting down"),
    }
}

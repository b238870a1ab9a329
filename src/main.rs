use core::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use error_stack::{Context, Result, ResultExt};
use path_clean::PathClean;
use tokio_util::sync::CancellationToken;
use tracing::info;

use mr_conform::config;
use mr_conform::conformity::Checker;
use mr_conform::executor::CheckExecutor;
use mr_conform::gitlab::Client;
use mr_conform::queue::QueueManager;
use mr_conform::server::{self, AppState};
use mr_conform::storage::{MemoryStore, Store};

/// A webhook bot that checks GitLab merge requests for conformity.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path for the configuration file
    #[arg(long, default_value = "./config.yaml")]
    config_path: PathBuf,

    /// Override the configured bind host
    #[arg(long)]
    host: Option<String>,

    /// Override the configured bind port
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Debug)]
enum Error {
    Config,
    Gitlab,
    Redis,
    Server,
}

impl Context for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config => f.write_str("failed to load configuration"),
            Error::Gitlab => f.write_str("failed to create GitLab client"),
            Error::Redis => f.write_str("failed to reach Redis"),
            Error::Server => f.write_str("failed to run HTTP server"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    install_logger();

    let args = Args::parse();
    let mut config = config::load(&args.config_path.clean()).change_context(Error::Config)?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let client = Arc::new(
        Client::new(
            &config.gitlab.token,
            &config.gitlab.base_url,
            config.gitlab.insecure,
        )
        .change_context(Error::Gitlab)?,
    );
    info!(server = %config.gitlab.base_url, "connected to GitLab server");

    let store = Arc::new(Store::from(MemoryStore::default()));
    let checker = Arc::new(Checker::new(config.rules.clone(), Arc::clone(&client)));
    let queue = Arc::new(QueueManager::new(&config.redis).change_context(Error::Redis)?);
    queue.health().await.change_context(Error::Redis)?;

    let executor = Arc::new(CheckExecutor::new(
        Arc::clone(&checker),
        Arc::clone(&client),
        Arc::clone(&store),
    ));
    let cancel = CancellationToken::new();
    let scheduler = queue.start(executor, cancel.clone());

    let address = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState {
        config,
        checker,
        queue: Arc::clone(&queue),
        store,
    });

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .change_context(Error::Server)
        .attach_printable_lazy(|| format!("bind address: {address}"))?;
    info!(address, "starting server");

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .change_context(Error::Server)?;

    info!("shutting down");
    cancel.cancel();
    queue.stop();
    let _ = scheduler.await;
    info!("server exited");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn install_logger() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(true)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();
}

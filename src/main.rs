use crate::config::Settings;
use crate::dedup::InMemoryDedupCache;
use crate::state::ControllerContext;
use crate::webhook::WebhookDispatcher;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod annotations;
mod config;
mod controller;
mod dedup;
mod image_reference;
mod readiness;
mod resource;
mod secret_string;
mod state;
mod watcher;
mod webhook;
mod webserver;

#[cfg(target_env = "musl")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env()?;
    tracing_subscriber::fmt()
        .with_max_level(settings.log_level.value)
        .init();
    info!("Starting kube-pipeline-trigger {}", env!("CARGO_PKG_VERSION"));
    settings.log_resolved();

    let client = controller::create_client().await?;
    let dispatcher = WebhookDispatcher::new(
        controller::create_http_client()?,
        settings.base_url.value.clone(),
        settings.url_path.value.clone(),
        settings.auth_token.clone(),
    );
    let ready = Arc::new(AtomicBool::new(false));
    let dedup = Arc::new(InMemoryDedupCache::new());
    let webserver_port = settings.webserver_port.value;
    let ctx = ControllerContext {
        kube_client: client,
        settings,
        dedup: dedup.clone(),
        dispatcher,
        ready: ready.clone(),
    };

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    let app = webserver::create_app(ready);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], webserver_port));
    info!("Starting webserver on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let webserver_shutdown = shutdown.clone();
    let webserver = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(webserver_shutdown.cancelled_owned())
            .await
    });

    let result = controller::run(ctx, shutdown.clone()).await;
    shutdown.cancel();
    if let Err(e) = webserver.await? {
        error!("Webserver stopped with error: {:?}", e);
    }

    info!("Shutting down after processing {} distinct images", dedup.len());
    result
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {:?}", e);
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
                error!("Failed to listen for SIGTERM: {:?}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received shutdown signal");
    shutdown.cancel();
}

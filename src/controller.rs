use crate::readiness::{PodHealthProbe, ReadinessGate};
use crate::resource::WatchedResource;
use crate::state::ControllerContext;
use crate::watcher::Watcher;
use anyhow::{Context, bail};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::info;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn create_client() -> anyhow::Result<Client> {
    info!("Initializing K8s client");
    let client = Client::try_default().await?;
    let api_server_info = client.apiserver_version().await?;
    info!(
        "Connected to Kubernetes API server with version {}.{}",
        api_server_info.major, api_server_info.minor
    );
    Ok(client)
}

pub fn create_http_client() -> anyhow::Result<reqwest::Client> {
    info!("Initializing webhook HTTP client");
    // System certificates are loaded automatically with rustls-tls-native-roots
    reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .timeout(WEBHOOK_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")
}

/// Starts one watcher task per selected kind and waits until shutdown or until a watcher fails.
pub async fn run(ctx: ControllerContext, shutdown: CancellationToken) -> anyhow::Result<()> {
    let selection = ctx.settings.watch;
    if selection.is_empty() {
        bail!(
            "No resource kind selected, enable at least one of WATCH_PODS, WATCH_DEPLOYMENTS, WATCH_STATEFULSETS"
        );
    }

    let mut watchers = JoinSet::new();
    if selection.pods {
        spawn_watcher::<Pod>(&mut watchers, &ctx);
    }
    if selection.deployments {
        spawn_watcher::<Deployment>(&mut watchers, &ctx);
    }
    if selection.statefulsets {
        spawn_watcher::<StatefulSet>(&mut watchers, &ctx);
    }
    ctx.ready.store(true, Ordering::SeqCst);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Stopping {} watchers", watchers.len());
                watchers.shutdown().await;
                return Ok(());
            }
            joined = watchers.join_next() => match joined {
                Some(Ok(Ok(()))) => continue,
                Some(Ok(Err(e))) => return Err(e),
                Some(Err(e)) => return Err(anyhow::Error::new(e).context("Watcher task aborted")),
                None => return Ok(()),
            },
        }
    }
}

fn spawn_watcher<R: WatchedResource>(
    watchers: &mut JoinSet<anyhow::Result<()>>,
    ctx: &ControllerContext,
) {
    let mut watcher = Watcher::<R>::new(ctx.dedup.clone(), ctx.dispatcher.clone());
    if R::HEALTH_GATED {
        let probe = Arc::new(PodHealthProbe::new(ctx.kube_client.clone()));
        watcher = watcher.with_readiness_gate(ReadinessGate::new(
            probe,
            ctx.settings.readiness_timeout.value,
        ));
    }

    let api: Api<R> = Api::all(ctx.kube_client.clone());
    info!("Starting {} watcher across all namespaces", R::kind_name());
    watchers.spawn(watcher.run(api));
}

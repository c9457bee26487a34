use futures::FutureExt;
use futures::future::BoxFuture;
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, interval_at, timeout};
use tracing::{debug, info, warn};

pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Reads the live health of a namespaced resource.
pub trait HealthProbe: Send + Sync {
    fn is_healthy<'a>(&'a self, namespace: &'a str, name: &'a str)
    -> BoxFuture<'a, anyhow::Result<bool>>;
}

pub struct PodHealthProbe {
    client: Client,
}

impl PodHealthProbe {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl HealthProbe for PodHealthProbe {
    fn is_healthy<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<bool>> {
        async move {
            let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
            let pod = pods.get(name).await?;
            Ok(is_pod_ready(&pod))
        }
        .boxed()
    }
}

/// A pod is healthy once it reports a `Ready` condition with status `True`.
pub fn is_pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

#[derive(Clone)]
pub struct ReadinessGate {
    probe: Arc<dyn HealthProbe>,
    timeout: Duration,
    poll_interval: Duration,
}

impl ReadinessGate {
    pub fn new(probe: Arc<dyn HealthProbe>, timeout: Duration) -> Self {
        Self {
            probe,
            timeout,
            poll_interval: POLL_INTERVAL,
        }
    }

    /// Polls every [`POLL_INTERVAL`] until the resource is healthy or the timeout elapses.
    /// Probe errors count as "not healthy yet".
    pub async fn wait_until_healthy(&self, namespace: &str, name: &str) -> bool {
        let mut ticker = interval_at(Instant::now() + self.poll_interval, self.poll_interval);

        let poll = async {
            loop {
                ticker.tick().await;
                match self.probe.is_healthy(namespace, name).await {
                    Ok(true) => return,
                    Ok(false) => debug!("Waiting for {}/{} to become healthy", namespace, name),
                    Err(e) => warn!("Failed to read health of {}/{}: {:?}", namespace, name, e),
                }
            }
        };

        match timeout(self.timeout, poll).await {
            Ok(()) => {
                debug!("{}/{} is healthy", namespace, name);
                true
            }
            Err(_) => {
                info!(
                    "{}/{} did not become healthy within {}s",
                    namespace,
                    name,
                    self.timeout.as_secs()
                );
                false
            }
        }
    }
}

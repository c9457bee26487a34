use crate::annotations::{is_opted_in, trigger_config};
use crate::dedup::DedupStore;
use crate::readiness::ReadinessGate;
use crate::resource::WatchedResource;
use crate::webhook::WebhookDispatcher;
use anyhow::Context;
use futures::{Stream, StreamExt};
use kube::api::{WatchEvent, WatchParams};
use kube::{Api, ResourceExt};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const REOPEN_DELAY: Duration = Duration::from_secs(1);

/// Watches one resource kind across all namespaces and triggers a pipeline for every
/// first-seen image on opted-in resources. Events are handled one at a time.
pub struct Watcher<R> {
    dedup: Arc<dyn DedupStore>,
    dispatcher: WebhookDispatcher,
    readiness: Option<ReadinessGate>,
    _resource: PhantomData<fn() -> R>,
}

impl<R: WatchedResource> Watcher<R> {
    pub fn new(dedup: Arc<dyn DedupStore>, dispatcher: WebhookDispatcher) -> Self {
        Self {
            dedup,
            dispatcher,
            readiness: None,
            _resource: PhantomData,
        }
    }

    pub fn with_readiness_gate(mut self, gate: ReadinessGate) -> Self {
        self.readiness = Some(gate);
        self
    }

    /// Runs until the process stops. The stream is reopened whenever the API server closes it;
    /// failing to open it is fatal.
    pub async fn run(self, api: Api<R>) -> anyhow::Result<()> {
        self.run_with(|resource_version| {
            let api = api.clone();
            async move { api.watch(&WatchParams::default(), &resource_version).await }
        })
        .await
    }

    /// Watch loop over streams produced by `open`, which receives the version to resume from.
    async fn run_with<F, Fut, S>(&self, mut open: F) -> anyhow::Result<()>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = kube::Result<S>>,
        S: Stream<Item = kube::Result<WatchEvent<R>>>,
    {
        let kind = R::kind_name();
        let mut resource_version = "0".to_string();

        loop {
            let stream = open(resource_version.clone())
                .await
                .with_context(|| format!("Failed to start watch on {}", kind))?;
            info!(
                "Watching for {} events from resource version {}",
                kind, resource_version
            );

            self.consume(stream, &mut resource_version).await;

            warn!(
                "{} watch stream ended, reopening in {}s",
                kind,
                REOPEN_DELAY.as_secs()
            );
            tokio::time::sleep(REOPEN_DELAY).await;
        }
    }

    /// Handles events until `stream` ends, keeping `resource_version` at the last version seen.
    /// Returns the number of pipelines triggered.
    pub async fn consume<S>(&self, stream: S, resource_version: &mut String) -> usize
    where
        S: Stream<Item = kube::Result<WatchEvent<R>>>,
    {
        let kind = R::kind_name();
        let mut stream = std::pin::pin!(stream);
        let mut triggered = 0;

        while let Some(event) = stream.next().await {
            match event {
                Ok(WatchEvent::Bookmark(bookmark)) => {
                    *resource_version = bookmark.metadata.resource_version;
                }
                Ok(WatchEvent::Error(e)) => {
                    warn!(
                        "{} watch reported an error, resetting resource version: {:?}",
                        kind, e
                    );
                    *resource_version = "0".to_string();
                }
                Ok(event) => {
                    if let WatchEvent::Added(obj)
                    | WatchEvent::Modified(obj)
                    | WatchEvent::Deleted(obj) = &event
                    {
                        if let Some(version) = obj.resource_version() {
                            *resource_version = version;
                        }
                    }
                    triggered += self.handle_event(event).await;
                }
                Err(e) => {
                    warn!("Dropping {} event that could not be decoded: {:?}", kind, e);
                }
            }
        }
        triggered
    }

    /// Returns the number of pipelines triggered.
    pub async fn handle_event(&self, event: WatchEvent<R>) -> usize {
        let kind = R::kind_name();
        match event {
            WatchEvent::Modified(resource) => {
                debug!(
                    "{} {} modified in namespace {}",
                    kind,
                    resource.name_any(),
                    resource.namespace().unwrap_or_default()
                );
                return self.process_modified(&resource).await;
            }
            WatchEvent::Added(resource) => {
                debug!("{} {} added, ignoring", kind, resource.name_any());
            }
            WatchEvent::Deleted(resource) => {
                debug!("{} {} deleted, ignoring", kind, resource.name_any());
            }
            other => {
                debug!("Unhandled {} event: {:?}", kind, other);
            }
        }
        0
    }

    /// Returns the number of pipelines triggered for this snapshot.
    pub async fn process_modified(&self, resource: &R) -> usize {
        let kind = R::kind_name();
        let name = resource.name_any();
        let namespace = resource.namespace().unwrap_or_default();

        if !is_opted_in(resource.annotations()) {
            debug!("{} {}/{} is not opted in", kind, namespace, name);
            return 0;
        }

        if let Some(gate) = &self.readiness {
            if !gate.wait_until_healthy(&namespace, &name).await {
                info!("Skipping {} {}/{}, not healthy in time", kind, namespace, name);
                return 0;
            }
        }

        let mut triggered = 0;
        for change in resource.image_changes() {
            info!(
                "Processing image {} (new) vs {} (old) in {} {}/{} container {}",
                change.new_image, change.old_image, kind, namespace, name, change.container
            );

            if !change.has_changed() {
                debug!("Image of container {} unchanged", change.container);
                continue;
            }

            if let Some(digest) = &change.new_image.digest {
                debug!(
                    "Image {} is pinned to {}, deduplicating on its tag",
                    change.new_image, digest
                );
            }
            let key = change.new_image.identity_key();
            if !self.dedup.check_and_mark(&key) {
                debug!("Image {} was already processed", key);
                continue;
            }

            let config = trigger_config(resource.annotations());
            info!(
                "{} {}/{} updated with new image {} in environment {}",
                kind, namespace, name, change.new_image, config.env.value
            );
            self.dispatcher
                .trigger(&config, change.new_image.extract_tag())
                .await;
            triggered += 1;
        }

        if triggered == 0 {
            debug!("No new image to trigger for {} {}/{}", kind, namespace, name);
        }
        triggered
    }
}

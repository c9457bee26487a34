use crate::config::Settings;
use crate::dedup::InMemoryDedupCache;
use crate::webhook::WebhookDispatcher;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

#[derive(Clone)]
pub struct ControllerContext {
    pub(crate) kube_client: kube::Client,
    pub(crate) settings: Settings,
    pub(crate) dedup: Arc<InMemoryDedupCache>,
    pub(crate) dispatcher: WebhookDispatcher,
    /// Set once every selected watcher has been started.
    pub(crate) ready: Arc<AtomicBool>,
}

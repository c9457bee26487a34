use crate::image_reference::ImageChange;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Pod, PodSpec};
use kube::Resource;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tracing::error;

/// A workload kind whose image changes can trigger a pipeline.
pub trait WatchedResource
where
    Self: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Send
        + Sync
        + DeserializeOwned
        + 'static,
{
    /// Whether events must wait for the resource to report healthy before images are compared.
    const HEALTH_GATED: bool = false;

    fn kind_name() -> String {
        Self::kind(&()).to_string()
    }

    fn pod_spec(&self) -> Option<&PodSpec>;

    /// Pairs each current container image with the best known previous image.
    fn image_changes(&self) -> Vec<ImageChange>;
}

impl WatchedResource for Pod {
    const HEALTH_GATED: bool = true;

    fn pod_spec(&self) -> Option<&PodSpec> {
        self.spec.as_ref()
    }

    // https://kubernetes.io/docs/reference/kubernetes-api/workload-resources/pod-v1/#PodStatus
    fn image_changes(&self) -> Vec<ImageChange> {
        let statuses = self
            .status
            .as_ref()
            .and_then(|s| s.container_statuses.as_deref())
            .unwrap_or_default();
        let Some(first_status) = statuses.first() else {
            return Vec::new();
        };

        self.pod_spec()
            .map(|spec| spec.containers.as_slice())
            .unwrap_or_default()
            .iter()
            .filter_map(|container| {
                let new_image = container.image.as_deref()?;
                let old_image = statuses
                    .iter()
                    .find(|status| status.name == container.name)
                    .unwrap_or(first_status);
                Some(ImageChange::new(&container.name, new_image, &old_image.image))
            })
            .collect()
    }
}

impl WatchedResource for Deployment {
    fn pod_spec(&self) -> Option<&PodSpec> {
        self.spec.as_ref().and_then(|s| s.template.spec.as_ref())
    }

    // https://kubernetes.io/docs/reference/kubernetes-api/workload-resources/deployment-v1/#DeploymentStatus
    fn image_changes(&self) -> Vec<ImageChange> {
        let previous = self
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .and_then(|c| c.first())
            .map(|c| c.message.clone().unwrap_or_default());
        primary_image_change(self, previous)
    }
}

impl WatchedResource for StatefulSet {
    fn pod_spec(&self) -> Option<&PodSpec> {
        self.spec.as_ref().and_then(|s| s.template.spec.as_ref())
    }

    // https://kubernetes.io/docs/reference/kubernetes-api/workload-resources/stateful-set-v1/#StatefulSetStatus
    fn image_changes(&self) -> Vec<ImageChange> {
        let previous = self
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .and_then(|c| c.first())
            .map(|c| c.message.clone().unwrap_or_default());
        primary_image_change(self, previous)
    }
}

/// Workloads only expose a previous image through the message of their first status condition.
fn primary_image_change<R: WatchedResource>(
    resource: &R,
    previous: Option<String>,
) -> Vec<ImageChange> {
    let Some(container) = resource.pod_spec().and_then(|spec| spec.containers.first()) else {
        return Vec::new();
    };
    let Some(new_image) = container.image.as_deref() else {
        return Vec::new();
    };
    let Some(previous) = previous else {
        error!(
            "No previous image information available for {} {}",
            R::kind_name(),
            resource.meta().name.as_deref().unwrap_or_default()
        );
        return Vec::new();
    };
    vec![ImageChange::new(&container.name, new_image, &previous)]
}

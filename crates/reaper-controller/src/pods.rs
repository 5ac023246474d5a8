use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::runtime::watcher::{self, watcher, Event};
use kube::runtime::WatchStreamExt;
use kube::{Client, ResourceExt};
use reaper_core::object::{ManagedObject, ObjectKey};

use crate::deleter::{DeleteOutcome, ObjectDeleter};
use crate::error::ActionError;
use crate::source::{EventSource, SourceEvent, SourceStream};
use crate::{ControllerError, Result};

// ─── Connection ───────────────────────────────────────────────────────────

/// Build a client from an explicit kubeconfig, the in-cluster service
/// account, or `~/.kube/config`, in that order.
pub async fn connect(kubeconfig: Option<&Path>) -> Result<Client> {
    let config = match kubeconfig {
        Some(path) => {
            tracing::info!(path = %path.display(), "using kubeconfig");
            load_kubeconfig(path).await?
        }
        None => match kube::Config::incluster() {
            Ok(config) => {
                tracing::info!("using in-cluster configuration");
                config
            }
            Err(e) => {
                let path =
                    default_kubeconfig_path().ok_or(ControllerError::NoConnectionProfile)?;
                tracing::info!(
                    path = %path.display(),
                    reason = %e,
                    "not running in-cluster, using kubeconfig"
                );
                load_kubeconfig(&path).await?
            }
        },
    };
    Ok(Client::try_from(config)?)
}

async fn load_kubeconfig(path: &Path) -> Result<kube::Config> {
    let kubeconfig = Kubeconfig::read_from(path)?;
    let config =
        kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?;
    Ok(config)
}

pub fn default_kubeconfig_path() -> Option<PathBuf> {
    home::home_dir().map(|home| home.join(".kube").join("config"))
}

// ─── Pod → ManagedObject ──────────────────────────────────────────────────

pub fn managed_object(pod: &Pod) -> ManagedObject {
    ManagedObject {
        key: ObjectKey::new(pod.namespace().unwrap_or_default(), pod.name_any()),
        labels: pod.labels().clone(),
        resource_version: pod.resource_version(),
        uid: pod.uid(),
    }
}

fn source_event(event: Event<Pod>) -> SourceEvent {
    match event {
        Event::Init => SourceEvent::Init,
        Event::InitApply(pod) => SourceEvent::InitApply(managed_object(&pod)),
        Event::InitDone => SourceEvent::InitDone,
        Event::Apply(pod) => SourceEvent::Apply(managed_object(&pod)),
        Event::Delete(pod) => SourceEvent::Delete(managed_object(&pod)),
    }
}

// ─── PodSource ────────────────────────────────────────────────────────────

/// List+watch of pods through the API server.
///
/// The underlying watcher re-lists on its own after errors (with the default
/// exponential backoff), so errors surface in-band and the stream continues.
pub struct PodSource {
    api: Api<Pod>,
    config: watcher::Config,
}

impl PodSource {
    pub fn new(client: Client, namespace: Option<&str>, label_selector: Option<&str>) -> Self {
        let api = match namespace {
            Some(ns) => Api::namespaced(client, ns),
            None => Api::all(client),
        };
        let mut config = watcher::Config::default();
        if let Some(selector) = label_selector {
            config = config.labels(selector);
        }
        Self { api, config }
    }
}

impl EventSource for PodSource {
    fn watch(&self) -> SourceStream {
        watcher(self.api.clone(), self.config.clone())
            .default_backoff()
            .map(|item| item.map(source_event).map_err(ControllerError::from))
            .boxed()
    }
}

// ─── KubeDeleter ──────────────────────────────────────────────────────────

/// Deletes pods by `(namespace, name)`.
#[derive(Clone)]
pub struct KubeDeleter {
    client: Client,
}

impl KubeDeleter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl ObjectDeleter for KubeDeleter {
    fn delete<'a>(
        &'a self,
        key: &'a ObjectKey,
    ) -> BoxFuture<'a, std::result::Result<DeleteOutcome, ActionError>> {
        Box::pin(async move {
            let api: Api<Pod> = Api::namespaced(self.client.clone(), &key.namespace);
            match api.delete(&key.name, &DeleteParams::default()).await {
                Ok(_) => Ok(DeleteOutcome::Deleted),
                Err(e) => classify_delete_error(e),
            }
        })
    }
}

fn classify_delete_error(err: kube::Error) -> std::result::Result<DeleteOutcome, ActionError> {
    match &err {
        kube::Error::Api(resp) if resp.code == 404 => Ok(DeleteOutcome::AlreadyGone),
        kube::Error::Api(resp) if resp.code == 409 || resp.code == 429 || resp.code >= 500 => {
            Err(ActionError::Retryable(err.to_string()))
        }
        kube::Error::Api(_) => Err(ActionError::Fatal(err.to_string())),
        _ => Err(ActionError::Retryable(err.to_string())),
    }
}

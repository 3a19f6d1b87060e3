//! Multi-context Kubernetes facade.
//!
//! Everything the engine and log multiplexer need from client-go territory:
//! typed list/get/delete/describe/log operations per context, a fan-out layer
//! that queries every context concurrently and tags results with their
//! origin, and reconnecting watch streams. Individual context failures never
//! fail a whole fan-out call.

use std::collections::HashMap;
use std::path::Path;
use std::pin::pin;
use std::time::Duration;

use futures::future::join_all;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, LogParams};
use kube::core::ApiResource;
use kube::runtime::watcher;
use kube::Client;
use rand::Rng;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::client::build_client_for_context;
use crate::definition::ResourceDefinition;
use crate::resource::Resource;

pub const LIST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DESCRIBE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DELETE_TIMEOUT: Duration = Duration::from_secs(15);
/// A watch with no traffic for this long is assumed silently dropped.
pub const WATCH_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
pub const WATCH_BACKOFF_INITIAL: Duration = Duration::from_secs(1);
pub const WATCH_BACKOFF_CAP: Duration = Duration::from_secs(30);

// ─── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum FacadeError {
    #[error("context '{0}' is not connected")]
    UnknownContext(String),
    #[error("kubeconfig: {0}")]
    Kubeconfig(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,
    #[error("{0}")]
    Internal(String),
    #[error(transparent)]
    Api(#[from] kube::Error),
}

impl FacadeError {
    /// Permanent errors mark a kind unavailable in a context (404, RBAC
    /// denial); everything else is transient and keeps serving from cache.
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::UnknownContext(_) | Self::Kubeconfig(_) => true,
            Self::Api(kube::Error::Api(response)) => {
                matches!(response.code, 403 | 404 | 405)
            }
            _ => false,
        }
    }
}

/// Fan-out result: per-context payloads and per-context failures. The map
/// carries no ordering — downstream code imposes order via sort.
#[derive(Debug, Default)]
pub struct FanOut<T> {
    pub results: HashMap<String, T>,
    pub errors: HashMap<String, FacadeError>,
}

/// Note emitted by a watch task when cluster state changed for a kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchNote {
    pub context: String,
    pub kind: String,
    pub namespace: Option<String>,
}

// ─── Facade ───────────────────────────────────────────────────────────────────

struct ContextClient {
    name: String,
    client: Client,
}

pub struct Facade {
    clients: Vec<ContextClient>,
}

impl Facade {
    /// Connect to every requested context in parallel. Contexts that fail to
    /// connect are reported and skipped; the rest continue.
    pub async fn connect(
        contexts: &[String],
        kubeconfig: Option<&Path>,
    ) -> (Self, Vec<(String, FacadeError)>) {
        let attempts = contexts.iter().map(|ctx| async move {
            (ctx.clone(), build_client_for_context(ctx, kubeconfig).await)
        });
        let mut clients = Vec::new();
        let mut failures = Vec::new();
        for (name, result) in join_all(attempts).await {
            match result {
                Ok(client) => clients.push(ContextClient { name, client }),
                Err(err) => {
                    warn!(context = %name, %err, "cannot connect to context");
                    failures.push((name, err));
                }
            }
        }
        (Self { clients }, failures)
    }

    /// A facade with no connected contexts (demo mode).
    pub fn disconnected() -> Self {
        Self {
            clients: Vec::new(),
        }
    }

    pub fn contexts(&self) -> Vec<String> {
        self.clients.iter().map(|c| c.name.clone()).collect()
    }

    pub fn is_connected(&self) -> bool {
        !self.clients.is_empty()
    }

    fn client(&self, context: &str) -> Result<&Client, FacadeError> {
        self.clients
            .iter()
            .find(|c| c.name == context)
            .map(|c| &c.client)
            .ok_or_else(|| FacadeError::UnknownContext(context.to_string()))
    }

    fn dynamic_api(
        &self,
        context: &str,
        def: &ResourceDefinition,
        namespace: Option<&str>,
    ) -> Result<Api<DynamicObject>, FacadeError> {
        let client = self.client(context)?.clone();
        let ar = def.api_resource();
        Ok(match (def.namespaced, namespace) {
            (true, Some(ns)) => Api::namespaced_with(client, ns, &ar),
            _ => Api::all_with(client, &ar),
        })
    }

    // ── List ──────────────────────────────────────────────────────────────────

    /// List a kind in one context. Returns the tagged resources and the list
    /// resourceVersion.
    pub async fn list(
        &self,
        context: &str,
        def: &ResourceDefinition,
        namespace: Option<&str>,
    ) -> Result<(Vec<Resource>, String), FacadeError> {
        let api = self.dynamic_api(context, def, namespace)?;
        let list = tokio::time::timeout(LIST_TIMEOUT, api.list(&ListParams::default()))
            .await
            .map_err(|_| FacadeError::Timeout(LIST_TIMEOUT))??;
        let resource_version = list.metadata.resource_version.clone().unwrap_or_default();
        let resources = list
            .items
            .into_iter()
            .map(|mut obj| {
                obj.metadata.managed_fields = None;
                Resource::new(context, serde_json::to_value(&obj).unwrap_or(Value::Null))
            })
            .collect();
        debug!(context, kind = %def.gvk.kind, version = %resource_version, "listed");
        Ok((resources, resource_version))
    }

    /// List a kind in several contexts concurrently. Completes when every
    /// context has resolved or the cancellation fires, whichever is first;
    /// per-context errors land in the error map instead of failing the call.
    pub async fn list_fan_out(
        &self,
        def: &ResourceDefinition,
        namespace: Option<&str>,
        only: &[String],
        cancel: &CancellationToken,
    ) -> FanOut<(Vec<Resource>, String)> {
        let tasks = self
            .clients
            .iter()
            .filter(|c| only.is_empty() || only.contains(&c.name))
            .map(|c| {
                let name = c.name.clone();
                async move {
                    let result = tokio::select! {
                        () = cancel.cancelled() => Err(FacadeError::Cancelled),
                        result = self.list(&name, def, namespace) => result,
                    };
                    (name, result)
                }
            });
        let mut out = FanOut::default();
        for (name, result) in join_all(tasks).await {
            match result {
                Ok(payload) => {
                    out.results.insert(name, payload);
                }
                Err(err) => {
                    out.errors.insert(name, err);
                }
            }
        }
        out
    }

    // ── Get / describe / delete ───────────────────────────────────────────────

    pub async fn get(
        &self,
        context: &str,
        def: &ResourceDefinition,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Resource, FacadeError> {
        let api = self.dynamic_api(context, def, namespace)?;
        let mut obj = tokio::time::timeout(DESCRIBE_TIMEOUT, api.get(name))
            .await
            .map_err(|_| FacadeError::Timeout(DESCRIBE_TIMEOUT))??;
        obj.metadata.managed_fields = None;
        Ok(Resource::new(
            context,
            serde_json::to_value(&obj).unwrap_or(Value::Null),
        ))
    }

    /// Fetch an object and render its detail text (YAML form).
    pub async fn describe(
        &self,
        context: &str,
        def: &ResourceDefinition,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<String, FacadeError> {
        let resource = self.get(context, def, namespace, name).await?;
        serde_yaml::to_string(&resource.object)
            .map_err(|err| FacadeError::Internal(err.to_string()))
    }

    /// Delete an object. The longer timeout leaves room for finalizers.
    pub async fn delete(
        &self,
        context: &str,
        def: &ResourceDefinition,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), FacadeError> {
        let api = self.dynamic_api(context, def, namespace)?;
        tokio::time::timeout(DELETE_TIMEOUT, api.delete(name, &DeleteParams::default()))
            .await
            .map_err(|_| FacadeError::Timeout(DELETE_TIMEOUT))??;
        debug!(context, kind = %def.gvk.kind, name, "deleted");
        Ok(())
    }

    // ── Pods and logs ─────────────────────────────────────────────────────────

    fn pod_api(&self, context: &str, namespace: Option<&str>) -> Result<Api<Pod>, FacadeError> {
        let client = self.client(context)?.clone();
        Ok(match namespace {
            Some(ns) => Api::namespaced(client, ns),
            None => Api::default_namespaced(client),
        })
    }

    /// Fetch a single pod as a tagged resource.
    pub async fn get_pod(
        &self,
        context: &str,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Resource, FacadeError> {
        let api = self.pod_api(context, namespace)?;
        let pod = tokio::time::timeout(DESCRIBE_TIMEOUT, api.get(name))
            .await
            .map_err(|_| FacadeError::Timeout(DESCRIBE_TIMEOUT))??;
        Ok(Resource::new(
            context,
            serde_json::to_value(&pod).unwrap_or(Value::Null),
        ))
    }

    /// Fetch a pod-owning workload (Deployment or StatefulSet) so callers
    /// can expand its selector into pods.
    pub async fn get_workload(
        &self,
        context: &str,
        kind: &str,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Resource, FacadeError> {
        let plural = match kind {
            "Deployment" => "deployments",
            "StatefulSet" => "statefulsets",
            other => {
                return Err(FacadeError::Internal(format!(
                    "'{other}' does not own pods"
                )))
            }
        };
        let ar = ApiResource {
            group: "apps".to_string(),
            version: "v1".to_string(),
            api_version: "apps/v1".to_string(),
            kind: kind.to_string(),
            plural: plural.to_string(),
        };
        let client = self.client(context)?.clone();
        let api: Api<DynamicObject> = match namespace {
            Some(ns) => Api::namespaced_with(client, ns, &ar),
            None => Api::default_namespaced_with(client, &ar),
        };
        let mut obj = tokio::time::timeout(DESCRIBE_TIMEOUT, api.get(name))
            .await
            .map_err(|_| FacadeError::Timeout(DESCRIBE_TIMEOUT))??;
        obj.metadata.managed_fields = None;
        Ok(Resource::new(
            context,
            serde_json::to_value(&obj).unwrap_or(Value::Null),
        ))
    }

    /// Pods matching a label selector, for owner → pods expansion.
    pub async fn pods_for_selector(
        &self,
        context: &str,
        namespace: Option<&str>,
        selector: &str,
    ) -> Result<Vec<Resource>, FacadeError> {
        let api = self.pod_api(context, namespace)?;
        let params = ListParams::default().labels(selector);
        let list = tokio::time::timeout(LIST_TIMEOUT, api.list(&params))
            .await
            .map_err(|_| FacadeError::Timeout(LIST_TIMEOUT))??;
        Ok(list
            .items
            .into_iter()
            .map(|pod| Resource::new(context, serde_json::to_value(&pod).unwrap_or(Value::Null)))
            .collect())
    }

    /// Open a follow-mode log stream for one container. The returned reader
    /// is the combined stdout/stderr stream the API provides.
    pub async fn pod_log_stream(
        &self,
        context: &str,
        namespace: Option<&str>,
        pod: &str,
        container: &str,
        tail_lines: Option<i64>,
    ) -> Result<impl futures::AsyncBufRead + Unpin, FacadeError> {
        let api = self.pod_api(context, namespace)?;
        let params = LogParams {
            follow: true,
            container: Some(container.to_string()),
            tail_lines,
            ..LogParams::default()
        };
        api.log_stream(pod, &params).await.map_err(FacadeError::Api)
    }

    // ── Watch ─────────────────────────────────────────────────────────────────

    /// Spawn a reconnecting watch for a kind in one context. Change events
    /// post a [`WatchNote`] so the engine can invalidate and re-render; the
    /// stream retries with jittered exponential backoff and treats a 30 s
    /// silent stretch as a dropped connection. While the watch is down the
    /// cache remains authoritative.
    pub fn spawn_watch(
        &self,
        context: &str,
        def: &ResourceDefinition,
        namespace: Option<&str>,
        tx: mpsc::Sender<WatchNote>,
        cancel: CancellationToken,
    ) -> Result<(), FacadeError> {
        let api = self.dynamic_api(context, def, namespace)?;
        let note = WatchNote {
            context: context.to_string(),
            kind: def.name.clone(),
            namespace: namespace.map(str::to_string),
        };
        tokio::spawn(watch_loop(api, note, tx, cancel));
        Ok(())
    }
}

async fn watch_loop(
    api: Api<DynamicObject>,
    note: WatchNote,
    tx: mpsc::Sender<WatchNote>,
    cancel: CancellationToken,
) {
    let mut backoff = WATCH_BACKOFF_INITIAL;
    loop {
        if cancel.is_cancelled() {
            return;
        }
        let mut stream = pin!(watcher(api.clone(), watcher::Config::default()));
        loop {
            let next = tokio::select! {
                () = cancel.cancelled() => return,
                next = tokio::time::timeout(WATCH_IDLE_TIMEOUT, stream.next()) => next,
            };
            match next {
                Err(_) => {
                    warn!(context = %note.context, kind = %note.kind, "watch idle, reconnecting");
                    break;
                }
                Ok(None) => break,
                Ok(Some(Ok(event))) => {
                    backoff = WATCH_BACKOFF_INITIAL;
                    let changed = matches!(
                        event,
                        watcher::Event::Apply(_)
                            | watcher::Event::Delete(_)
                            | watcher::Event::InitDone
                    );
                    if changed && tx.send(note.clone()).await.is_err() {
                        // Receiver gone: the engine shut down.
                        return;
                    }
                }
                Ok(Some(Err(err))) => {
                    warn!(context = %note.context, kind = %note.kind, %err, "watch error");
                    break;
                }
            }
        }
        // Jittered exponential backoff before reconnecting.
        let jitter = rand::rng().random_range(0.5..1.5);
        let delay = backoff.mul_f64(jitter).min(WATCH_BACKOFF_CAP);
        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }
        backoff = (backoff * 2).min(WATCH_BACKOFF_CAP);
    }
}

//! Resource engine: the single coordinator between cache, facade, registry
//! and the rendering pipeline.
//!
//! Readers subscribe to a watch channel of immutable snapshots; every state
//! change (refresh, kind/namespace/context switch, sort/filter change) runs
//! the pipeline and publishes a new snapshot with a monotonically increasing
//! version. The engine owns the cache and facade; nothing points back at it.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde_json::json;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::{CacheKey, ResourceCache};
use crate::definition::ResourceDefinition;
use crate::k8s::facade::{Facade, FacadeError, WatchNote};
use crate::registry::Registry;
use crate::render::{render_snapshot, RenderFlags, Snapshot, SortSpec};
use crate::resource::Resource;
use crate::template::TemplateEngine;

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(2);
/// How long the engine waits after a watch note to coalesce bursts.
const NOTE_COALESCE: Duration = Duration::from_millis(150);

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no resource definition named '{0}'")]
    UnknownKind(String),
    #[error(transparent)]
    Facade(#[from] FacadeError),
}

pub struct EngineConfig {
    pub kind: String,
    pub namespace: Option<String>,
    pub refresh_interval: Duration,
    pub kubeconfig: Option<PathBuf>,
}

struct EngineState {
    kind: String,
    namespace: Option<String>,
    flags: RenderFlags,
}

pub struct Engine {
    registry: Arc<Registry>,
    cache: Arc<ResourceCache>,
    templates: Arc<TemplateEngine>,
    facade: RwLock<Arc<Facade>>,
    state: Mutex<EngineState>,
    snapshot_tx: watch::Sender<Arc<Snapshot>>,
    version: AtomicU64,
    auto_refresh: AtomicBool,
    refresh_interval: Duration,
    kubeconfig: Option<PathBuf>,
    root: CancellationToken,
    watch_scope: Mutex<CancellationToken>,
    note_tx: mpsc::Sender<WatchNote>,
}

impl Engine {
    pub fn new(
        registry: Arc<Registry>,
        cache: Arc<ResourceCache>,
        templates: Arc<TemplateEngine>,
        facade: Facade,
        config: EngineConfig,
        root: CancellationToken,
    ) -> Arc<Self> {
        let multi_context = facade.contexts().len() > 1;
        let flags = RenderFlags {
            show_namespace: config.namespace.is_none(),
            multi_context,
            sort: SortSpec::default(),
            filter: String::new(),
            grouping: true,
        };
        let (snapshot_tx, _) = watch::channel(Arc::new(Snapshot::empty()));
        let (note_tx, note_rx) = mpsc::channel(64);
        let engine = Arc::new(Self {
            registry,
            cache,
            templates,
            facade: RwLock::new(Arc::new(facade)),
            state: Mutex::new(EngineState {
                kind: config.kind,
                namespace: config.namespace,
                flags,
            }),
            snapshot_tx,
            version: AtomicU64::new(0),
            auto_refresh: AtomicBool::new(true),
            refresh_interval: config.refresh_interval,
            kubeconfig: config.kubeconfig,
            root: root.clone(),
            watch_scope: Mutex::new(root.child_token()),
            note_tx,
        });
        engine.spawn_note_loop(note_rx);
        engine.spawn_auto_refresh();
        engine.restart_watches();
        engine
    }

    // ── Subscriptions and accessors ──────────────────────────────────────────

    /// A lazy snapshot stream: yields the latest snapshot whenever underlying
    /// data changes or a refresh fires.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.snapshot_tx.subscribe()
    }

    pub fn kind(&self) -> String {
        self.state.lock().expect("engine state poisoned").kind.clone()
    }

    pub fn namespace(&self) -> Option<String> {
        self.state
            .lock()
            .expect("engine state poisoned")
            .namespace
            .clone()
    }

    pub fn flags(&self) -> RenderFlags {
        self.state.lock().expect("engine state poisoned").flags.clone()
    }

    pub fn contexts(&self) -> Vec<String> {
        self.facade().contexts()
    }

    pub fn facade(&self) -> Arc<Facade> {
        Arc::clone(&self.facade.read().expect("facade lock poisoned"))
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<ResourceCache> {
        &self.cache
    }

    pub fn definition(&self) -> Option<Arc<ResourceDefinition>> {
        self.registry.get(&self.kind())
    }

    // ── State mutations ──────────────────────────────────────────────────────

    /// Switch the displayed kind. The caller refreshes afterwards.
    pub fn set_kind(&self, name: &str) -> Result<(), EngineError> {
        if self.registry.get(name).is_none() {
            return Err(EngineError::UnknownKind(name.to_string()));
        }
        {
            let mut state = self.state.lock().expect("engine state poisoned");
            state.kind = name.to_string();
            // Sort columns don't carry across kinds.
            state.flags.sort = SortSpec::default();
        }
        self.restart_watches();
        Ok(())
    }

    /// Switch namespace. Cache entries for the previous namespace keep their
    /// TTL unless eviction is requested.
    pub fn set_namespace(&self, namespace: Option<String>, invalidate_previous: bool) {
        let previous = {
            let mut state = self.state.lock().expect("engine state poisoned");
            let previous = state.namespace.take();
            state.namespace = namespace.clone();
            state.flags.show_namespace = namespace.is_none();
            previous
        };
        if invalidate_previous {
            if let Some(ns) = previous {
                self.cache.invalidate_namespace(&ns);
            }
        }
        self.restart_watches();
    }

    /// Reconfigure the context fan-out. Watchers for removed contexts are
    /// cancelled and their cache entries dropped.
    pub async fn set_contexts(&self, contexts: Vec<String>) -> Vec<(String, FacadeError)> {
        let previous = self.contexts();
        let (facade, failures) =
            Facade::connect(&contexts, self.kubeconfig.as_deref()).await;
        let connected = facade.contexts();
        for removed in previous.iter().filter(|c| !connected.contains(c)) {
            self.cache.invalidate_context(removed);
        }
        {
            let mut slot = self.facade.write().expect("facade lock poisoned");
            *slot = Arc::new(facade);
        }
        {
            let mut state = self.state.lock().expect("engine state poisoned");
            state.flags.multi_context = connected.len() > 1;
        }
        self.restart_watches();
        failures
    }

    pub fn set_filter(&self, filter: String) {
        self.state.lock().expect("engine state poisoned").flags.filter = filter;
    }

    pub fn cycle_sort(&self, column: &str) {
        self.state
            .lock()
            .expect("engine state poisoned")
            .flags
            .sort
            .cycle(column);
    }

    pub fn toggle_grouping(&self) {
        let mut state = self.state.lock().expect("engine state poisoned");
        state.flags.grouping = !state.flags.grouping;
    }

    /// Auto-refresh gate: ticks keep scheduling themselves regardless, but
    /// only force a re-fetch while this is on (List mode).
    pub fn set_auto_refresh(&self, enabled: bool) {
        self.auto_refresh.store(enabled, Ordering::Relaxed);
    }

    pub fn shutdown(&self) {
        self.root.cancel();
    }

    // ── Refresh ──────────────────────────────────────────────────────────────

    /// Force-refresh the current kind/namespace and publish a snapshot.
    ///
    /// Per context: consult the cache, fall through to a fan-out list on a
    /// miss. Transient fetch failures fall back to stale cache entries;
    /// permanent ones mark the kind unavailable in that context.
    pub async fn refresh(&self) -> Result<(), EngineError> {
        let (kind, namespace, flags) = {
            let state = self.state.lock().expect("engine state poisoned");
            (state.kind.clone(), state.namespace.clone(), state.flags.clone())
        };
        let def = self
            .registry
            .get(&kind)
            .ok_or_else(|| EngineError::UnknownKind(kind.clone()))?;
        let facade = self.facade();
        let contexts = facade.contexts();
        let ns_key = if def.namespaced {
            namespace.as_deref()
        } else {
            None
        };

        let mut merged: Vec<Resource> = Vec::new();
        let mut unavailable: Vec<(String, String)> = Vec::new();
        let mut stale: Vec<String> = Vec::new();

        if contexts.is_empty() {
            // No cluster: show canned demo data rather than a blank screen.
            merged = demo_resources(&def);
        } else {
            let mut misses: Vec<String> = Vec::new();
            for context in &contexts {
                let key = CacheKey::new(&def.name, context, ns_key);
                match self.cache.get(&key) {
                    Some(payload) => merged.extend(payload.iter().cloned()),
                    None => misses.push(context.clone()),
                }
            }
            if !misses.is_empty() {
                let fan = facade
                    .list_fan_out(&def, ns_key, &misses, &self.root)
                    .await;
                for (context, (resources, resource_version)) in fan.results {
                    let key = CacheKey::new(&def.name, &context, ns_key);
                    self.cache.set(&key, resources.clone(), resource_version);
                    merged.extend(resources);
                }
                for (context, err) in fan.errors {
                    let key = CacheKey::new(&def.name, &context, ns_key);
                    if !err.is_permanent() {
                        if let Some((payload, age)) = self.cache.peek(&key) {
                            debug!(context = %context, age = ?age, "serving stale cache after fetch error");
                            merged.extend(payload.iter().cloned());
                            stale.push(context);
                            continue;
                        }
                    }
                    unavailable.push((context, err.to_string()));
                }
            }
        }

        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = render_snapshot(
            version,
            &def,
            &self.templates,
            &flags,
            &merged,
            unavailable,
            stale,
        );
        let _ = self.snapshot_tx.send(Arc::new(snapshot));
        Ok(())
    }

    // ── Background tasks ─────────────────────────────────────────────────────

    fn spawn_auto_refresh(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            // The startup refresh is explicit; the first tick waits a period.
            let start = tokio::time::Instant::now() + engine.refresh_interval;
            let mut tick = tokio::time::interval_at(start, engine.refresh_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = engine.root.cancelled() => break,
                    _ = tick.tick() => {
                        // The tick always reschedules; it only re-fetches
                        // while auto-refresh is enabled (List mode).
                        if engine.auto_refresh.load(Ordering::Relaxed) {
                            if let Err(err) = engine.refresh().await {
                                warn!(%err, "auto refresh failed");
                            }
                        }
                    }
                }
            }
        });
    }

    fn spawn_note_loop(self: &Arc<Self>, mut rx: mpsc::Receiver<WatchNote>) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let first = tokio::select! {
                    () = engine.root.cancelled() => return,
                    note = rx.recv() => match note {
                        Some(note) => note,
                        None => return,
                    },
                };
                tokio::time::sleep(NOTE_COALESCE).await;
                let mut notes = vec![first];
                while let Ok(note) = rx.try_recv() {
                    notes.push(note);
                }
                let current = engine.kind();
                let mut relevant = false;
                for note in notes {
                    if note.kind == current {
                        let key =
                            CacheKey::new(&note.kind, &note.context, note.namespace.as_deref());
                        engine.cache.invalidate(&key);
                        relevant = true;
                    }
                }
                if relevant {
                    if let Err(err) = engine.refresh().await {
                        warn!(%err, "watch-driven refresh failed");
                    }
                }
            }
        });
    }

    /// Cancel the watchers of the previous kind/context set and start fresh
    /// ones for the current state.
    fn restart_watches(&self) {
        let scope = {
            let mut slot = self.watch_scope.lock().expect("watch scope poisoned");
            slot.cancel();
            let fresh = self.root.child_token();
            *slot = fresh.clone();
            fresh
        };
        let Some(def) = self.definition() else { return };
        let namespace = self.namespace();
        let ns = if def.namespaced {
            namespace.as_deref().map(str::to_string)
        } else {
            None
        };
        let facade = self.facade();
        for context in facade.contexts() {
            if let Err(err) = facade.spawn_watch(
                &context,
                &def,
                ns.as_deref(),
                self.note_tx.clone(),
                scope.clone(),
            ) {
                warn!(context = %context, %err, "cannot start watch");
            }
        }
    }
}

// ─── Demo payload (no cluster reachable) ──────────────────────────────────────

fn demo_resources(def: &ResourceDefinition) -> Vec<Resource> {
    let objects = match def.gvk.kind.as_str() {
        "Pod" => vec![
            json!({
                "metadata": {"name": "api-server-7d9f8b6c5-xk2lp", "namespace": "production", "uid": "demo-1"},
                "spec": {"containers": [{"name": "api", "image": "registry.local/api:1.4.2"}]},
                "status": {"phase": "Running", "containerStatuses": [
                    {"name": "api", "ready": false, "restartCount": 12,
                     "state": {"waiting": {"reason": "CrashLoopBackOff"}}}]}
            }),
            json!({
                "metadata": {"name": "frontend-5c7d8e9f0-ab1cd", "namespace": "staging", "uid": "demo-2"},
                "spec": {"containers": [{"name": "web", "image": "registry.local/web:2.0.0"}]},
                "status": {"phase": "Pending"}
            }),
            json!({
                "metadata": {"name": "worker-6f8b9c4d7-mn3qr", "namespace": "production", "uid": "demo-3"},
                "spec": {"containers": [{"name": "worker", "image": "registry.local/worker:1.1.0"}]},
                "status": {"phase": "Running", "containerStatuses": [
                    {"name": "worker", "ready": true, "restartCount": 0,
                     "state": {"running": {}}}]}
            }),
        ],
        "Deployment" => vec![
            json!({
                "metadata": {"name": "api-server", "namespace": "production", "uid": "demo-4"},
                "spec": {"replicas": 3, "template": {"spec": {"containers": [
                    {"name": "api", "image": "registry.local/api:1.4.2"}]}}},
                "status": {"readyReplicas": 2, "availableReplicas": 2, "updatedReplicas": 3}
            }),
            json!({
                "metadata": {"name": "frontend", "namespace": "staging", "uid": "demo-5"},
                "spec": {"replicas": 1, "template": {"spec": {"containers": [
                    {"name": "web", "image": "registry.local/web:2.0.0"}]}}},
                "status": {"readyReplicas": 0, "availableReplicas": 0, "updatedReplicas": 1}
            }),
        ],
        "Service" => vec![json!({
            "metadata": {"name": "api-service", "namespace": "production", "uid": "demo-6"},
            "spec": {"type": "ClusterIP", "clusterIP": "10.96.11.4",
                     "ports": [{"port": 80, "protocol": "TCP"}]}
        })],
        _ => Vec::new(),
    };
    objects.into_iter().map(|o| Resource::new("", o)).collect()
}

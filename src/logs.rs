//! Log multiplexer: concurrent log collection from N containers across M
//! pods across K contexts, fanned into one bounded ring buffer.
//!
//! One reader task per `(context, pod, container)` source pushes lines into
//! a single ordered channel; a pump task appends them to the ring. Arrival
//! order on the channel is preserved; cross-source causal order is not
//! available upstream and is not promised. Cancelling the session stops the
//! pump before the readers, so no line is observable after the cancel.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::{AsyncBufReadExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::k8s::facade::{Facade, FacadeError};
use crate::resource::{Resource, ResourceIdentity};

pub const DEFAULT_BUFFER_CAP: usize = 10_000;
pub const DEFAULT_TAIL_LINES: i64 = 200;
/// How long `stop` waits for readers to wind down before abandoning them.
pub const STOP_GRACE: Duration = Duration::from_millis(200);

// ─── Lines and the ring buffer ────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LogLine {
    /// `container`, `pod/container`, or `ctx:pod/container` depending on how
    /// many pods and contexts are merged into the session.
    pub source: String,
    pub text: String,
    pub received_at: Instant,
}

impl LogLine {
    pub fn new(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            text: text.into(),
            received_at: Instant::now(),
        }
    }
}

/// Bounded ring of log lines; append is O(1) amortized, oldest lines drop
/// first once the cap is reached.
#[derive(Debug)]
pub struct LogBuffer {
    lines: VecDeque<LogLine>,
    cap: usize,
}

impl LogBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(cap.min(1024)),
            cap: cap.max(1),
        }
    }

    pub fn push(&mut self, line: LogLine) {
        if self.lines.len() == self.cap {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// A copy of the visible window `[start, start+count)`.
    pub fn window(&self, start: usize, count: usize) -> Vec<LogLine> {
        self.lines.iter().skip(start).take(count).cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogLine> {
        self.lines.iter()
    }
}

// ─── Sources ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSource {
    pub context: String,
    pub namespace: Option<String>,
    pub pod: String,
    pub container: String,
}

/// Index-based source filter; `-1` means "all".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceFilter {
    pub pod_index: isize,
    pub container_index: isize,
}

impl Default for SourceFilter {
    fn default() -> Self {
        Self {
            pod_index: -1,
            container_index: -1,
        }
    }
}

/// Container names from a pod object's spec.
pub fn pod_containers(pod: &Value) -> Vec<String> {
    pod.get("spec")
        .and_then(|s| s.get("containers"))
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|c| c.get("name").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// The `matchLabels` selector of a workload, as a `k=v,k=v` string.
pub fn selector_string(workload: &Value) -> Option<String> {
    let labels = workload
        .get("spec")?
        .get("selector")?
        .get("matchLabels")?
        .as_object()?;
    if labels.is_empty() {
        return None;
    }
    let mut pairs: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{k}={}", v.as_str().unwrap_or_default()))
        .collect();
    pairs.sort();
    Some(pairs.join(","))
}

/// Expand a pod set into log sources. The container list comes from the
/// first pod (owner pods share a template); the filter's indexes narrow the
/// pod and container dimensions, `-1` meaning all.
pub fn enumerate_sources(pods: &[Resource], filter: SourceFilter) -> Vec<LogSource> {
    let Some(first) = pods.first() else {
        return Vec::new();
    };
    let containers = pod_containers(&first.object);
    let selected_pods: Vec<&Resource> = match usize::try_from(filter.pod_index) {
        Ok(idx) => pods.get(idx).into_iter().collect(),
        Err(_) => pods.iter().collect(),
    };
    let selected_containers: Vec<&String> = match usize::try_from(filter.container_index) {
        Ok(idx) => containers.get(idx).into_iter().collect(),
        Err(_) => containers.iter().collect(),
    };
    let mut sources = Vec::new();
    for pod in &selected_pods {
        for container in &selected_containers {
            sources.push(LogSource {
                context: pod.context.clone(),
                namespace: {
                    let ns = pod.namespace();
                    if ns.is_empty() {
                        None
                    } else {
                        Some(ns.to_string())
                    }
                },
                pod: pod.name().to_string(),
                container: (*container).clone(),
            });
        }
    }
    sources
}

/// Resolve the pod set for a selected row: the pod itself, or every pod the
/// workload's selector owns. In multi-context sessions the resolution is
/// repeated per context; contexts where it fails are skipped.
pub async fn resolve_pods(
    facade: &Facade,
    kind: &str,
    identity: &ResourceIdentity,
    all_contexts: bool,
) -> Result<Vec<Resource>, FacadeError> {
    let contexts = if all_contexts {
        facade.contexts()
    } else {
        vec![identity.context.clone()]
    };
    let namespace = if identity.namespace.is_empty() {
        None
    } else {
        Some(identity.namespace.as_str())
    };
    let mut pods = Vec::new();
    let mut last_error = None;
    for context in &contexts {
        let result = if kind == "Pod" {
            facade
                .get_pod(context, namespace, &identity.name)
                .await
                .map(|pod| vec![pod])
        } else {
            // Workload: read the owner to learn its selector, then list pods.
            match facade
                .get_workload(context, kind, namespace, &identity.name)
                .await
            {
                Ok(workload) => match selector_string(&workload.object) {
                    Some(selector) => {
                        facade.pods_for_selector(context, namespace, &selector).await
                    }
                    None => Ok(Vec::new()),
                },
                Err(err) => Err(err),
            }
        };
        match result {
            Ok(mut found) => pods.append(&mut found),
            Err(err) => {
                debug!(context = %context, %err, "pod resolution failed in context");
                last_error = Some(err);
            }
        }
    }
    if pods.is_empty() {
        if let Some(err) = last_error {
            return Err(err);
        }
    }
    Ok(pods)
}

// ─── Session ──────────────────────────────────────────────────────────────────

/// A running log collection session: one reader per source plus the pump
/// that drains the shared channel into the ring buffer.
pub struct LogSession {
    buffer: Arc<Mutex<LogBuffer>>,
    cancel: CancellationToken,
    readers: Vec<JoinHandle<()>>,
    pump: Option<JoinHandle<()>>,
    pub sources: Vec<LogSource>,
}

impl LogSession {
    /// Spawn readers for every source. `parent` scopes the session: mode
    /// exit cancels the whole tree.
    pub fn start(
        facade: &Arc<Facade>,
        sources: Vec<LogSource>,
        tail_lines: Option<i64>,
        cap: usize,
        parent: &CancellationToken,
    ) -> Self {
        let cancel = parent.child_token();
        let buffer = Arc::new(Mutex::new(LogBuffer::new(cap)));
        let (tx, mut rx) = mpsc::channel::<LogLine>(1024);

        let distinct_pods = {
            let mut pods: Vec<&str> = sources.iter().map(|s| s.pod.as_str()).collect();
            pods.sort_unstable();
            pods.dedup();
            pods.len()
        };
        let distinct_contexts = {
            let mut ctxs: Vec<&str> = sources.iter().map(|s| s.context.as_str()).collect();
            ctxs.sort_unstable();
            ctxs.dedup();
            ctxs.len()
        };

        let mut readers = Vec::with_capacity(sources.len());
        for source in &sources {
            let tag = source_tag(source, distinct_pods > 1, distinct_contexts > 1);
            readers.push(tokio::spawn(run_reader(
                Arc::clone(facade),
                source.clone(),
                tag,
                tail_lines,
                tx.clone(),
                cancel.clone(),
            )));
        }
        drop(tx);

        // Pump: single consumer keeps channel arrival order. It also watches
        // the cancel token so nothing lands in the buffer after a cancel.
        let pump_buffer = Arc::clone(&buffer);
        let pump_cancel = cancel.clone();
        let pump = tokio::spawn(async move {
            loop {
                // Biased toward the cancel token: once the session is
                // cancelled no further line can land in the buffer.
                tokio::select! {
                    biased;
                    () = pump_cancel.cancelled() => break,
                    line = rx.recv() => match line {
                        Some(line) => pump_buffer
                            .lock()
                            .expect("log buffer lock poisoned")
                            .push(line),
                        None => break,
                    },
                }
            }
        });

        debug!(sources = sources.len(), "log session started");
        Self {
            buffer,
            cancel,
            readers,
            pump: Some(pump),
            sources,
        }
    }

    pub fn buffer(&self) -> Arc<Mutex<LogBuffer>> {
        Arc::clone(&self.buffer)
    }

    pub fn clear(&self) {
        self.buffer
            .lock()
            .expect("log buffer lock poisoned")
            .clear();
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().expect("log buffer lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel all readers and wait up to the grace period for them to close.
    pub async fn stop(mut self, grace: Duration) {
        self.cancel.cancel();
        let readers = std::mem::take(&mut self.readers);
        let pump = self.pump.take();
        let wind_down = async {
            for handle in readers {
                let _ = handle.await;
            }
            if let Some(pump) = pump {
                let _ = pump.await;
            }
        };
        if tokio::time::timeout(grace, wind_down).await.is_err() {
            debug!("log readers exceeded stop grace period");
        }
    }
}

fn source_tag(source: &LogSource, multi_pod: bool, multi_context: bool) -> String {
    let base = if multi_pod {
        format!("{}/{}", source.pod, source.container)
    } else {
        source.container.clone()
    };
    if multi_context {
        format!("{}:{base}", source.context)
    } else {
        base
    }
}

async fn run_reader(
    facade: Arc<Facade>,
    source: LogSource,
    tag: String,
    tail_lines: Option<i64>,
    tx: mpsc::Sender<LogLine>,
    cancel: CancellationToken,
) {
    let stream = tokio::select! {
        () = cancel.cancelled() => return,
        stream = facade.pod_log_stream(
            &source.context,
            source.namespace.as_deref(),
            &source.pod,
            &source.container,
            tail_lines,
        ) => stream,
    };
    let stream = match stream {
        Ok(stream) => stream,
        Err(err) => {
            let _ = tx.send(LogLine::new(tag, format!("<stream error: {err}>"))).await;
            return;
        }
    };
    let mut lines = stream.lines();
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            next = lines.next() => match next {
                Some(Ok(text)) => {
                    if tx.send(LogLine::new(tag.clone(), text)).await.is_err() {
                        return;
                    }
                }
                Some(Err(err)) => {
                    let _ = tx
                        .send(LogLine::new(tag.clone(), format!("<stream error: {err}>")))
                        .await;
                    return;
                }
                None => {
                    let _ = tx.send(LogLine::new(tag.clone(), "<end of stream>")).await;
                    return;
                }
            },
        }
    }
}

// ─── View state: follow, scroll, search ───────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct SearchState {
    /// True while the user is typing the query.
    pub input: bool,
    pub query: String,
    pub matches: Vec<usize>,
    pub current: usize,
}

/// Follow/scroll/search state for the log view.
#[derive(Debug, Clone)]
pub struct LogView {
    pub following: bool,
    /// Top visible line when not following.
    pub scroll: usize,
}

impl Default for LogView {
    fn default() -> Self {
        Self {
            following: true,
            scroll: 0,
        }
    }
}

impl LogView {
    /// Scrolling away from the bottom leaves follow mode.
    pub fn scroll_up(&mut self, lines: usize) {
        self.following = false;
        self.scroll = self.scroll.saturating_sub(lines);
    }

    pub fn scroll_down(&mut self, lines: usize, total: usize, height: usize) {
        let max = total.saturating_sub(height);
        self.scroll = (self.scroll + lines).min(max);
    }

    /// `G`/End: resume following and jump to the bottom.
    pub fn follow_bottom(&mut self) {
        self.following = true;
    }

    /// `g`/Home: pin the viewport at the top.
    pub fn pin_top(&mut self) {
        self.following = false;
        self.scroll = 0;
    }

    /// The window `[start, start+height)` to draw, following the tail when
    /// follow mode is on.
    pub fn visible_start(&self, total: usize, height: usize) -> usize {
        if self.following {
            total.saturating_sub(height)
        } else {
            self.scroll.min(total.saturating_sub(height))
        }
    }

    /// Jump so a matched line is in view.
    pub fn reveal(&mut self, line: usize) {
        self.following = false;
        self.scroll = line;
    }
}

/// Recompute search matches: indices of lines whose text contains the query,
/// case-insensitively.
pub fn search_matches(buffer: &LogBuffer, query: &str) -> Vec<usize> {
    if query.is_empty() {
        return Vec::new();
    }
    let needle = query.to_lowercase();
    buffer
        .iter()
        .enumerate()
        .filter(|(_, line)| line.text.to_lowercase().contains(&needle))
        .map(|(i, _)| i)
        .collect()
}

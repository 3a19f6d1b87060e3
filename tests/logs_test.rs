//! Tests for kubewatch::logs — ring buffer bounds, source enumeration,
//! follow/scroll semantics, search, and session cancellation.

use std::time::{Duration, Instant};

use kubewatch::k8s::facade::Facade;
use kubewatch::logs::{
    enumerate_sources, pod_containers, search_matches, selector_string, LogBuffer, LogLine,
    LogSession, LogSource, LogView, SourceFilter, STOP_GRACE,
};
use kubewatch::resource::Resource;
use serde_json::json;
use std::sync::Arc;

fn pod(ctx: &str, ns: &str, name: &str, containers: &[&str]) -> Resource {
    let specs: Vec<_> = containers.iter().map(|c| json!({"name": c})).collect();
    Resource::new(
        ctx,
        json!({
            "metadata": {"name": name, "namespace": ns, "uid": name},
            "spec": {"containers": specs}
        }),
    )
}

// ── Ring buffer (property: |buffer| ≤ cap) ───────────────────────────────────

#[test]
fn buffer_never_exceeds_cap_and_drops_oldest() {
    let mut buffer = LogBuffer::new(3);
    for i in 0..10 {
        buffer.push(LogLine::new("app", format!("line-{i}")));
        assert!(buffer.len() <= 3);
    }
    let texts: Vec<_> = buffer.iter().map(|l| l.text.clone()).collect();
    assert_eq!(texts, vec!["line-7", "line-8", "line-9"]);
}

#[test]
fn buffer_window_copies_the_requested_slice() {
    let mut buffer = LogBuffer::new(10);
    for i in 0..5 {
        buffer.push(LogLine::new("app", format!("line-{i}")));
    }
    let window = buffer.window(1, 2);
    assert_eq!(window.len(), 2);
    assert_eq!(window[0].text, "line-1");
    assert_eq!(window[1].text, "line-2");
}

#[test]
fn buffer_clear_empties_but_keeps_capacity() {
    let mut buffer = LogBuffer::new(4);
    buffer.push(LogLine::new("a", "x"));
    buffer.clear();
    assert!(buffer.is_empty());
    assert_eq!(buffer.cap(), 4);
}

// ── Source enumeration (scenario S6: pod with 3 containers → 3 readers) ──────

#[test]
fn pod_with_three_containers_yields_three_sources() {
    let pods = vec![pod("", "default", "web-1", &["app", "sidecar", "init-helper"])];
    let sources = enumerate_sources(&pods, SourceFilter::default());
    assert_eq!(sources.len(), 3);
    let containers: Vec<_> = sources.iter().map(|s| s.container.as_str()).collect();
    assert_eq!(containers, vec!["app", "sidecar", "init-helper"]);
    assert!(sources.iter().all(|s| s.pod == "web-1"));
}

#[test]
fn container_filter_narrows_to_one_source() {
    let pods = vec![pod("", "default", "web-1", &["app", "sidecar"])];
    let filter = SourceFilter {
        pod_index: -1,
        container_index: 1,
    };
    let sources = enumerate_sources(&pods, filter);
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].container, "sidecar");
}

#[test]
fn owner_pods_cross_with_first_pods_containers() {
    let pods = vec![
        pod("", "default", "app-1", &["main", "proxy"]),
        pod("", "default", "app-2", &["main", "proxy"]),
    ];
    let sources = enumerate_sources(&pods, SourceFilter::default());
    assert_eq!(sources.len(), 4);

    let filter = SourceFilter {
        pod_index: 0,
        container_index: -1,
    };
    assert_eq!(enumerate_sources(&pods, filter).len(), 2);
}

#[test]
fn no_pods_means_no_sources() {
    assert!(enumerate_sources(&[], SourceFilter::default()).is_empty());
}

#[test]
fn pod_containers_reads_spec() {
    let p = pod("", "default", "x", &["a", "b"]);
    assert_eq!(pod_containers(&p.object), vec!["a", "b"]);
    assert!(pod_containers(&json!({})).is_empty());
}

#[test]
fn selector_string_joins_sorted_match_labels() {
    let deploy = json!({"spec": {"selector": {"matchLabels": {
        "app": "web", "tier": "front"
    }}}});
    assert_eq!(
        selector_string(&deploy).as_deref(),
        Some("app=web,tier=front")
    );
    assert!(selector_string(&json!({})).is_none());
}

// ── Follow semantics (scenario S6) ───────────────────────────────────────────

#[test]
fn scrolling_up_pauses_follow_and_g_resumes_it() {
    let mut view = LogView::default();
    assert!(view.following, "sessions start following");
    view.scroll_up(1);
    assert!(!view.following);
    view.follow_bottom();
    assert!(view.following);
    // Following always shows the tail.
    assert_eq!(view.visible_start(100, 10), 90);
}

#[test]
fn pin_top_stops_following_at_line_zero() {
    let mut view = LogView::default();
    view.pin_top();
    assert!(!view.following);
    assert_eq!(view.visible_start(100, 10), 0);
}

#[test]
fn scroll_down_clamps_to_the_tail() {
    let mut view = LogView::default();
    view.scroll_up(1); // leave follow mode at offset 0
    view.scroll_down(500, 40, 10);
    assert_eq!(view.visible_start(40, 10), 30);
}

// ── Search ────────────────────────────────────────────────────────────────────

#[test]
fn search_matches_are_case_insensitive_indices() {
    let mut buffer = LogBuffer::new(10);
    buffer.push(LogLine::new("app", "GET /healthz 200"));
    buffer.push(LogLine::new("app", "error: timeout"));
    buffer.push(LogLine::new("app", "ERROR: refused"));
    assert_eq!(search_matches(&buffer, "error"), vec![1, 2]);
    assert!(search_matches(&buffer, "").is_empty());
    assert!(search_matches(&buffer, "nothing").is_empty());
}

// ── Session lifecycle and cancellation (property 8) ──────────────────────────

#[tokio::test]
async fn failed_sources_enqueue_error_lines_and_cancel_freezes_the_buffer() {
    // A disconnected facade makes every reader fail fast with a typed error,
    // which must surface as an error line rather than silence.
    let facade = Arc::new(Facade::disconnected());
    let root = tokio_util::sync::CancellationToken::new();
    let source = LogSource {
        context: "gone".to_string(),
        namespace: Some("default".to_string()),
        pod: "web-1".to_string(),
        container: "app".to_string(),
    };
    let session = LogSession::start(&facade, vec![source], Some(10), 100, &root);

    // Wait for the reader to report its failure.
    let deadline = Instant::now() + Duration::from_secs(2);
    while session.is_empty() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(session.len(), 1);
    {
        let buffer = session.buffer();
        let guard = buffer.lock().expect("buffer lock");
        let line = guard.iter().next().expect("one line");
        assert_eq!(line.source, "app");
        assert!(line.text.contains("stream error"), "got: {}", line.text);
    }

    let buffer = session.buffer();
    let cancelled_at = Instant::now();
    session.stop(STOP_GRACE).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let guard = buffer.lock().expect("buffer lock");
    assert_eq!(guard.len(), 1, "no lines may arrive after cancellation");
    assert!(guard.iter().all(|l| l.received_at <= cancelled_at));
}

#[tokio::test]
async fn stopping_an_idle_session_completes_within_grace() {
    let facade = Arc::new(Facade::disconnected());
    let root = tokio_util::sync::CancellationToken::new();
    let session = LogSession::start(&facade, Vec::new(), None, 100, &root);
    let started = Instant::now();
    session.stop(STOP_GRACE).await;
    assert!(started.elapsed() < Duration::from_secs(1));
}

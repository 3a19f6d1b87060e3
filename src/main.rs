#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::too_many_lines, // the command executor match is inherently long
)]

mod cache;
mod cli;
mod definition;
mod engine;
mod error;
mod event;
mod k8s;
mod logs;
mod mode;
mod registry;
mod render;
mod resource;
mod select;
mod style;
mod template;
mod ui;

use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use cache::{ResourceCache, DEFAULT_CLEANUP_INTERVAL};
use cli::Args;
use engine::{Engine, EngineConfig};
use error::EXIT_CONFIG;
use event::{spawn_input_reader, AppEvent};
use k8s::client::{current_context, list_contexts, load_last_context, save_last_context};
use k8s::facade::Facade;
use logs::{
    enumerate_sources, pod_containers, resolve_pods, search_matches, LogSession, SourceFilter,
    DEFAULT_BUFFER_CAP, DEFAULT_TAIL_LINES, STOP_GRACE,
};
use mode::{App, Command, Mode};
use registry::Registry;
use resource::{Resource, ResourceIdentity};
use template::TemplateEngine;

const REDRAW_INTERVAL: Duration = Duration::from_millis(250);

fn init_tracing(tui: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if tui {
        // In TUI mode logs go to a file so the alternate screen stays intact.
        let path = dirs::state_dir()
            .or_else(dirs::cache_dir)
            .map_or_else(|| std::env::temp_dir(), |d| d.join("kubewatch"));
        let _ = std::fs::create_dir_all(&path);
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.join("kubewatch.log"))
        {
            Ok(file) => {
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(file))
                    .init();
            }
            Err(_) => {
                // No log file, no logging; stderr would corrupt the screen.
            }
        }
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let tui = std::io::stdout().is_terminal();
    init_tracing(tui);

    // ── Registry: embedded defaults, then user overrides ─────────────────────
    let registry = Arc::new(Registry::new());
    if let Err(err) = registry.load_defaults() {
        eprintln!("kubewatch: embedded resource definitions are invalid: {err}");
        std::process::exit(EXIT_CONFIG);
    }
    if let Some(dir) = dirs::config_dir().map(|d| d.join("kubewatch").join("resources")) {
        if dir.is_dir() {
            let report = registry.load_dir(&dir);
            info!(loaded = report.loaded, skipped = report.skipped.len(), "user overrides");
            for (path, err) in &report.skipped {
                eprintln!("kubewatch: skipping {}: {err}", path.display());
            }
        }
    }
    if registry.get(&args.kind).is_none() {
        eprintln!(
            "kubewatch: unknown resource kind '{}'. Known: {}",
            args.kind,
            registry.names().join(", ")
        );
        std::process::exit(EXIT_CONFIG);
    }

    // ── Contexts ─────────────────────────────────────────────────────────────
    let kubeconfig = args.kubeconfig.as_deref();
    let mut contexts = args.requested_contexts();
    if contexts.is_empty() {
        contexts = load_last_context()
            .or_else(|| current_context(kubeconfig))
            .into_iter()
            .collect();
    }
    let explicit = !args.requested_contexts().is_empty();
    let (facade, failures) = Facade::connect(&contexts, kubeconfig).await;
    for (context, err) in &failures {
        warn!(context = %context, %err, "context unavailable");
    }
    if explicit && !facade.is_connected() {
        eprintln!("kubewatch: none of the requested contexts could be reached");
        for (context, err) in &failures {
            eprintln!("  {context}: {err}");
        }
        std::process::exit(EXIT_CONFIG);
    }
    if !facade.is_connected() {
        warn!("no cluster reachable, showing demo data");
    }
    if let Some(first) = facade.contexts().first() {
        save_last_context(first);
    }

    // ── Core wiring ──────────────────────────────────────────────────────────
    let root = CancellationToken::new();
    let cache = Arc::new(ResourceCache::default());
    cache.spawn_cleanup(DEFAULT_CLEANUP_INTERVAL, root.child_token());
    let templates = Arc::new(TemplateEngine::new());
    let engine = Engine::new(
        Arc::clone(&registry),
        Arc::clone(&cache),
        Arc::clone(&templates),
        facade,
        EngineConfig {
            kind: args.kind.clone(),
            namespace: args.namespace.clone(),
            refresh_interval: args.refresh_interval,
            kubeconfig: args.kubeconfig.clone(),
        },
        root.clone(),
    );
    if let Err(err) = engine.refresh().await {
        warn!(%err, "initial refresh failed");
    }

    // ── Terminal ─────────────────────────────────────────────────────────────
    enable_raw_mode().context("cannot enable raw mode")?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen).context("cannot enter alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("cannot build terminal")?;

    let app = App::new(list_contexts(kubeconfig), registry.names());
    let result = run(&mut terminal, app, &engine, root.clone()).await;

    // Always restore the terminal, even on error.
    engine.shutdown();
    disable_raw_mode().ok();
    execute!(terminal.backend_mut(), LeaveAlternateScreen).ok();
    terminal.show_cursor().ok();
    result
}

struct LogState {
    session: Option<LogSession>,
    /// Pod set resolved at session start, reused on filter-change restarts.
    pods: Vec<Resource>,
    scope: CancellationToken,
}

async fn run(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    mut app: App,
    engine: &Arc<Engine>,
    root: CancellationToken,
) -> Result<()> {
    let (event_tx, mut event_rx) = mpsc::channel::<AppEvent>(64);
    spawn_input_reader(event_tx);
    let mut snapshots = engine.subscribe();
    let mut redraw = tokio::time::interval(REDRAW_INTERVAL);
    redraw.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut log_state = LogState {
        session: None,
        pods: Vec::new(),
        scope: root.child_token(),
    };

    loop {
        // Draw first so startup shows the empty frame immediately.
        {
            let buffer = log_state.session.as_ref().map(LogSession::buffer);
            let guard = buffer
                .as_ref()
                .map(|b| b.lock().expect("log buffer lock poisoned"));
            terminal.draw(|frame| ui::draw(frame, &mut app, guard.as_deref()))?;
        }

        let commands: Vec<Command> = tokio::select! {
            event = event_rx.recv() => match event {
                Some(AppEvent::Key(key)) => app.handle_key(key),
                Some(AppEvent::Resize(_, _)) | None => Vec::new(),
            },
            changed = snapshots.changed() => {
                if changed.is_ok() {
                    let snapshot = snapshots.borrow_and_update().clone();
                    app.apply_snapshot(snapshot);
                }
                Vec::new()
            }
            _ = redraw.tick() => {
                // Keep search matches current while lines stream in.
                if app.mode == Mode::Log && !app.search.query.is_empty() && !app.search.input {
                    if let Some(session) = &log_state.session {
                        let buffer = session.buffer();
                        let guard = buffer.lock().expect("log buffer lock poisoned");
                        app.search.matches = search_matches(&guard, &app.search.query);
                        app.search.current = app
                            .search
                            .current
                            .min(app.search.matches.len().saturating_sub(1));
                    }
                }
                Vec::new()
            }
        };

        for command in commands {
            if execute_command(command, &mut app, engine, &mut log_state, &root).await {
                return Ok(());
            }
        }
    }
}

/// Execute one mode-machine command. Returns true when the app should quit.
async fn execute_command(
    command: Command,
    app: &mut App,
    engine: &Arc<Engine>,
    log_state: &mut LogState,
    root: &CancellationToken,
) -> bool {
    match command {
        Command::Quit => {
            if let Some(session) = log_state.session.take() {
                session.stop(STOP_GRACE).await;
            }
            return true;
        }
        Command::Refresh => {
            if let Err(err) = engine.refresh().await {
                app.status = Some(err.to_string());
            }
        }
        Command::SetKind(kind) => {
            if let Err(err) = engine.set_kind(&kind) {
                app.status = Some(err.to_string());
            }
        }
        Command::SetNamespace(namespace) => engine.set_namespace(namespace, false),
        Command::SetContexts(contexts) => {
            let failures = engine.set_contexts(contexts).await;
            if !failures.is_empty() {
                let failed: Vec<String> =
                    failures.iter().map(|(c, _)| c.clone()).collect();
                app.status = Some(format!("unreachable: {}", failed.join(", ")));
            }
            if let Some(first) = engine.contexts().first() {
                save_last_context(first);
            }
        }
        Command::SetFilter(filter) => engine.set_filter(filter),
        Command::CycleSort(column) => engine.cycle_sort(&column),
        Command::ToggleGrouping => engine.toggle_grouping(),
        Command::SetAutoRefresh(enabled) => engine.set_auto_refresh(enabled),
        Command::StartLogs { identity, filter } => {
            start_logs(app, engine, log_state, identity, filter).await;
        }
        Command::RestartLogs { filter } => {
            // Cancel readers, clear the buffer, re-subscribe with the new
            // source set.
            if let Some(session) = log_state.session.take() {
                session.stop(STOP_GRACE).await;
            }
            let sources = enumerate_sources(&log_state.pods, filter);
            let session = LogSession::start(
                &engine.facade(),
                sources,
                Some(DEFAULT_TAIL_LINES),
                DEFAULT_BUFFER_CAP,
                &log_state.scope,
            );
            log_state.session = Some(session);
            app.log_view = logs::LogView::default();
            app.search = logs::SearchState::default();
        }
        Command::StopLogs => {
            if let Some(session) = log_state.session.take() {
                session.stop(STOP_GRACE).await;
            }
            // Context switches and mode exits share the same scope; renew it
            // so the next session starts from a clean token.
            log_state.scope = root.child_token();
            log_state.pods.clear();
        }
        Command::ClearLogBuffer => {
            if let Some(session) = &log_state.session {
                session.clear();
            }
        }
        Command::Search(query) => {
            if let Some(session) = &log_state.session {
                let buffer = session.buffer();
                let guard = buffer.lock().expect("log buffer lock poisoned");
                app.search.matches = search_matches(&guard, &query);
            }
            app.search.query = query;
            app.search.current = 0;
            if let Some(&first) = app.search.matches.first() {
                app.log_view.reveal(first.saturating_sub(app.log_height / 2));
            } else {
                app.status = Some("no matches".into());
            }
        }
        Command::Delete(identity) => delete_resource(app, engine, &identity).await,
        Command::OpenDescribe(identity) => {
            let Some(def) = engine.definition() else { return false };
            let facade = engine.facade();
            let namespace = some_if_nonempty(&identity.namespace);
            match facade
                .describe(&identity.context, &def, namespace, &identity.name)
                .await
            {
                Ok(text) => app.describe.text = text,
                Err(err) => app.describe.text = format!("describe failed: {err}"),
            }
        }
    }
    false
}

async fn start_logs(
    app: &mut App,
    engine: &Arc<Engine>,
    log_state: &mut LogState,
    identity: ResourceIdentity,
    filter: SourceFilter,
) {
    let facade = engine.facade();
    let multi = engine.flags().multi_context;
    let pods = match resolve_pods(&facade, &identity.kind, &identity, multi).await {
        Ok(pods) if !pods.is_empty() => pods,
        Ok(_) => {
            app.status = Some(format!("no pods found for {}", identity.location()));
            app.mode = Mode::List;
            engine.set_auto_refresh(true);
            return;
        }
        Err(err) => {
            app.status = Some(format!("cannot resolve pods: {err}"));
            app.mode = Mode::List;
            engine.set_auto_refresh(true);
            return;
        }
    };
    let containers = pod_containers(&pods[0].object);
    let sources = enumerate_sources(&pods, filter);
    let session = LogSession::start(
        &facade,
        sources,
        Some(DEFAULT_TAIL_LINES),
        DEFAULT_BUFFER_CAP,
        &log_state.scope,
    );
    app.log_started(identity, pods.len(), containers.len());
    log_state.pods = pods;
    log_state.session = Some(session);
}

async fn delete_resource(app: &mut App, engine: &Arc<Engine>, identity: &ResourceIdentity) {
    let Some(def) = engine.definition() else {
        return;
    };
    let facade = engine.facade();
    let namespace = some_if_nonempty(&identity.namespace);
    match facade
        .delete(&identity.context, &def, namespace, &identity.name)
        .await
    {
        Ok(()) => {
            app.status = Some(format!("deleted {}", identity.location()));
            // The row disappears on the refresh that follows.
        }
        Err(err) => app.status = Some(format!("delete failed: {err}")),
    }
}

fn some_if_nonempty(s: &str) -> Option<&str> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

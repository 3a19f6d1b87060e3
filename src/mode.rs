//! Mode/state machine: routes key input to the right subsystem and owns the
//! per-mode view state.
//!
//! Key events are consulted by the active mode first; unhandled keys fall
//! through to the global handler (quit is only reachable from List).
//! The machine emits [`Command`] values instead of acting directly, which
//! keeps every transition testable without a terminal or a cluster: the
//! controller loop in `main` executes commands against the engine, facade
//! and log session.

use std::sync::Arc;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::logs::{LogView, SearchState, SourceFilter};
use crate::render::Snapshot;
use crate::resource::ResourceIdentity;
use crate::select::Selection;

/// The screen modes. Initial mode is `List`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    List,
    Log,
    Describe,
    Help,
    ContextSelector,
    NamespaceSelector,
    ConfirmDialog,
    ResourceSelector,
}

/// Commands the controller executes on behalf of the mode machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Refresh,
    SetKind(String),
    SetNamespace(Option<String>),
    SetContexts(Vec<String>),
    SetFilter(String),
    CycleSort(String),
    ToggleGrouping,
    SetAutoRefresh(bool),
    StartLogs {
        identity: ResourceIdentity,
        filter: SourceFilter,
    },
    RestartLogs {
        filter: SourceFilter,
    },
    StopLogs,
    ClearLogBuffer,
    Search(String),
    Delete(ResourceIdentity),
    OpenDescribe(ResourceIdentity),
    Quit,
}

// ─── Auxiliary view state ─────────────────────────────────────────────────────

/// Filterable pick list used by the context/namespace/resource selectors.
#[derive(Debug, Clone, Default)]
pub struct SelectorState {
    pub title: String,
    pub items: Vec<String>,
    pub filter: String,
    pub cursor: usize,
    /// Items toggled with Space (context selector multi-pick).
    pub checked: Vec<String>,
    pub multi: bool,
}

impl SelectorState {
    pub fn new(title: impl Into<String>, items: Vec<String>, multi: bool) -> Self {
        Self {
            title: title.into(),
            items,
            filter: String::new(),
            cursor: 0,
            checked: Vec::new(),
            multi,
        }
    }

    pub fn visible(&self) -> Vec<&String> {
        let needle = self.filter.to_lowercase();
        self.items
            .iter()
            .filter(|i| needle.is_empty() || i.to_lowercase().contains(&needle))
            .collect()
    }

    pub fn move_cursor(&mut self, delta: isize) {
        let len = self.visible().len();
        if len == 0 {
            self.cursor = 0;
            return;
        }
        #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
        {
            self.cursor = (self.cursor as isize + delta).clamp(0, len as isize - 1) as usize;
        }
    }

    pub fn current(&self) -> Option<String> {
        self.visible().get(self.cursor).map(|s| (*s).clone())
    }

    pub fn toggle_current(&mut self) {
        let Some(item) = self.current() else { return };
        if let Some(pos) = self.checked.iter().position(|c| *c == item) {
            self.checked.remove(pos);
        } else {
            self.checked.push(item);
        }
    }

    /// The committed choice: the checked set when multi-picking, otherwise
    /// the highlighted item.
    pub fn choice(&self) -> Vec<String> {
        if self.multi && !self.checked.is_empty() {
            self.checked.clone()
        } else {
            self.current().into_iter().collect()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DescribeState {
    pub title: String,
    pub text: String,
    pub scroll: usize,
}

#[derive(Debug, Clone)]
pub struct ConfirmState {
    pub message: String,
    pub identity: ResourceIdentity,
}

// ─── Application state ────────────────────────────────────────────────────────

pub struct App {
    pub mode: Mode,
    pub snapshot: Arc<Snapshot>,
    pub selection: Selection,
    /// Column the sort key acts on (moved with Left/Right).
    pub sort_cursor: usize,
    /// Filter line being edited, when `/` is active in List mode.
    pub filter_input: Option<String>,
    pub committed_filter: String,

    pub log_view: LogView,
    pub search: SearchState,
    pub log_filter: SourceFilter,
    pub log_identity: Option<ResourceIdentity>,
    pub log_pod_count: usize,
    pub log_container_count: usize,
    /// Set by the renderer each frame so scroll math matches the screen.
    pub log_total: usize,
    pub log_height: usize,

    pub describe: DescribeState,
    pub help_scroll: usize,
    pub selector: SelectorState,
    pub confirm: Option<ConfirmState>,
    /// Transient status/error line shown in the footer.
    pub status: Option<String>,
    pub table_height: usize,

    /// All kubeconfig contexts, for the context selector.
    pub all_contexts: Vec<String>,
    /// All registered definition names, for the resource selector.
    pub all_kinds: Vec<String>,
}

impl App {
    pub fn new(all_contexts: Vec<String>, all_kinds: Vec<String>) -> Self {
        Self {
            mode: Mode::List,
            snapshot: Arc::new(Snapshot::empty()),
            selection: Selection::default(),
            sort_cursor: 0,
            filter_input: None,
            committed_filter: String::new(),
            log_view: LogView::default(),
            search: SearchState::default(),
            log_filter: SourceFilter::default(),
            log_identity: None,
            log_pod_count: 0,
            log_container_count: 0,
            log_total: 0,
            log_height: 0,
            describe: DescribeState::default(),
            help_scroll: 0,
            selector: SelectorState::default(),
            confirm: None,
            status: None,
            table_height: 0,
            all_contexts,
            all_kinds,
        }
    }

    /// Install a new snapshot and reconcile the selection identity against
    /// the new row order.
    pub fn apply_snapshot(&mut self, snapshot: Arc<Snapshot>) {
        self.snapshot = snapshot;
        self.selection.reconcile(&self.snapshot.rows);
        self.selection.ensure_visible(self.table_height);
        if self.sort_cursor >= self.snapshot.columns.len() {
            self.sort_cursor = 0;
        }
    }

    pub fn selected_identity(&self) -> Option<ResourceIdentity> {
        self.selection
            .index()
            .and_then(|i| self.snapshot.rows.get(i))
            .map(|row| row.identity.clone())
    }

    /// Bookkeeping once the controller has started a log session.
    pub fn log_started(&mut self, identity: ResourceIdentity, pods: usize, containers: usize) {
        self.log_identity = Some(identity);
        self.log_pod_count = pods;
        self.log_container_count = containers;
        self.log_view = LogView::default();
        self.search = SearchState::default();
    }

    // ── Key routing ──────────────────────────────────────────────────────────

    pub fn handle_key(&mut self, key: KeyEvent) -> Vec<Command> {
        self.status = None;
        match self.mode {
            Mode::List => self.handle_list_key(key),
            Mode::Log => self.handle_log_key(key),
            Mode::Describe => self.handle_describe_key(key),
            Mode::Help => self.handle_help_key(key),
            Mode::ContextSelector | Mode::NamespaceSelector | Mode::ResourceSelector => {
                self.handle_selector_key(key)
            }
            Mode::ConfirmDialog => self.handle_confirm_key(key),
        }
    }

    fn leave_to_list(&mut self) -> Vec<Command> {
        let was_log = self.mode == Mode::Log;
        self.mode = Mode::List;
        let mut commands = vec![Command::SetAutoRefresh(true), Command::Refresh];
        if was_log {
            commands.insert(0, Command::StopLogs);
        }
        commands
    }

    // ── List mode ────────────────────────────────────────────────────────────

    fn handle_list_key(&mut self, key: KeyEvent) -> Vec<Command> {
        // Filter line editing swallows every key first.
        if let Some(input) = self.filter_input.as_mut() {
            match key.code {
                KeyCode::Esc => {
                    self.filter_input = None;
                    self.committed_filter.clear();
                    return vec![Command::SetFilter(String::new()), Command::Refresh];
                }
                KeyCode::Enter => {
                    let filter = self.filter_input.take().unwrap_or_default();
                    self.committed_filter = filter.clone();
                    return vec![Command::SetFilter(filter), Command::Refresh];
                }
                KeyCode::Backspace => {
                    input.pop();
                }
                KeyCode::Char(c) => input.push(c),
                _ => {}
            }
            return Vec::new();
        }

        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            return vec![Command::Quit];
        }
        let rows = self.snapshot.rows.clone();
        match key.code {
            KeyCode::Up | KeyCode::Char('k') => {
                self.selection.move_by(&rows, -1);
                self.selection.ensure_visible(self.table_height);
            }
            KeyCode::Down | KeyCode::Char('j') => {
                self.selection.move_by(&rows, 1);
                self.selection.ensure_visible(self.table_height);
            }
            KeyCode::PageUp => {
                #[allow(clippy::cast_possible_wrap)]
                self.selection.move_by(&rows, -(self.table_height.max(1) as isize));
                self.selection.ensure_visible(self.table_height);
            }
            KeyCode::PageDown => {
                #[allow(clippy::cast_possible_wrap)]
                self.selection.move_by(&rows, self.table_height.max(1) as isize);
                self.selection.ensure_visible(self.table_height);
            }
            KeyCode::Home | KeyCode::Char('g') => {
                self.selection.select_first(&rows);
                self.selection.ensure_visible(self.table_height);
            }
            KeyCode::End | KeyCode::Char('G') => {
                self.selection.select_last(&rows);
                self.selection.ensure_visible(self.table_height);
            }
            KeyCode::Left => self.sort_cursor = self.sort_cursor.saturating_sub(1),
            KeyCode::Right => {
                if self.sort_cursor + 1 < self.snapshot.columns.len() {
                    self.sort_cursor += 1;
                }
            }
            KeyCode::Char('s') => {
                if let Some(column) = self.snapshot.columns.get(self.sort_cursor) {
                    if column.sortable {
                        return vec![Command::CycleSort(column.name.clone()), Command::Refresh];
                    }
                    self.status = Some(format!("column {} is not sortable", column.name));
                }
            }
            KeyCode::Char('u') => return vec![Command::ToggleGrouping, Command::Refresh],
            KeyCode::Char('/') => self.filter_input = Some(self.committed_filter.clone()),
            KeyCode::Char('R') => return vec![Command::Refresh],
            KeyCode::Char('?') => {
                self.mode = Mode::Help;
                self.help_scroll = 0;
                return vec![Command::SetAutoRefresh(false)];
            }
            KeyCode::Char('l') | KeyCode::Enter => {
                let pod_bearing = self
                    .snapshot
                    .definition
                    .as_ref()
                    .is_some_and(|d| d.pod_bearing());
                if let (true, Some(identity)) = (pod_bearing, self.selected_identity()) {
                    self.mode = Mode::Log;
                    self.log_filter = SourceFilter::default();
                    return vec![
                        Command::SetAutoRefresh(false),
                        Command::StartLogs {
                            identity,
                            filter: self.log_filter,
                        },
                    ];
                }
                if key.code == KeyCode::Char('l') {
                    self.status = Some("logs are only available for pod-bearing rows".into());
                }
            }
            KeyCode::Char('d') => {
                if let Some(identity) = self.selected_identity() {
                    self.mode = Mode::Describe;
                    self.describe = DescribeState {
                        title: identity.location(),
                        text: String::from("loading…"),
                        scroll: 0,
                    };
                    return vec![
                        Command::SetAutoRefresh(false),
                        Command::OpenDescribe(identity),
                    ];
                }
            }
            KeyCode::Char('n') => {
                let mut namespaces: Vec<String> = self
                    .snapshot
                    .rows
                    .iter()
                    .map(|r| r.identity.namespace.clone())
                    .filter(|ns| !ns.is_empty())
                    .collect();
                namespaces.sort();
                namespaces.dedup();
                namespaces.insert(0, "(all)".to_string());
                self.selector = SelectorState::new("namespace", namespaces, false);
                self.mode = Mode::NamespaceSelector;
                return vec![Command::SetAutoRefresh(false)];
            }
            KeyCode::Char('c') => {
                self.selector =
                    SelectorState::new("context", self.all_contexts.clone(), true);
                self.mode = Mode::ContextSelector;
                return vec![Command::SetAutoRefresh(false)];
            }
            KeyCode::Char('r') => {
                self.selector = SelectorState::new("resource", self.all_kinds.clone(), false);
                self.mode = Mode::ResourceSelector;
                return vec![Command::SetAutoRefresh(false)];
            }
            KeyCode::Char('D') | KeyCode::Delete => {
                if let Some(identity) = self.selected_identity() {
                    let message = self
                        .snapshot
                        .definition
                        .as_ref()
                        .and_then(|d| d.operation_for_key("D"))
                        .and_then(|op| op.confirm_message.clone())
                        .unwrap_or_else(|| format!("Delete {}?", identity.location()));
                    self.confirm = Some(ConfirmState { message, identity });
                    self.mode = Mode::ConfirmDialog;
                    return vec![Command::SetAutoRefresh(false)];
                }
            }
            KeyCode::Esc => {
                if !self.committed_filter.is_empty() {
                    self.committed_filter.clear();
                    return vec![Command::SetFilter(String::new()), Command::Refresh];
                }
            }
            KeyCode::Char('q') => return vec![Command::Quit],
            _ => {}
        }
        Vec::new()
    }

    // ── Log mode ─────────────────────────────────────────────────────────────

    fn handle_log_key(&mut self, key: KeyEvent) -> Vec<Command> {
        // Incremental search input swallows keys first.
        if self.search.input {
            match key.code {
                KeyCode::Esc => {
                    self.search = SearchState::default();
                }
                KeyCode::Enter => {
                    self.search.input = false;
                    return vec![Command::Search(self.search.query.clone())];
                }
                KeyCode::Backspace => {
                    self.search.query.pop();
                }
                KeyCode::Char(c) => self.search.query.push(c),
                _ => {}
            }
            return Vec::new();
        }

        match key.code {
            KeyCode::Esc => return self.leave_to_list(),
            KeyCode::Up | KeyCode::Char('k') => self.log_view.scroll_up(1),
            KeyCode::Down | KeyCode::Char('j') => {
                self.log_view.scroll_down(1, self.log_total, self.log_height);
            }
            KeyCode::PageUp => self.log_view.scroll_up(self.log_height.max(1)),
            KeyCode::PageDown => {
                self.log_view
                    .scroll_down(self.log_height.max(1), self.log_total, self.log_height);
            }
            KeyCode::Char('G') | KeyCode::End => self.log_view.follow_bottom(),
            KeyCode::Char('g') | KeyCode::Home => self.log_view.pin_top(),
            KeyCode::Char('C') => return vec![Command::ClearLogBuffer],
            KeyCode::Char('c') => {
                self.log_filter.container_index =
                    cycle_index(self.log_filter.container_index, self.log_container_count);
                return vec![Command::RestartLogs {
                    filter: self.log_filter,
                }];
            }
            KeyCode::Char('p') => {
                self.log_filter.pod_index =
                    cycle_index(self.log_filter.pod_index, self.log_pod_count);
                return vec![Command::RestartLogs {
                    filter: self.log_filter,
                }];
            }
            KeyCode::Char('/') => {
                self.search = SearchState {
                    input: true,
                    ..SearchState::default()
                };
            }
            KeyCode::Char('n') => self.step_match(1),
            KeyCode::Char('N') => self.step_match(-1),
            _ => {}
        }
        Vec::new()
    }

    fn step_match(&mut self, delta: isize) {
        if self.search.matches.is_empty() {
            return;
        }
        let len = self.search.matches.len();
        #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
        {
            let next = (self.search.current as isize + delta).rem_euclid(len as isize);
            self.search.current = next as usize;
        }
        let line = self.search.matches[self.search.current];
        self.log_view.reveal(line.saturating_sub(self.log_height / 2));
    }

    // ── Describe / help ──────────────────────────────────────────────────────

    fn handle_describe_key(&mut self, key: KeyEvent) -> Vec<Command> {
        match key.code {
            KeyCode::Esc | KeyCode::Char('q') => self.leave_to_list(),
            KeyCode::Up | KeyCode::Char('k') => {
                self.describe.scroll = self.describe.scroll.saturating_sub(1);
                Vec::new()
            }
            KeyCode::Down | KeyCode::Char('j') => {
                self.describe.scroll += 1;
                Vec::new()
            }
            KeyCode::PageUp => {
                self.describe.scroll = self.describe.scroll.saturating_sub(20);
                Vec::new()
            }
            KeyCode::PageDown => {
                self.describe.scroll += 20;
                Vec::new()
            }
            KeyCode::Home | KeyCode::Char('g') => {
                self.describe.scroll = 0;
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn handle_help_key(&mut self, key: KeyEvent) -> Vec<Command> {
        match key.code {
            KeyCode::Esc | KeyCode::Char('?') | KeyCode::Char('q') => self.leave_to_list(),
            KeyCode::Up => {
                self.help_scroll = self.help_scroll.saturating_sub(1);
                Vec::new()
            }
            KeyCode::Down => {
                self.help_scroll += 1;
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    // ── Selectors ────────────────────────────────────────────────────────────

    fn handle_selector_key(&mut self, key: KeyEvent) -> Vec<Command> {
        match key.code {
            KeyCode::Esc => return self.leave_to_list(),
            KeyCode::Up => self.selector.move_cursor(-1),
            KeyCode::Down => self.selector.move_cursor(1),
            KeyCode::Backspace => {
                self.selector.filter.pop();
                self.selector.cursor = 0;
            }
            KeyCode::Char(' ') if self.selector.multi => self.selector.toggle_current(),
            KeyCode::Char(c) => {
                self.selector.filter.push(c);
                self.selector.cursor = 0;
            }
            KeyCode::Enter => {
                let choice = self.selector.choice();
                let mode = self.mode;
                let mut commands = self.leave_to_list();
                let command = match mode {
                    Mode::NamespaceSelector => choice.first().map(|ns| {
                        if ns == "(all)" {
                            Command::SetNamespace(None)
                        } else {
                            Command::SetNamespace(Some(ns.clone()))
                        }
                    }),
                    Mode::ContextSelector => {
                        if choice.is_empty() {
                            None
                        } else {
                            Some(Command::SetContexts(choice))
                        }
                    }
                    Mode::ResourceSelector => {
                        choice.first().map(|kind| Command::SetKind(kind.clone()))
                    }
                    _ => None,
                };
                if let Some(command) = command {
                    commands.insert(0, command);
                }
                return commands;
            }
            _ => {}
        }
        Vec::new()
    }

    // ── Confirm dialog ───────────────────────────────────────────────────────

    fn handle_confirm_key(&mut self, key: KeyEvent) -> Vec<Command> {
        match key.code {
            KeyCode::Char('y') | KeyCode::Enter => {
                let confirmed = self.confirm.take();
                let mut commands = self.leave_to_list();
                if let Some(confirm) = confirmed {
                    commands.insert(0, Command::Delete(confirm.identity));
                }
                commands
            }
            KeyCode::Char('n') | KeyCode::Esc => {
                self.confirm = None;
                self.leave_to_list()
            }
            _ => Vec::new(),
        }
    }
}

/// Cycle a `-1 → 0 → 1 → … → count-1 → -1` selection index.
fn cycle_index(current: isize, count: usize) -> isize {
    #[allow(clippy::cast_possible_wrap)]
    let count = count as isize;
    if count <= 1 {
        return -1;
    }
    if current + 1 >= count {
        -1
    } else {
        current + 1
    }
}

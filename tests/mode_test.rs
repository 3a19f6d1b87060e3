//! Tests for kubewatch::mode — mode transitions, key routing, and the
//! commands emitted toward the engine and log multiplexer.

use std::sync::Arc;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use kubewatch::definition::ResourceDefinition;
use kubewatch::mode::{App, Command, Mode};
use kubewatch::render::{render_snapshot, RenderFlags};
use kubewatch::resource::Resource;
use kubewatch::template::TemplateEngine;
use serde_json::json;

const POD_DEF: &str = r#"
apiVersion: kubewatch.io/v1
kind: ResourceDefinition
metadata:
  name: pods
spec:
  kubernetes:
    group: ""
    version: v1
    kind: Pod
    plural: pods
    namespaced: true
  columns:
    - name: NAME
      template: "{{ .metadata.name }}"
      width: 24
      sortable: true
    - name: STATUS
      template: "{{ .status.phase | default \"Unknown\" }}"
      width: 12
  operations:
    - name: delete
      keybinding: D
      command: "kubectl delete pod {{ .metadata.name }}"
      confirm: true
      confirmMessage: "Delete the selected pod?"
"#;

fn key(c: char) -> KeyEvent {
    KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE)
}

fn code(code: KeyCode) -> KeyEvent {
    KeyEvent::new(code, KeyModifiers::NONE)
}

fn app_with_pods() -> App {
    let def = Arc::new(ResourceDefinition::from_yaml(POD_DEF).expect("valid"));
    let engine = TemplateEngine::new();
    let resources = vec![
        Resource::new(
            "",
            json!({"metadata": {"name": "web-1", "namespace": "default", "uid": "u1"},
                   "status": {"phase": "Running"}}),
        ),
        Resource::new(
            "",
            json!({"metadata": {"name": "web-2", "namespace": "default", "uid": "u2"},
                   "status": {"phase": "Pending"}}),
        ),
    ];
    let snapshot = render_snapshot(
        1,
        &def,
        &engine,
        &RenderFlags::default(),
        &resources,
        Vec::new(),
        Vec::new(),
    );
    let mut app = App::new(vec!["prod".into(), "staging".into()], vec!["pods".into()]);
    app.table_height = 10;
    app.apply_snapshot(Arc::new(snapshot));
    app
}

// ── Initial state and snapshot application ───────────────────────────────────

#[test]
fn initial_mode_is_list_with_reconciled_selection() {
    let app = app_with_pods();
    assert_eq!(app.mode, Mode::List);
    assert_eq!(app.selection.index(), Some(0));
}

// ── Help ─────────────────────────────────────────────────────────────────────

#[test]
fn question_mark_enters_help_and_esc_returns() {
    let mut app = app_with_pods();
    let commands = app.handle_key(key('?'));
    assert_eq!(app.mode, Mode::Help);
    assert!(commands.contains(&Command::SetAutoRefresh(false)));

    let commands = app.handle_key(code(KeyCode::Esc));
    assert_eq!(app.mode, Mode::List);
    assert!(commands.contains(&Command::SetAutoRefresh(true)));
    assert!(commands.contains(&Command::Refresh));
}

#[test]
fn help_returns_on_repeated_question_mark() {
    let mut app = app_with_pods();
    let _ = app.handle_key(key('?'));
    let _ = app.handle_key(key('?'));
    assert_eq!(app.mode, Mode::List);
}

// ── Logs ─────────────────────────────────────────────────────────────────────

#[test]
fn l_on_a_pod_row_starts_logs_and_stops_auto_refresh() {
    let mut app = app_with_pods();
    let commands = app.handle_key(key('l'));
    assert_eq!(app.mode, Mode::Log);
    assert_eq!(commands[0], Command::SetAutoRefresh(false));
    match &commands[1] {
        Command::StartLogs { identity, .. } => {
            assert_eq!(identity.name, "web-1");
            assert_eq!(identity.kind, "Pod");
        }
        other => panic!("expected StartLogs, got {other:?}"),
    }
}

#[test]
fn esc_from_logs_stops_readers_and_resumes_auto_refresh() {
    let mut app = app_with_pods();
    let _ = app.handle_key(key('l'));
    let commands = app.handle_key(code(KeyCode::Esc));
    assert_eq!(app.mode, Mode::List);
    assert_eq!(
        commands,
        vec![
            Command::StopLogs,
            Command::SetAutoRefresh(true),
            Command::Refresh
        ]
    );
}

#[test]
fn container_cycle_restarts_the_session_with_the_next_index() {
    let mut app = app_with_pods();
    let _ = app.handle_key(key('l'));
    app.log_container_count = 3;
    let commands = app.handle_key(key('c'));
    match commands.first() {
        Some(Command::RestartLogs { filter }) => assert_eq!(filter.container_index, 0),
        other => panic!("expected RestartLogs, got {other:?}"),
    }
    let commands = app.handle_key(key('c'));
    match commands.first() {
        Some(Command::RestartLogs { filter }) => assert_eq!(filter.container_index, 1),
        other => panic!("expected RestartLogs, got {other:?}"),
    }
}

#[test]
fn log_scroll_and_search_keys_stay_local() {
    let mut app = app_with_pods();
    let _ = app.handle_key(key('l'));
    app.log_total = 100;
    app.log_height = 10;
    assert!(app.log_view.following);
    assert!(app.handle_key(code(KeyCode::Up)).is_empty());
    assert!(!app.log_view.following);
    assert!(app.handle_key(key('G')).is_empty());
    assert!(app.log_view.following);

    // Search input: `/` swallows characters until Enter commits.
    assert!(app.handle_key(key('/')).is_empty());
    assert!(app.handle_key(key('e')).is_empty());
    assert!(app.handle_key(key('r')).is_empty());
    let commands = app.handle_key(code(KeyCode::Enter));
    assert_eq!(commands, vec![Command::Search("er".to_string())]);
}

#[test]
fn clear_buffer_key_emits_command() {
    let mut app = app_with_pods();
    let _ = app.handle_key(key('l'));
    assert_eq!(app.handle_key(key('C')), vec![Command::ClearLogBuffer]);
}

// ── Describe ─────────────────────────────────────────────────────────────────

#[test]
fn d_opens_describe_for_the_selected_row() {
    let mut app = app_with_pods();
    let commands = app.handle_key(key('d'));
    assert_eq!(app.mode, Mode::Describe);
    assert!(commands.iter().any(|c| matches!(
        c,
        Command::OpenDescribe(identity) if identity.name == "web-1"
    )));
}

// ── Delete confirmation ───────────────────────────────────────────────────────

#[test]
fn delete_requires_confirmation_and_y_issues_the_delete() {
    let mut app = app_with_pods();
    let _ = app.handle_key(key('D'));
    assert_eq!(app.mode, Mode::ConfirmDialog);
    let confirm = app.confirm.clone().expect("dialog populated");
    assert_eq!(confirm.message, "Delete the selected pod?");

    let commands = app.handle_key(key('y'));
    assert_eq!(app.mode, Mode::List);
    assert!(matches!(
        &commands[0],
        Command::Delete(identity) if identity.name == "web-1"
    ));
    assert!(commands.contains(&Command::Refresh));
}

#[test]
fn delete_cancellation_issues_nothing() {
    let mut app = app_with_pods();
    let _ = app.handle_key(key('D'));
    let commands = app.handle_key(key('n'));
    assert_eq!(app.mode, Mode::List);
    assert!(!commands.iter().any(|c| matches!(c, Command::Delete(_))));
}

// ── Selectors ─────────────────────────────────────────────────────────────────

#[test]
fn namespace_selector_commits_a_namespace_switch() {
    let mut app = app_with_pods();
    let _ = app.handle_key(key('n'));
    assert_eq!(app.mode, Mode::NamespaceSelector);
    // First item is "(all)"; move to "default".
    let _ = app.handle_key(code(KeyCode::Down));
    let commands = app.handle_key(code(KeyCode::Enter));
    assert_eq!(app.mode, Mode::List);
    assert_eq!(commands[0], Command::SetNamespace(Some("default".into())));
}

#[test]
fn namespace_selector_all_entry_clears_the_namespace() {
    let mut app = app_with_pods();
    let _ = app.handle_key(key('n'));
    let commands = app.handle_key(code(KeyCode::Enter));
    assert_eq!(commands[0], Command::SetNamespace(None));
}

#[test]
fn context_selector_multi_picks_with_space() {
    let mut app = app_with_pods();
    let _ = app.handle_key(key('c'));
    assert_eq!(app.mode, Mode::ContextSelector);
    let _ = app.handle_key(key(' ')); // check "prod"
    let _ = app.handle_key(code(KeyCode::Down));
    let _ = app.handle_key(key(' ')); // check "staging"
    let commands = app.handle_key(code(KeyCode::Enter));
    assert_eq!(
        commands[0],
        Command::SetContexts(vec!["prod".into(), "staging".into()])
    );
}

#[test]
fn resource_selector_switches_kind() {
    let mut app = app_with_pods();
    let _ = app.handle_key(key('r'));
    assert_eq!(app.mode, Mode::ResourceSelector);
    let commands = app.handle_key(code(KeyCode::Enter));
    assert_eq!(commands[0], Command::SetKind("pods".into()));
}

#[test]
fn selector_filter_narrows_items() {
    let mut app = app_with_pods();
    let _ = app.handle_key(key('c'));
    let _ = app.handle_key(key('s'));
    let _ = app.handle_key(key('t'));
    assert_eq!(app.selector.visible(), vec![&"staging".to_string()]);
}

// ── Filter input ──────────────────────────────────────────────────────────────

#[test]
fn slash_edits_filter_and_enter_commits_it() {
    let mut app = app_with_pods();
    assert!(app.handle_key(key('/')).is_empty());
    assert!(app.handle_key(key('w')).is_empty());
    assert!(app.handle_key(key('e')).is_empty());
    let commands = app.handle_key(code(KeyCode::Enter));
    assert_eq!(
        commands,
        vec![Command::SetFilter("we".to_string()), Command::Refresh]
    );
    assert_eq!(app.committed_filter, "we");
}

#[test]
fn esc_clears_a_committed_filter() {
    let mut app = app_with_pods();
    let _ = app.handle_key(key('/'));
    let _ = app.handle_key(key('x'));
    let _ = app.handle_key(code(KeyCode::Enter));
    let commands = app.handle_key(code(KeyCode::Esc));
    assert_eq!(
        commands,
        vec![Command::SetFilter(String::new()), Command::Refresh]
    );
}

// ── Sort ─────────────────────────────────────────────────────────────────────

#[test]
fn s_cycles_sort_on_the_cursor_column() {
    let mut app = app_with_pods();
    let commands = app.handle_key(key('s'));
    assert_eq!(
        commands,
        vec![Command::CycleSort("NAME".to_string()), Command::Refresh]
    );
}

#[test]
fn unsortable_column_reports_status_instead() {
    let mut app = app_with_pods();
    let _ = app.handle_key(code(KeyCode::Right)); // STATUS is not sortable
    let commands = app.handle_key(key('s'));
    assert!(commands.is_empty());
    assert!(app.status.is_some());
}

// ── Quit routing ──────────────────────────────────────────────────────────────

#[test]
fn q_quits_from_list_only() {
    let mut app = app_with_pods();
    assert_eq!(app.handle_key(key('q')), vec![Command::Quit]);

    let _ = app.handle_key(key('?'));
    assert_eq!(app.mode, Mode::Help);
    let commands = app.handle_key(key('q'));
    assert!(!commands.contains(&Command::Quit), "q in Help leaves help");
    assert_eq!(app.mode, Mode::List);
}

#[test]
fn selection_moves_with_arrows() {
    let mut app = app_with_pods();
    let _ = app.handle_key(code(KeyCode::Down));
    assert_eq!(app.selection.index(), Some(1));
    let _ = app.handle_key(code(KeyCode::Up));
    assert_eq!(app.selection.index(), Some(0));
}

//! Terminal rendering: a thin consumer of snapshots and log buffers.
//!
//! Everything interesting happens upstream; this module only lays out what
//! the mode machine says is on screen. Column hiding honors the definition's
//! priorities: on a narrow terminal the lowest-priority columns disappear
//! first.

use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Row as TableRow, Table};
use ratatui::Frame;

use crate::definition::Align;
use crate::logs::LogBuffer;
use crate::mode::{App, Mode};
use crate::style::{name_color, parse_markup, strip_markup};

/// Indices of the columns that fit the given width, lowest priorities
/// dropped first, display order preserved.
pub fn visible_columns(app: &App, width: u16) -> Vec<usize> {
    let columns = &app.snapshot.columns;
    let mut by_priority: Vec<usize> = (0..columns.len()).collect();
    by_priority.sort_by_key(|&i| std::cmp::Reverse(columns[i].priority));
    let mut remaining = i32::from(width);
    let mut keep = vec![false; columns.len()];
    for i in by_priority {
        let cost = i32::from(columns[i].width) + 1;
        if remaining - cost >= 0 {
            remaining -= cost;
            keep[i] = true;
        }
    }
    (0..columns.len()).filter(|&i| keep[i]).collect()
}

pub fn draw(frame: &mut Frame<'_>, app: &mut App, logs: Option<&LogBuffer>) {
    match app.mode {
        Mode::List | Mode::ConfirmDialog
        | Mode::ContextSelector
        | Mode::NamespaceSelector
        | Mode::ResourceSelector => {
            draw_list(frame, app);
            match app.mode {
                Mode::ConfirmDialog => draw_confirm(frame, app),
                Mode::ContextSelector | Mode::NamespaceSelector | Mode::ResourceSelector => {
                    draw_selector(frame, app);
                }
                _ => {}
            }
        }
        Mode::Log => draw_log(frame, app, logs),
        Mode::Describe => draw_describe(frame, app),
        Mode::Help => draw_help(frame, app),
    }
}

// ─── List ─────────────────────────────────────────────────────────────────────

fn draw_list(frame: &mut Frame<'_>, app: &mut App) {
    let [header_area, table_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(1),
        Constraint::Length(1),
    ])
    .areas(frame.area());

    frame.render_widget(Paragraph::new(header_line(app)), header_area);

    let visible = visible_columns(app, table_area.width);
    let snapshot = &app.snapshot;
    let height = table_area.height.saturating_sub(1) as usize; // minus header row
    app.table_height = height;
    app.selection.ensure_visible(height);

    let header = TableRow::new(visible.iter().map(|&i| {
        let column = &snapshot.columns[i];
        let mut style = Style::default().add_modifier(Modifier::BOLD);
        if i == app.sort_cursor {
            style = style.fg(Color::Cyan);
        }
        let marker = match (&snapshot.flags.sort.column, snapshot.flags.sort.ascending) {
            (Some(name), true) if *name == column.name => "↑",
            (Some(name), false) if *name == column.name => "↓",
            _ => "",
        };
        Span::styled(format!("{}{marker}", column.name), style)
    }));

    let origin = app.selection.origin;
    let rows = snapshot
        .rows
        .iter()
        .enumerate()
        .skip(origin)
        .take(height)
        .map(|(idx, row)| {
            let selected = app.selection.index() == Some(idx);
            let cells = visible.iter().map(|&i| {
                let column = &snapshot.columns[i];
                let raw = row.cells.get(i).map(String::as_str).unwrap_or_default();
                let text = aligned(raw, column.width as usize, column.align);
                let line = parse_markup(&text);
                if selected {
                    line.patch_style(Style::default().add_modifier(Modifier::REVERSED))
                } else {
                    line
                }
            });
            TableRow::new(cells)
        });

    let widths = visible
        .iter()
        .map(|&i| Constraint::Length(snapshot.columns[i].width));
    frame.render_widget(Table::new(rows, widths).header(header), table_area);

    frame.render_widget(Paragraph::new(footer_line(app)), footer_area);
}

fn header_line(app: &App) -> Line<'static> {
    let snapshot = &app.snapshot;
    let kind = snapshot
        .definition
        .as_ref()
        .map(|d| d.name.clone())
        .unwrap_or_default();
    let mut spans = vec![
        Span::styled("kubewatch ", Style::default().add_modifier(Modifier::BOLD)),
        Span::styled(format!("res:{kind} "), Style::default().fg(Color::Yellow)),
        Span::raw(format!("rows:{} ", snapshot.rows.len())),
    ];
    for (context, reason) in &snapshot.unavailable {
        spans.push(Span::styled(
            format!("[{context}: {reason}] "),
            Style::default().fg(Color::Red),
        ));
    }
    for context in &snapshot.stale {
        spans.push(Span::styled(
            format!("[{context}: stale] "),
            Style::default().fg(Color::Yellow),
        ));
    }
    Line::from(spans)
}

fn footer_line(app: &App) -> Line<'static> {
    if let Some(input) = &app.filter_input {
        return Line::from(vec![
            Span::styled("/", Style::default().fg(Color::Cyan)),
            Span::raw(input.clone()),
            Span::styled("▏", Style::default().fg(Color::DarkGray)),
        ]);
    }
    if let Some(status) = &app.status {
        return Line::from(Span::styled(
            status.clone(),
            Style::default().fg(Color::Yellow),
        ));
    }
    let mut text = String::from(
        "?:help  /:filter  s:sort  u:group  l:logs  d:describe  n:ns  c:ctx  r:kind  D:delete  q:quit",
    );
    if !app.committed_filter.is_empty() {
        text = format!("filter:{}  {}", app.committed_filter, text);
    }
    Line::from(Span::styled(text, Style::default().fg(Color::DarkGray)))
}

fn aligned(text: &str, width: usize, align: Align) -> String {
    let plain_len = strip_markup(text).chars().count();
    if plain_len >= width {
        return text.to_string();
    }
    let pad = width - plain_len;
    match align {
        Align::Left => format!("{text}{}", " ".repeat(pad)),
        Align::Right => format!("{}{text}", " ".repeat(pad)),
        Align::Center => {
            let left = pad / 2;
            format!("{}{text}{}", " ".repeat(left), " ".repeat(pad - left))
        }
    }
}

// ─── Log view ─────────────────────────────────────────────────────────────────

fn draw_log(frame: &mut Frame<'_>, app: &mut App, logs: Option<&LogBuffer>) {
    let [header_area, body_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(1),
        Constraint::Length(1),
    ])
    .areas(frame.area());

    let title = app
        .log_identity
        .as_ref()
        .map(|id| id.location())
        .unwrap_or_default();
    let follow = if app.log_view.following { "follow" } else { "paused" };
    frame.render_widget(
        Paragraph::new(Line::from(vec![
            Span::styled("logs ", Style::default().add_modifier(Modifier::BOLD)),
            Span::raw(title),
            Span::styled(format!("  [{follow}]"), Style::default().fg(Color::DarkGray)),
        ])),
        header_area,
    );

    let height = body_area.height as usize;
    let total = logs.map_or(0, LogBuffer::len);
    app.log_total = total;
    app.log_height = height;
    let start = app.log_view.visible_start(total, height);

    if let Some(buffer) = logs {
        let lines: Vec<Line<'_>> = buffer
            .window(start, height)
            .into_iter()
            .enumerate()
            .map(|(offset, line)| {
                let index = start + offset;
                let is_match = app.search.matches.binary_search(&index).is_ok();
                let is_current = app
                    .search
                    .matches
                    .get(app.search.current)
                    .is_some_and(|&m| m == index);
                let mut style = Style::default();
                if is_current {
                    style = style.bg(Color::Yellow).fg(Color::Black);
                } else if is_match {
                    style = style.bg(Color::DarkGray);
                }
                Line::from(vec![
                    Span::styled(
                        format!("[{}] ", line.source),
                        Style::default().fg(name_color(&line.source)),
                    ),
                    Span::styled(line.text, style),
                ])
            })
            .collect();
        frame.render_widget(Paragraph::new(lines), body_area);
    }

    let footer = if app.search.input {
        Line::from(vec![
            Span::styled("/", Style::default().fg(Color::Cyan)),
            Span::raw(app.search.query.clone()),
        ])
    } else if app.search.matches.is_empty() {
        Line::from(Span::styled(
            "Esc:back  c:container  p:pod  C:clear  G:follow  g:top  /:search",
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        Line::from(Span::styled(
            format!(
                "match {}/{}  n:next  N:prev",
                app.search.current + 1,
                app.search.matches.len()
            ),
            Style::default().fg(Color::DarkGray),
        ))
    };
    frame.render_widget(Paragraph::new(footer), footer_area);
}

// ─── Describe / help ──────────────────────────────────────────────────────────

fn draw_describe(frame: &mut Frame<'_>, app: &App) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title(format!(" {} ", app.describe.title));
    let text: Vec<Line<'_>> = app
        .describe
        .text
        .lines()
        .skip(app.describe.scroll)
        .map(Line::from)
        .collect();
    frame.render_widget(Paragraph::new(text).block(block), frame.area());
}

const HELP_TEXT: &[&str] = &[
    "kubewatch — live multi-context Kubernetes observer",
    "",
    "List mode",
    "  ↑/↓ j/k     move selection        g/G       first/last row",
    "  ←/→         pick sort column      s         cycle sort asc/desc/off",
    "  /           filter rows           Esc       clear filter",
    "  u           toggle grouping       R         refresh now",
    "  l / Enter   stream logs           d         describe",
    "  n           namespaces            c         contexts",
    "  r           resource kinds        D/Del     delete (confirms)",
    "  q           quit",
    "",
    "Log mode",
    "  ↑/↓         scroll (pauses follow)",
    "  G/g         follow bottom / pin top",
    "  c/p         cycle container / pod  C        clear buffer",
    "  /           search   n/N   next/previous match",
    "  Esc         back to list",
    "",
    "Filters may reference a named definition filter as @name.",
];

fn draw_help(frame: &mut Frame<'_>, app: &App) {
    let block = Block::default().borders(Borders::ALL).title(" help ");
    let text: Vec<Line<'_>> = HELP_TEXT
        .iter()
        .skip(app.help_scroll)
        .map(|l| Line::from(*l))
        .collect();
    frame.render_widget(Paragraph::new(text).block(block), frame.area());
}

// ─── Popups ───────────────────────────────────────────────────────────────────

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let w = width.min(area.width);
    let h = height.min(area.height);
    Rect {
        x: area.x + (area.width - w) / 2,
        y: area.y + (area.height - h) / 2,
        width: w,
        height: h,
    }
}

fn draw_confirm(frame: &mut Frame<'_>, app: &App) {
    let Some(confirm) = &app.confirm else { return };
    let area = centered(frame.area(), 60, 5);
    frame.render_widget(Clear, area);
    let block = Block::default()
        .borders(Borders::ALL)
        .title(" confirm ")
        .border_style(Style::default().fg(Color::Red));
    let text = vec![
        Line::from(confirm.message.clone()),
        Line::from(""),
        Line::from(Span::styled(
            "y:confirm   n/Esc:cancel",
            Style::default().fg(Color::DarkGray),
        )),
    ];
    frame.render_widget(Paragraph::new(text).block(block), area);
}

fn draw_selector(frame: &mut Frame<'_>, app: &App) {
    let area = centered(frame.area(), 48, 16);
    frame.render_widget(Clear, area);
    let block = Block::default()
        .borders(Borders::ALL)
        .title(format!(" {} ", app.selector.title));
    let mut lines = vec![Line::from(vec![
        Span::styled("❯ ", Style::default().fg(Color::Cyan)),
        Span::raw(app.selector.filter.clone()),
    ])];
    for (i, item) in app.selector.visible().into_iter().enumerate() {
        let mut style = Style::default();
        if i == app.selector.cursor {
            style = style.add_modifier(Modifier::REVERSED);
        }
        let mark = if app.selector.checked.contains(item) {
            "✓ "
        } else {
            "  "
        };
        lines.push(Line::from(Span::styled(format!("{mark}{item}"), style)));
    }
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

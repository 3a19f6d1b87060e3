//! The rendering/transform pipeline: resources in, ordered rows out.
//!
//! Filter → render columns → uniq-key → group/aggregate → stable sort →
//! identities. Given identical input the output ordering is identical, and
//! reordering the input does not change the output: every comparison ends in
//! the `(context, namespace, name)` tie-break.

use std::sync::Arc;

use crate::definition::{AggregateOp, Align, ColumnSpec, ResourceDefinition};
use crate::resource::{Resource, ResourceIdentity};
use crate::style::strip_markup;
use crate::template::TemplateEngine;

/// Synthetic column headers injected by the pipeline.
pub const CONTEXT_COLUMN: &str = "CONTEXT";
pub const NAMESPACE_COLUMN: &str = "NAMESPACE";

/// Named-filter references are spelled `@name`; anything else is a
/// case-insensitive substring match over the rendered cells.
pub const NAMED_FILTER_PREFIX: char = '@';

// ─── Sort state ───────────────────────────────────────────────────────────────

/// Active sort: a column name and a direction, or no column at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortSpec {
    pub column: Option<String>,
    pub ascending: bool,
}

impl SortSpec {
    /// Cycle `ascending → descending → none` on the current column; a
    /// different column restarts the cycle ascending.
    pub fn cycle(&mut self, column: &str) {
        match (self.column.as_deref(), self.ascending) {
            (Some(current), true) if current == column => self.ascending = false,
            (Some(current), false) if current == column => self.column = None,
            _ => {
                self.column = Some(column.to_string());
                self.ascending = true;
            }
        }
    }
}

/// Flags the mode machine hands the pipeline for each pass.
#[derive(Debug, Clone, Default)]
pub struct RenderFlags {
    pub show_namespace: bool,
    pub multi_context: bool,
    pub sort: SortSpec,
    pub filter: String,
    pub grouping: bool,
}

// ─── Output ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Row {
    pub identity: ResourceIdentity,
    /// One cell per effective column, possibly carrying inline color markup.
    pub cells: Vec<String>,
    /// Number of resources collapsed into this row (1 unless grouped).
    pub count: usize,
}

/// The immutable, ordered output of one rendering pass.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub version: u64,
    pub definition: Option<Arc<ResourceDefinition>>,
    /// Effective columns: synthetic CONTEXT/NAMESPACE first, then the
    /// definition's columns.
    pub columns: Vec<ColumnSpec>,
    pub rows: Vec<Row>,
    pub flags: RenderFlags,
    /// Contexts where the kind could not be fetched, with the reason.
    pub unavailable: Vec<(String, String)>,
    /// Contexts currently served from a stale cache entry.
    pub stale: Vec<String>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self {
            version: 0,
            definition: None,
            columns: Vec::new(),
            rows: Vec::new(),
            flags: RenderFlags::default(),
            unavailable: Vec::new(),
            stale: Vec::new(),
        }
    }
}

fn synthetic_column(name: &str, width: u16) -> ColumnSpec {
    ColumnSpec {
        name: name.to_string(),
        template: String::new(),
        width,
        priority: 90,
        align: Align::Left,
        sortable: true,
        sort_key: None,
        condition: None,
    }
}

// ─── Pipeline ─────────────────────────────────────────────────────────────────

struct Working<'a> {
    first: &'a Resource,
    cells: Vec<String>,
    count: usize,
}

pub fn render_snapshot(
    version: u64,
    definition: &Arc<ResourceDefinition>,
    engine: &TemplateEngine,
    flags: &RenderFlags,
    resources: &[Resource],
    unavailable: Vec<(String, String)>,
    stale: Vec<String>,
) -> Snapshot {
    let mut columns = Vec::new();
    if flags.multi_context {
        columns.push(synthetic_column(CONTEXT_COLUMN, 16));
    }
    if flags.show_namespace && definition.namespaced {
        columns.push(synthetic_column(NAMESPACE_COLUMN, 16));
    }
    let synthetic = columns.len();
    columns.extend(definition.columns.iter().cloned());

    // Filter, then render every surviving resource's cells.
    let mut working: Vec<Working<'_>> = resources
        .iter()
        .filter(|r| matches_filter(definition, engine, &flags.filter, r))
        .map(|r| Working {
            first: r,
            cells: render_cells(definition, engine, flags, r),
            count: 1,
        })
        .collect();
    // Substring filtering happens over rendered cells; a named filter was
    // already applied against the raw object above.
    if !flags.filter.is_empty() && !flags.filter.starts_with(NAMED_FILTER_PREFIX) {
        let needle = flags.filter.to_lowercase();
        working.retain(|w| {
            w.cells
                .iter()
                .any(|cell| strip_markup(cell).to_lowercase().contains(&needle))
        });
    }

    if flags.grouping && definition.grouping_enabled() {
        working = group_and_aggregate(definition, engine, &columns, synthetic, working);
    }

    sort_rows(definition, engine, &columns, flags, &mut working);

    let rows = working
        .into_iter()
        .map(|w| Row {
            identity: w.first.identity(&definition.gvk.kind),
            cells: w.cells,
            count: w.count,
        })
        .collect();

    Snapshot {
        version,
        definition: Some(Arc::clone(definition)),
        columns,
        rows,
        flags: flags.clone(),
        unavailable,
        stale,
    }
}

fn matches_filter(
    definition: &ResourceDefinition,
    engine: &TemplateEngine,
    filter: &str,
    resource: &Resource,
) -> bool {
    let Some(name) = filter.strip_prefix(NAMED_FILTER_PREFIX) else {
        return true;
    };
    match definition.filter(name) {
        Some(spec) => engine.truthy(&spec.condition, &resource.object),
        // Unknown filter name: match nothing rather than silently everything.
        None => false,
    }
}

fn render_cells(
    definition: &ResourceDefinition,
    engine: &TemplateEngine,
    flags: &RenderFlags,
    resource: &Resource,
) -> Vec<String> {
    let mut cells = Vec::with_capacity(definition.columns.len() + 2);
    if flags.multi_context {
        cells.push(resource.context.clone());
    }
    if flags.show_namespace && definition.namespaced {
        cells.push(resource.namespace().to_string());
    }
    for column in &definition.columns {
        let suppressed = column
            .condition
            .as_deref()
            .is_some_and(|cond| !engine.truthy(cond, &resource.object));
        if suppressed {
            cells.push(String::new());
        } else {
            cells.push(engine.render_or_error(&column.template, &resource.object));
        }
    }
    cells
}

// ─── Grouping ─────────────────────────────────────────────────────────────────

fn uniq_key(
    definition: &ResourceDefinition,
    engine: &TemplateEngine,
    resource: &Resource,
) -> String {
    let group_by = definition
        .grouping
        .as_ref()
        .map(|g| g.group_by.as_slice())
        .unwrap_or_default();
    group_by
        .iter()
        .map(|template| engine.render_or_error(template, &resource.object))
        .collect::<Vec<_>>()
        .join("\u{1f}")
}

fn group_and_aggregate<'a>(
    definition: &ResourceDefinition,
    engine: &TemplateEngine,
    columns: &[ColumnSpec],
    synthetic: usize,
    working: Vec<Working<'a>>,
) -> Vec<Working<'a>> {
    let mut order: Vec<String> = Vec::new();
    let mut buckets: std::collections::HashMap<String, Vec<Working<'a>>> =
        std::collections::HashMap::new();
    for item in working {
        let key = uniq_key(definition, engine, item.first);
        if !buckets.contains_key(&key) {
            order.push(key.clone());
        }
        buckets.entry(key).or_default().push(item);
    }

    let aggregations = definition
        .grouping
        .as_ref()
        .map(|g| g.aggregations.as_slice())
        .unwrap_or_default();

    order
        .into_iter()
        .filter_map(|key| buckets.remove(&key))
        .map(|members| {
            let count = members.iter().map(|m| m.count).sum();
            let mut cells = members[0].cells.clone();
            for agg in aggregations {
                let Some(idx) = columns.iter().position(|c| c.name == agg.column) else {
                    continue;
                };
                // Synthetic columns never aggregate.
                if idx < synthetic {
                    continue;
                }
                cells[idx] = aggregate_cell(agg.op, &members, idx, count);
            }
            if count > 1 {
                // Mark collapsed rows on the first definition column.
                if let Some(cell) = cells.get_mut(synthetic) {
                    cell.push_str(&format!(" ×{count}"));
                }
            }
            Working {
                first: members[0].first,
                cells,
                count,
            }
        })
        .collect()
}

fn aggregate_cell(op: AggregateOp, members: &[Working<'_>], idx: usize, count: usize) -> String {
    if op == AggregateOp::Count {
        return count.to_string();
    }
    let values: Vec<f64> = members
        .iter()
        .filter_map(|m| strip_markup(&m.cells[idx]).trim().parse().ok())
        .collect();
    if values.is_empty() {
        return members[0].cells[idx].clone();
    }
    let result = match op {
        AggregateOp::Sum => values.iter().sum(),
        AggregateOp::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        AggregateOp::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        AggregateOp::Count => return count.to_string(),
    };
    format_number(result)
}

fn format_number(n: f64) -> String {
    if (n.fract()).abs() < f64::EPSILON {
        #[allow(clippy::cast_possible_truncation)]
        let whole = n as i64;
        return format!("{whole}");
    }
    format!("{n:.1}")
}

// ─── Sorting ──────────────────────────────────────────────────────────────────

fn sort_rows(
    definition: &ResourceDefinition,
    engine: &TemplateEngine,
    columns: &[ColumnSpec],
    flags: &RenderFlags,
    working: &mut [Working<'_>],
) {
    let sort_column = flags
        .sort
        .column
        .as_deref()
        .and_then(|name| columns.iter().position(|c| c.name == name));

    let primary = |w: &Working<'_>| -> String {
        match sort_column {
            Some(idx) => {
                let column = &columns[idx];
                match &column.sort_key {
                    Some(template) => engine.render_or_error(template, &w.first.object),
                    None => strip_markup(&w.cells[idx]),
                }
            }
            None => String::new(),
        }
    };

    working.sort_by(|a, b| {
        let pa = primary(a);
        let pb = primary(b);
        let ordering = compare_values(&pa, &pb);
        let ordering = if flags.sort.ascending || sort_column.is_none() {
            ordering
        } else {
            ordering.reverse()
        };
        // Ties always break ascending on (context, namespace, name) so the
        // displayed order survives refreshes and input permutations.
        ordering.then_with(|| {
            let ka = (a.first.context.as_str(), a.first.namespace(), a.first.name());
            let kb = (b.first.context.as_str(), b.first.namespace(), b.first.name());
            ka.cmp(&kb)
        })
    });
}

/// Numeric-aware comparison: two parseable numbers compare numerically,
/// everything else compares case-insensitively as text.
fn compare_values(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
        (Ok(na), Ok(nb)) => na.partial_cmp(&nb).unwrap_or(std::cmp::Ordering::Equal),
        _ => a.to_lowercase().cmp(&b.to_lowercase()),
    }
}

//! Template engine: compiles `{{ … }}` pipelines and renders them against
//! JSON object trees.
//!
//! Templates are pure — no I/O, no side effects, and no time-dependent
//! output outside the explicit time helpers (`age`, `ago`, `now`). Rendered
//! results are cached by `(template, data-hash)` with a five-minute TTL in an
//! LRU-bounded map; compiled pipelines are cached separately for the life of
//! the process.
//!
//! A template failure never takes a row down: [`TemplateEngine::render_or_error`]
//! yields the error text as the cell value and counts it.

pub mod funcs;
pub mod value;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use self::value::{display, hash_value, lookup};

pub const RENDER_CACHE_TTL: Duration = Duration::from_secs(300);
pub const RENDER_CACHE_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("{function}: expected {expected} argument(s), got {got}")]
    Arity {
        function: &'static str,
        expected: &'static str,
        got: usize,
    },
    #[error("{function}: {message}")]
    Invalid {
        function: &'static str,
        message: String,
    },
}

// ─── Compiled representation ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    /// Dotted path into the data value; empty means the value itself.
    Path(Vec<String>),
    Str(String),
    Num(f64),
    Bool(bool),
}

#[derive(Debug, Clone, PartialEq)]
enum Stage {
    /// A bare operand opening a pipeline.
    Value(Operand),
    /// A catalog function call.
    Call { name: String, args: Vec<Operand> },
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Expr(Vec<Stage>),
}

/// A compiled template, ready to render against any data value.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub fn compile(text: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut rest = text;
        let mut offset = 0;
        while let Some(open) = rest.find("{{") {
            if open > 0 {
                segments.push(Segment::Text(rest[..open].to_string()));
            }
            let after_open = &rest[open + 2..];
            let close = after_open.find("}}").ok_or(TemplateError::Parse {
                offset: offset + open,
                message: "unterminated '{{'".to_string(),
            })?;
            let expr = &after_open[..close];
            segments.push(Segment::Expr(parse_pipeline(expr, offset + open + 2)?));
            offset += open + 2 + close + 2;
            rest = &after_open[close + 2..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }
        Ok(Self { segments })
    }

    pub fn render(&self, data: &Value) -> Result<String, TemplateError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Expr(stages) => out.push_str(&display(&eval_pipeline(stages, data)?)),
            }
        }
        Ok(out)
    }
}

// ─── Parser ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Pipe,
    Ident(String),
    Operand(Operand),
}

fn parse_pipeline(expr: &str, base_offset: usize) -> Result<Vec<Stage>, TemplateError> {
    let tokens = tokenize(expr, base_offset)?;
    if tokens.is_empty() {
        return Err(TemplateError::Parse {
            offset: base_offset,
            message: "empty expression".to_string(),
        });
    }
    let mut stages = Vec::new();
    for (i, group) in tokens.split(|t| *t == Token::Pipe).enumerate() {
        let stage = parse_stage(group, i > 0, base_offset)?;
        stages.push(stage);
    }
    Ok(stages)
}

fn parse_stage(tokens: &[Token], piped: bool, offset: usize) -> Result<Stage, TemplateError> {
    match tokens {
        [] => Err(TemplateError::Parse {
            offset,
            message: "empty pipeline stage".to_string(),
        }),
        [Token::Ident(name), rest @ ..] => {
            let args = rest
                .iter()
                .map(|t| match t {
                    Token::Operand(op) => Ok(op.clone()),
                    _ => Err(TemplateError::Parse {
                        offset,
                        message: "unexpected token in argument list".to_string(),
                    }),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Stage::Call {
                name: name.clone(),
                args,
            })
        }
        [Token::Operand(op)] if !piped => Ok(Stage::Value(op.clone())),
        [Token::Operand(_)] => Err(TemplateError::Parse {
            offset,
            message: "expected a function after '|'".to_string(),
        }),
        _ => Err(TemplateError::Parse {
            offset,
            message: "expected a single value or a function call".to_string(),
        }),
    }
}

fn tokenize(expr: &str, base_offset: usize) -> Result<Vec<Token>, TemplateError> {
    let mut tokens = Vec::new();
    let mut chars = expr.char_indices().peekable();
    while let Some(&(pos, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '|' => {
                chars.next();
                tokens.push(Token::Pipe);
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    match c {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => match chars.next() {
                            Some((_, 'n')) => s.push('\n'),
                            Some((_, 't')) => s.push('\t'),
                            Some((_, other)) => s.push(other),
                            None => break,
                        },
                        other => s.push(other),
                    }
                }
                if !closed {
                    return Err(TemplateError::Parse {
                        offset: base_offset + pos,
                        message: "unterminated string literal".to_string(),
                    });
                }
                tokens.push(Token::Operand(Operand::Str(s)));
            }
            '.' => {
                let word = take_word(&mut chars);
                let segments: Vec<String> = word
                    .split('.')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
                tokens.push(Token::Operand(Operand::Path(segments)));
            }
            c if c.is_ascii_digit() || c == '-' => {
                let word = take_word(&mut chars);
                let num: f64 = word.parse().map_err(|_| TemplateError::Parse {
                    offset: base_offset + pos,
                    message: format!("'{word}' is not a number"),
                })?;
                tokens.push(Token::Operand(Operand::Num(num)));
            }
            _ => {
                let word = take_word(&mut chars);
                match word.as_str() {
                    "true" => tokens.push(Token::Operand(Operand::Bool(true))),
                    "false" => tokens.push(Token::Operand(Operand::Bool(false))),
                    _ if funcs::is_function(&word) => tokens.push(Token::Ident(word)),
                    _ => {
                        return Err(TemplateError::UnknownFunction(word));
                    }
                }
            }
        }
    }
    Ok(tokens)
}

fn take_word(chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>) -> String {
    let mut word = String::new();
    while let Some(&(_, c)) = chars.peek() {
        if c.is_whitespace() || c == '|' || c == '"' {
            break;
        }
        word.push(c);
        chars.next();
    }
    word
}

// ─── Evaluator ────────────────────────────────────────────────────────────────

fn eval_operand(op: &Operand, data: &Value) -> Value {
    match op {
        Operand::Path(path) => {
            if path.is_empty() {
                data.clone()
            } else {
                lookup(data, path).cloned().unwrap_or(Value::Null)
            }
        }
        Operand::Str(s) => Value::String(s.clone()),
        Operand::Num(n) => {
            // Keep whole numbers integral so "0" doesn't render as "0.0".
            if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
                #[allow(clippy::cast_possible_truncation)]
                let whole = *n as i64;
                Value::Number(serde_json::Number::from(whole))
            } else {
                serde_json::Number::from_f64(*n).map_or(Value::Null, Value::Number)
            }
        }
        Operand::Bool(b) => Value::Bool(*b),
    }
}

fn eval_pipeline(stages: &[Stage], data: &Value) -> Result<Value, TemplateError> {
    let mut piped: Option<Value> = None;
    for stage in stages {
        piped = Some(match stage {
            Stage::Value(op) => eval_operand(op, data),
            Stage::Call { name, args } => {
                let mut values: Vec<Value> =
                    args.iter().map(|a| eval_operand(a, data)).collect();
                if let Some(prev) = piped.take() {
                    values.push(prev);
                }
                funcs::call(name, &values)?
            }
        });
    }
    Ok(piped.unwrap_or(Value::Null))
}

// ─── Engine with compile + render caches ──────────────────────────────────────

#[derive(Default)]
struct RenderCache {
    map: HashMap<(String, u64), (String, Instant)>,
    access: Vec<(String, u64)>,
}

impl RenderCache {
    fn get(&mut self, key: &(String, u64)) -> Option<String> {
        let fresh = self
            .map
            .get(key)
            .filter(|(_, at)| at.elapsed() <= RENDER_CACHE_TTL)
            .map(|(text, _)| text.clone());
        if fresh.is_some() {
            if let Some(pos) = self.access.iter().position(|k| k == key) {
                let key = self.access.remove(pos);
                self.access.push(key);
            }
        }
        fresh
    }

    fn insert(&mut self, key: (String, u64), text: String) {
        if self.map.contains_key(&key) {
            self.map.insert(key.clone(), (text, Instant::now()));
            if let Some(pos) = self.access.iter().position(|k| *k == key) {
                let key = self.access.remove(pos);
                self.access.push(key);
            }
            return;
        }
        while self.map.len() >= RENDER_CACHE_CAPACITY {
            let victim = self.access.remove(0);
            self.map.remove(&victim);
        }
        self.map.insert(key.clone(), (text, Instant::now()));
        self.access.push(key);
    }
}

/// Shared template engine: one per process, used by the rendering pipeline
/// and by log/describe views for their minor interpolations.
#[derive(Default)]
pub struct TemplateEngine {
    compiled: Mutex<HashMap<String, Result<Arc<Template>, TemplateError>>>,
    rendered: Mutex<RenderCache>,
    render_errors: AtomicU64,
}

impl TemplateEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn compiled(&self, text: &str) -> Result<Arc<Template>, TemplateError> {
        let mut cache = self.compiled.lock().expect("template cache poisoned");
        cache
            .entry(text.to_string())
            .or_insert_with(|| Template::compile(text).map(Arc::new))
            .clone()
    }

    /// Render a template against a data value, consulting the result cache.
    pub fn render(&self, template: &str, data: &Value) -> Result<String, TemplateError> {
        let key = (template.to_string(), hash_value(data));
        if let Some(hit) = self.rendered.lock().expect("render cache poisoned").get(&key) {
            return Ok(hit);
        }
        let compiled = self.compiled(template)?;
        let text = compiled.render(data)?;
        self.rendered
            .lock()
            .expect("render cache poisoned")
            .insert(key, text.clone());
        Ok(text)
    }

    /// Render, degrading to the error text on failure. The failure is logged
    /// and counted; the cell renders the message so the row still completes.
    pub fn render_or_error(&self, template: &str, data: &Value) -> String {
        match self.render(template, data) {
            Ok(text) => text,
            Err(err) => {
                self.render_errors.fetch_add(1, Ordering::Relaxed);
                warn!(%err, template, "template render failed");
                format!("<error: {err}>")
            }
        }
    }

    /// Evaluate a boolean condition template: render, then apply string
    /// truthiness to the output ("" / "false" / "0" / "null" are false).
    pub fn truthy(&self, template: &str, data: &Value) -> bool {
        match self.render(template, data) {
            Ok(text) => {
                let t = text.trim();
                !(t.is_empty() || t == "false" || t == "0" || t == "null")
            }
            Err(err) => {
                self.render_errors.fetch_add(1, Ordering::Relaxed);
                warn!(%err, template, "condition render failed");
                false
            }
        }
    }

    /// Total number of failed renders since startup.
    pub fn render_errors(&self) -> u64 {
        self.render_errors.load(Ordering::Relaxed)
    }
}

//! The template function catalog.
//!
//! A closed, enumerated set: string, list and date helpers, byte/millicore
//! humanization, `printf`-style formatting, color markup, and the
//! Kubernetes-specific accessors the default definitions rely on. There is
//! no reflection; a name not listed here is an error at render time.

use k8s_openapi::jiff::{fmt::strtime, tz::TimeZone, SpanRound, Timestamp, Unit};
use serde_json::Value;

use super::value::{as_number, display, truthy};
use super::TemplateError;
use crate::style::{self, StatusHealth};

/// True when `name` is a catalog function. The parser uses this to tell a
/// function head from a bare operand.
pub fn is_function(name: &str) -> bool {
    FUNCTIONS.contains(&name)
}

const FUNCTIONS: &[&str] = &[
    "age",
    "ago",
    "annotation",
    "color",
    "containerImages",
    "dateFormat",
    "default",
    "first",
    "humanizeBytes",
    "ingressHosts",
    "join",
    "label",
    "last",
    "len",
    "loadBalancerAddress",
    "lower",
    "millicores",
    "now",
    "printf",
    "readyContainers",
    "readyRatio",
    "replace",
    "restartCount",
    "servicePorts",
    "statusColor",
    "ternary",
    "trim",
    "trunc",
    "upper",
];

/// Invoke a catalog function. Pipelines append the piped value as the final
/// argument before calling.
pub fn call(name: &str, args: &[Value]) -> Result<Value, TemplateError> {
    match name {
        "age" => one(args, "age").map(fmt_age),
        "ago" => one(args, "ago").map(|v| match fmt_age(v) {
            Value::String(s) if !s.is_empty() => Value::String(format!("{s} ago")),
            other => other,
        }),
        "now" => {
            expect_arity(args, 0, "now", "0")?;
            Ok(Value::String(Timestamp::now().to_string()))
        }
        "dateFormat" => {
            expect_arity(args, 2, "dateFormat", "2")?;
            date_format(&display(&args[0]), &display(&args[1]))
        }
        "humanizeBytes" => one(args, "humanizeBytes").map(|v| {
            parse_quantity(v).map_or(Value::String(display(v)), |b| {
                Value::String(fmt_bytes(b))
            })
        }),
        "millicores" => one(args, "millicores").map(|v| {
            parse_cpu(v).map_or(Value::String(display(v)), |m| {
                Value::String(format!("{m}m"))
            })
        }),
        "default" => {
            expect_arity(args, 2, "default", "2")?;
            Ok(if truthy(&args[1]) {
                args[1].clone()
            } else {
                args[0].clone()
            })
        }
        "printf" => printf(args),
        "upper" => one(args, "upper").map(|v| Value::String(display(v).to_uppercase())),
        "lower" => one(args, "lower").map(|v| Value::String(display(v).to_lowercase())),
        "trim" => one(args, "trim").map(|v| Value::String(display(v).trim().to_string())),
        "trunc" => {
            expect_arity(args, 2, "trunc", "2")?;
            let n = as_number(&args[0]).ok_or(TemplateError::Invalid {
                function: "trunc",
                message: "length must be a number".to_string(),
            })?;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let n = n.max(0.0) as usize;
            Ok(Value::String(display(&args[1]).chars().take(n).collect()))
        }
        "replace" => {
            expect_arity(args, 3, "replace", "3")?;
            let (old, new, text) = (display(&args[0]), display(&args[1]), display(&args[2]));
            Ok(Value::String(text.replace(&old, &new)))
        }
        "first" => one(args, "first").map(|v| match v {
            Value::Array(items) => items.first().cloned().unwrap_or(Value::Null),
            other => other.clone(),
        }),
        "last" => one(args, "last").map(|v| match v {
            Value::Array(items) => items.last().cloned().unwrap_or(Value::Null),
            other => other.clone(),
        }),
        "join" => {
            expect_arity(args, 2, "join", "2")?;
            let sep = display(&args[0]);
            match &args[1] {
                Value::Array(items) => Ok(Value::String(
                    items.iter().map(display).collect::<Vec<_>>().join(&sep),
                )),
                other => Ok(Value::String(display(other))),
            }
        }
        "len" => one(args, "len").map(|v| {
            let n = match v {
                Value::Array(items) => items.len(),
                Value::Object(map) => map.len(),
                Value::String(s) => s.chars().count(),
                Value::Null => 0,
                _ => 1,
            };
            Value::Number(n.into())
        }),
        "ternary" => {
            expect_arity(args, 3, "ternary", "3")?;
            Ok(if truthy(&args[2]) {
                args[0].clone()
            } else {
                args[1].clone()
            })
        }
        "color" => {
            expect_arity(args, 2, "color", "2")?;
            let name = display(&args[0]);
            let text = display(&args[1]);
            if style::palette_color(&name).is_some() {
                Ok(Value::String(format!("[{name}]{text}[/]")))
            } else {
                Ok(Value::String(text))
            }
        }
        "statusColor" => one(args, "statusColor").map(|v| {
            let text = display(v);
            let palette = StatusHealth::classify(&text).palette_name();
            Value::String(format!("[{palette}]{text}[/]"))
        }),
        "label" => meta_entry(args, "label", "labels"),
        "annotation" => meta_entry(args, "annotation", "annotations"),
        "readyContainers" => one(args, "readyContainers").map(ready_containers),
        "restartCount" => one(args, "restartCount").map(restart_count),
        "readyRatio" => one(args, "readyRatio").map(ready_ratio),
        "containerImages" => one(args, "containerImages").map(container_images),
        "ingressHosts" => one(args, "ingressHosts").map(ingress_hosts),
        "loadBalancerAddress" => one(args, "loadBalancerAddress").map(load_balancer_address),
        "servicePorts" => one(args, "servicePorts").map(service_ports),
        other => Err(TemplateError::UnknownFunction(other.to_string())),
    }
}

fn expect_arity(
    args: &[Value],
    want: usize,
    function: &'static str,
    expected: &'static str,
) -> Result<(), TemplateError> {
    if args.len() == want {
        Ok(())
    } else {
        Err(TemplateError::Arity {
            function,
            expected,
            got: args.len(),
        })
    }
}

fn one<'a>(args: &'a [Value], function: &'static str) -> Result<&'a Value, TemplateError> {
    if args.len() == 1 {
        Ok(&args[0])
    } else {
        Err(TemplateError::Arity {
            function,
            expected: "1",
            got: args.len(),
        })
    }
}

// ─── Date helpers ─────────────────────────────────────────────────────────────

/// Duration since an RFC 3339 timestamp, compressed to the largest unit:
/// "3d", "7h", "12m", "45s". Unparseable input renders "?".
fn fmt_age(v: &Value) -> Value {
    let text = display(v);
    let age = text
        .parse::<Timestamp>()
        .ok()
        .and_then(|ts| Timestamp::now().since(ts).ok())
        .and_then(|span| {
            span.round(
                SpanRound::new()
                    .largest(Unit::Day)
                    .days_are_24_hours()
                    .smallest(Unit::Second),
            )
            .ok()
        })
        .map(|span| {
            match (
                span.get_days(),
                span.get_hours(),
                span.get_minutes(),
                span.get_seconds(),
            ) {
                (d, _, _, _) if d > 0 => format!("{d}d"),
                (_, h, _, _) if h > 0 => format!("{h}h"),
                (_, _, m, _) if m > 0 => format!("{m}m"),
                (_, _, _, s) => format!("{s}s"),
            }
        });
    Value::String(age.unwrap_or_else(|| "?".to_string()))
}

fn date_format(fmt: &str, ts: &str) -> Result<Value, TemplateError> {
    let ts: Timestamp = ts.parse().map_err(|_| TemplateError::Invalid {
        function: "dateFormat",
        message: format!("'{ts}' is not an RFC 3339 timestamp"),
    })?;
    let zoned = ts.to_zoned(TimeZone::UTC);
    strtime::format(fmt, &zoned)
        .map(Value::String)
        .map_err(|err| TemplateError::Invalid {
            function: "dateFormat",
            message: err.to_string(),
        })
}

// ─── Quantity helpers ─────────────────────────────────────────────────────────

/// Parse a Kubernetes quantity ("512Mi", "2G", plain bytes) to bytes.
fn parse_quantity(v: &Value) -> Option<f64> {
    if let Some(n) = as_number(v) {
        return Some(n);
    }
    let text = display(v);
    let text = text.trim();
    const SUFFIXES: &[(&str, f64)] = &[
        ("Pi", 1_125_899_906_842_624.0),
        ("Ti", 1_099_511_627_776.0),
        ("Gi", 1_073_741_824.0),
        ("Mi", 1_048_576.0),
        ("Ki", 1024.0),
        ("P", 1e15),
        ("T", 1e12),
        ("G", 1e9),
        ("M", 1e6),
        ("k", 1e3),
        ("K", 1e3),
    ];
    for (suffix, factor) in SUFFIXES {
        if let Some(num) = text.strip_suffix(suffix) {
            return num.trim().parse::<f64>().ok().map(|n| n * factor);
        }
    }
    text.parse().ok()
}

fn fmt_bytes(bytes: f64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB", "PiB"];
    let mut value = bytes.max(0.0);
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 || value >= 10.0 {
        format!("{}{}", value.round(), UNITS[unit])
    } else {
        format!("{:.1}{}", value, UNITS[unit])
    }
}

/// Parse a CPU quantity to whole millicores: "250m" → 250, "2" → 2000.
fn parse_cpu(v: &Value) -> Option<i64> {
    if let Some(n) = as_number(v) {
        #[allow(clippy::cast_possible_truncation)]
        return Some((n * 1000.0).round() as i64);
    }
    let text = display(v);
    let text = text.trim();
    if let Some(m) = text.strip_suffix('m') {
        return m.trim().parse::<f64>().ok().map(|n| {
            #[allow(clippy::cast_possible_truncation)]
            let millis = n.round() as i64;
            millis
        });
    }
    text.parse::<f64>().ok().map(|n| {
        #[allow(clippy::cast_possible_truncation)]
        let millis = (n * 1000.0).round() as i64;
        millis
    })
}

// ─── printf ───────────────────────────────────────────────────────────────────

/// Minimal printf: `%s %d %f %x %%` with optional `-` (left align), `0`
/// (zero pad), width and `.precision`. Enough for column templates; anything
/// fancier belongs in a dedicated column.
fn printf(args: &[Value]) -> Result<Value, TemplateError> {
    let Some((fmt, rest)) = args.split_first() else {
        return Err(TemplateError::Arity {
            function: "printf",
            expected: "at least 1",
            got: 0,
        });
    };
    let fmt = display(fmt);
    let mut out = String::new();
    let mut next_arg = 0usize;
    let mut chars = fmt.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut left = false;
        let mut zero = false;
        while let Some(&flag) = chars.peek() {
            match flag {
                '-' => {
                    left = true;
                    chars.next();
                }
                '0' => {
                    zero = true;
                    chars.next();
                }
                _ => break,
            }
        }
        let mut width = 0usize;
        while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
            width = width * 10 + d as usize;
            chars.next();
        }
        let mut precision: Option<usize> = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut p = 0usize;
            while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
                p = p * 10 + d as usize;
                chars.next();
            }
            precision = Some(p);
        }
        let verb = chars.next().ok_or(TemplateError::Invalid {
            function: "printf",
            message: "dangling '%' at end of format".to_string(),
        })?;
        if verb == '%' {
            out.push('%');
            continue;
        }
        let arg = rest.get(next_arg).ok_or(TemplateError::Arity {
            function: "printf",
            expected: "one argument per directive",
            got: args.len(),
        })?;
        next_arg += 1;
        let rendered = match verb {
            's' => {
                let mut s = display(arg);
                if let Some(p) = precision {
                    s = s.chars().take(p).collect();
                }
                s
            }
            'd' => {
                let n = require_number(arg, "printf")?;
                #[allow(clippy::cast_possible_truncation)]
                let whole = n.trunc() as i64;
                format!("{whole}")
            }
            'f' => {
                let n = require_number(arg, "printf")?;
                format!("{:.*}", precision.unwrap_or(6), n)
            }
            'x' => {
                let n = require_number(arg, "printf")?;
                #[allow(clippy::cast_possible_truncation)]
                let whole = n.trunc() as i64;
                format!("{whole:x}")
            }
            other => {
                return Err(TemplateError::Invalid {
                    function: "printf",
                    message: format!("unsupported verb '%{other}'"),
                })
            }
        };
        out.push_str(&pad(&rendered, width, left, zero && !left));
    }
    Ok(Value::String(out))
}

fn require_number(v: &Value, function: &'static str) -> Result<f64, TemplateError> {
    as_number(v).ok_or_else(|| TemplateError::Invalid {
        function,
        message: format!("'{}' is not a number", display(v)),
    })
}

fn pad(s: &str, width: usize, left: bool, zero: bool) -> String {
    let len = s.chars().count();
    if len >= width {
        return s.to_string();
    }
    let fill = if zero { '0' } else { ' ' };
    let padding: String = std::iter::repeat(fill).take(width - len).collect();
    if left {
        format!("{s}{padding}")
    } else if zero && (s.starts_with('-')) {
        // Keep the sign ahead of zero padding.
        format!("-{}{}", padding, &s[1..])
    } else {
        format!("{padding}{s}")
    }
}

// ─── Kubernetes accessors ─────────────────────────────────────────────────────

fn meta_entry(
    args: &[Value],
    function: &'static str,
    section: &str,
) -> Result<Value, TemplateError> {
    expect_arity(args, 2, function, "2")?;
    let key = display(&args[0]);
    let entry = args[1]
        .get("metadata")
        .and_then(|m| m.get(section))
        .and_then(|l| l.get(&key))
        .cloned()
        .unwrap_or(Value::Null);
    Ok(entry)
}

/// "ready/total" over a pod's container statuses, kubectl-style.
fn ready_containers(pod: &Value) -> Value {
    let statuses = pod
        .get("status")
        .and_then(|s| s.get("containerStatuses"))
        .and_then(Value::as_array);
    let total = statuses.map_or_else(
        || {
            pod.get("spec")
                .and_then(|s| s.get("containers"))
                .and_then(Value::as_array)
                .map_or(0, Vec::len)
        },
        Vec::len,
    );
    let ready = statuses.map_or(0, |list| {
        list.iter()
            .filter(|cs| cs.get("ready").and_then(Value::as_bool).unwrap_or(false))
            .count()
    });
    Value::String(format!("{ready}/{total}"))
}

fn restart_count(pod: &Value) -> Value {
    let restarts: i64 = pod
        .get("status")
        .and_then(|s| s.get("containerStatuses"))
        .and_then(Value::as_array)
        .map_or(0, |list| {
            list.iter()
                .filter_map(|cs| cs.get("restartCount").and_then(Value::as_i64))
                .sum()
        });
    Value::Number(restarts.into())
}

/// "ready/desired" replica ratio for deployments and statefulsets.
fn ready_ratio(obj: &Value) -> Value {
    let ready = obj
        .get("status")
        .and_then(|s| s.get("readyReplicas"))
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let desired = obj
        .get("spec")
        .and_then(|s| s.get("replicas"))
        .and_then(Value::as_i64)
        .or_else(|| {
            obj.get("status")
                .and_then(|s| s.get("replicas"))
                .and_then(Value::as_i64)
        })
        .unwrap_or(1);
    Value::String(format!("{ready}/{desired}"))
}

/// Container images from a workload's pod template, or from a pod itself.
fn container_images(obj: &Value) -> Value {
    let containers = obj
        .get("spec")
        .and_then(|s| s.get("template"))
        .and_then(|t| t.get("spec"))
        .and_then(|s| s.get("containers"))
        .or_else(|| obj.get("spec").and_then(|s| s.get("containers")))
        .and_then(Value::as_array);
    let images = containers.map_or_else(String::new, |list| {
        list.iter()
            .filter_map(|c| c.get("image").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(",")
    });
    Value::String(images)
}

fn ingress_hosts(obj: &Value) -> Value {
    let hosts = obj
        .get("spec")
        .and_then(|s| s.get("rules"))
        .and_then(Value::as_array)
        .map_or_else(String::new, |rules| {
            rules
                .iter()
                .map(|r| r.get("host").and_then(Value::as_str).unwrap_or("*"))
                .collect::<Vec<_>>()
                .join(",")
        });
    if hosts.is_empty() {
        Value::String("*".to_string())
    } else {
        Value::String(hosts)
    }
}

fn load_balancer_address(obj: &Value) -> Value {
    let address = obj
        .get("status")
        .and_then(|s| s.get("loadBalancer"))
        .and_then(|lb| lb.get("ingress"))
        .and_then(Value::as_array)
        .and_then(|list| list.first())
        .and_then(|entry| {
            entry
                .get("ip")
                .or_else(|| entry.get("hostname"))
                .and_then(Value::as_str)
        })
        .unwrap_or("<pending>");
    Value::String(address.to_string())
}

fn service_ports(obj: &Value) -> Value {
    let ports = obj
        .get("spec")
        .and_then(|s| s.get("ports"))
        .and_then(Value::as_array)
        .map_or_else(String::new, |list| {
            list.iter()
                .filter_map(|p| {
                    let port = p.get("port").and_then(Value::as_i64)?;
                    let protocol = p.get("protocol").and_then(Value::as_str).unwrap_or("TCP");
                    Some(format!("{port}/{protocol}"))
                })
                .collect::<Vec<_>>()
                .join(",")
        });
    Value::String(ports)
}

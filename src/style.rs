//! Color palette, inline markup, and status health classification.
//!
//! Templates emit color as inline markup — `[green]Running[/]` — so the
//! rendering pipeline stays purely textual; this module resolves markup to
//! ratatui spans at draw time and strips it for matching, sorting and width
//! math.

use ratatui::{
    style::{Color, Style},
    text::{Line, Span},
};

/// Named palette entries usable from the `color` template function.
pub const PALETTE: &[(&str, Color)] = &[
    ("red", Color::Red),
    ("green", Color::Green),
    ("yellow", Color::Yellow),
    ("blue", Color::Blue),
    ("magenta", Color::Magenta),
    ("cyan", Color::Cyan),
    ("gray", Color::DarkGray),
    ("white", Color::White),
];

pub fn palette_color(name: &str) -> Option<Color> {
    PALETTE
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, color)| *color)
}

/// Remove inline color markup, leaving plain cell text.
pub fn strip_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find('[') {
        let after = &rest[open + 1..];
        if let Some(close) = after.find(']') {
            let tag = &after[..close];
            if tag == "/" || palette_color(tag).is_some() {
                out.push_str(&rest[..open]);
                rest = &after[close + 1..];
                continue;
            }
        }
        out.push_str(&rest[..=open]);
        rest = &rest[open + 1..];
    }
    out.push_str(rest);
    out
}

/// Parse inline markup into styled spans. Unknown tags render literally;
/// an unclosed color tag styles the remainder of the text.
pub fn parse_markup(text: &str) -> Line<'static> {
    let mut spans = Vec::new();
    let mut current = Style::default();
    let mut buf = String::new();
    let mut rest = text;
    loop {
        let Some(open) = rest.find('[') else {
            buf.push_str(rest);
            break;
        };
        let after = &rest[open + 1..];
        let Some(close) = after.find(']') else {
            buf.push_str(rest);
            break;
        };
        let tag = &after[..close];
        let style_change = if tag == "/" {
            Some(Style::default())
        } else {
            palette_color(tag).map(|c| Style::default().fg(c))
        };
        match style_change {
            Some(next) => {
                buf.push_str(&rest[..open]);
                if !buf.is_empty() {
                    spans.push(Span::styled(std::mem::take(&mut buf), current));
                }
                current = next;
                rest = &after[close + 1..];
            }
            None => {
                buf.push_str(&rest[..=open]);
                rest = &rest[open + 1..];
            }
        }
    }
    if !buf.is_empty() {
        spans.push(Span::styled(buf, current));
    }
    Line::from(spans)
}

/// Pick a consistent color for a cluster context or log source name based on
/// a hash of the name, so the same source always renders the same color.
pub fn name_color(name: &str) -> Color {
    const CHOICES: &[Color] = &[
        Color::Cyan,
        Color::Magenta,
        Color::Yellow,
        Color::LightGreen,
        Color::LightBlue,
        Color::LightRed,
        Color::LightCyan,
        Color::LightMagenta,
    ];
    let hash: usize = name
        .bytes()
        .fold(0usize, |acc, b| acc.wrapping_add(b as usize));
    CHOICES[hash % CHOICES.len()]
}

// ─── Status health classification ────────────────────────────────────────────

/// Health tier of a rendered status cell, as used by the `statusColor`
/// template function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusHealth {
    /// Broken and staying broken without intervention.
    Critical,
    /// In flux: still starting, still stopping, or only partially ready.
    Warning,
    /// Steady state.
    Healthy,
    /// Gone, or nothing sensible to say.
    Unknown,
}

/// States that will not recover on their own.
const BROKEN_STATES: &[&str] = &[
    "Failed", "Error", "OOMKilled", "NotReady", "Lost", "Evicted", "BackOff",
];

/// Prefixes of container/init waiting reasons that indicate a crash or
/// image-fetch loop rather than ordinary startup.
const BROKEN_PREFIXES: &[&str] = &[
    "CrashLoop",
    "ErrImage",
    "ImagePull",
    "Failed(",
    "Init:Error",
    "Init:ErrImage",
    "Init:ImagePull",
];

/// States that resolve by themselves once the cluster catches up.
const TRANSITIONAL_STATES: &[&str] = &["Pending", "Terminating", "ContainerCreating", "Unknown"];

impl StatusHealth {
    /// Classify a status string into a health tier. Strings this code never
    /// produced (operator conditions, CRD phases) default to healthy so an
    /// unknown value doesn't light the whole table up yellow.
    pub fn classify(status: &str) -> Self {
        if status == "[DELETED]" {
            return Self::Unknown;
        }
        // Replica and readiness ratios ("2/3") count as settled only when
        // complete.
        if let Some((ready, desired)) = status.split_once('/') {
            return if ready == desired {
                Self::Healthy
            } else {
                Self::Warning
            };
        }
        let broken = BROKEN_STATES.contains(&status)
            || BROKEN_PREFIXES.iter().any(|p| status.starts_with(p));
        if broken {
            return Self::Critical;
        }
        if TRANSITIONAL_STATES.contains(&status) || status.starts_with("Init:") {
            return Self::Warning;
        }
        Self::Healthy
    }

    /// The palette name the `statusColor` template function wraps cells in.
    pub fn palette_name(self) -> &'static str {
        match self {
            Self::Critical => "red",
            Self::Warning => "yellow",
            Self::Healthy => "green",
            Self::Unknown => "gray",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_removes_known_tags_only() {
        assert_eq!(strip_markup("[green]Running[/]"), "Running");
        assert_eq!(strip_markup("plain"), "plain");
        assert_eq!(strip_markup("[0/3] ready"), "[0/3] ready");
    }

    #[test]
    fn parse_markup_styles_spans() {
        let line = parse_markup("[red]bad[/] ok");
        assert_eq!(line.spans.len(), 2);
        assert_eq!(line.spans[0].content.as_ref(), "bad");
        assert_eq!(line.spans[0].style.fg, Some(Color::Red));
        assert_eq!(line.spans[1].content.as_ref(), " ok");
        assert_eq!(line.spans[1].style.fg, None);
    }

    #[test]
    fn unknown_tag_renders_literally() {
        let line = parse_markup("[weird]x");
        let text: String = line.spans.iter().map(|s| s.content.as_ref()).collect();
        assert_eq!(text, "[weird]x");
    }

    #[test]
    fn classify_ratio_statuses() {
        assert_eq!(StatusHealth::classify("3/3"), StatusHealth::Healthy);
        assert_eq!(StatusHealth::classify("1/3"), StatusHealth::Warning);
    }

    #[test]
    fn classify_crashloop_is_critical() {
        assert_eq!(
            StatusHealth::classify("CrashLoopBackOff"),
            StatusHealth::Critical
        );
        assert_eq!(StatusHealth::Critical.palette_name(), "red");
    }

    #[test]
    fn name_color_is_deterministic() {
        assert_eq!(name_color("prod"), name_color("prod"));
        let _ = name_color("");
    }
}

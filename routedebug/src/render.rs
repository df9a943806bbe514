//! Output rendering: inspected values, raw bytes and the verbose report.

use std::io::{self, Write};

use console::{measure_text_width, Style};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Number, Value};
use unicode_width::UnicodeWidthChar;

use crate::dispatch::Dispatched;
use crate::request::Payload;
use crate::server::reason_phrase;

// =====================
// Formatting capability
// =====================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Green,
    Yellow,
    Red,
    Grey,
}

/// Styling applied to display strings.
pub trait Formatter {
    fn bold(&self, text: &str) -> String;
    fn color(&self, color: Color, text: &str) -> String;
    fn dim(&self, text: &str) -> String;
}

/// ANSI styling through `console`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ansi;

impl Formatter for Ansi {
    fn bold(&self, text: &str) -> String {
        Style::new().bold().force_styling(true).apply_to(text).to_string()
    }

    fn color(&self, color: Color, text: &str) -> String {
        let style = Style::new().force_styling(true);
        let style = match color {
            Color::Green => style.green(),
            Color::Yellow => style.yellow(),
            Color::Red => style.red(),
            Color::Grey => style.black().bright(),
        };
        style.apply_to(text).to_string()
    }

    fn dim(&self, text: &str) -> String {
        Style::new().dim().force_styling(true).apply_to(text).to_string()
    }
}

/// No styling at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct Plain;

impl Formatter for Plain {
    fn bold(&self, text: &str) -> String {
        text.to_string()
    }

    fn color(&self, _color: Color, text: &str) -> String {
        text.to_string()
    }

    fn dim(&self, text: &str) -> String {
        text.to_string()
    }
}

// =====================
// Value inspection
// =====================

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").expect("valid regex"));

const INDENT: &str = "  ";

/// Pretty-print a value the way a JavaScript console would: single-quoted strings,
/// bare identifier keys, one entry per line at every depth.
#[must_use]
pub fn inspect(value: &Value, fmt: &dyn Formatter) -> String {
    let mut out = String::new();
    inspect_into(&mut out, value, fmt, 0);
    out
}

fn inspect_into(out: &mut String, value: &Value, fmt: &dyn Formatter, depth: usize) {
    match value {
        Value::Null => out.push_str(&fmt.bold("null")),
        Value::Bool(b) => out.push_str(&fmt.color(Color::Yellow, &b.to_string())),
        Value::Number(n) => out.push_str(&fmt.color(Color::Yellow, &number_string(n))),
        Value::String(s) => out.push_str(&fmt.color(Color::Green, &quote(s))),
        Value::Array(items) if items.is_empty() => out.push_str("[]"),
        Value::Object(map) if map.is_empty() => out.push_str("{}"),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                open_entry(out, i, depth + 1);
                inspect_into(out, item, fmt, depth + 1);
            }
            close_block(out, depth, ']');
        }
        Value::Object(map) => {
            out.push('{');
            for (i, (key, item)) in map.iter().enumerate() {
                open_entry(out, i, depth + 1);
                if IDENTIFIER_RE.is_match(key) {
                    out.push_str(key);
                } else {
                    out.push_str(&fmt.color(Color::Green, &quote(key)));
                }
                out.push_str(": ");
                inspect_into(out, item, fmt, depth + 1);
            }
            close_block(out, depth, '}');
        }
    }
}

fn open_entry(out: &mut String, index: usize, depth: usize) {
    if index > 0 {
        out.push(',');
    }
    out.push('\n');
    out.push_str(&INDENT.repeat(depth));
}

fn close_block(out: &mut String, depth: usize, close: char) {
    out.push('\n');
    out.push_str(&INDENT.repeat(depth));
    out.push(close);
}

fn number_string(n: &Number) -> String {
    match n.as_f64() {
        Some(f) if !n.is_i64() && !n.is_u64() && f.is_finite() && f.fract() == 0.0 => {
            format!("{f:.0}")
        }
        _ => n.to_string(),
    }
}

fn quote(s: &str) -> String {
    let q = if !s.contains('\'') {
        '\''
    } else if !s.contains('"') {
        '"'
    } else if !s.contains('`') {
        '`'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(q);
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\\' => out.push_str("\\\\"),
            c if c == q => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(q);
    out
}

/// Lowercase reason phrase for a status, `unknown` for unregistered codes.
#[must_use]
pub fn status_text(status: u16) -> String {
    reason_phrase(status).unwrap_or("Unknown").to_lowercase()
}

// =====================
// Display helpers
// =====================

/// Section styling and two-column tables for the verbose report.
pub struct Display<'a> {
    fmt: &'a dyn Formatter,
    width: usize,
    raw: bool,
}

impl<'a> Display<'a> {
    #[must_use]
    pub fn new(fmt: &'a dyn Formatter, width: usize, raw: bool) -> Self {
        Self { fmt, width, raw }
    }

    #[must_use]
    pub fn title(&self, text: &str) -> String {
        self.fmt.bold(&self.fmt.color(Color::Green, text))
    }

    #[must_use]
    pub fn header(&self, text: &str) -> String {
        self.fmt.bold(&self.fmt.color(Color::Yellow, text))
    }

    #[must_use]
    pub fn subheader(&self, text: &str) -> String {
        self.fmt.color(Color::Grey, text)
    }

    #[must_use]
    pub fn hr(&self) -> String {
        "\u{2500}".repeat((self.width * 2 + 1) / 3)
    }

    /// Strings as-is, anything else inspected.
    #[must_use]
    pub fn inspect(&self, value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            other => inspect(other, self.fmt),
        }
    }

    /// One row per entry; array values expand into one row per element.
    #[must_use]
    pub fn object_rows(&self, map: &Map<String, Value>) -> Vec<(String, String)> {
        let mut rows = Vec::new();
        for (key, value) in map {
            match value {
                Value::Array(items) => {
                    rows.extend(items.iter().map(|item| (key.clone(), self.inspect(item))));
                }
                other => rows.push((key.clone(), self.inspect(other))),
            }
        }
        rows
    }

    /// `name: value` lines when raw, otherwise an aligned borderless table.
    #[must_use]
    pub fn two_column(&self, rows: &[(String, String)]) -> String {
        if self.raw {
            return rows
                .iter()
                .map(|(name, value)| format!("{} {}", self.fmt.bold(&format!("{name}:")), value))
                .collect::<Vec<_>>()
                .join("\n");
        }
        if rows.is_empty() {
            return "(empty)".to_string();
        }

        let left = rows
            .iter()
            .map(|(name, _)| measure_text_width(name))
            .max()
            .unwrap_or(0)
            + 2;
        let right = self.width.saturating_sub(left);
        let wrap_width = right.saturating_sub(4).max(1);

        let mut lines = Vec::new();
        for (name, value) in rows {
            let pad = " ".repeat(left.saturating_sub(1 + measure_text_width(name)));
            let wrapped = wrap(value, wrap_width);
            let mut value_lines = wrapped.iter();
            let first = value_lines.next().map_or("", String::as_str);
            lines.push(format!(" {}{pad} {first}", self.fmt.bold(name)).trim_end().to_string());
            for line in value_lines {
                lines.push(format!(" {} {line}", " ".repeat(left.saturating_sub(1))).trim_end().to_string());
            }
        }
        lines.join("\n")
    }
}

/// Greedy word wrap; words wider than `width` are cut.
fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for source in text.split('\n') {
        let mut current = String::new();
        let mut current_width = 0;
        for word in source.split_whitespace() {
            let mut word = word.to_string();
            loop {
                let word_width = measure_text_width(&word);
                let needed = if current.is_empty() { word_width } else { current_width + 1 + word_width };
                if needed <= width {
                    if !current.is_empty() {
                        current.push(' ');
                        current_width += 1;
                    }
                    current.push_str(&word);
                    current_width += word_width;
                    break;
                }
                if !current.is_empty() {
                    lines.push(std::mem::take(&mut current));
                    current_width = 0;
                    continue;
                }
                if word.contains('\u{1b}') {
                    lines.push(word);
                    break;
                }
                let (head, tail) = split_at_width(&word, width);
                lines.push(head);
                word = tail;
            }
        }
        lines.push(current);
    }
    lines
}

fn split_at_width(word: &str, width: usize) -> (String, String) {
    let mut used = 0;
    for (i, c) in word.char_indices() {
        let w = c.width().unwrap_or(0);
        if used + w > width && i > 0 {
            return (word[..i].to_string(), word[i..].to_string());
        }
        used += w;
    }
    (word.to_string(), String::new())
}

// =====================
// Rendering
// =====================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Plain,
    Raw,
    Verbose,
    VerboseRaw,
}

impl OutputMode {
    #[must_use]
    pub fn from_flags(verbose: bool, raw: bool) -> Self {
        match (verbose, raw) {
            (false, false) => OutputMode::Plain,
            (false, true) => OutputMode::Raw,
            (true, false) => OutputMode::Verbose,
            (true, true) => OutputMode::VerboseRaw,
        }
    }

    #[must_use]
    pub fn is_raw(self) -> bool {
        matches!(self, OutputMode::Raw | OutputMode::VerboseRaw)
    }

    #[must_use]
    pub fn is_verbose(self) -> bool {
        matches!(self, OutputMode::Verbose | OutputMode::VerboseRaw)
    }
}

/// Write the outcome of a dispatch to `out`.
///
/// # Errors
///
/// Fails only when writing to `out` fails.
pub fn render<W: Write + ?Sized>(
    out: &mut W,
    outcome: &Dispatched,
    mode: OutputMode,
    fmt: &dyn Formatter,
    width: usize,
) -> io::Result<()> {
    let injection = &outcome.injection;
    match mode {
        OutputMode::Plain => writeln!(out, "{}", inspect(&injection.result, fmt)),
        OutputMode::Raw => out.write_all(&injection.raw_payload),
        OutputMode::Verbose | OutputMode::VerboseRaw => {
            render_verbose(out, outcome, &Display::new(fmt, width, mode.is_raw()))
        }
    }
}

fn render_verbose<W: Write + ?Sized>(out: &mut W, outcome: &Dispatched, display: &Display<'_>) -> io::Result<()> {
    let Dispatched {
        sent,
        injection,
        timing_ms,
    } = outcome;
    let request = &injection.request;

    writeln!(
        out,
        "{} {}",
        display.title(&format!("{} {}", sent.method, sent.url)),
        display.subheader(&format!("({timing_ms}ms)"))
    )?;

    if let Some(payload) = &sent.payload {
        section(out, display, &display.header("payload"))?;
        if display.raw {
            let captured = request.raw_payload().unwrap_or_default();
            writeln!(out, "{}", String::from_utf8_lossy(captured))?;
        } else {
            let shown = request.payload.clone().unwrap_or_else(|| match payload {
                Payload::Raw(text) => Value::String(text.clone()),
                Payload::Json(value) => value.clone(),
            });
            match &shown {
                Value::Object(map) => writeln!(out, "{}", display.two_column(&display.object_rows(map)))?,
                other => writeln!(out, "{}", display.inspect(other))?,
            }
        }
    }

    section(out, display, &display.header("request headers"))?;
    writeln!(out, "{}", display.two_column(&request.headers.rows()))?;

    section(out, display, &display.header("response headers"))?;
    writeln!(out, "{}", display.two_column(&injection.headers.rows()))?;

    let status = injection.status_code;
    let title = format!(
        "{} {}",
        display.header("result"),
        display.subheader(&format!("({status} {})", status_text(status)))
    );
    section(out, display, &title)?;
    if display.raw {
        writeln!(out, "{}", String::from_utf8_lossy(&injection.raw_payload))
    } else {
        writeln!(out, "{}", display.inspect(&injection.result))
    }
}

fn section<W: Write + ?Sized>(out: &mut W, display: &Display<'_>, title: &str) -> io::Result<()> {
    writeln!(out)?;
    writeln!(out, "{title}")?;
    writeln!(out, "{}", display.hr())
}

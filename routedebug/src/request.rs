//! Request synthesis: path-parameter substitution, query merging, payload and header
//! resolution.

use std::fmt::Write as _;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use url::form_urlencoded;

// =====================
// Headers
// =====================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Single(String),
    Multiple(Vec<String>),
}

impl HeaderValue {
    pub fn values(&self) -> impl Iterator<Item = &str> {
        let values: Vec<&str> = match self {
            HeaderValue::Single(v) => vec![v.as_str()],
            HeaderValue::Multiple(vs) => vs.iter().map(String::as_str).collect(),
        };
        values.into_iter()
    }

    #[must_use]
    pub fn first(&self) -> &str {
        match self {
            HeaderValue::Single(v) => v,
            HeaderValue::Multiple(vs) => vs.first().map_or("", String::as_str),
        }
    }
}

/// Multi-valued headers in arrival order. Names are stored lowercased.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, HeaderValue)>,
}

impl Headers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value; repeats of a name accumulate rather than overwrite.
    pub fn append<N: AsRef<str>, V: Into<String>>(&mut self, name: N, value: V) {
        let name = name.as_ref().to_ascii_lowercase();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => {
                let accumulated = match std::mem::replace(existing, HeaderValue::Multiple(Vec::new())) {
                    HeaderValue::Single(first) => vec![first, value],
                    HeaderValue::Multiple(mut values) => {
                        values.push(value);
                        values
                    }
                };
                *existing = HeaderValue::Multiple(accumulated);
            }
            None => self.entries.push((name, HeaderValue::Single(value))),
        }
    }

    /// Replace every value of a header.
    pub fn set<N: AsRef<str>>(&mut self, name: N, value: HeaderValue) {
        let name = name.as_ref().to_ascii_lowercase();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = value,
            None => self.entries.push((name, value)),
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        let name = name.to_ascii_lowercase();
        self.entries.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    #[must_use]
    pub fn first(&self, name: &str) -> Option<&str> {
        self.get(name).map(HeaderValue::first)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// One `(name, value)` row per value, multi-valued headers expanded in order.
    #[must_use]
    pub fn rows(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .flat_map(|(name, value)| value.values().map(move |v| (name.clone(), v.to_string())))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parse `name: value` lines into headers.
///
/// Lines are split on the first colon; a line without one names a header with an
/// empty value.
#[must_use]
pub fn headers_from_lines<S: AsRef<str>>(lines: &[S]) -> Headers {
    let mut headers = Headers::new();
    for line in lines {
        let line = line.as_ref().trim();
        if line.is_empty() {
            continue;
        }
        let (name, value) = match line.split_once(':') {
            Some((name, value)) => (name.trim(), value.trim()),
            None => (line, ""),
        };
        headers.append(name, value);
    }
    headers
}

// =====================
// Path and query
// =====================

static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(/)?\{([^}]+?)(\?|\*\d*)?\}").expect("valid regex")
});

/// String form of a parameter value as it appears in a path or query string.
#[must_use]
pub fn param_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(values) => values.iter().map(param_string).collect::<Vec<_>>().join("/"),
        other => other.to_string(),
    }
}

/// Substitute parameter values into a path template.
///
/// An optional placeholder (`{name?}`) without a value disappears together with the
/// slash before it. Values are inserted verbatim, without escaping.
#[must_use]
pub fn set_params(template: &str, params: &Map<String, Value>) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &regex::Captures| {
            let slash = caps.get(1).map_or("", |m| m.as_str());
            let name = &caps[2];
            let value = params.get(name).map(param_string).unwrap_or_default();
            let optional = caps.get(3).is_some_and(|m| m.as_str() == "?");
            if optional && value.is_empty() {
                String::new()
            } else {
                format!("{slash}{value}")
            }
        })
        .to_string()
}

fn query_values(value: &Value) -> Vec<String> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(values) => values.iter().map(param_string).collect(),
        other => vec![param_string(other)],
    }
}

/// Merge an inline query string with flag-supplied values (which win) and serialize.
#[must_use]
pub fn build_query(base: Option<&str>, values: &Map<String, Value>) -> String {
    let mut merged: Vec<(String, Vec<String>)> = Vec::new();
    if let Some(base) = base {
        for (key, value) in form_urlencoded::parse(base.as_bytes()) {
            match merged.iter_mut().find(|(k, _)| *k == key) {
                Some((_, existing)) => existing.push(value.into_owned()),
                None => merged.push((key.into_owned(), vec![value.into_owned()])),
            }
        }
    }
    for (key, value) in values {
        let values = query_values(value);
        match merged.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = values,
            None => merged.push((key.clone(), values)),
        }
    }

    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, values) in &merged {
        for value in values {
            serializer.append_pair(key, value);
        }
    }
    serializer.finish()
}

#[must_use]
pub fn build_url(pathname: &str, querystring: &str) -> String {
    let mut url = pathname.to_string();
    if !querystring.is_empty() {
        let _ = write!(url, "?{querystring}");
    }
    url
}

/// Split `path?query` into its pathname and optional query.
#[must_use]
pub fn split_path(path: &str) -> (&str, Option<&str>) {
    match path.split_once('?') {
        Some((pathname, query)) => (pathname, Some(query)),
        None => (path, None),
    }
}

// =====================
// Payload and request
// =====================

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Sent verbatim.
    Raw(String),
    /// Serialized as compact JSON.
    Json(Value),
}

impl Payload {
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Payload::Raw(text) => text.as_bytes().to_vec(),
            Payload::Json(value) => serde_json::to_vec(value).unwrap_or_default(),
        }
    }
}

/// An explicit raw payload wins over structured payload fields.
#[must_use]
pub fn resolve_payload(data: Option<&str>, picked: Option<Map<String, Value>>) -> Option<Payload> {
    match data {
        Some(raw) => Some(Payload::Raw(raw.to_string())),
        None => picked.map(|fields| Payload::Json(Value::Object(fields))),
    }
}

/// The request handed to the server for in-process dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct InjectedRequest {
    pub method: String,
    pub url: String,
    pub payload: Option<Payload>,
    pub headers: Headers,
}

//! Batch requests from a Postman (v2) collection file.

use std::io::Write;
use std::path::Path;

use anyhow::Context as _;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::dispatch::dispatch;
use crate::error::{Error, Result};
use crate::render::{render, Color, Display, Formatter, OutputMode};
use crate::request::{split_path, Headers, InjectedRequest, Payload};
use crate::route::{route_not_found, RouteMatch};
use crate::server::LiveServer;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Collection {
    #[serde(default)]
    pub info: Option<CollectionInfo>,
    #[serde(default)]
    pub item: Vec<Item>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollectionInfo {
    #[serde(default)]
    pub name: Option<String>,
}

/// A request, or a folder of further items.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Item {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub request: Option<ItemRequest>,
    #[serde(default)]
    pub item: Vec<Item>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ItemRequest {
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub header: Vec<HeaderEntry>,
    pub url: ItemUrl,
    #[serde(default)]
    pub body: Option<ItemBody>,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ItemUrl {
    Raw(String),
    Detailed { raw: String },
}

impl ItemUrl {
    #[must_use]
    pub fn raw(&self) -> &str {
        match self {
            ItemUrl::Raw(raw) | ItemUrl::Detailed { raw } => raw,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeaderEntry {
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ItemBody {
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub raw: Option<String>,
}

/// One request of a collection, flattened out of its folders.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRequest {
    pub name: String,
    pub method: String,
    /// Path and query, without scheme or host.
    pub url: String,
    pub headers: Headers,
    pub body: Option<String>,
}

static ORIGIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[A-Za-z][A-Za-z0-9+.-]*://[^/?#]*|\{\{[^}]*\}\}|[^/?#]+(?::\d+)?)")
        .expect("valid regex")
});

/// Strip the scheme and host (or `{{variable}}` host) from a collection URL.
#[must_use]
pub fn local_url(raw: &str) -> String {
    let raw = raw.trim();
    let rest = if raw.starts_with('/') {
        raw
    } else {
        ORIGIN_RE.find(raw).map_or(raw, |m| &raw[m.end()..])
    };
    if rest.starts_with('/') {
        rest.to_string()
    } else {
        format!("/{rest}")
    }
}

impl Collection {
    /// Every request in document order, folders flattened.
    #[must_use]
    pub fn requests(&self) -> Vec<BatchRequest> {
        let mut out = Vec::new();
        collect_requests(&self.item, &mut out);
        out
    }
}

fn collect_requests(items: &[Item], out: &mut Vec<BatchRequest>) {
    for item in items {
        if let Some(request) = &item.request {
            let mut headers = Headers::new();
            for entry in request.header.iter().filter(|h| !h.disabled) {
                headers.append(&entry.key, entry.value.as_str());
            }
            let body = request
                .body
                .as_ref()
                .filter(|b| b.mode.as_deref().map_or(true, |m| m == "raw"))
                .and_then(|b| b.raw.clone());
            let url = local_url(request.url.raw());
            out.push(BatchRequest {
                name: item.name.clone().unwrap_or_else(|| url.clone()),
                method: request.method.to_ascii_lowercase(),
                url,
                headers,
                body,
            });
        }
        collect_requests(&item.item, out);
    }
}

/// Parse a collection from YAML or JSON text.
///
/// # Errors
///
/// Fails when the text is neither a YAML nor a JSON collection.
pub fn parse_collection(text: &str) -> anyhow::Result<Collection> {
    // Try YAML first, then JSON
    if let Ok(collection) = serde_yaml::from_str::<Collection>(text) {
        return Ok(collection);
    }
    serde_json::from_str::<Collection>(text)
        .context("Failed to parse collection as YAML, and also failed to parse as JSON")
}

/// Read and parse a collection file.
///
/// # Errors
///
/// Returns [`Error::Config`] when the file cannot be read or parsed.
pub fn load_collection(path: &Path) -> Result<Collection> {
    let loaded = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))
        .and_then(|text| parse_collection(&text));
    match loaded {
        Ok(collection) => {
            tracing::debug!(path = %path.display(), items = collection.item.len(), "loaded collection");
            Ok(collection)
        }
        Err(err) => Err(Error::Config(format!("{err:#}"))),
    }
}

/// Everything a batch run needs besides the server and the collection.
pub struct BatchOptions<'a> {
    /// Only items resolving to this route run, when it names one.
    pub target: &'a RouteMatch<'a>,
    /// Appended to every item's headers.
    pub headers: &'a Headers,
    pub mode: OutputMode,
    pub fmt: &'a dyn Formatter,
    pub width: usize,
}

/// Dispatch every request of `collection` and render each outcome.
///
/// # Errors
///
/// Fails only when writing to `out` fails. Unmatched items are reported inline.
pub fn run<S, W>(server: &S, collection: &Collection, options: &BatchOptions<'_>, out: &mut W) -> Result<()>
where
    S: LiveServer + ?Sized,
    W: Write + ?Sized,
{
    let display = Display::new(options.fmt, options.width, options.mode.is_raw());
    let mut first = true;
    for item in collection.requests() {
        let (pathname, _) = split_path(&item.url);
        let Some(route) = server.match_route(&item.method, pathname) else {
            let message = route_not_found(&format!("{} {pathname}", item.method));
            writeln!(out, "{}", options.fmt.color(Color::Yellow, &message))?;
            continue;
        };
        if options.target.route.is_some_and(|target| !std::ptr::eq(target, route)) {
            continue;
        }

        let mut headers = item.headers.clone();
        for (name, value) in options.headers.rows() {
            headers.append(name, value);
        }
        let request = InjectedRequest {
            method: item.method,
            url: item.url,
            payload: item.body.map(Payload::Raw),
            headers,
        };

        if options.mode.is_verbose() {
            if !first {
                writeln!(out)?;
            }
            writeln!(out, "{}", display.header(&item.name))?;
        }
        first = false;

        let outcome = dispatch(server, request, options.mode == OutputMode::VerboseRaw);
        render(out, &outcome, options.mode, options.fmt, options.width)?;
    }
    Ok(())
}

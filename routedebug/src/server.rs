//! The live server the debug commands attach to.
//!
//! [`LiveServer`] is the capability interface the commands rely on: route lookup,
//! route matching, the route table, in-process request injection and transient
//! on-request hooks. [`Server`] implements it with a small in-process router.

use std::cell::{Cell, RefCell};
use std::fmt::{self, Write as _};

use http::StatusCode;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};

use crate::error::{Error, Result};
use crate::request::{split_path, HeaderValue, Headers, Payload};
use crate::schema::Validator;

/// HTTP methods a route may be registered for, lowercase.
pub const METHODS: [&str; 7] = ["get", "post", "put", "patch", "delete", "options", "head"];

const PAYLOAD_CHUNK_SIZE: usize = 16 * 1024;

pub type Handler = Box<dyn Fn(&ServerRequest) -> Response>;
pub type RequestHook = Box<dyn Fn(&mut ServerRequest)>;

/// Validators for each part of a request.
#[derive(Default)]
pub struct RouteValidation {
    pub params: Option<Box<dyn Validator>>,
    pub query: Option<Box<dyn Validator>>,
    pub payload: Option<Box<dyn Validator>>,
}

impl fmt::Debug for RouteValidation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteValidation")
            .field("params", &self.params.is_some())
            .field("query", &self.query.is_some())
            .field("payload", &self.payload.is_some())
            .finish()
    }
}

/// Everything needed to register a route.
pub struct RouteConfig {
    method: String,
    path: String,
    id: Option<String>,
    description: Option<String>,
    tags: Vec<String>,
    plugin: Option<String>,
    vhost: Option<String>,
    validate: RouteValidation,
    handler: Handler,
}

impl RouteConfig {
    pub fn new<M, P, F>(method: M, path: P, handler: F) -> Self
    where
        M: Into<String>,
        P: Into<String>,
        F: Fn(&ServerRequest) -> Response + 'static,
    {
        Self {
            method: method.into(),
            path: path.into(),
            id: None,
            description: None,
            tags: Vec::new(),
            plugin: None,
            vhost: None,
            validate: RouteValidation::default(),
            handler: Box::new(handler),
        }
    }

    #[must_use]
    pub fn id<S: Into<String>>(mut self, id: S) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn tag<S: Into<String>>(mut self, tag: S) -> Self {
        self.tags.push(tag.into());
        self
    }

    #[must_use]
    pub fn plugin<S: Into<String>>(mut self, plugin: S) -> Self {
        self.plugin = Some(plugin.into());
        self
    }

    #[must_use]
    pub fn vhost<S: Into<String>>(mut self, vhost: S) -> Self {
        self.vhost = Some(vhost.into());
        self
    }

    #[must_use]
    pub fn validate_params<V: Validator + 'static>(mut self, validator: V) -> Self {
        self.validate.params = Some(Box::new(validator));
        self
    }

    #[must_use]
    pub fn validate_query<V: Validator + 'static>(mut self, validator: V) -> Self {
        self.validate.query = Some(Box::new(validator));
        self
    }

    #[must_use]
    pub fn validate_payload<V: Validator + 'static>(mut self, validator: V) -> Self {
        self.validate.payload = Some(Box::new(validator));
        self
    }
}

/// A registered route.
pub struct Route {
    method: String,
    path: String,
    id: Option<String>,
    description: Option<String>,
    tags: Vec<String>,
    plugin: Option<String>,
    vhost: Option<String>,
    validate: RouteValidation,
    handler: Handler,
    matcher: Regex,
    param_names: Vec<String>,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("id", &self.id)
            .field("validate", &self.validate)
            .finish_non_exhaustive()
    }
}

impl Route {
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    #[must_use]
    pub fn plugin(&self) -> Option<&str> {
        self.plugin.as_deref()
    }

    #[must_use]
    pub fn vhost(&self) -> Option<&str> {
        self.vhost.as_deref()
    }

    #[must_use]
    pub fn validate(&self) -> &RouteValidation {
        &self.validate
    }

    fn is_literal(&self) -> bool {
        self.param_names.is_empty()
    }

    fn captures(&self, path: &str) -> Option<Map<String, Value>> {
        let caps = self.matcher.captures(path)?;
        let mut params = Map::new();
        for (i, name) in self.param_names.iter().enumerate() {
            if let Some(m) = caps.get(i + 1).filter(|m| !m.as_str().is_empty()) {
                let decoded = urlencoding::decode(m.as_str())
                    .map_or_else(|_| m.as_str().to_string(), |d| d.into_owned());
                params.insert(name.clone(), Value::String(decoded));
            }
        }
        Some(params)
    }
}

static TEMPLATE_PARAM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(/)?\{(\w+)(\?|\*\d*)?\}").expect("valid regex")
});

fn compile_template(template: &str) -> Result<(Regex, Vec<String>)> {
    let mut pattern = String::from("^");
    let mut names = Vec::new();
    let mut last = 0;
    for caps in TEMPLATE_PARAM_RE.captures_iter(template) {
        let Some(whole) = caps.get(0) else { continue };
        pattern.push_str(&regex::escape(&template[last..whole.start()]));
        let slash = if caps.get(1).is_some() { "/" } else { "" };
        match caps.get(3).map(|m| m.as_str()) {
            Some("?") => {
                let _ = write!(pattern, "(?:{slash}([^/]*))?");
            }
            Some("*") => {
                let _ = write!(pattern, "(?:{slash}(.*))?");
            }
            Some(multi) => {
                let count: usize = multi[1..]
                    .parse()
                    .map_err(|_| Error::Server(format!("invalid segment count in path: {template}")))?;
                let repeat = count.max(1) - 1;
                let _ = write!(pattern, "{slash}([^/]+(?:/[^/]+){{{repeat}}})");
            }
            None => {
                let _ = write!(pattern, "{slash}([^/]+)");
            }
        }
        names.push(caps[2].to_string());
        last = whole.end();
    }
    pattern.push_str(&regex::escape(&template[last..]));
    pattern.push('$');
    let matcher = Regex::new(&pattern)
        .map_err(|e| Error::Server(format!("invalid path template {template}: {e}")))?;
    Ok((matcher, names))
}

// =====================
// Requests and responses
// =====================

/// A request as seen by route handlers and on-request hooks.
#[derive(Debug, Clone)]
pub struct ServerRequest {
    pub method: String,
    pub path: String,
    pub url: String,
    pub headers: Headers,
    pub params: Map<String, Value>,
    pub query: Map<String, Value>,
    pub payload: Option<Value>,
    pub route_id: Option<String>,
    raw_capture: Option<Vec<u8>>,
}

impl ServerRequest {
    /// Start accumulating the exact bytes of the incoming payload.
    pub fn capture_raw_payload(&mut self) {
        if self.raw_capture.is_none() {
            self.raw_capture = Some(Vec::new());
        }
    }

    /// Captured payload bytes, when capture was enabled.
    #[must_use]
    pub fn raw_payload(&self) -> Option<&[u8]> {
        self.raw_capture.as_deref()
    }

    fn peek(&mut self, chunk: &[u8]) {
        if let Some(capture) = self.raw_capture.as_mut() {
            capture.extend_from_slice(chunk);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Body {
    Empty,
    Text(String),
    Json(Value),
}

/// A handler's reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    status: u16,
    headers: Headers,
    body: Body,
}

impl Response {
    pub fn text<S: Into<String>>(text: S) -> Self {
        Self {
            status: 200,
            headers: Headers::new(),
            body: Body::Text(text.into()),
        }
    }

    #[must_use]
    pub fn json(value: Value) -> Self {
        Self {
            status: 200,
            headers: Headers::new(),
            body: Body::Json(value),
        }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self {
            status: 204,
            headers: Headers::new(),
            body: Body::Empty,
        }
    }

    /// `{ statusCode, error, message }` error payload.
    pub fn error<S: Into<String>>(status: u16, message: S) -> Self {
        Self::json(json!({
            "statusCode": status,
            "error": reason_phrase(status).unwrap_or("Unknown"),
            "message": message.into(),
        }))
        .code(status)
    }

    #[must_use]
    pub fn code(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn header<N: AsRef<str>, V: Into<String>>(mut self, name: N, value: V) -> Self {
        self.headers.append(name, value);
        self
    }

    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }
}

impl From<&str> for Response {
    fn from(text: &str) -> Self {
        Response::text(text)
    }
}

impl From<String> for Response {
    fn from(text: String) -> Self {
        Response::text(text)
    }
}

impl From<Value> for Response {
    fn from(value: Value) -> Self {
        match value {
            Value::String(text) => Response::text(text),
            Value::Null => Response::empty(),
            other => Response::json(other),
        }
    }
}

/// Standard reason phrase for a status code, if it has one.
#[must_use]
pub fn reason_phrase(status: u16) -> Option<&'static str> {
    StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
}

/// What to inject.
#[derive(Debug, Clone, Default)]
pub struct InjectOptions {
    pub method: String,
    pub url: String,
    pub payload: Option<Payload>,
    pub headers: Headers,
}

/// The outcome of an in-process injection.
#[derive(Debug, Clone)]
pub struct Injection {
    pub request: ServerRequest,
    pub status_code: u16,
    pub headers: Headers,
    /// Structured result: a string for text replies, the JSON value otherwise.
    pub result: Value,
    /// The exact response bytes.
    pub raw_payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookId(u64);

/// Capabilities the debug commands need from a running server.
pub trait LiveServer {
    fn lookup(&self, id: &str) -> Option<&Route>;
    fn match_route(&self, method: &str, path: &str) -> Option<&Route>;
    fn table(&self) -> Vec<&Route>;
    fn inject(&self, options: InjectOptions) -> Injection;
    fn ext_on_request(&self, hook: RequestHook) -> HookId;
    fn remove_ext(&self, id: HookId) -> bool;
    fn hook_count(&self) -> usize;
}

// =====================
// In-process server
// =====================

pub struct Server {
    host: String,
    routes: Vec<Route>,
    hooks: RefCell<Vec<(HookId, RequestHook)>>,
    next_hook: Cell<u64>,
}

impl Default for Server {
    fn default() -> Self {
        Self::new("localhost")
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("host", &self.host)
            .field("routes", &self.routes)
            .field("hooks", &self.hooks.borrow().len())
            .finish_non_exhaustive()
    }
}

impl Server {
    pub fn new<S: Into<String>>(host: S) -> Self {
        Self {
            host: host.into(),
            routes: Vec::new(),
            hooks: RefCell::new(Vec::new()),
            next_hook: Cell::new(0),
        }
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Register a route.
    ///
    /// # Errors
    ///
    /// Fails for an unknown method, a path not starting with `/`, a malformed path
    /// template, a duplicate id, or a method and path already taken.
    pub fn route(&mut self, config: RouteConfig) -> Result<()> {
        let method = config.method.to_ascii_lowercase();
        if !METHODS.contains(&method.as_str()) {
            return Err(Error::Server(format!("invalid method: {}", config.method)));
        }
        if !config.path.starts_with('/') {
            return Err(Error::Server(format!("path must begin with '/': {}", config.path)));
        }
        if let Some(id) = &config.id {
            if self.lookup(id).is_some() {
                return Err(Error::Server(format!("duplicate route id: {id}")));
            }
        }
        if self
            .routes
            .iter()
            .any(|r| r.method == method && r.path == config.path)
        {
            return Err(Error::Server(format!(
                "route conflict: {} {}",
                method, config.path
            )));
        }

        let (matcher, param_names) = compile_template(&config.path)?;
        tracing::debug!(%method, path = %config.path, id = ?config.id, "registered route");
        self.routes.push(Route {
            method,
            path: config.path,
            id: config.id,
            description: config.description,
            tags: config.tags,
            plugin: config.plugin,
            vhost: config.vhost,
            validate: config.validate,
            handler: config.handler,
            matcher,
            param_names,
        });
        Ok(())
    }

    fn default_headers(&self, payload: Option<&[u8]>, structured: bool) -> Vec<(&'static str, String)> {
        let mut defaults = vec![
            ("user-agent", "routedebug".to_string()),
            ("host", self.host.clone()),
        ];
        if structured {
            defaults.push(("content-type", "application/json".to_string()));
        }
        if let Some(bytes) = payload {
            defaults.push(("content-length", bytes.len().to_string()));
        }
        defaults
    }

    fn handle(&self, request: &mut ServerRequest, bytes: &[u8]) -> Response {
        let Some(route) = self.match_route(&request.method, &request.path) else {
            return Response::error(404, "Not Found");
        };
        request.route_id = route.id.clone();
        request.params = route.captures(&request.path).unwrap_or_default();

        request.payload = match parse_payload(&request.headers, bytes) {
            Ok(payload) => payload,
            Err(response) => return response,
        };

        let validate = &route.validate;
        if let Some(validator) = &validate.params {
            match validator.validate(Value::Object(request.params.clone())) {
                Ok(Value::Object(params)) => request.params = params,
                Ok(_) => {}
                Err(message) => return Response::error(400, message),
            }
        }
        if let Some(validator) = &validate.query {
            match validator.validate(Value::Object(request.query.clone())) {
                Ok(Value::Object(query)) => request.query = query,
                Ok(_) => {}
                Err(message) => return Response::error(400, message),
            }
        }
        if let Some(validator) = &validate.payload {
            if let Some(payload) = request.payload.take() {
                match validator.validate(payload) {
                    Ok(payload) => request.payload = Some(payload),
                    Err(message) => return Response::error(400, message),
                }
            }
        }

        (route.handler)(&*request)
    }
}

fn parse_query(query: Option<&str>) -> Map<String, Value> {
    let mut map = Map::new();
    for (key, value) in url::form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
        let value = Value::String(value.into_owned());
        match map.get_mut(key.as_ref()) {
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                map.insert(key.into_owned(), value);
            }
        }
    }
    map
}

fn parse_payload(headers: &Headers, bytes: &[u8]) -> std::result::Result<Option<Value>, Response> {
    if bytes.is_empty() {
        return Ok(None);
    }
    let content_type = headers
        .first("content-type")
        .unwrap_or("application/json")
        .to_ascii_lowercase();
    if content_type.starts_with("text/") {
        return Ok(Some(Value::String(String::from_utf8_lossy(bytes).into_owned())));
    }
    if content_type.contains("json") {
        return serde_json::from_slice(bytes)
            .map(Some)
            .map_err(|_| Response::error(400, "Invalid request payload JSON format"));
    }
    Err(Response::error(415, "Unsupported Media Type"))
}

fn finish(request: ServerRequest, response: Response) -> Injection {
    let Response {
        status,
        mut headers,
        body,
    } = response;
    let (result, raw_payload, content_type) = match body {
        Body::Empty => (Value::Null, Vec::new(), None),
        Body::Text(text) => {
            let bytes = text.as_bytes().to_vec();
            (Value::String(text), bytes, Some("text/html; charset=utf-8"))
        }
        Body::Json(value) => {
            let bytes = serde_json::to_vec(&value).unwrap_or_default();
            (value, bytes, Some("application/json; charset=utf-8"))
        }
    };
    if let Some(content_type) = content_type {
        if !headers.contains("content-type") {
            headers.append("content-type", content_type);
        }
    }
    headers.set("cache-control", HeaderValue::Single("no-cache".to_string()));
    if !raw_payload.is_empty() {
        headers.set(
            "content-length",
            HeaderValue::Single(raw_payload.len().to_string()),
        );
    }
    Injection {
        request,
        status_code: status,
        headers,
        result,
        raw_payload,
    }
}

impl LiveServer for Server {
    fn lookup(&self, id: &str) -> Option<&Route> {
        self.routes.iter().find(|r| r.id.as_deref() == Some(id))
    }

    fn match_route(&self, method: &str, path: &str) -> Option<&Route> {
        let method = method.to_ascii_lowercase();
        let mut templated = None;
        for route in self.routes.iter().filter(|r| r.method == method) {
            if route.is_literal() && route.path == path {
                return Some(route);
            }
            if templated.is_none() && route.matcher.is_match(path) {
                templated = Some(route);
            }
        }
        templated
    }

    fn table(&self) -> Vec<&Route> {
        self.routes.iter().collect()
    }

    fn inject(&self, options: InjectOptions) -> Injection {
        let InjectOptions {
            method,
            url,
            payload,
            headers: caller_headers,
        } = options;
        let method = method.to_ascii_lowercase();
        let (path, query) = split_path(&url);
        let bytes = payload.as_ref().map(Payload::to_bytes);
        let structured = matches!(payload, Some(Payload::Json(_)));

        let mut headers = Headers::new();
        for (name, value) in self.default_headers(bytes.as_deref(), structured) {
            if !caller_headers.contains(name) {
                headers.append(name, value);
            }
        }
        for (name, value) in caller_headers.iter() {
            headers.set(name, value.clone());
        }

        let mut request = ServerRequest {
            method: method.clone(),
            path: path.to_string(),
            url: url.clone(),
            headers,
            params: Map::new(),
            query: parse_query(query),
            payload: None,
            route_id: None,
            raw_capture: None,
        };

        for (_, hook) in self.hooks.borrow().iter() {
            hook(&mut request);
        }

        let bytes = bytes.unwrap_or_default();
        for chunk in bytes.chunks(PAYLOAD_CHUNK_SIZE) {
            request.peek(chunk);
        }

        let response = self.handle(&mut request, &bytes);
        tracing::debug!(%method, %url, status = response.status(), "injected request");
        finish(request, response)
    }

    fn ext_on_request(&self, hook: RequestHook) -> HookId {
        let id = HookId(self.next_hook.get());
        self.next_hook.set(id.0 + 1);
        self.hooks.borrow_mut().push((id, hook));
        id
    }

    fn remove_ext(&self, id: HookId) -> bool {
        let mut hooks = self.hooks.borrow_mut();
        let before = hooks.len();
        hooks.retain(|(hook_id, _)| *hook_id != id);
        hooks.len() != before
    }

    fn hook_count(&self) -> usize {
        self.hooks.borrow().len()
    }
}

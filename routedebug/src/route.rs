//! Route resolution from a command line target.
//!
//! A target is either a route id (`get-basic`) or an optional method followed by a
//! path (`post /basic`, `/query?two=2`).

use crate::request::split_path;
use crate::server::{LiveServer, Route, METHODS};

/// Which identification strategy located (or failed to locate) the route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOn {
    Id,
    Method,
    Path,
}

#[derive(Debug, Clone)]
pub struct RouteMatch<'a> {
    pub route: Option<&'a Route>,
    pub id: Option<String>,
    pub method: Option<String>,
    pub path: Option<String>,
    /// Inline query string carried by the path argument.
    pub query: Option<String>,
    pub match_on: Vec<MatchOn>,
}

impl RouteMatch<'_> {
    fn empty() -> Self {
        Self {
            route: None,
            id: None,
            method: None,
            path: None,
            query: None,
            match_on: Vec::new(),
        }
    }

    /// Whether a target was given at all.
    #[must_use]
    pub fn has_target(&self) -> bool {
        !self.match_on.is_empty()
    }

    #[must_use]
    pub fn by_id(&self) -> bool {
        self.match_on.first() == Some(&MatchOn::Id)
    }

    /// `Route "<id>" not found` or `Route "<method> <path>" not found`.
    #[must_use]
    pub fn not_found_message(&self) -> String {
        if self.by_id() {
            route_not_found(self.id.as_deref().unwrap_or_default())
        } else {
            route_not_found(&format!(
                "{} {}",
                self.method.as_deref().unwrap_or_default(),
                self.path.as_deref().unwrap_or_default()
            ))
        }
    }
}

#[must_use]
pub fn route_not_found(target: &str) -> String {
    format!("Route \"{target}\" not found")
}

#[must_use]
pub fn is_method(token: &str) -> bool {
    METHODS.contains(&token.to_ascii_lowercase().as_str())
}

/// Locate the route named by `method_arg` / `path_arg`.
///
/// A first token that is not a method name takes the place of the path. A path not
/// starting with `/` and given without a method is a route id. Absence of a route is
/// reported through `route: None`, never as an error.
pub fn resolve<'a, S>(server: &'a S, method_arg: Option<&str>, path_arg: Option<&str>) -> RouteMatch<'a>
where
    S: LiveServer + ?Sized,
{
    let (method, path) = match method_arg {
        Some(token) if !is_method(token) => (None, Some(token)),
        _ => (method_arg, path_arg),
    };

    let resolved = match path {
        None => RouteMatch::empty(),
        Some(id) if method.is_none() && !id.starts_with('/') => {
            let route = server.lookup(id);
            RouteMatch {
                route,
                id: Some(id.to_string()),
                method: route.map(|r| r.method().to_string()),
                path: route.map(|r| r.path().to_string()),
                query: None,
                match_on: vec![MatchOn::Id],
            }
        }
        Some(raw_path) => {
            let (pathname, query) = split_path(raw_path);
            let method_name = method.unwrap_or("get").to_ascii_lowercase();
            let route = server.match_route(&method_name, pathname);
            RouteMatch {
                route,
                id: route.and_then(|r| r.id().map(str::to_string)),
                method: Some(method_name),
                path: Some(pathname.to_string()),
                query: query.map(str::to_string),
                match_on: if method.is_some() {
                    vec![MatchOn::Method, MatchOn::Path]
                } else {
                    vec![MatchOn::Path]
                },
            }
        }
    };
    tracing::debug!(
        match_on = ?resolved.match_on,
        found = resolved.route.is_some(),
        "resolved route target"
    );
    resolved
}

/// Leading positional tokens of a command line, before the first flag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Target {
    pub method: Option<String>,
    pub path: Option<String>,
    pub rest: Vec<String>,
}

/// Split `[<method>] <path-or-id> [flags...]` into a target and the flag arguments.
#[must_use]
pub fn split_target(args: &[String]) -> Target {
    let positional = |i: usize| args.get(i).filter(|a| !a.starts_with('-'));
    match positional(0) {
        None => Target {
            rest: args.to_vec(),
            ..Target::default()
        },
        Some(first) if is_method(first) => match positional(1) {
            Some(path) => Target {
                method: Some(first.clone()),
                path: Some(path.clone()),
                rest: args[2..].to_vec(),
            },
            None => Target {
                method: Some(first.clone()),
                path: None,
                rest: args[1..].to_vec(),
            },
        },
        Some(first) => Target {
            method: None,
            path: Some(first.clone()),
            rest: args[1..].to_vec(),
        },
    }
}

impl Target {
    pub fn resolve<'a, S: LiveServer + ?Sized>(&self, server: &'a S) -> RouteMatch<'a> {
        resolve(server, self.method.as_deref(), self.path.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{RouteConfig, Server};

    fn test_server() -> Server {
        let mut server = Server::new("testhost");
        server
            .route(RouteConfig::new("get", "/basic", |_| "get".into()).id("get-basic"))
            .unwrap();
        server
            .route(RouteConfig::new("post", "/basic", |_| "post".into()).id("post-basic"))
            .unwrap();
        server
            .route(RouteConfig::new("get", "/query", |_| "query".into()))
            .unwrap();
        server
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    // ==================== resolve tests ====================

    #[test]
    fn test_resolve_empty() {
        let server = test_server();
        let m = resolve(&server, None, None);
        assert!(m.route.is_none());
        assert!(!m.has_target());
    }

    #[test]
    fn test_resolve_by_id() {
        let server = test_server();
        let m = resolve(&server, Some("post-basic"), None);
        assert_eq!(m.match_on, vec![MatchOn::Id]);
        assert_eq!(m.method.as_deref(), Some("post"));
        assert_eq!(m.path.as_deref(), Some("/basic"));
    }

    #[test]
    fn test_resolve_unknown_id() {
        let server = test_server();
        let m = resolve(&server, Some("nope"), None);
        assert!(m.route.is_none());
        assert_eq!(m.not_found_message(), "Route \"nope\" not found");
    }

    #[test]
    fn test_resolve_path_defaults_to_get() {
        let server = test_server();
        let m = resolve(&server, Some("/query?two=2"), None);
        assert_eq!(m.match_on, vec![MatchOn::Path]);
        assert_eq!(m.method.as_deref(), Some("get"));
        assert_eq!(m.path.as_deref(), Some("/query"));
        assert_eq!(m.query.as_deref(), Some("two=2"));
        assert!(m.route.is_some());
        assert!(m.id.is_none());
    }

    #[test]
    fn test_resolve_method_and_path() {
        let server = test_server();
        let m = resolve(&server, Some("POST"), Some("/basic"));
        assert_eq!(m.match_on, vec![MatchOn::Method, MatchOn::Path]);
        assert_eq!(m.id.as_deref(), Some("post-basic"));
    }

    #[test]
    fn test_resolve_unmatched_path() {
        let server = test_server();
        let m = resolve(&server, Some("delete"), Some("/basic"));
        assert!(m.route.is_none());
        assert_eq!(m.not_found_message(), "Route \"delete /basic\" not found");
    }

    // ==================== split_target tests ====================

    #[test]
    fn test_split_target_id_then_flags() {
        let t = split_target(&args(&["use-params", "--one", "1"]));
        assert_eq!(t.method, None);
        assert_eq!(t.path.as_deref(), Some("use-params"));
        assert_eq!(t.rest, args(&["--one", "1"]));
    }

    #[test]
    fn test_split_target_method_and_path() {
        let t = split_target(&args(&["post", "/basic", "-v"]));
        assert_eq!(t.method.as_deref(), Some("post"));
        assert_eq!(t.path.as_deref(), Some("/basic"));
        assert_eq!(t.rest, args(&["-v"]));
    }

    #[test]
    fn test_split_target_flags_only() {
        let t = split_target(&args(&["-c", "requests.json"]));
        assert_eq!(t, Target {
            method: None,
            path: None,
            rest: args(&["-c", "requests.json"]),
        });
    }
}

//! Host-facing plumbing: invocation context, command registry and dispatch by name.

use std::collections::BTreeMap;
use std::io::Write;

use console::Term;

use crate::error::{Error, Result};
use crate::render::{Ansi, Formatter, Plain};
use crate::server::LiveServer;

pub const DEFAULT_COLUMNS: usize = 80;
pub const NAMESPACE: &str = "debug";

/// What the host knows about the terminal the command writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Context {
    pub colors: bool,
    pub columns: usize,
    /// Whether stdout is an interactive terminal.
    pub is_tty: bool,
}

impl Context {
    #[must_use]
    pub fn new(colors: bool, columns: usize, is_tty: bool) -> Self {
        Self {
            colors,
            columns,
            is_tty,
        }
    }

    /// Detect colors, width and interactivity of stdout.
    #[must_use]
    pub fn from_env() -> Self {
        let is_tty = Term::stdout().is_term();
        let columns = terminal_size::terminal_size()
            .map(|(w, _)| usize::from(w.0))
            .or_else(|| std::env::var("COLUMNS").ok().and_then(|c| c.parse().ok()))
            .unwrap_or(DEFAULT_COLUMNS);
        Self {
            colors: console::colors_enabled(),
            columns,
            is_tty,
        }
    }

    #[must_use]
    pub fn with_colors(mut self, colors: bool) -> Self {
        self.colors = colors;
        self
    }

    #[must_use]
    pub fn with_columns(mut self, columns: usize) -> Self {
        self.columns = columns;
        self
    }

    #[must_use]
    pub fn formatter(&self) -> &'static dyn Formatter {
        if self.colors {
            &Ansi
        } else {
            &Plain
        }
    }
}

// =====================
// Command registry
// =====================

pub type CommandFn = dyn Fn(&dyn LiveServer, &[String], &Context, &mut dyn Write) -> Result<()> + 'static;

pub struct CommandEntry {
    pub description: String,
    run: Box<CommandFn>,
}

#[derive(Default)]
pub struct CommandRegistry {
    commands: BTreeMap<String, CommandEntry>,
}

impl CommandRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: &str, description: &str, f: F)
    where
        F: Fn(&dyn LiveServer, &[String], &Context, &mut dyn Write) -> Result<()> + 'static,
    {
        self.commands.insert(
            name.to_string(),
            CommandEntry {
                description: description.to_string(),
                run: Box::new(f),
            },
        );
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CommandEntry> {
        self.commands.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }
}

/// The `curl` and `routes` commands.
#[must_use]
pub fn default_commands() -> CommandRegistry {
    let mut registry = CommandRegistry::new();
    registry.register(
        "curl",
        "Make requests to the routes on your server",
        |server, args, ctx, out| crate::curl(server, args, ctx, out),
    );
    registry.register(
        "routes",
        "List the routes on your server",
        |server, args, ctx, out| crate::listing::routes(server, args, ctx, out),
    );
    registry
}

fn command_name(command: &str) -> &str {
    if command == NAMESPACE {
        return "routes";
    }
    command
        .strip_prefix(NAMESPACE)
        .and_then(|rest| rest.strip_prefix(':'))
        .unwrap_or(command)
}

/// Run `command` (`debug:curl`, `debug:routes`, or `debug`) against `server`.
///
/// # Errors
///
/// Unknown commands are reported as display errors; otherwise whatever the command
/// itself returns.
pub fn drive_command(
    registry: &CommandRegistry,
    server: &dyn LiveServer,
    command: &str,
    args: &[String],
    ctx: &Context,
    out: &mut dyn Write,
) -> Result<()> {
    let name = command_name(command);
    let Some(entry) = registry.get(name) else {
        let available: Vec<String> = registry
            .names()
            .map(|n| format!("{NAMESPACE}:{n}"))
            .collect();
        return Err(Error::display(format!(
            "Unknown command \"{command}\". Available commands: {}",
            available.join(", ")
        )));
    };
    tracing::debug!(command = name, args = args.len(), "running command");
    (entry.run)(server, args, ctx, out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{RouteConfig, Server};

    fn test_server() -> Server {
        let mut server = Server::default();
        server
            .route(RouteConfig::new("get", "/basic", |_| "get-basic-result".into()).id("get-basic"))
            .unwrap();
        server
    }

    fn ctx() -> Context {
        Context::new(false, 80, true)
    }

    // ==================== Context tests ====================

    #[test]
    fn test_context_builders() {
        let ctx = Context::new(true, 80, true).with_colors(false).with_columns(100);
        assert_eq!(ctx, Context::new(false, 100, true));
    }

    #[test]
    fn test_context_formatter_follows_colors() {
        assert_eq!(ctx().formatter().bold("x"), "x");
        assert_ne!(ctx().with_colors(true).formatter().bold("x"), "x");
    }

    // ==================== CommandRegistry tests ====================

    #[test]
    fn test_registry_empty() {
        let reg = CommandRegistry::new();
        assert!(reg.get("curl").is_none());
        assert_eq!(reg.names().count(), 0);
    }

    #[test]
    fn test_default_commands() {
        let reg = default_commands();
        assert_eq!(reg.names().collect::<Vec<_>>(), vec!["curl", "routes"]);
        assert_eq!(
            reg.get("routes").map(|c| c.description.as_str()),
            Some("List the routes on your server")
        );
    }

    #[test]
    fn test_command_name() {
        assert_eq!(command_name("debug:curl"), "curl");
        assert_eq!(command_name("debug"), "routes");
        assert_eq!(command_name("curl"), "curl");
    }

    // ==================== drive_command tests ====================

    #[test]
    fn test_drive_command_curl() {
        let server = test_server();
        let mut out = Vec::new();
        drive_command(&default_commands(), &server, "debug:curl", &["/basic".to_string()], &ctx(), &mut out)
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "'get-basic-result'\n");
    }

    #[test]
    fn test_drive_command_unknown() {
        let server = test_server();
        let mut out = Vec::new();
        let err = drive_command(&default_commands(), &server, "debug:nope", &[], &ctx(), &mut out).unwrap_err();
        assert!(err.is_display());
        assert_eq!(
            err.to_string(),
            "Unknown command \"debug:nope\". Available commands: debug:curl, debug:routes"
        );
    }

    #[test]
    fn test_drive_command_custom() {
        let server = test_server();
        let mut reg = CommandRegistry::new();
        reg.register("count", "Count routes", |server, _, _, out| {
            writeln!(out, "{}", server.table().len())?;
            Ok(())
        });
        let mut out = Vec::new();
        drive_command(&reg, &server, "debug:count", &[], &ctx(), &mut out).unwrap();
        assert_eq!(out, b"1\n");
    }
}

//! `debug:routes`: the route table.

use std::fmt::Write as _;
use std::io::Write;

use unicode_width::UnicodeWidthChar;

use crate::cli::Context;
use crate::error::{Error, Result};
use crate::flags::{self, Definition, FlagDefinition, FlagType, FlagValue};
use crate::render::{Color, Formatter};
use crate::route::split_target;
use crate::server::{LiveServer, Route};

pub const ROUTES_NAME: &str = "debug:routes";
pub const ROUTES_USAGE: &str = "run debug:routes [options]\n       run debug:routes <route-id> [options]\n       run debug:routes [<method>] <path> [options]";

struct Column {
    name: &'static str,
    display: bool,
    get: fn(&Route, bool) -> String,
}

static COLUMNS: [Column; 7] = [
    Column {
        name: "method",
        display: true,
        get: |r, _| r.method().to_string(),
    },
    Column {
        name: "path",
        display: true,
        get: |r, _| r.path().to_string(),
    },
    Column {
        name: "id",
        display: true,
        get: |r, _| r.id().unwrap_or_default().to_string(),
    },
    Column {
        name: "plugin",
        display: true,
        get: |r, _| r.plugin().unwrap_or("(root)").to_string(),
    },
    Column {
        name: "vhost",
        display: false,
        get: |r, _| r.vhost().unwrap_or_default().to_string(),
    },
    Column {
        name: "tags",
        display: false,
        get: |r, raw| r.tags().join(if raw { ", " } else { "\n" }),
    },
    Column {
        name: "description",
        display: true,
        get: |r, _| r.description().unwrap_or_default().to_string(),
    },
];

fn definition(raw_default: bool) -> Definition {
    let names = COLUMNS.iter().map(|c| c.name);
    let mut definition = Definition::new();
    definition.insert(FlagDefinition::new("help", FlagType::Boolean, "Show usage options.").alias('h'));
    definition.insert(
        FlagDefinition::new(
            "hide",
            FlagType::String,
            "Hide specific columns. May be listed multiple times.",
        )
        .alias('H')
        .multiple()
        .valid(names.clone()),
    );
    definition.insert(
        FlagDefinition::new(
            "show",
            FlagType::String,
            "Show specific columns. May be listed multiple times.",
        )
        .alias('s')
        .multiple()
        .valid(names),
    );
    definition.insert(
        FlagDefinition::new("raw", FlagType::Boolean, "Output unformatted route table.")
            .alias('r')
            .default_value(raw_default.then_some(FlagValue::Bool(true))),
    );
    definition
}

/// List the server's routes, optionally narrowed to one resolved target.
///
/// # Errors
///
/// Returns a display error for invalid flags or an unresolvable target, and
/// [`Error::Io`] when writing fails.
pub fn routes<S, W>(server: &S, args: &[String], ctx: &Context, out: &mut W) -> Result<()>
where
    S: LiveServer + ?Sized,
    W: Write + ?Sized,
{
    let fmt = ctx.formatter();
    let definition = definition(!ctx.is_tty);
    let usage = definition.usage(ROUTES_NAME, ROUTES_USAGE);
    let target = split_target(args);
    let parameters = flags::parse(&definition, ROUTES_NAME, ROUTES_USAGE, &target.rest).map_err(|err| {
        Error::display(format!(
            "{usage}\n\n{}",
            fmt.color(Color::Red, &flags::parse_error_message(&err))
        ))
    })?;
    if parameters.flag("help") {
        writeln!(out, "{usage}")?;
        return Ok(());
    }

    let matched = target.resolve(server);
    if matched.has_target() && matched.route.is_none() {
        return Err(Error::display(fmt.color(Color::Yellow, &matched.not_found_message())));
    }

    let raw = parameters.flag("raw");
    let hide = parameters.strings("hide");
    let show = parameters.strings("show");
    let columns: Vec<&Column> = COLUMNS
        .iter()
        .filter(|c| {
            let listed = |names: &[String]| names.iter().any(|n| n == c.name);
            (c.display && !listed(&hide)) || listed(&show)
        })
        .collect();

    let routes = grouped_routes(server, matched.route);
    let rows: Vec<Vec<String>> = routes
        .iter()
        .map(|r| columns.iter().map(|c| (c.get)(r, raw)).collect())
        .collect();
    let head: Vec<&str> = columns.iter().map(|c| c.name).collect();

    writeln!(out)?;
    let table = if raw {
        raw_table(&head, &rows, fmt)
    } else {
        boxed_table(&head, &rows, fmt, ctx.columns, ctx.colors)
    };
    writeln!(out, "{table}")?;
    Ok(())
}

/// Root routes first, then each plugin's routes in plugin registration order.
fn grouped_routes<'a, S: LiveServer + ?Sized>(server: &'a S, only: Option<&Route>) -> Vec<&'a Route> {
    let mut plugins: Vec<&str> = Vec::new();
    let mut routes: Vec<&Route> = server
        .table()
        .into_iter()
        .filter(|r| only.map_or(true, |target| std::ptr::eq(target, *r)))
        .collect();
    for route in routes.iter().copied() {
        if let Some(plugin) = route.plugin() {
            if !plugins.contains(&plugin) {
                plugins.push(plugin);
            }
        }
    }
    routes.sort_by_key(|r| {
        r.plugin()
            .and_then(|p| plugins.iter().position(|known| *known == p))
            .map_or(0, |i| i + 1)
    });
    routes
}

fn heading(fmt: &dyn Formatter, name: &str) -> String {
    fmt.bold(&fmt.color(Color::Yellow, name))
}

fn raw_table(head: &[&str], rows: &[Vec<String>], fmt: &dyn Formatter) -> String {
    let mut lines = vec![head
        .iter()
        .map(|h| heading(fmt, h))
        .collect::<Vec<_>>()
        .join("\t")];
    lines.extend(rows.iter().map(|row| row.join("\t")));
    lines.join("\n")
}

fn text_width(text: &str) -> usize {
    text.lines().map(console::measure_text_width).max().unwrap_or(0)
}

fn truncate_to_width(text: &str, width: usize) -> String {
    if console::measure_text_width(text) <= width {
        return text.to_string();
    }
    let limit = width.saturating_sub(1);
    let mut out = String::new();
    let mut used = 0;
    for c in text.chars() {
        let w = c.width().unwrap_or(0);
        if used + w > limit {
            break;
        }
        out.push(c);
        used += w;
    }
    out.push('\u{2026}');
    out
}

fn boxed_table(head: &[&str], rows: &[Vec<String>], fmt: &dyn Formatter, width: usize, colors: bool) -> String {
    let mut widths: Vec<usize> = head
        .iter()
        .enumerate()
        .map(|(i, name)| {
            rows.iter()
                .map(|row| text_width(&row[i]))
                .chain(std::iter::once(name.len()))
                .max()
                .unwrap_or(0)
                + 2
        })
        .collect();

    // Shrink the last column to the terminal width
    let dividers = widths.len() + 1;
    let total: usize = widths.iter().sum::<usize>() + dividers;
    if total >= width {
        if let (Some(last), Some(name)) = (widths.len().checked_sub(1), head.last()) {
            let others: usize = widths[..last].iter().sum();
            widths[last] = (name.len() + 2).max(width.saturating_sub(others + dividers));
        }
    }

    let border = |s: String| if colors { fmt.color(Color::Grey, &s) } else { s };
    let rule = |left: char, mid: char, right: char| {
        let parts: Vec<String> = widths.iter().map(|w| "\u{2500}".repeat(*w)).collect();
        border(format!("{left}{}{right}", parts.join(&mid.to_string())))
    };
    let render_row = |cells: Vec<String>, styled: &dyn Fn(&str) -> String| -> Vec<String> {
        let height = cells.iter().map(|c| c.lines().count().max(1)).max().unwrap_or(1);
        (0..height)
            .map(|line| {
                let mut out = border("\u{2502}".to_string());
                for (cell, w) in cells.iter().zip(&widths) {
                    let text = cell.lines().nth(line).unwrap_or_default();
                    let text = truncate_to_width(text, w.saturating_sub(2));
                    let pad = w.saturating_sub(2 + console::measure_text_width(&text));
                    let _ = write!(out, " {}{} ", styled(&text), " ".repeat(pad));
                    out.push_str(&border("\u{2502}".to_string()));
                }
                out
            })
            .collect()
    };

    let mut lines = vec![rule('\u{250c}', '\u{252c}', '\u{2510}')];
    let head_cells = head.iter().map(|h| (*h).to_string()).collect();
    lines.extend(render_row(head_cells, &|text: &str| heading(fmt, text)));
    for row in rows {
        lines.push(rule('\u{251c}', '\u{253c}', '\u{2524}'));
        lines.extend(render_row(row.clone(), &str::to_string));
    }
    lines.push(rule('\u{2514}', '\u{2534}', '\u{2518}'));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::Plain;
    use crate::server::{RouteConfig, Server};

    fn test_server() -> Server {
        let mut server = Server::default();
        server
            .route(
                RouteConfig::new("get", "/plugin-one", |_| "one".into())
                    .plugin("plugin-one")
                    .tag("a")
                    .tag("b"),
            )
            .unwrap();
        server
            .route(
                RouteConfig::new("get", "/root", |_| "root".into())
                    .id("root-route")
                    .description("At the root"),
            )
            .unwrap();
        server
            .route(RouteConfig::new("post", "/plugin-two", |_| "two".into()).plugin("plugin-two"))
            .unwrap();
        server
    }

    fn ctx() -> Context {
        Context::new(false, 120, false)
    }

    fn run(args: &[&str]) -> Result<String> {
        let server = test_server();
        let args: Vec<String> = args.iter().map(|s| (*s).to_string()).collect();
        let mut out = Vec::new();
        routes(&server, &args, &ctx(), &mut out)?;
        Ok(String::from_utf8(out).unwrap())
    }

    // ==================== listing tests ====================

    #[test]
    fn test_routes_raw_grouped_by_plugin() {
        let out = run(&[]).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "");
        assert_eq!(lines[1], "method\tpath\tid\tplugin\tdescription");
        assert_eq!(lines[2], "get\t/root\troot-route\t(root)\tAt the root");
        assert_eq!(lines[3], "get\t/plugin-one\t\tplugin-one\t");
        assert_eq!(lines[4], "post\t/plugin-two\t\tplugin-two\t");
    }

    #[test]
    fn test_routes_show_and_hide() {
        let out = run(&["--show", "tags", "-H", "description", "-H", "id"]).unwrap();
        assert_eq!(out.lines().nth(1), Some("method\tpath\tplugin\ttags"));
        assert!(out.contains("a, b"));
    }

    #[test]
    fn test_routes_single_target() {
        let out = run(&["root-route"]).unwrap();
        assert_eq!(out.lines().count(), 3);
        let out = run(&["post", "/plugin-two"]).unwrap();
        assert!(out.contains("/plugin-two"));
        assert!(!out.contains("/root"));
    }

    #[test]
    fn test_routes_unknown_target() {
        let err = run(&["nope"]).unwrap_err();
        assert_eq!(err.to_string(), "Route \"nope\" not found");
        let err = run(&["/nope"]).unwrap_err();
        assert_eq!(err.to_string(), "Route \"get /nope\" not found");
    }

    #[test]
    fn test_routes_invalid_column() {
        let err = run(&["--show", "auth"]).unwrap_err();
        assert!(err.is_display());
        assert!(err.to_string().contains("Usage:"));
    }

    #[test]
    fn test_routes_help() {
        let out = run(&["--help"]).unwrap();
        assert!(out.contains("debug:routes <route-id> [options]"));
        assert!(out.contains("--hide"));
    }

    #[test]
    fn test_boxed_table() {
        let head = ["method", "path"];
        let rows = vec![vec!["get".to_string(), "/basic".to_string()]];
        let table = boxed_table(&head, &rows, &Plain, 80, false);
        let expected = [
            "\u{250c}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{252c}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{2510}",
            "\u{2502} method \u{2502} path   \u{2502}",
            "\u{251c}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{253c}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{2524}",
            "\u{2502} get    \u{2502} /basic \u{2502}",
            "\u{2514}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{2534}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{2500}\u{2518}",
        ];
        assert_eq!(table, expected.join("\n"));
    }

    #[test]
    fn test_boxed_table_multiline_cells_and_truncation() {
        let head = ["tags", "description"];
        let rows = vec![vec!["a\nb".to_string(), "a rather long description".to_string()]];
        let table = boxed_table(&head, &rows, &Plain, 24, false);
        assert!(table.lines().all(|l| console::measure_text_width(l) <= 24));
        assert!(table.contains('\u{2026}'));
        assert_eq!(table.lines().count(), 6);
    }
}

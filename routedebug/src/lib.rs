//! Debugging commands for a live, in-process web server.
//!
//! `debug:curl` injects a request into a route, with one CLI flag generated for every
//! declared path, query and payload field of the target route, and renders the
//! response. `debug:routes` lists the route table.

use std::io::Write;
use std::path::Path;

pub mod batch;
pub mod cli;
pub mod dispatch;
pub mod error;
pub mod flags;
pub mod listing;
pub mod render;
pub mod request;
pub mod route;
pub mod schema;
pub mod server;

pub use cli::{default_commands, drive_command, CommandRegistry, Context};
pub use error::{Error, Result};
pub use server::{LiveServer, Response, RouteConfig, Server};

use crate::flags::{build_definition, builtin_flags, parse_error_message, pick, InputKind};
use crate::render::{render, Color, OutputMode};
use crate::request::{build_query, build_url, headers_from_lines, resolve_payload, set_params, InjectedRequest};
use crate::schema::{describe, FieldDescriptor};
use crate::server::Route;

pub const CURL_NAME: &str = "debug:curl";
pub const CURL_USAGE: &str = "run debug:curl <route-id> [options]\n       run debug:curl [<method>] <path> [options]";

struct RouteFields {
    params: Vec<FieldDescriptor>,
    query: Vec<FieldDescriptor>,
    payload: Vec<FieldDescriptor>,
}

impl RouteFields {
    fn of(route: Option<&Route>, with_params: bool) -> Self {
        let validate = route.map(Route::validate);
        let params = if with_params {
            describe(validate.and_then(|v| v.params.as_deref()))
        } else {
            Vec::new()
        };
        Self {
            params,
            query: describe(validate.and_then(|v| v.query.as_deref())),
            payload: describe(validate.and_then(|v| v.payload.as_deref())),
        }
    }
}

/// `debug:curl`: make a request to a route and show the result.
///
/// # Errors
///
/// Unresolvable targets, missing targets and malformed flags are display errors.
/// An unreadable `--config` file is [`Error::Config`]; output failures are
/// [`Error::Io`].
pub fn curl<S, W>(server: &S, args: &[String], ctx: &Context, out: &mut W) -> Result<()>
where
    S: LiveServer + ?Sized,
    W: Write + ?Sized,
{
    let fmt = ctx.formatter();
    let target = route::split_target(args);
    let matched = target.resolve(server);
    if matched.has_target() && matched.route.is_none() {
        return Err(Error::display(fmt.color(Color::Yellow, &matched.not_found_message())));
    }

    let fields = RouteFields::of(matched.route, matched.by_id());
    let definition = build_definition(&fields.params, InputKind::Params)
        .merge(build_definition(&fields.query, InputKind::Query))
        .merge(build_definition(&fields.payload, InputKind::Payload))
        .merge(builtin_flags(!ctx.is_tty, true));
    let usage = definition.usage(CURL_NAME, CURL_USAGE);
    let usage_error = |message: &str| Error::display(format!("{usage}\n\n{}", fmt.color(Color::Red, message)));

    let parameters = flags::parse(&definition, CURL_NAME, CURL_USAGE, &target.rest)
        .map_err(|err| usage_error(&parse_error_message(&err)))?;
    if parameters.flag("help") {
        writeln!(out, "{usage}")?;
        return Ok(());
    }

    let mode = OutputMode::from_flags(parameters.flag("verbose"), parameters.flag("raw"));
    let headers = headers_from_lines(&parameters.strings("header"));

    if let Some(config) = parameters.string("config") {
        let collection = batch::load_collection(Path::new(config))?;
        let options = batch::BatchOptions {
            target: &matched,
            headers: &headers,
            mode,
            fmt,
            width: ctx.columns,
        };
        return batch::run(server, &collection, &options, out);
    }

    let (Some(method), Some(path)) = (matched.method.as_deref(), matched.path.as_deref()) else {
        return Err(usage_error("No route specified"));
    };

    let param_values = pick(&parameters, &fields.params).unwrap_or_default();
    let query_values = pick(&parameters, &fields.query).unwrap_or_default();
    let payload = resolve_payload(parameters.string("data"), pick(&parameters, &fields.payload));

    let pathname = set_params(path, &param_values);
    let querystring = build_query(matched.query.as_deref(), &query_values);
    let request = InjectedRequest {
        method: method.to_string(),
        url: build_url(&pathname, &querystring),
        payload,
        headers,
    };

    let outcome = dispatch::dispatch(server, request, mode == OutputMode::VerboseRaw);
    render(out, &outcome, mode, fmt, ctx.columns)?;
    Ok(())
}

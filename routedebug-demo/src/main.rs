use std::io::Write;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use routedebug::schema;
use routedebug::{Context, Response, RouteConfig, Server};
use serde_json::{json, Value};

const APP_NAME: &str = "routedebug-demo";

#[derive(Parser, Debug)]
#[command(name = APP_NAME, version, about = "Debug commands against a sample in-process server")]
struct Cli {
    /// Host name the sample server reports
    #[arg(long, env = "ROUTEDEBUG_HOST", default_value = "localhost")]
    host: String,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Override the detected terminal width
    #[arg(long)]
    columns: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a debug command: debug:curl, debug:routes or debug
    Run {
        command: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

fn main() {
    init_tracing();
    if let Err(err) = real_main() {
        match err.downcast_ref::<routedebug::Error>() {
            Some(display) if display.is_display() => eprintln!("{display}"),
            _ => eprintln!("Error: {:#}", err),
        }
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn real_main() -> Result<()> {
    let cli = Cli::parse();
    let server = sample_server(&cli.host).context("Failed to build the sample server")?;

    let detected = Context::from_env();
    let ctx = detected
        .with_colors(detected.colors && !cli.no_color)
        .with_columns(cli.columns.unwrap_or(detected.columns));

    let Commands::Run { command, args } = cli.command;
    tracing::debug!(host = %server.host(), command = %command, "dispatching");
    let registry = routedebug::default_commands();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    routedebug::drive_command(&registry, &server, &command, &args, &ctx, &mut out)?;
    out.flush()?;
    Ok(())
}

fn sample_server(host: &str) -> routedebug::Result<Server> {
    let mut server = Server::new(host);

    server.route(
        RouteConfig::new("get", "/", |_| "hello from routedebug".into())
            .id("home")
            .description("Say hello"),
    )?;
    server.route(
        RouteConfig::new("get", "/users/{id}", |req| {
            Response::json(json!({ "id": req.params.get("id"), "name": "Ada" }))
        })
        .id("get-user")
        .description("Fetch one user")
        .tag("users")
        .validate_params(schema::object([("id", schema::number().description("User id").required())])),
    )?;
    server.route(
        RouteConfig::new("get", "/users", |req| {
            let limit = req.query.get("limit").cloned().unwrap_or(json!(10));
            Response::json(json!({ "users": [], "limit": limit }))
        })
        .id("list-users")
        .description("List users")
        .tag("users")
        .tag("paged")
        .validate_query(schema::object([
            ("limit", schema::number().description("Page size")),
            ("active", schema::boolean()),
        ])),
    )?;
    server.route(
        RouteConfig::new("post", "/users", |req| {
            Response::json(req.payload.clone().unwrap_or(Value::Null)).code(201)
        })
        .id("create-user")
        .description("Create a user")
        .tag("users")
        .validate_payload(schema::object([
            ("name", schema::string().required()),
            ("roles", schema::array([schema::string()])),
            (
                "address",
                schema::object([("city", schema::string()), ("zip", schema::string())]),
            ),
        ])),
    )?;
    server.route(
        RouteConfig::new("get", "/files/{path*}", |req| {
            Response::text(format!("file: {}", req.params.get("path").and_then(Value::as_str).unwrap_or_default()))
        })
        .id("get-file")
        .plugin("static")
        .description("Serve a file"),
    )?;
    server.route(
        RouteConfig::new("get", "/health", |_| Response::json(json!({ "ok": true })))
            .id("health")
            .plugin("status")
            .vhost("internal.local"),
    )?;

    Ok(server)
}

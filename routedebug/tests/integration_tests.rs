//! Integration tests for routedebug
//!
//! These drive the commands end to end against an in-process fixture server.

use std::io::Write as _;

use routedebug::request::{HeaderValue, Headers};
use routedebug::schema::{self, Validator};
use routedebug::{curl, default_commands, drive_command, Context, Error, LiveServer, Response, RouteConfig, Server};
use serde_json::{json, Map, Value};

fn headers_json(headers: &Headers) -> Value {
    let mut map = Map::new();
    for (name, value) in headers.iter() {
        let value = match value {
            HeaderValue::Single(v) => Value::from(v.as_str()),
            HeaderValue::Multiple(vs) => Value::from(vs.clone()),
        };
        map.insert(name.to_string(), value);
    }
    Value::Object(map)
}

fn passthrough(value: Value) -> Result<Value, String> {
    Ok(value)
}

fn fixture() -> Server {
    let mut server = Server::new("testhost");
    let routes = vec![
        RouteConfig::new("get", "/basic", |_| "get-basic-result".into()).id("get-basic"),
        RouteConfig::new("post", "/basic", |_| "post-basic-result".into()).id("post-basic"),
        RouteConfig::new("get", "/by-id", |_| "get-by-id-result".into()).id("get-by-id"),
        RouteConfig::new("get", "/first/{one}/second/{two*2}/third/{three?}", |req| {
            Response::json(Value::Object(req.params.clone()))
        })
        .id("use-params")
        .validate_params(schema::object([
            ("one", schema::number()),
            ("two", schema::string()),
            ("three", schema::string()),
        ])),
        RouteConfig::new("get", "/query", |req| Response::json(Value::Object(req.query.clone())))
            .id("use-query")
            .validate_query(schema::object([
                ("isOne", schema::boolean()),
                ("two", schema::number()),
                ("three", schema::string()),
            ])),
        RouteConfig::new("post", "/payload", |req| Response::json(req.payload.clone().unwrap_or_default()))
            .id("use-payload")
            .validate_payload(schema::object([("isOne", schema::boolean()), ("two", schema::number())])),
        RouteConfig::new("post", "/nested-payload", |req| {
            Response::json(req.payload.clone().unwrap_or_default())
        })
        .id("use-nested-payload")
        .validate_payload(schema::object([(
            "objOne",
            schema::object([("five", schema::string()), ("six", schema::boolean())]),
        )])),
        RouteConfig::new("post", "/no-schema-validation/{param?}", |_| "use-no-schema-validation-result".into())
            .id("use-no-schema-validation")
            .validate_params(passthrough)
            .validate_query(passthrough)
            .validate_payload(passthrough),
        RouteConfig::new("post", "/use-array-validation", |req| {
            Response::json(req.payload.clone().unwrap_or_default())
        })
        .id("use-array-validation")
        .validate_payload(schema::object([
            ("single", schema::array([schema::number()])),
            ("mixed", schema::array([schema::number(), schema::string()])),
        ])),
        RouteConfig::new("post", "/usage/{one?}", |_| "usage-result".into())
            .id("usage")
            .validate_params(schema::object([("one", schema::any())]))
            .validate_query(schema::object([("two", schema::any().description("Two things to know"))]))
            .validate_payload(schema::object([("three", schema::any())])),
        RouteConfig::new("get", "/headers", |req| Response::json(headers_json(&req.headers))).id("use-headers"),
        RouteConfig::new("post", "/non-obj-payload", |req| {
            Response::json(req.payload.clone().unwrap_or_default())
        })
        .id("use-non-obj-payload"),
        RouteConfig::new("get", "/unknown-status-code", |_| {
            Response::json(json!({ "unknown": "code" })).code(420)
        })
        .id("unknown-status-code"),
    ];
    for route in routes {
        server.route(route).unwrap();
    }
    server
}

fn tty() -> Context {
    Context::new(false, 80, true)
}

fn run_with(server: &Server, ctx: &Context, args: &[&str]) -> Result<String, Error> {
    let args: Vec<String> = args.iter().map(|s| (*s).to_string()).collect();
    let mut out = Vec::new();
    curl(server, &args, ctx, &mut out)?;
    Ok(String::from_utf8(out).unwrap())
}

fn run(args: &[&str]) -> Result<String, Error> {
    run_with(&fixture(), &tty(), args)
}

// ==================== Plain output ====================

#[test]
fn test_curl_basic_by_path() {
    assert_eq!(run(&["/basic"]).unwrap(), "'get-basic-result'\n");
}

#[test]
fn test_curl_basic_by_method_and_path() {
    assert_eq!(run(&["post", "/basic"]).unwrap(), "'post-basic-result'\n");
    assert_eq!(run(&["POST", "/basic"]).unwrap(), "'post-basic-result'\n");
}

#[test]
fn test_curl_by_id() {
    assert_eq!(run(&["get-by-id"]).unwrap(), "'get-by-id-result'\n");
}

#[test]
fn test_curl_params() {
    let out = run(&["use-params", "--one", "1", "--two", "2/2", "--three", "3"]).unwrap();
    assert_eq!(out, "{\n  one: 1,\n  two: '2/2',\n  three: '3'\n}\n");
}

#[test]
fn test_curl_optional_param_omitted() {
    let out = run(&["use-params", "--one", "1", "--two", "2/2"]).unwrap();
    assert_eq!(out, "{\n  one: 1,\n  two: '2/2'\n}\n");
}

#[test]
fn test_curl_query_flags() {
    let out = run(&["/query", "--isOne", "--two", "2"]).unwrap();
    assert_eq!(out, "{\n  isOne: true,\n  two: 2\n}\n");
}

#[test]
fn test_curl_query_flags_override_inline_query() {
    let out = run(&["/query?two=1&three=x", "--two", "2"]).unwrap();
    assert_eq!(out, "{\n  two: 2,\n  three: 'x'\n}\n");
}

#[test]
fn test_curl_payload_flags() {
    let out = run(&["use-payload", "--isOne", "--two", "2"]).unwrap();
    assert_eq!(out, "{\n  isOne: true,\n  two: 2\n}\n");
}

#[test]
fn test_curl_data_overrides_payload_flags() {
    let out = run(&["use-payload", "--two", "2", "-d", "{\"two\":5}"]).unwrap();
    assert_eq!(out, "{\n  two: 5\n}\n");
}

#[test]
fn test_curl_nested_payload_flags() {
    let out = run(&["use-nested-payload", "--objOne-five", "5", "-r"]).unwrap();
    assert_eq!(out, r#"{"objOne":{"five":"5"}}"#);
}

#[test]
fn test_curl_object_flag_merges_with_leaf_flags() {
    let out = run(&["use-nested-payload", "--objOne", "{\"six\":true}", "--objOne-five", "x", "-r"]).unwrap();
    assert_eq!(out, r#"{"objOne":{"five":"x","six":true}}"#);
}

#[test]
fn test_curl_array_payload_flags() {
    let out = run(&[
        "use-array-validation",
        "--single",
        "1",
        "--single",
        "2",
        "--mixed",
        "1",
        "--mixed",
        "x",
        "--raw",
    ])
    .unwrap();
    assert_eq!(out, r#"{"single":[1,2],"mixed":[1,"x"]}"#);
}

#[test]
fn test_curl_function_validators_add_no_flags() {
    assert_eq!(run(&["use-no-schema-validation"]).unwrap(), "'use-no-schema-validation-result'\n");
    let err = run(&["use-no-schema-validation", "--param", "x"]).unwrap_err();
    assert!(err.is_display());
}

#[test]
fn test_curl_non_object_payload() {
    let out = run(&["use-non-obj-payload", "-d", "[1,2]"]).unwrap();
    assert_eq!(out, "[\n  1,\n  2\n]\n");
}

// ==================== Raw output ====================

#[test]
fn test_curl_raw_json() {
    let out = run(&["use-params", "--one", "1", "--two", "2/2", "--raw"]).unwrap();
    assert_eq!(out, r#"{"one":1,"two":"2/2"}"#);
}

#[test]
fn test_curl_raw_defaults_on_without_tty() {
    let out = run_with(&fixture(), &Context::new(false, 80, false), &["/basic"]).unwrap();
    assert_eq!(out, "get-basic-result");
}

#[test]
fn test_curl_headers_accumulate() {
    let out = run(&["use-headers", "-H", "x-test: one", "-H", "X-Test: two", "-H", "x-other:three", "-r"]).unwrap();
    let value: Value = serde_json::from_str(&out).unwrap();
    assert_eq!(value["x-test"], json!(["one", "two"]));
    assert_eq!(value["x-other"], json!("three"));
    assert_eq!(value["user-agent"], json!("routedebug"));
    assert_eq!(value["host"], json!("testhost"));
}

// ==================== Verbose output ====================

#[test]
fn test_curl_verbose_report() {
    let out = run(&["use-payload", "-v", "--two", "2"]).unwrap();
    let hr = "\u{2500}".repeat(53);
    assert!(out.starts_with("post /payload ("), "{out}");
    assert!(out.contains(&format!("\n\npayload\n{hr}\n two  2\n")), "{out}");
    assert!(out.contains(&format!("\n\nrequest headers\n{hr}\n")), "{out}");
    assert!(out.contains(" content-type    application/json\n"), "{out}");
    assert!(out.contains(&format!("\n\nresponse headers\n{hr}\n")), "{out}");
    assert!(out.contains(" cache-control   no-cache\n"), "{out}");
    assert!(out.ends_with(&format!("\n\nresult (200 ok)\n{hr}\n{{\n  two: 2\n}}\n")), "{out}");
}

#[test]
fn test_curl_verbose_without_payload_has_no_payload_section() {
    let out = run(&["/basic", "-v"]).unwrap();
    assert!(out.starts_with("get /basic ("));
    assert!(!out.contains("\npayload\n"));
    assert!(out.ends_with("get-basic-result\n"));
}

#[test]
fn test_curl_verbose_empty_data_has_payload_section() {
    let out = run(&["post-basic", "-v", "-d", ""]).unwrap();
    assert!(out.contains("\npayload\n"), "{out}");
}

#[test]
fn test_curl_verbose_unknown_status() {
    let out = run(&["unknown-status-code", "-v"]).unwrap();
    assert!(out.contains("result (420 unknown)"), "{out}");
    assert!(out.ends_with("{\n  unknown: 'code'\n}\n"));
}

#[test]
fn test_curl_verbose_raw_shows_exact_payload_bytes() {
    let server = fixture();
    let out = run_with(&server, &tty(), &["use-payload", "-v", "-r", "-d", "{ \"two\": 2 }"]).unwrap();
    let hr = "\u{2500}".repeat(53);
    assert!(out.contains(&format!("\n\npayload\n{hr}\n{{ \"two\": 2 }}\n")), "{out}");
    assert!(out.contains("user-agent: routedebug\n"), "{out}");
    assert!(out.ends_with(&format!("result (200 ok)\n{hr}\n{{\"two\":2}}\n")), "{out}");
    assert_eq!(server.hook_count(), 0);
}

#[test]
fn test_curl_capture_hook_does_not_persist() {
    let server = fixture();
    for _ in 0..3 {
        run_with(&server, &tty(), &["use-payload", "-v", "-r", "--two", "2"]).unwrap();
        run_with(&server, &tty(), &["use-payload", "-r", "--two", "2"]).unwrap();
    }
    assert_eq!(server.hook_count(), 0);
}

// ==================== Errors and help ====================

#[test]
fn test_curl_unknown_id() {
    let server = fixture();
    let args = vec!["nope".to_string()];
    let mut out = Vec::new();
    let err = curl(&server, &args, &tty(), &mut out).unwrap_err();
    assert!(err.is_display());
    assert_eq!(err.to_string(), "Route \"nope\" not found");
    assert!(out.is_empty());
}

#[test]
fn test_curl_unknown_method_and_path() {
    let err = run(&["post", "/nope"]).unwrap_err();
    assert_eq!(err.to_string(), "Route \"post /nope\" not found");
}

#[test]
fn test_curl_no_route_specified() {
    let err = run(&[]).unwrap_err();
    let message = err.to_string();
    assert!(message.starts_with("Usage: run debug:curl <route-id> [options]"), "{message}");
    assert!(message.ends_with("\n\nNo route specified"), "{message}");
}

#[test]
fn test_curl_unknown_flag() {
    let err = run(&["/basic", "--nope"]).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("Usage:"));
    assert!(message.lines().last().unwrap().contains("--nope"), "{message}");
}

#[test]
fn test_curl_help() {
    let out = run(&["usage", "--help"]).unwrap();
    assert!(out.contains("--one"));
    assert!(out.contains("Route path param"));
    assert!(out.contains("Route query param: Two things to know"));
    assert!(out.contains("Route payload param"));
    assert!(out.contains("--header"));
}

#[test]
fn test_curl_param_flags_only_for_id_targets() {
    let err = run(&["post", "/usage", "--one", "x"]).unwrap_err();
    assert!(err.is_display());
}

#[test]
fn test_curl_handler_errors_render_normally() {
    let out = run(&["use-params", "--one", "x", "--two", "2/2"]).unwrap();
    assert!(out.contains("statusCode: 400"), "{out}");
    assert!(out.contains("message: '\"one\" must be a number'"), "{out}");
}

// ==================== Batch mode ====================

const COLLECTION: &str = r#"{
    "info": { "name": "closet" },
    "item": [
        { "name": "basic", "request": { "method": "GET", "url": "{{baseUrl}}/basic" } },
        {
            "name": "folder",
            "item": [
                {
                    "name": "payload",
                    "request": {
                        "method": "POST",
                        "url": { "raw": "http://localhost/payload" },
                        "body": { "mode": "raw", "raw": "{\"two\":\"2\"}" }
                    }
                }
            ]
        },
        { "name": "missing", "request": { "method": "GET", "url": "/missing" } },
        {
            "name": "headers",
            "request": {
                "method": "GET",
                "url": "/headers",
                "header": [{ "key": "X-From-File", "value": "yes" }]
            }
        }
    ]
}"#;

fn collection_file() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(COLLECTION.as_bytes()).unwrap();
    file
}

#[test]
fn test_curl_batch_runs_every_item() {
    let file = collection_file();
    let path = file.path().to_str().unwrap();
    let out = run(&["-c", path]).unwrap();
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines[0], "'get-basic-result'");
    assert_eq!(lines[1..4], ["{", "  two: 2", "}"]);
    assert_eq!(lines[4], "Route \"get /missing\" not found");
}

#[test]
fn test_curl_batch_filtered_by_target() {
    let file = collection_file();
    let path = file.path().to_str().unwrap();
    let out = run(&["get-basic", "--config", path]).unwrap();
    assert_eq!(out, "'get-basic-result'\nRoute \"get /missing\" not found\n");
}

#[test]
fn test_curl_batch_appends_cli_headers() {
    let file = collection_file();
    let path = file.path().to_str().unwrap();
    let out = run(&["use-headers", "-c", path, "-H", "x-cli: 1", "-r"]).unwrap();
    let start = out.find('{').unwrap();
    let value: Value = serde_json::from_str(out[start..].trim_end()).unwrap();
    assert_eq!(value["x-from-file"], json!("yes"));
    assert_eq!(value["x-cli"], json!("1"));
}

#[test]
fn test_curl_batch_verbose_names_items() {
    let file = collection_file();
    let path = file.path().to_str().unwrap();
    let out = run(&["get-basic", "-c", path, "-v"]).unwrap();
    assert!(out.starts_with("basic\nget /basic ("), "{out}");
}

#[test]
fn test_curl_batch_missing_file() {
    let err = run(&["-c", "/definitely/not/here.json"]).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

// ==================== Command dispatch ====================

#[test]
fn test_drive_command_routes_alias() {
    let server = fixture();
    let mut out = Vec::new();
    drive_command(&default_commands(), &server, "debug", &["-r".to_string()], &tty(), &mut out).unwrap();
    let out = String::from_utf8(out).unwrap();
    assert_eq!(out.lines().nth(1), Some("method\tpath\tid\tplugin\tdescription"));
    assert_eq!(out.lines().count(), 2 + server.table().len());
}

#[test]
fn test_drive_command_curl_by_name() {
    let server = fixture();
    let mut out = Vec::new();
    drive_command(&default_commands(), &server, "debug:curl", &["get-by-id".to_string()], &tty(), &mut out)
        .unwrap();
    assert_eq!(out, b"'get-by-id-result'\n");
}

#[test]
fn test_schema_description_drives_flags() {
    let validator = schema::object([("two", schema::any().description("Two things to know"))]);
    let description = validator.describe().unwrap();
    assert_eq!(description["keys"]["two"]["flags"]["description"], json!("Two things to know"));
}

#[test]
fn test_curl_unusable_field_names_get_no_flags() {
    let mut server = Server::new("testhost");
    server
        .route(
            RouteConfig::new("post", "/odd", |req| Response::json(req.payload.clone().unwrap_or_default()))
                .id("odd-names")
                .validate_payload(schema::Described(json!({
                    "type": "object",
                    "keys": { "-x": { "type": "string" }, "y": { "type": "string" } }
                }))),
        )
        .unwrap();
    let out = run_with(&server, &tty(), &["odd-names", "--y", "-1", "-r"]).unwrap();
    assert_eq!(out, r#"{"y":"-1"}"#);
    let err = run_with(&server, &tty(), &["odd-names", "---x", "1"]).unwrap_err();
    assert!(err.is_display());
}

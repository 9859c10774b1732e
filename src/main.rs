//! mcp-engine: demo MCP server over stdio
//!
//! Serves a small set of tools, prompts and resources so clients can exercise
//! every part of the engine.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use serde_json::{json, Value};
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use mcp_engine::config;
use mcp_engine::mcp::{
    CallToolResult, GetPromptResult, JsonSchema, LogLevel, McpServer, ParamValue, Params, Prompt, PromptMessage,
    ReadResourceResult, RequestContext, Resource, ResourceInfo, ResourceTemplate, StdioTransport, Tool,
    ToolAnnotations,
};
use mcp_engine::{BoxError, McpError};

/// Demo Model Context Protocol server.
///
/// Speaks newline-delimited JSON-RPC on stdin/stdout and logs to stderr.
#[derive(Parser, Debug)]
#[command(name = "mcp-engine")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long)]
    quiet: bool,
}

/// Determines the log level from CLI arguments.
#[allow(clippy::match_same_arms)] // Explicit "warn" arm for clarity
fn get_log_level(verbose: u8, quiet: bool, config_level: &str) -> Level {
    if quiet {
        return Level::ERROR;
    }

    match verbose {
        0 => match config_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::WARN,
        },
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialises the tracing subscriber for logging.
fn init_tracing(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Registers the demo tools, prompts and resources.
fn register_demo(server: &McpServer) -> Result<(), McpError> {
    server.tool(
        Tool::new("echo", "Returns the given text unchanged")
            .with_title("Echo")
            .with_schema(JsonSchema::new(json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })))
            .with_annotations(ToolAnnotations {
                read_only_hint: Some(true),
                ..ToolAnnotations::default()
            }),
        |input: Option<Value>, ctx: RequestContext| async move {
            let text = input
                .as_ref()
                .and_then(|v| v.get("text"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            ctx.log(LogLevel::Debug, json!({ "echo": text }), Some("echo")).await?;
            Ok::<_, BoxError>(CallToolResult::text(text))
        },
    );

    server.tool(
        Tool::new("add", "Adds two numbers")
            .with_schema(JsonSchema::new(json!({
                "type": "object",
                "properties": {
                    "a": { "type": "number" },
                    "b": { "type": "number" }
                },
                "required": ["a", "b"]
            })))
            .with_output_schema(JsonSchema::new(json!({
                "type": "object",
                "properties": { "sum": { "type": "number" } },
                "required": ["sum"]
            }))),
        |input: Option<Value>, _ctx: RequestContext| async move {
            let arg = |key: &str| input.as_ref().and_then(|v| v.get(key)).and_then(Value::as_f64);
            let sum = arg("a").unwrap_or_default() + arg("b").unwrap_or_default();
            Ok::<_, BoxError>(CallToolResult::structured(json!({ "sum": sum })))
        },
    );

    server.prompt(
        Prompt::new("greeting", "Writes a greeting for someone")
            .with_schema(JsonSchema::new(json!({
                "type": "object",
                "properties": { "name": { "type": "string", "description": "Who to greet" } },
                "required": ["name"]
            })))
            .with_completion("name", |value: String, _context: HashMap<String, String>| async move {
                let names = ["Ada", "Alan", "Barbara", "Grace", "Linus"];
                Ok::<_, BoxError>(
                    names
                        .iter()
                        .filter(|n| n.to_lowercase().starts_with(&value.to_lowercase()))
                        .map(|n| (*n).to_string())
                        .collect(),
                )
            }),
        |input: Option<Value>, _ctx: RequestContext| async move {
            let name = input
                .as_ref()
                .and_then(|v| v.get("name"))
                .and_then(Value::as_str)
                .unwrap_or("there")
                .to_string();
            Ok::<_, BoxError>(GetPromptResult {
                description: Some("A friendly greeting".to_string()),
                messages: vec![PromptMessage::user(format!("Write a short greeting for {name}."))],
            })
        },
    );

    let info = server.info().clone();
    server.resource(
        Resource::new("server://info", "info", "Server name and version").with_mime_type("application/json"),
        move |uri: String, _ctx: RequestContext| {
            let info = info.clone();
            async move {
                let body = serde_json::to_string(&info)?;
                Ok::<_, BoxError>(ReadResourceResult::text(uri, body))
            }
        },
    );

    server.template(
        ResourceTemplate::new("notes://{id}", "note", "A numbered note")?
            .with_mime_type("text/plain")
            .with_list(|_ctx: RequestContext| async move {
                Ok::<_, BoxError>(
                    (1..=3)
                        .map(|i| ResourceInfo::new(format!("notes://{i}"), format!("note {i}")))
                        .collect(),
                )
            }),
        |uri: String, params: Params, _ctx: RequestContext| async move {
            let id = params
                .get("id")
                .and_then(ParamValue::as_str)
                .unwrap_or_default()
                .to_string();
            Ok::<_, BoxError>(ReadResourceResult::text(uri, format!("Note {id}")))
        },
    );

    Ok(())
}

/// Resolves when the process is asked to stop.
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigint, mut sigterm) = match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
        (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
        (Err(e), _) | (_, Err(e)) => {
            error!(error = %e, "Failed to install signal handlers");
            return std::future::pending().await;
        }
    };

    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT, initiating graceful shutdown"),
        _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}

/// Resolves when the process is asked to stop.
#[cfg(windows)]
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
        Err(e) => {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}

/// Entry point for the mcp-engine server.
fn main() -> ExitCode {
    let args = Args::parse();

    // Load configuration
    let config_path = args.config.as_deref();
    let cfg = match config::load_config(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            eprintln!("See config/example-config.json for the expected format");
            return ExitCode::FAILURE;
        }
    };

    // Initialise logging
    let log_level = get_log_level(args.verbose, args.quiet, &cfg.logging.level);
    init_tracing(log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting mcp-engine server");

    let options = match cfg.server_options() {
        Ok(options) => options,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let server = match McpServer::new(cfg.server_info(), options) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "Failed to create server");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = register_demo(&server) {
        error!(error = %e, "Failed to register demo handlers");
        return ExitCode::FAILURE;
    }

    info!(
        server = %server.info().name,
        request_timeout_secs = cfg.requests.timeout_secs,
        "MCP server ready, waiting for client connection..."
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to create Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(StdioTransport::new().serve(server, shutdown_signal()));

    match result {
        Ok(()) => {
            info!("Server shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn log_level_from_flags() {
        assert_eq!(get_log_level(0, true, "trace"), Level::ERROR);
        assert_eq!(get_log_level(2, false, "warn"), Level::DEBUG);
        assert_eq!(get_log_level(0, false, "info"), Level::INFO);
        assert_eq!(get_log_level(0, false, "bogus"), Level::WARN);
    }

    #[test]
    fn demo_registers() {
        let cfg = config::Config::default();
        let server = McpServer::new(cfg.server_info(), cfg.server_options().unwrap()).unwrap();
        register_demo(&server).unwrap();
    }
}

#![forbid(unsafe_code)]

//! `tool-bridge`: command-line client for a running tool daemon.
//!
//! Lists the tool registry, or connects to the daemon's local socket and
//! runs a single call or a batch. Results go to stdout, logs to stderr.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use tool_bridge::dispatch::Dispatcher;
use tool_bridge::models::ExecutionContext;
use tool_bridge::tools::schemas::BatchEntry;
use tool_bridge::tools::ToolRegistry;
use tool_bridge::transport::local_socket;
use tool_bridge::{AppError, BridgeConfig, Result};

/// Environment variable holding the caller's identity token.
const TOKEN_ENV: &str = "TOOL_BRIDGE_TOKEN";

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "tool-bridge", about = "Run agent tool calls on the local tool daemon", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the tool registry as JSON.
    Tools,
    /// Run one tool call and print its payload.
    Call {
        /// Tool name.
        tool: String,
        /// Arguments as a JSON object.
        args: String,
        /// Project the call is scoped to.
        #[arg(long)]
        project_id: Option<String>,
        /// Project working directory on the daemon's machine.
        #[arg(long)]
        cwd: Option<PathBuf>,
    },
    /// Run a batch of calls and print the ordered outcomes.
    Batch {
        /// JSON array of `{ "tool": ..., "args": {...} }` entries.
        calls: String,
    },
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = match &args.config {
        Some(path) => BridgeConfig::load_from_path(path)?,
        None => BridgeConfig::default(),
    };
    let registry = Arc::new(ToolRegistry::builtin(&config.timeouts));

    let output = match args.command {
        Command::Tools => registry.to_json(),
        Command::Call {
            tool,
            args,
            project_id,
            cwd,
        } => {
            let raw: Value = serde_json::from_str(&args)
                .map_err(|err| AppError::InvalidArguments(format!("arguments are not JSON: {err}")))?;
            let mut context = identity_context()?;
            if let Some(project_id) = project_id {
                context = context.with_project(project_id);
            }
            if let Some(cwd) = cwd {
                context = context.with_cwd(cwd);
            }

            let dispatcher = connect(&config, registry).await?;
            let result = dispatcher.dispatch(&tool, raw, &context).await;
            dispatcher.channel().close().await;
            result?
        }
        Command::Batch { calls } => {
            let entries: Vec<BatchEntry> = serde_json::from_str(&calls)
                .map_err(|err| AppError::InvalidBatch(format!("calls are not a batch array: {err}")))?;
            let context = identity_context()?;

            let dispatcher = connect(&config, registry).await?;
            let result = dispatcher.dispatch_batch(entries, &context).await;
            dispatcher.channel().close().await;
            serde_json::to_value(result?)?
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn connect(config: &BridgeConfig, registry: Arc<ToolRegistry>) -> Result<Dispatcher> {
    let channel = Arc::new(local_socket::connect(config).await?);
    info!(ipc_name = %config.ipc_name, "dispatcher ready");
    Ok(Dispatcher::new(channel, registry, config))
}

fn identity_context() -> Result<ExecutionContext> {
    env::var(TOKEN_ENV)
        .ok()
        .filter(|token| !token.is_empty())
        .map(ExecutionContext::new)
        .ok_or_else(|| AppError::Unauthorized(format!("{TOKEN_ENV} is not set")))
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}

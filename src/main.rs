//! secure-dev-manager v0.1 — entry point
//!
//! All stdout is JSON only (spec.md §6). Tracing logs go to stderr, except
//! the `"audit"` target, which is routed to the debug log file instead
//! (spec.md §6 "Environment").

use clap::{Parser, Subcommand};
use sdm::config::Config;
use sdm::dispatcher::{self, ToolRequest};
use sdm::schema::DetailTier;
use sdm::server::ServerState;
use std::io::{BufRead, Write};
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

#[derive(Debug, Parser)]
#[command(name = "sdm")]
#[command(about = "Safety-aware process-management core for developer tool channels", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v, -vv); logs go to stderr.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Override the infrastructure protected-token list (comma-separated).
    #[arg(long, global = true, value_delimiter = ',')]
    protected_tokens: Option<Vec<String>>,

    /// Override the debug log file path.
    #[arg(long, global = true)]
    debug_log: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Find processes by name or pid.
    #[command(alias = "ps")]
    FindProcess {
        name: String,
        #[arg(long, default_value = "smart")]
        mode: String,
        #[arg(long)]
        include_args: bool,
    },

    /// Terminate a single process.
    #[command(alias = "kill")]
    KillProcess {
        pid: u32,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        r#override: bool,
        #[arg(long)]
        dry_run: bool,
    },

    /// Terminate a process and all of its descendants.
    #[command(alias = "killall")]
    KillProcessTree {
        pid: u32,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        dry_run: bool,
    },

    /// Check the watched development ports (or one explicit port).
    #[command(alias = "netstat")]
    CheckPorts {
        port: Option<u16>,
    },

    /// Summarize dev ports, user-spawned processes, and MCP health.
    #[command(alias = "status")]
    DevStatus,

    /// Summarize managed servers and port status.
    ServerStatus,

    /// Resolve the process currently bound to a port.
    FindProcessByPort {
        port: u16,
    },

    /// Terminate every process this server has spawned.
    CleanupUserProcesses {
        #[arg(long)]
        confirm: bool,
    },

    /// Read line-delimited JSON `ToolRequest` objects from stdin and write
    /// one JSON response per line to stdout, standing in for the
    /// out-of-scope RPC transport layer (spec.md §1 "Out of scope").
    Serve,
}

fn main() {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let config = Config::resolve(cli.protected_tokens.clone(), cli.debug_log.as_deref());

    let file = std::fs::OpenOptions::new().create(true).append(true).open(&config.debug_log_path);
    let _guard = match file {
        Ok(file) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            let stderr_filter = EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level));
            let stderr_layer = tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(stderr_filter)
                .with_filter(Targets::new().with_target("audit", LevelFilter::OFF).with_default(LevelFilter::TRACE));
            let audit_layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(Targets::new().with_target("audit", LevelFilter::INFO).with_default(LevelFilter::OFF));
            tracing_subscriber::registry().with(stderr_layer).with(audit_layer).init();
            Some(guard)
        }
        Err(e) => {
            // Can't open the debug log; fall back to stderr-only logging
            // rather than failing startup over an ambient concern.
            let filter =
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
            tracing_subscriber::fmt().with_writer(std::io::stderr).with_env_filter(filter).init();
            tracing::warn!("failed to open debug log {:?}: {e}", config.debug_log_path);
            None
        }
    };

    let state = ServerState::new(config);
    let exit_code = run(&state, cli.command);
    state.shutdown();
    std::process::exit(exit_code);
}

fn run(state: &ServerState, command: Command) -> i32 {
    match command {
        Command::Serve => {
            serve(state);
            0
        }
        other => {
            let request = match to_tool_request(other) {
                Ok(r) => r,
                Err(message) => {
                    eprintln!("{message}");
                    return 2;
                }
            };
            let response = dispatcher::dispatch(state, request);
            println!("{response}");
            0
        }
    }
}

/// Line-delimited JSON loop: one `ToolRequest` per line in, one response
/// object per line out. A genuine RPC transport (framing, batching,
/// notifications) is out of scope (spec.md §1); this exists only to prove
/// the core is transport-agnostic.
fn serve(state: &ServerState) {
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<ToolRequest>(&line) {
            Ok(request) => dispatcher::dispatch(state, request),
            Err(e) => format!(
                "{{\"schema_version\":\"0.1\",\"success\":false,\"type\":\"error\",\"elapsed_seconds\":0.0,\"error\":{{\"code\":\"invalid_argument\",\"message\":\"{e}\",\"suggestion\":\"send a single valid ToolRequest JSON object per line\",\"developer_hint\":\"the serve loop is line-delimited JSON, not framed JSON-RPC\"}}}}"
            ),
        };
        if writeln!(stdout, "{response}").is_err() {
            break;
        }
        let _ = stdout.flush();
    }
}

fn to_tool_request(command: Command) -> Result<ToolRequest, String> {
    Ok(match command {
        Command::FindProcess { name, mode, include_args } => ToolRequest::FindProcess {
            name,
            mode: parse_tier(&mode)?,
            include_args,
        },
        Command::KillProcess { pid, force, r#override, dry_run } => {
            ToolRequest::KillProcess { pid, force, override_user_spawn: r#override, dry_run }
        }
        Command::KillProcessTree { pid, force, dry_run } => ToolRequest::KillProcessTree { pid, force, dry_run },
        Command::CheckPorts { port } => ToolRequest::CheckPorts { port },
        Command::DevStatus => ToolRequest::DevStatus,
        Command::ServerStatus => ToolRequest::ServerStatus,
        Command::FindProcessByPort { port } => ToolRequest::FindProcessByPort { port },
        Command::CleanupUserProcesses { confirm } => ToolRequest::CleanupUserProcesses { confirm },
        Command::Serve => unreachable!("Serve is handled before reaching to_tool_request"),
    })
}

fn parse_tier(mode: &str) -> Result<DetailTier, String> {
    match mode.to_ascii_lowercase().as_str() {
        "instant" => Ok(DetailTier::Instant),
        "quick" => Ok(DetailTier::Quick),
        "smart" => Ok(DetailTier::Smart),
        "full" => Ok(DetailTier::Full),
        other => Err(format!("unknown mode '{other}': expected instant|quick|smart|full")),
    }
}

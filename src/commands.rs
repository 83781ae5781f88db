//! Command handlers for the CLI

use anyhow::{bail, Context, Result};
use clap::Args;
use mcp_manager::{Builder, BuildArtifact, Launch, Method, ServerStatus, Settings, StopOutcome, Supervisor};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Liveness poll while an attached server runs in the foreground
const WATCH_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Args, Debug)]
pub struct SetupArgs {
    /// Servers to set up
    #[arg(required = true)]
    pub servers: Vec<String>,

    /// Installation method: docker, npx or node
    #[arg(long, default_value = "docker")]
    pub method: Method,

    /// Environment variable in NAME=VALUE format (repeatable)
    #[arg(long = "env", value_name = "NAME=VALUE")]
    pub env: Vec<String>,

    /// JSON file of environment variables to import
    #[arg(long)]
    pub env_file: Option<PathBuf>,

    /// Build each server before enabling it
    #[arg(long)]
    pub build: bool,
}

pub fn build(settings: &Settings, server: &str) -> Result<()> {
    let mut builder = Builder::new(&settings.servers_root);
    match builder.build(server)? {
        BuildArtifact::Image(image) => println!("Built {server} server as image {image}"),
        BuildArtifact::Package(dir) => {
            println!("Built {server} server in {}", dir.display())
        }
    }
    Ok(())
}

pub async fn start(settings: &Settings, server: &str, detach: bool) -> Result<()> {
    let mut supervisor = Supervisor::open(settings)?;

    match supervisor.start(server, detach)? {
        Launch::Detached => {
            println!("Started {server} server in background mode");
            Ok(())
        }
        Launch::AlreadyRunning => {
            println!("{server} server is already running");
            Ok(())
        }
        Launch::Attached { pid } => {
            println!("Started {server} server (PID {pid}), press Ctrl-C to stop");
            let outcome = watch(&mut supervisor, server).await;
            supervisor.shutdown();
            outcome
        }
    }
}

/// Block until Ctrl-C or until the server stops on its own
async fn watch(supervisor: &mut Supervisor, server: &str) -> Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ticker = tokio::time::interval(WATCH_INTERVAL);

    loop {
        tokio::select! {
            res = &mut ctrl_c => {
                res.context("Failed to listen for Ctrl-C")?;
                info!("Received Ctrl-C, stopping {server}");
                return Ok(());
            }
            _ = ticker.tick() => {
                let status = supervisor.status_of(server)?;
                if status != ServerStatus::Running {
                    bail!("{server} server is {status}");
                }
            }
        }
    }
}

pub fn stop(settings: &Settings, server: &str) -> Result<()> {
    let mut supervisor = Supervisor::open(settings)?;
    match supervisor.stop(server)? {
        StopOutcome::NotRunning => println!("{server} server is not running"),
        StopOutcome::Scanned { matched: 0 } => {
            println!("No running {server} server found")
        }
        _ => println!("Stopped {server} server"),
    }
    Ok(())
}

pub fn stop_all(settings: &Settings) -> Result<()> {
    let mut supervisor = Supervisor::open(settings)?;
    supervisor.stop_all();
    println!("Stopped all servers");
    Ok(())
}

pub fn status(settings: &Settings, json: bool) -> Result<()> {
    let mut supervisor = Supervisor::open(settings)?;
    print_status(&mut supervisor, json)
}

fn print_status(supervisor: &mut Supervisor, json: bool) -> Result<()> {
    let status = supervisor.status();
    if json {
        println!("{}", format_status_json(&status)?);
    } else {
        print!("{}", format_status_table(&status));
    }
    Ok(())
}

pub fn enable(settings: &Settings, server: &str, method: Method) -> Result<()> {
    let mut supervisor = Supervisor::open(settings)?;
    supervisor.enable(server, method)?;
    println!("Enabled {server} server with method {method}");
    Ok(())
}

pub fn disable(settings: &Settings, server: &str) -> Result<()> {
    let mut supervisor = Supervisor::open(settings)?;
    supervisor.disable(server)?;
    println!("Disabled {server} server");
    Ok(())
}

pub fn set_env(settings: &Settings, name: &str, value: &str) -> Result<()> {
    let mut supervisor = Supervisor::open(settings)?;
    supervisor.set_env(name, value)?;
    println!("Set environment variable {name}");
    Ok(())
}

pub fn get_env(settings: &Settings, name: &str) -> Result<()> {
    let supervisor = Supervisor::open(settings)?;
    match supervisor.get_env(name) {
        Some(value) => {
            println!("{value}");
            Ok(())
        }
        None => bail!("Environment variable {name} not set"),
    }
}

pub fn setup(settings: &Settings, args: SetupArgs) -> Result<()> {
    let mut supervisor = Supervisor::open(settings)?;

    if let Some(path) = &args.env_file {
        for (name, value) in load_env_file(path)? {
            supervisor.set_env(&name, &value)?;
            println!("Set environment variable {name} from file");
        }
    }

    for pair in &args.env {
        let (name, value) = parse_env_pair(pair)?;
        supervisor.set_env(name, value)?;
        println!("Set environment variable {name}");
    }

    let mut builder = Builder::new(&settings.servers_root);
    let mut failed = Vec::new();

    for server in &args.servers {
        println!("\n=== Setting up {server} server ===");

        if args.build {
            println!("Building {server} server...");
            if let Err(e) = builder.build(server) {
                eprintln!("Failed to build {server} server: {e}");
                failed.push(server.as_str());
                continue;
            }
        }

        println!("Enabling {server} server...");
        if let Err(e) = supervisor.enable(server, args.method) {
            eprintln!("Failed to enable {server} server: {e}");
            failed.push(server.as_str());
            continue;
        }

        let (satisfied, missing) = supervisor.check_env(server)?;
        if !satisfied {
            println!(
                "Warning: Missing environment variables for {server}: {}",
                missing.join(", ")
            );
            println!("You can set them using the setenv command");
        }
    }

    println!("\n=== Server Status ===");
    print_status(&mut supervisor, false)?;

    if !failed.is_empty() {
        bail!("Setup failed for: {}", failed.join(", "));
    }
    println!("\nSetup complete!");
    println!("To start a server: mcp-manager start <server>");
    Ok(())
}

/// Split `NAME=VALUE` at the first `=`
fn parse_env_pair(pair: &str) -> Result<(&str, &str)> {
    match pair.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name, value)),
        _ => bail!("Invalid environment variable format: {pair}"),
    }
}

/// Read a flat JSON object of variables; non-string values are stringified
fn load_env_file(path: &Path) -> Result<BTreeMap<String, String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read environment file {}", path.display()))?;
    parse_env_json(&content)
        .with_context(|| format!("Invalid environment file format: {}", path.display()))
}

fn parse_env_json(content: &str) -> Result<BTreeMap<String, String>> {
    let value: serde_json::Value = serde_json::from_str(content)?;
    let serde_json::Value::Object(map) = value else {
        bail!("expected a JSON object");
    };
    Ok(map
        .into_iter()
        .map(|(name, value)| {
            let value = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (name, value)
        })
        .collect())
}

/// JSON object keyed by server, in registry order
fn format_status_json(status: &[(&str, ServerStatus)]) -> Result<String> {
    let mut map = serde_json::Map::new();
    for (name, state) in status {
        map.insert(name.to_string(), serde_json::to_value(state)?);
    }
    Ok(serde_json::to_string_pretty(&map)?)
}

fn format_status_table(status: &[(&str, ServerStatus)]) -> String {
    let max_len = status.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
    let mut out = format!("{:<width$} Status\n", "Server", width = max_len + 2);
    out.push_str(&format!("{} ------\n", "-".repeat(max_len)));
    for (name, state) in status {
        out.push_str(&format!("{:<width$} {}\n", name, state, width = max_len + 2));
    }
    out
}

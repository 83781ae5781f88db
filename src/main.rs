mod commands;

use clap::{Parser, Subcommand};
use mcp_manager::{Method, Settings};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mcp-manager")]
#[command(about = "Launch and manage MCP servers", long_about = None)]
struct Args {
    /// Directory holding config.json, env.json and server logs
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Directory containing server source directories
    #[arg(long, global = true)]
    servers_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build an MCP server
    Build { server: String },

    /// Start an MCP server
    Start {
        server: String,
        /// Run in background mode
        #[arg(short, long)]
        detach: bool,
    },

    /// Stop an MCP server
    Stop { server: String },

    /// Stop all MCP servers
    Stopall,

    /// Show status of MCP servers
    Status {
        /// Print a JSON object instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Enable an MCP server
    Enable {
        server: String,
        /// Installation method: docker, npx or node
        #[arg(long, default_value = "docker")]
        method: Method,
    },

    /// Disable an MCP server
    Disable { server: String },

    /// Set an environment variable
    Setenv { name: String, value: String },

    /// Get an environment variable
    Getenv { name: String },

    /// Setup MCP servers with all required components
    Setup(commands::SetupArgs),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            // Help and version go to stdout and are not failures
            let code = if err.use_stderr() { 1 } else { 0 };
            let _ = err.print();
            return ExitCode::from(code);
        }
    };

    init_tracing();

    let mut settings = Settings::load();
    if let Some(dir) = args.state_dir {
        settings.state_dir = dir;
    }
    if let Some(root) = args.servers_root {
        settings.servers_root = root;
    }

    let result = match args.command {
        Command::Build { server } => commands::build(&settings, &server),
        Command::Start { server, detach } => commands::start(&settings, &server, detach).await,
        Command::Stop { server } => commands::stop(&settings, &server),
        Command::Stopall => commands::stop_all(&settings),
        Command::Status { json } => commands::status(&settings, json),
        Command::Enable { server, method } => commands::enable(&settings, &server, method),
        Command::Disable { server } => commands::disable(&settings, &server),
        Command::Setenv { name, value } => commands::set_env(&settings, &name, &value),
        Command::Getenv { name } => commands::get_env(&settings, &name),
        Command::Setup(setup) => commands::setup(&settings, setup),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

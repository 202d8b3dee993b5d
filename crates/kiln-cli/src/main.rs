use std::path::PathBuf;

use clap::{Parser, Subcommand};
use kiln_core::HandlerContract;

mod commands;

#[derive(Parser)]
#[command(
    name = "kiln",
    about = "Kiln — sandboxed host for JavaScript HTTP handlers",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a script, validate it, and print the detected contract
    Check {
        /// Script to load (overrides handler.script from the config)
        script: Option<PathBuf>,
        /// Path to kiln.toml (default: ./kiln.toml if present)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Force a contract: zero-arg, single-arg, or two-arg
        #[arg(long)]
        contract: Option<HandlerContract>,
    },
    /// Invoke a script once and print the response.
    ///
    /// For zero-arg scripts this is the process-start invocation; the
    /// request flags are ignored.
    Run {
        script: Option<PathBuf>,
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(long)]
        contract: Option<HandlerContract>,
        /// Request method
        #[arg(short, long, default_value = "GET")]
        method: String,
        /// Request path and query
        #[arg(short, long, default_value = "/")]
        uri: String,
        /// Request body, as text
        #[arg(short, long)]
        body: Option<String>,
        /// Request header as `Name: value` (repeatable)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
        /// Invocation timeout, e.g. "500ms" or "5s"
        #[arg(short, long)]
        timeout: Option<String>,
    },
    /// Serve a script over HTTP until Ctrl-C
    Serve {
        script: Option<PathBuf>,
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(long)]
        contract: Option<HandlerContract>,
        /// Address to listen on (default: server.listen, else 127.0.0.1:3000)
        #[arg(short, long)]
        listen: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive("kiln=info".parse()?);
    if cli.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    match cli.command {
        Commands::Check {
            script,
            config,
            contract,
        } => commands::check::check(script, config, contract),
        Commands::Run {
            script,
            config,
            contract,
            method,
            uri,
            body,
            headers,
            timeout,
        } => {
            let request = commands::run::RequestArgs {
                method,
                uri,
                body,
                headers,
            };
            commands::run::run(script, config, contract, request, timeout.as_deref()).await
        }
        Commands::Serve {
            script,
            config,
            contract,
            listen,
        } => commands::serve::serve(script, config, contract, listen).await,
    }
}

//! Steward Automaton - script-driven state machine controlled over a unix socket

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use steward_automaton::{control, Automaton, AutomatonMessage, ControlServer, Manifest, Request};
use steward_core::observability::{init_tracing, shutdown_tracing, TracingConfig};
use steward_core::signals::wait_for_shutdown_signal;
use steward_core::{Actor, Registry};
use tracing::{info, warn};

const DEFAULT_SOCKET: &str = "/var/run/automaton.sock";

#[derive(Parser)]
#[command(name = "steward-automaton")]
#[command(about = "Script-driven state machine controlled over a unix socket")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the machine described by a YAML manifest
    Run {
        manifest: PathBuf,
        /// Unix socket path
        #[arg(short, long, env = "STEWARD_AUTOMATON_SOCKET", default_value = DEFAULT_SOCKET)]
        socket: PathBuf,
        /// Debug logging on
        #[arg(short, long)]
        debug: bool,
    },
    /// Send a command (STATE, GOTO <state> [input], WAIT <state> [input]) and print the reply
    Send {
        #[arg(short, long, env = "STEWARD_AUTOMATON_SOCKET", default_value = DEFAULT_SOCKET)]
        socket: PathBuf,
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },
    /// Validate a manifest and print its state graph
    Check { manifest: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            manifest,
            socket,
            debug,
        } => run(&manifest, &socket, debug).await,
        Commands::Send { socket, command } => {
            let reply = control::send(&socket, &command.join(" "))
                .await
                .with_context(|| format!("cannot reach {}", socket.display()))?;
            if reply.is_empty() {
                anyhow::bail!("no reply, the command was not understood");
            }
            println!("{reply}");
            Ok(())
        }
        Commands::Check { manifest } => check(&manifest),
    }
}

fn check(path: &Path) -> anyhow::Result<()> {
    let manifest = Manifest::load(path)?;
    let graph = manifest.validate()?;
    println!("initial: {}", graph.initial());
    for state in graph.states() {
        let next = if state.next.is_empty() {
            "(none)".to_string()
        } else {
            state.next.join(", ")
        };
        println!("{} -> {}", state.tag, next);
    }
    if graph.lookup(graph.initial()).is_none() {
        println!("warning: initial state {} is not declared", graph.initial());
    }
    Ok(())
}

async fn run(manifest: &Path, socket: &Path, debug: bool) -> anyhow::Result<()> {
    init_tracing(TracingConfig::for_service("steward-automaton").verbose(debug))
        .map_err(|e| anyhow::anyhow!(e))
        .context("failed to initialize tracing")?;

    let graph = Manifest::load(manifest)
        .and_then(|manifest| manifest.validate())
        .context("invalid manifest")?;
    let socket = std::path::absolute(socket)
        .with_context(|| format!("invalid socket path {}", socket.display()))?;

    let server = ControlServer::bind(&socket)
        .with_context(|| format!("cannot bind {}", socket.display()))?;
    info!(socket = %server.path().display(), manifest = %manifest.display(), "automaton listening");

    let initial = graph.initial().to_string();
    if graph.lookup(&initial).is_none() {
        warn!(initial = %initial, "initial state is not declared, staying idle");
    }

    let mut registry = Registry::default();
    let automaton = Actor::start(Automaton::new(graph, socket.clone()));
    registry.register(automaton.handle());
    automaton.tell(AutomatonMessage::Transition(Request::detached(initial)))?;

    let served = server
        .serve(automaton, async {
            match wait_for_shutdown_signal().await {
                Ok(signal) => info!(signal = %signal, "Shutdown signal received"),
                Err(e) => warn!(error = %e, "signal handler failed, shutting down"),
            }
        })
        .await;

    registry.shutdown_all().await;
    shutdown_tracing();
    served.context("control socket failed")
}

use anyhow::{Context, Result};
use botflow::channel::HttpIntegrationClient;
use botflow::engine::{Engine, TurnOutcome};
use botflow::flow::InMemoryFlowStore;
use botflow::harness::ConsoleDelivery;
use botflow::session::InMemorySessionStore;
use botflow::{EngineConfig, FlowDefinition, InboundEvent};
use clap::{Parser, Subcommand};
use schemars::schema_for;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "botflow", version, about = "Conversational flow execution engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run flows against an interactive console conversation.
    Run {
        /// Flow definition JSON file; may be given more than once.
        #[arg(long = "flow", required = true)]
        flows: Vec<PathBuf>,
        /// Conversation index idle timeout in seconds.
        #[arg(long, default_value_t = 1800)]
        session_ttl_secs: u64,
    },
    /// Compile a flow definition and report errors and warnings.
    Validate { file: PathBuf },
    /// Print the JSON schema for flow definition documents.
    Schema,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("botflow=info")),
        )
        .init();

    match Cli::parse().command {
        Command::Run { flows, session_ttl_secs } => run(flows, session_ttl_secs).await,
        Command::Validate { file } => validate(&file),
        Command::Schema => {
            println!("{}", serde_json::to_string_pretty(&schema_for!(FlowDefinition))?);
            Ok(())
        }
    }
}

async fn run(flow_paths: Vec<PathBuf>, session_ttl_secs: u64) -> Result<()> {
    let store = InMemoryFlowStore::new();
    for path in &flow_paths {
        let def = load(path)?;
        let compiled = store
            .register(def)
            .with_context(|| format!("failed to compile {}", path.display()))?;
        for warning in compiled.warnings() {
            eprintln!("warning ({}): {warning}", compiled.id());
        }
    }

    let engine = Engine::new(
        store,
        InMemorySessionStore::new(session_ttl_secs),
        Arc::new(ConsoleDelivery),
        Arc::new(HttpIntegrationClient::new()),
        EngineConfig::from_env(),
    );

    println!("Type a message to start a flow, `/click <button-id>` to answer a prompt,");
    println!("or press Ctrl-C to quit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let event = match line.strip_prefix("/click ") {
            Some(handle) => InboundEvent::choice("console", handle.trim()),
            None => InboundEvent::text("console", line),
        };
        match engine.start_or_resume(event).await {
            Ok(report) => match report.outcome {
                TurnOutcome::NoMatch => println!("(no flow matched that message)"),
                TurnOutcome::Busy { .. } => println!("(still working on the last message)"),
                TurnOutcome::Completed { .. } => println!("(flow completed)"),
                TurnOutcome::WaitingForInput { .. } => {}
                TurnOutcome::Failed { error, .. } => println!("(flow failed: {error})"),
            },
            Err(e) => error!("turn failed: {e}"),
        }
    }
    Ok(())
}

fn validate(path: &PathBuf) -> Result<()> {
    let def = load(path)?;
    match def.compile() {
        Ok(flow) => {
            println!("{} v{}: ok", flow.id(), flow.version());
            for warning in flow.warnings() {
                println!("warning: {warning}");
            }
            Ok(())
        }
        Err(e) => {
            println!("invalid: {e}");
            std::process::exit(1);
        }
    }
}

fn load(path: &PathBuf) -> Result<FlowDefinition> {
    InMemoryFlowStore::load_flow_from_file(
        path.to_str()
            .with_context(|| format!("non-utf8 path {}", path.display()))?,
    )
    .with_context(|| format!("failed to load {}", path.display()))
}

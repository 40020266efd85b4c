//! Interactive terminal assistant backed by MCP tool servers.
//!
//! Reads one query per line, streams the model's reply, and releases every
//! tool server on exit.

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::sync::Arc;

use dotenvy::dotenv;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use mcp_assistant::agent::{EventDemultiplexer, QueryError};
use mcp_assistant::config::AppConfig;
use mcp_assistant::llm::{ChatCompletionsDriver, ToolLoopModel};
use mcp_assistant::mcp::RmcpConnector;
use mcp_assistant::session::Session;
use mcp_assistant::telemetry;

const EXIT_COMMANDS: [&str; 3] = ["q", "quit", "exit"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present)
    let _ = dotenv();

    let config = AppConfig::load()?;
    telemetry::init(config.telemetry.log_json);

    info!(
        name: "llm.config.loaded",
        base_url = %config.llm.base_url,
        model = %config.llm.model,
        "LLM configuration loaded"
    );

    let driver = Arc::new(ChatCompletionsDriver::new(config.llm.settings()));
    let model = Arc::new(ToolLoopModel::new(driver, config.llm.context_window));
    let demux = EventDemultiplexer::new(tokio::io::stdout()).with_prefix("Streaming reply: ");

    let mut session = Session::setup(&config, &RmcpConnector, model, demux).await?;

    print_banner(&session);
    let outcome = repl(&mut session, config.agent.streaming).await;

    let report = session.teardown().await;
    for failure in report.failures() {
        eprintln!("Failed to release MCP server {}", failure.server);
    }
    println!("Goodbye, all resources released.");

    outcome
}

fn print_banner<W>(session: &Session<W>) {
    println!("===== MCP Assistant =====");
    println!("Tool servers: {}", session.registry().names().join(", "));
    println!("Ask in natural language, for example:");
    println!(" - \"What's the weather like in Beijing?\"");
    println!(" - \"Forecast for Shanghai over the next 5 days\"");
    println!("Type 'quit' to exit");
    println!("=========================\n");
}

async fn repl(
    session: &mut Session<tokio::io::Stdout>,
    streaming: bool,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        println!("\nQuery ('quit' to exit): ");

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                println!("\nInterrupted, shutting down...");
                return Ok(());
            }
        };

        let Some(line) = line else {
            return Ok(());
        };
        let query = line.trim();

        if EXIT_COMMANDS.contains(&query.to_lowercase().as_str()) {
            println!("Thanks for using MCP Assistant, goodbye!");
            return Ok(());
        }
        if query.is_empty() {
            println!("Query cannot be empty, please try again.");
            continue;
        }

        println!("\nProcessing query: {query}\n");
        if !streaming {
            println!("Waiting for the full reply...");
        }

        let result = tokio::select! {
            result = session.run_query(query, streaming) => result,
            _ = tokio::signal::ctrl_c() => {
                println!("\nInterrupted, shutting down...");
                return Ok(());
            }
        };

        match result {
            Ok(answer) => {
                println!("\n===== Final answer =====");
                println!("{answer}");
            }
            Err(e @ QueryError::TurnLimitExceeded { .. }) => {
                eprintln!("\nThe assistant gave up: {e}");
            }
            Err(e) => {
                eprintln!("\nError while processing the query: {e}");
            }
        }
    }
}

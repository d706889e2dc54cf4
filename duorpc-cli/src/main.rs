//! duorpc-cli - Command-line interface for duorpc web services
//!
//! Provides both a REPL and one-shot command execution.

mod commands;
mod repl;

use clap::{Parser, Subcommand};
use colored::Colorize;
use duorpc_client::{Client, ClientConfig};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "duorpc-cli")]
#[command(about = "Command-line interface for duorpc web services")]
#[command(version)]
struct Cli {
    /// Service address as host:port
    #[arg(short, long, default_value = "localhost:9000", env = "DUORPC_SERVER")]
    server: String,

    /// Base path of the service
    #[arg(short, long, default_value = "/")]
    base: String,

    /// Use TLS (https/wss)
    #[arg(long, env = "DUORPC_TLS")]
    tls: bool,

    /// Path prefix for RPC endpoints
    #[arg(short, long, default_value = "/rpc")]
    path_prefix: String,

    /// Reconnection delay in milliseconds
    #[arg(long, default_value = "1500")]
    reconnect_ms: u64,

    /// Finalization grace period in milliseconds (-1 disables pruning)
    #[arg(long, default_value = "1000", allow_hyphen_values = true)]
    finalize_ms: i64,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start interactive REPL
    Repl,

    /// Send a single call over the single-shot transport
    Call {
        /// RPC name
        rpc: String,

        /// Request payload JSON
        request: Option<String>,
    },

    /// Connect the socket, send a call, and print every follow-up
    Stream {
        /// RPC name
        rpc: String,

        /// Request payload JSON
        request: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let finalize_after = if cli.finalize_ms < 0 {
        None
    } else {
        Some(Duration::from_millis(cli.finalize_ms as u64))
    };
    let config = ClientConfig::new(&cli.server)
        .with_base_path(&cli.base)
        .with_tls(cli.tls)
        .with_reconnect_delay(Duration::from_millis(cli.reconnect_ms))
        .with_finalize_after(finalize_after);
    let client = Client::new(config);

    match cli.command {
        Some(Commands::Repl) | None => {
            repl::run(client, &cli.server, &cli.path_prefix).await?;
        }
        Some(Commands::Stream { rpc, request }) => {
            // Stream - prints follow-ups until Ctrl+C
            let request = commands::parse_request(request.as_deref())?;
            client.connect_ws_on(&cli.path_prefix).await.map_err(|e| {
                eprintln!("{}: {}", "Connection failed".red(), e);
                e
            })?;

            let mut chain = client.send_rpc_chain(&rpc, request).await?;
            eprintln!(
                "{} {} (call id: {})",
                "Streaming".green(),
                rpc.cyan(),
                chain.id()
            );
            eprintln!("{}", "Press Ctrl+C to stop...".dimmed());

            loop {
                tokio::select! {
                    follow_up = chain.next() => {
                        match follow_up {
                            Ok(f) => println!("{}", f.payload),
                            Err(e) => {
                                eprintln!("{}: {}", "Stream ended".yellow(), e);
                                break;
                            }
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        eprintln!("\n{}", "Stopping...".dimmed());
                        break;
                    }
                }
            }

            client.disconnect_ws().await;
        }
        Some(cmd) => {
            let result = commands::execute(&client, &cli.path_prefix, cmd).await;
            match result {
                Ok(output) => {
                    println!("{}", output);
                }
                Err(e) => {
                    eprintln!("{}: {}", "Error".red(), e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

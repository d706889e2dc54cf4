//! Interactive REPL.

use colored::Colorize;
use duorpc_client::Client;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use serde_json::Value;

const HELP_TEXT: &str = r#"
Available commands:
  help                          Show this help
  status                        Show transport and pending calls

  connect [path_prefix]         Open the WebSocket (default prefix /rpc)
  disconnect                    Close the WebSocket and stop reconnecting

  call <rpc> [request_json]     Send a call and print the first reply
  stream <rpc> [request_json]   Send a call and print follow-ups (Ctrl+C stops)

  quit, exit                    Exit the REPL
"#;

pub async fn run(
    client: Client,
    server: &str,
    path_prefix: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "duorpc CLI".bold().cyan());
    println!("Service at {} (no socket yet; calls go over http)", server);

    // Create readline editor
    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(config)?;

    // Load history
    let history_path = std::env::var("HOME")
        .map(|h| std::path::PathBuf::from(h).join(".duorpc_history"))
        .unwrap_or_else(|_| ".duorpc_history".into());
    let _ = rl.load_history(&history_path);

    println!("Type 'help' for available commands.\n");

    loop {
        let prompt = format!("{} ", "duorpc>".cyan());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match execute_repl_command(&client, path_prefix, line).await {
                    Ok(Some(output)) => println!("{}\n", output),
                    Ok(None) => break, // Exit command
                    Err(e) => println!("{}: {}\n", "Error".red(), e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    // Save history
    let _ = rl.save_history(&history_path);

    // Disconnect
    client.disconnect_ws().await;
    println!("{}", "Disconnected.".dimmed());

    Ok(())
}

async fn execute_repl_command(
    client: &Client,
    default_prefix: &str,
    line: &str,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.is_empty() {
        return Ok(Some(String::new()));
    }

    let cmd = parts[0].to_lowercase();
    let args = &parts[1..];

    match cmd.as_str() {
        "help" | "?" => Ok(Some(HELP_TEXT.to_string())),

        "quit" | "exit" | "q" => Ok(None),

        "status" | "st" => {
            let transport = if client.is_connected() {
                "WebSocket".green()
            } else {
                "http(s)".yellow()
            };
            Ok(Some(format!(
                "transport: {}, pending calls: {}",
                transport,
                client.pending_calls().await
            )))
        }

        "connect" => {
            let prefix = args.first().copied().unwrap_or(default_prefix);
            client.connect_ws_on(prefix).await?;
            Ok(Some(format!(
                "{} {}{}",
                "Connected".green(),
                client.endpoint().ws_base,
                prefix.cyan()
            )))
        }

        "disconnect" | "dc" => {
            client.disconnect_ws().await;
            Ok(Some("Disconnected".dimmed().to_string()))
        }

        "call" | "c" => {
            if args.is_empty() {
                return Ok(Some("Usage: call <rpc> [request_json]".to_string()));
            }
            let rpc = args[0];
            let request = parse_json_args(&args[1..])?;
            let reply = client.send_rpc_on(rpc, request, default_prefix).await?;
            Ok(Some(crate::commands::format_json(&reply)))
        }

        "stream" | "s" => {
            if args.is_empty() {
                return Ok(Some("Usage: stream <rpc> [request_json]".to_string()));
            }
            if !client.is_connected() {
                return Ok(Some(
                    "Not connected; run 'connect' first".yellow().to_string(),
                ));
            }
            let rpc = args[0];
            let request = parse_json_args(&args[1..])?;
            let mut chain = client.send_rpc_chain(rpc, request).await?;
            println!(
                "{} (call id: {}, Ctrl+C returns to the prompt)",
                "Streaming".green(),
                chain.id()
            );
            loop {
                tokio::select! {
                    follow_up = chain.next() => match follow_up {
                        Ok(f) => println!("{}", f.payload),
                        Err(e) => {
                            return Ok(Some(format!("{}: {}", "Stream ended".yellow(), e)));
                        }
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            Ok(Some(String::new()))
        }

        _ => Ok(Some(format!(
            "Unknown command: {}. Type 'help' for help.",
            cmd
        ))),
    }
}

/// Joins the remaining arguments and parses them as one JSON value, so
/// payloads with spaces don't need quoting games.
fn parse_json_args(args: &[&str]) -> Result<Value, serde_json::Error> {
    if args.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&args.join(" "))
}

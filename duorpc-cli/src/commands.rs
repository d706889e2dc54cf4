//! One-shot command execution.

use crate::Commands;
use duorpc_client::Client;
use serde_json::Value;

/// Parses an optional JSON argument; absent means a null payload.
pub fn parse_request(arg: Option<&str>) -> Result<Value, serde_json::Error> {
    match arg {
        Some(text) => serde_json::from_str(text),
        None => Ok(Value::Null),
    }
}

pub async fn execute(
    client: &Client,
    path_prefix: &str,
    cmd: Commands,
) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Call { rpc, request } => {
            let request = parse_request(request.as_deref())?;
            let reply = client.send_rpc_on(&rpc, request, path_prefix).await?;
            Ok(format_json(&reply))
        }
        Commands::Repl | Commands::Stream { .. } => unreachable!("handled in main"),
    }
}

pub fn format_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

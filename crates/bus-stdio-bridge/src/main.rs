//! Stdio↔HTTP bridge (C10): reads newline-delimited JSON tool calls from
//! stdin, forwards each to the gateway's in-process HTTP routes over a
//! loopback client, and writes the result back as one JSON line on
//! stdout. Grounded on `skynet-gateway::mcp_bridge`'s stdio loop shape,
//! adapted to forward over HTTP rather than hit a local `MemoryManager`
//! directly — the gateway process owns the dispatcher/claims/active-mode
//! state this tool surface ultimately touches, so there is no
//! in-process shortcut here.

use std::io;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use bus_core::config::BusConfig;
use bus_protocol::memory_api::{StdioToolCall, StdioToolResult};

/// Map a tool name to its HTTP method, path template (`{uuid}` is
/// substituted from `arguments.uuid`), and whether its body carries a
/// `token` field the bridge should fill in (§6).
fn route_for(tool: &str) -> Option<(&'static str, &'static str, bool)> {
    match tool {
        "ambient_recall" => Some(("POST", "/tools/ambient_recall", true)),
        "raw_search" => Some(("POST", "/tools/raw_search", true)),
        "anchor_search" => Some(("POST", "/tools/anchor_search", true)),
        "anchor_save" => Some(("POST", "/tools/anchor_save", true)),
        "texture_search" => Some(("POST", "/tools/texture_search", true)),
        "texture_add" => Some(("POST", "/tools/texture_add", true)),
        "texture_add_triplet" => Some(("POST", "/tools/texture_add_triplet", true)),
        "texture_delete" => Some(("DELETE", "/tools/texture_delete/{uuid}", true)),
        "crystallize" => Some(("POST", "/tools/crystallize", true)),
        "get_crystals" => Some(("POST", "/tools/get_crystals", true)),
        "store_message" => Some(("POST", "/tools/store_message", false)),
        "pps_health" => Some(("GET", "/tools/pps_health", false)),
        _ => None,
    }
}

/// Fill in `arguments.token` from the entity token file when the caller
/// left the field null or absent — this is the "auto-injecting the
/// entity token" behaviour §4.10 calls for, so MCP-style clients never
/// need to know the gateway's token at all.
fn inject_token(arguments: &mut Value, entity_token: Option<&str>) {
    let Some(token) = entity_token else { return };
    if let Value::Object(map) = arguments {
        if matches!(map.get("token"), None | Some(Value::Null)) {
            map.insert("token".to_string(), json!(token));
        }
    }
}

async fn forward(
    client: &reqwest::Client,
    base_url: &str,
    entity_token: Option<&str>,
    call: StdioToolCall,
) -> StdioToolResult {
    let Some((method, path_template, has_token)) = route_for(&call.tool) else {
        return StdioToolResult {
            id: call.id,
            ok: false,
            result: None,
            error: Some(format!("unknown tool: {}", call.tool)),
        };
    };

    let mut arguments = call.arguments;
    if has_token {
        inject_token(&mut arguments, entity_token);
    }

    let path = if path_template.contains("{uuid}") {
        let uuid = arguments.get("uuid").and_then(|v| v.as_str()).unwrap_or_default();
        path_template.replace("{uuid}", uuid)
    } else {
        path_template.to_string()
    };
    let url = format!("{base_url}{path}");

    let request = match method {
        "GET" => client.get(&url),
        // DELETE carries no body (§6) — the token travels as a query
        // parameter instead of in the (nonexistent) JSON body.
        "DELETE" => {
            let token = arguments.get("token").and_then(|v| v.as_str());
            let mut req = client.delete(&url);
            if let Some(token) = token {
                req = req.query(&[("token", token)]);
            }
            req
        }
        _ => client.post(&url).json(&arguments),
    };

    match request.send().await {
        Ok(resp) => {
            let status = resp.status();
            let body: Value = resp.json().await.unwrap_or(Value::Null);
            if status.is_success() {
                StdioToolResult { id: call.id, ok: true, result: Some(body), error: None }
            } else {
                let message =
                    body.get("message").and_then(|m| m.as_str()).unwrap_or("request failed").to_string();
                StdioToolResult { id: call.id, ok: false, result: None, error: Some(message) }
            }
        }
        Err(e) => StdioToolResult { id: call.id, ok: false, result: None, error: Some(e.to_string()) },
    }
}

async fn write_result(stdout: &mut tokio::io::Stdout, result: &StdioToolResult) -> io::Result<()> {
    let mut line = serde_json::to_vec(result).unwrap_or_default();
    line.push(b'\n');
    stdout.write_all(&line).await?;
    stdout.flush().await
}

/// Exit codes per §6: 0 clean, 1 fatal config/boot, 130 interrupt.
#[tokio::main]
async fn main() {
    match run().await {
        Ok(interrupted) => std::process::exit(if interrupted { 130 } else { 0 }),
        Err(e) => {
            tracing::error!(error = %e, "fatal bridge error");
            std::process::exit(1);
        }
    }
}

async fn run() -> anyhow::Result<bool> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bus_stdio_bridge=info".into()),
        )
        .init();

    let config_path = std::env::var("BUS_CONFIG").ok();
    let config = BusConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "config load failed, using defaults");
        BusConfig::default()
    });

    let base_url = format!("http://127.0.0.1:{}", config.gateway.port);
    let entity_token = std::fs::read_to_string(&config.token_gate.entity_path).ok().map(|s| s.trim().to_string());

    info!(%base_url, "stdio bridge forwarding to gateway");

    let client = reqwest::Client::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let next = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("received interrupt, shutting down");
                return Ok(true);
            }
        };
        let Some(line) = next else { break };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let result = match serde_json::from_str::<StdioToolCall>(trimmed) {
            Ok(call) => forward(&client, &base_url, entity_token.as_deref(), call).await,
            Err(e) => StdioToolResult {
                id: String::new(),
                ok: false,
                result: None,
                error: Some(format!("parse error: {e}")),
            },
        };

        write_result(&mut stdout, &result).await?;
    }

    Ok(false)
}

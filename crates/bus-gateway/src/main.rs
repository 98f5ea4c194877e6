use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

mod app;
mod http;
mod outbound;
mod ws;

use bus_active_mode::ActiveModeRegistry;
use bus_chat::ChatFabric;
use bus_claims::ClaimStore;
use bus_core::config::BusConfig;
use bus_core::InstanceId;
use bus_dispatcher::{Dispatcher, OutboundSink};
use bus_invoker::{Invoker, SessionBounds, SubprocessWorkerBackend};
use bus_ledger::Ledger;
use bus_memory::{AnchorsLayer, CrystalsLayer, GraphLayer, HttpGraphBackend, HttpVectorBackend, MemoryRouter};
use bus_token_gate::TokenGate;

use crate::outbound::ChatOutboundSink;

fn open_connection(path: &str) -> anyhow::Result<rusqlite::Connection> {
    if let Some(parent) = Path::new(path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(rusqlite::Connection::open(path)?)
}

/// Exit codes per §6: 0 clean, 1 fatal config/boot, 130 interrupt.
#[tokio::main]
async fn main() {
    match run().await {
        Ok(interrupted) => std::process::exit(if interrupted { 130 } else { 0 }),
        Err(e) => {
            tracing::error!(error = %e, "fatal error during boot or serve");
            std::process::exit(1);
        }
    }
}

/// Returns `Ok(true)` if shutdown was triggered by an interrupt signal.
async fn run() -> anyhow::Result<bool> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bus_gateway=info,tower_http=info".into()),
        )
        .init();

    let config_path = std::env::var("BUS_CONFIG").ok();
    let config = BusConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "config load failed, using defaults");
        BusConfig::default()
    });

    let instance = InstanceId::generate();
    info!(instance = %instance.as_str(), "starting conversation bus gateway");

    let ledger = Arc::new(Ledger::new(open_connection(&config.database.path)?)?);
    let claims =
        Arc::new(ClaimStore::new(open_connection(&config.database.claims_path)?, config.claims.ttl_seconds)?);
    let active_mode = Arc::new(ActiveModeRegistry::new(open_connection(&config.database.active_mode_path)?)?);
    let chat = Arc::new(ChatFabric::new(open_connection(&config.database.chat_path)?)?);

    let vector_backend = Arc::new(HttpVectorBackend::new(config.memory.vector_url.clone()));
    let anchors = AnchorsLayer::new(config.memory.anchors_dir.clone(), vector_backend);

    // §9's Open Question resolution: the graph backend is chosen exactly
    // once at construction and a failed health probe is a fatal boot
    // error, not a degraded layer.
    let graph_backend = Arc::new(HttpGraphBackend::new(config.memory.graph_url.clone()));
    let graph = GraphLayer::connect(graph_backend)
        .await
        .map_err(|e| anyhow::anyhow!("graph backend unavailable at boot: {e}"))?;

    let crystals = CrystalsLayer::new(config.memory.crystals_dir.clone(), config.memory.crystals_max_current)?;
    let memory = Arc::new(MemoryRouter::new(ledger.clone(), anchors, graph, crystals));

    let token_gate = Arc::new(TokenGate::load(&config.token_gate)?);

    let bot_id = format!("bot:{}", config.gateway.self_name);
    chat.ensure_user(&bot_id, &config.gateway.self_name, &config.gateway.self_name, true)?;
    let outbound_sink: Arc<dyn OutboundSink> =
        Arc::new(ChatOutboundSink::new(chat.clone(), bot_id, config.gateway.self_name.clone()));

    let worker_backend = Arc::new(SubprocessWorkerBackend::new(
        config.invoker.worker_binary.clone(),
        config.invoker.worker_cwd.clone(),
    ));
    let session_bounds = SessionBounds {
        max_context_tokens: config.invoker.max_context_tokens,
        max_turns: config.invoker.max_turns,
        max_idle_seconds: config.invoker.max_idle_seconds,
    };
    let invoker = Arc::new(
        Invoker::new(worker_backend, config.invoker.model.clone(), session_bounds)
            .with_diagnostics_dir("./data/diagnostics"),
    );

    let dispatcher = Dispatcher::new(
        ledger.clone(),
        claims.clone(),
        active_mode.clone(),
        config.debounce.clone(),
        invoker,
        memory.clone(),
        outbound_sink,
        instance.clone(),
        config.gateway.self_name.clone(),
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(bus_claims::run(claims.clone(), shutdown.clone()));
    tokio::spawn(bus_active_mode::run(active_mode.clone(), config.active_mode.timeout_minutes, shutdown.clone()));

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;

    let state = Arc::new(app::AppState {
        config,
        instance,
        ledger,
        memory,
        chat,
        claims,
        active_mode,
        dispatcher,
        token_gate,
    });

    let router = app::build_router(state);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!(%addr, "conversation bus gateway listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let interrupted = tokio::select! {
        result = axum::serve(listener, router) => { result?; false }
        _ = tokio::signal::ctrl_c() => {
            info!("received interrupt, shutting down");
            shutdown.cancel();
            true
        }
    };

    Ok(interrupted)
}

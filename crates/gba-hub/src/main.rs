mod conversation;
mod planner;

use axum::{
    extract::{ws::Message, ws::WebSocket, ws::WebSocketUpgrade, ConnectInfo, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use clap::Parser;
use conversation::Conversation;
use futures_util::{SinkExt, StreamExt};
use gba_core::{
    default_genome, genome_preset,
    logging::{env_switch, init_logging, StdoutLogging, DEFAULT_LOG_DIR},
    ChromosomeFormat,
};
use planner::QueryPlanner;
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const MAX_FRAME_BYTES: usize = 256 * 1024;
const DEFAULT_ADDR: &str = "127.0.0.1:8000";

#[derive(Clone, Debug)]
struct Config {
    addr: String,
    genome: String,
    chromosome_format: ChromosomeFormat,
    debug: bool,
    write_timeout: Duration,
    log_dir: String,
}

#[derive(Parser, Debug)]
#[command(name = "gba-hub", about = "Assistant backend for the genome browser chat")]
struct Args {
    #[arg(long, default_value = "")]
    addr: String,
    #[arg(long, default_value = "")]
    genome: String,
    #[arg(long, default_value_t = false)]
    debug: bool,
    #[arg(long, default_value_t = 2)]
    write_timeout: u64,
    #[arg(long, default_value = "")]
    log_dir: String,
}

struct HubState {
    config: Config,
    next_connection: AtomicU64,
}

impl HubState {
    fn new(config: Config) -> Self {
        Self {
            config,
            next_connection: AtomicU64::new(1),
        }
    }

    async fn handle_socket(self: Arc<Self>, socket: WebSocket, remote: SocketAddr) {
        let connection_id = self.next_connection.fetch_add(1, Ordering::SeqCst);
        let (mut ws_sender, mut ws_receiver) = socket.split();
        let (tx, mut rx) = mpsc::channel::<Message>(256);
        let write_timeout = self.config.write_timeout;
        let write_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let send = ws_sender.send(msg);
                if tokio::time::timeout(write_timeout, send).await.is_err() {
                    return;
                }
            }
        });

        info!(event = "client_connected", connection_id = connection_id, remote = %remote);
        let mut conversation = Conversation::new(QueryPlanner::new(self.config.chromosome_format));

        'frames: while let Some(incoming) = ws_receiver.next().await {
            let text = match incoming {
                Ok(Message::Text(text)) => text,
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(_) => {
                        warn!(event = "frame_not_utf8", connection_id = connection_id);
                        continue;
                    }
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(err) => {
                    warn!(event = "client_read_error", connection_id = connection_id, error = %err);
                    break;
                }
            };
            if text.len() > MAX_FRAME_BYTES {
                warn!(event = "frame_too_large", connection_id = connection_id, bytes = text.len());
                continue;
            }
            for frame in conversation.handle_text(&text) {
                let json = match serde_json::to_string(&frame) {
                    Ok(json) => json,
                    Err(err) => {
                        error!(event = "frame_encode", error = %err);
                        continue;
                    }
                };
                debug!(event = "frame_out", connection_id = connection_id, bytes = json.len());
                if tx.send(Message::Text(json)).await.is_err() {
                    break 'frames;
                }
            }
        }

        drop(tx);
        let _ = write_task.await;
        if let Some(last) = conversation.history().last() {
            info!(
                event = "last_navigation",
                connection_id = connection_id,
                request_id = %last.request_id,
                requested = %last.requested.describe(),
                status = ?last.status,
                message = %last.message,
                landed = ?last.landed,
                at = %last.timestamp
            );
        }
        info!(
            event = "client_disconnected",
            connection_id = connection_id,
            unanswered_navigations = conversation.pending_count(),
            navigations = conversation.history().len()
        );
    }
}

fn router(hub: Arc<HubState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(|| async { "ok" }))
        .with_state(hub)
}

#[tokio::main]
async fn main() {
    let config = load_config();
    let _log_guard = init_logging(
        "gba-hub",
        &config.log_dir,
        StdoutLogging::Always,
        config.debug,
    );
    let addr: SocketAddr = match config.addr.parse() {
        Ok(value) => value,
        Err(err) => {
            error!(event = "invalid_addr", error = %err, addr = %config.addr);
            return;
        }
    };

    let hub = Arc::new(HubState::new(config.clone()));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(value) => value,
        Err(err) => {
            error!(event = "hub_error", error = %err);
            return;
        }
    };

    info!(
        event = "hub_start",
        addr = %config.addr,
        genome = %config.genome,
        chromosome_format = %config.chromosome_format
    );

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    if let Err(err) = axum::serve(
        listener,
        router(hub).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    {
        error!(event = "hub_error", error = %err);
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(hub): State<Arc<HubState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        hub.handle_socket(socket, addr).await;
    })
}

fn load_config() -> Config {
    let args = Args::parse();
    let addr = resolve_addr(&args.addr);
    let preset = match resolve_value(&args.genome, "GBA_GENOME") {
        Some(id) => genome_preset(&id).unwrap_or_else(|| {
            eprintln!("unknown genome {id}; using {}", default_genome().id);
            default_genome()
        }),
        None => default_genome(),
    };
    Config {
        addr,
        genome: preset.id.to_string(),
        chromosome_format: preset.chromosome_format,
        debug: args.debug || env_switch("GBA_HUB_DEBUG"),
        write_timeout: Duration::from_secs(args.write_timeout),
        log_dir: resolve_log_dir(&args.log_dir),
    }
}

fn resolve_value(flag: &str, key: &str) -> Option<String> {
    if !flag.trim().is_empty() {
        return Some(flag.to_string());
    }
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn resolve_addr(addr_flag: &str) -> String {
    resolve_value(addr_flag, "GBA_HUB_ADDR").unwrap_or_else(|| DEFAULT_ADDR.to_string())
}

fn resolve_log_dir(log_dir_flag: &str) -> String {
    resolve_value(log_dir_flag, "GBA_LOG_DIR").unwrap_or_else(|| DEFAULT_LOG_DIR.to_string())
}

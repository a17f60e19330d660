#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use gba_client::{
    ChannelConfig, DisplayedRegion, GatewayConfig, HeadlessGenomeView, HeadlessSession,
    NavigationGateway, RealtimeChannel, ReconnectPolicy, ViewCapabilities,
};
use gba_core::ConnectionState;
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::watch,
};
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};
use url::Url;

pub const WAIT: Duration = Duration::from_secs(5);

pub type Peer = WebSocketStream<TcpStream>;

pub async fn listen() -> (TcpListener, Url) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let url = Url::parse(&format!("ws://{addr}/ws")).expect("url");
    (listener, url)
}

pub async fn accept(listener: &TcpListener) -> Peer {
    let (stream, _) = tokio::time::timeout(WAIT, listener.accept())
        .await
        .expect("accept timed out")
        .expect("accept");
    accept_async(stream).await.expect("handshake")
}

pub async fn send_json(peer: &mut Peer, value: Value) {
    peer.send(Message::Text(value.to_string()))
        .await
        .expect("send frame");
}

/// Next text frame from the client, parsed as JSON.
pub async fn recv_json(peer: &mut Peer) -> Value {
    loop {
        let message = tokio::time::timeout(WAIT, peer.next())
            .await
            .expect("recv timed out")
            .expect("stream ended")
            .expect("read frame");
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).expect("client sent json");
        }
    }
}

pub fn ucsc_view(capabilities: ViewCapabilities) -> Arc<HeadlessGenomeView> {
    Arc::new(HeadlessGenomeView::new(
        capabilities,
        Some(DisplayedRegion {
            ref_name: "chr7".to_string(),
            start: 155_799_529,
            end: 155_812_871,
            assembly_name: Some("hg38".to_string()),
        }),
    ))
}

pub fn gateway_for(view: Arc<HeadlessGenomeView>) -> Arc<NavigationGateway> {
    Arc::new(NavigationGateway::with_session(
        GatewayConfig {
            settle_delay: Duration::from_millis(20),
            ..GatewayConfig::default()
        },
        Arc::new(HeadlessSession::new(vec![view])),
    ))
}

pub fn channel_for(url: Url, gateway: Arc<NavigationGateway>, base_delay: Duration) -> RealtimeChannel {
    RealtimeChannel::new(
        ChannelConfig {
            url,
            reconnect: ReconnectPolicy {
                base_delay,
                max_attempts: 5,
            },
        },
        gateway,
    )
}

pub async fn wait_for_state(
    states: &mut watch::Receiver<ConnectionState>,
    wanted: ConnectionState,
) {
    tokio::time::timeout(WAIT, states.wait_for(|state| *state == wanted))
        .await
        .expect("state wait timed out")
        .expect("channel dropped");
}

pub fn navigation_command(request_id: &str, chromosome: &str, start: u64, end: u64) -> Value {
    serde_json::json!({
        "type": "navigation",
        "action": "navigate_to_location",
        "payload": {
            "chromosome": chromosome,
            "start": start,
            "end": end
        },
        "requestId": request_id,
        "timestamp": "2026-10-18T10:00:00Z"
    })
}

//! Realtime channel over WebSocket.
//!
//! # Responsibilities
//! - Define the seam through which a realtime channel is attached
//! - Provide a broadcast hub: every text frame a client sends is relayed
//!   to all connected clients
//!
//! # Data Flow
//! ```text
//! Client A ──text──→ hub (broadcast::Sender) ──text──→ Clients A, B, C ...
//! ```

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;

/// Layers a realtime messaging channel onto a bound socket's router.
pub trait RealtimeAttacher: Send + Sync {
    fn attach(&self, app: Router) -> Router;
}

/// Default path for the realtime endpoint.
pub const DEFAULT_PATH: &str = "/ws";

/// WebSocket broadcast hub.
#[derive(Debug, Clone)]
pub struct WebSocketHub {
    path: String,
    tx: broadcast::Sender<String>,
}

impl WebSocketHub {
    pub fn new(path: impl Into<String>) -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            path: path.into(),
            tx,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Send a message to every connected client. Returns the number of receivers.
    pub fn publish(&self, message: impl Into<String>) -> usize {
        self.tx.send(message.into()).unwrap_or(0)
    }

    /// Number of connected clients.
    pub fn client_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for WebSocketHub {
    fn default() -> Self {
        Self::new(DEFAULT_PATH)
    }
}

impl RealtimeAttacher for WebSocketHub {
    fn attach(&self, app: Router) -> Router {
        let channel = Router::new()
            .route(&self.path, get(upgrade_handler))
            .with_state(self.clone());
        app.merge(channel)
    }
}

async fn upgrade_handler(State(hub): State<WebSocketHub>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| client_session(socket, hub))
}

async fn client_session(socket: WebSocket, hub: WebSocketHub) {
    let (mut sink, mut stream) = socket.split();
    let mut rx = hub.tx.subscribe();
    tracing::debug!(clients = hub.client_count(), "Realtime client connected");

    let mut outbound = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(text) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Realtime client lagging, messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let tx = hub.tx.clone();
    let mut inbound = tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            match message {
                Message::Text(text) => {
                    let _ = tx.send(text.as_str().to_string());
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut outbound => inbound.abort(),
        _ = &mut inbound => outbound.abort(),
    }
    tracing::debug!("Realtime client disconnected");
}

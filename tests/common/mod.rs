//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use server_bootstrap::config::TimeoutConfig;
use server_bootstrap::db::{DatabaseError, DatabaseResult, DatabaseSession, Endpoint, StoreDriver, WireDriver};
use server_bootstrap::http::{RealtimeAttacher, WebSocketHub};
use server_bootstrap::lifecycle::Phase;

/// Start a mock store that answers every command with `{"ok":true}`.
///
/// With `replies_per_connection` set, each connection is closed after that
/// many replies.
pub async fn start_mock_store(addr: SocketAddr, replies_per_connection: Option<usize>) {
    let listener = TcpListener::bind(addr).await.unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    tokio::spawn(serve_mock_client(socket, replies_per_connection));
                }
                Err(_) => break,
            }
        }
    });
}

async fn serve_mock_client(socket: TcpStream, limit: Option<usize>) {
    let (read_half, mut write_half) = socket.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let mut replied = 0;

    while let Ok(Some(_)) = lines.next_line().await {
        if write_half.write_all(b"{\"ok\":true}\n").await.is_err() {
            break;
        }
        replied += 1;
        if limit.is_some_and(|max| replied >= max) {
            break;
        }
    }
}

/// Driver that fails a fixed number of attempts before delegating to the
/// wire driver. Optionally records, per attempt, whether `listener` accepted a
/// TCP connection.
#[derive(Clone, Default)]
pub struct FlakyDriver {
    pub failures: u32,
    pub attempts: Arc<AtomicU32>,
    pub listener: Option<SocketAddr>,
    pub listener_up: Arc<Mutex<Vec<bool>>>,
}

impl FlakyDriver {
    pub fn failing(failures: u32) -> Self {
        Self {
            failures,
            ..Self::default()
        }
    }

    pub fn watching(mut self, listener: SocketAddr) -> Self {
        self.listener = Some(listener);
        self
    }
}

impl StoreDriver for FlakyDriver {
    async fn connect(&self, endpoint: &Endpoint, timeouts: &TimeoutConfig) -> DatabaseResult<DatabaseSession> {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(listener) = self.listener {
            let up = TcpStream::connect(listener).await.is_ok();
            self.listener_up.lock().unwrap().push(up);
        }

        if n < self.failures {
            return Err(DatabaseError::Connect {
                addr: SocketAddr::from(([127, 0, 0, 1], endpoint.socket_target().map_or(0, |(_, port)| port))),
                source: std::io::ErrorKind::ConnectionRefused.into(),
            });
        }
        WireDriver.connect(endpoint, timeouts).await
    }
}

/// Realtime attacher that counts attachments and checks the socket is
/// already accepting connections when attached.
#[derive(Clone)]
pub struct CountingAttacher {
    pub hub: WebSocketHub,
    pub listener: SocketAddr,
    pub count: Arc<AtomicU32>,
    pub bound_when_attached: Arc<AtomicBool>,
}

impl CountingAttacher {
    pub fn new(listener: SocketAddr) -> Self {
        Self {
            hub: WebSocketHub::default(),
            listener,
            count: Arc::new(AtomicU32::new(0)),
            bound_when_attached: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }
}

impl RealtimeAttacher for CountingAttacher {
    fn attach(&self, app: Router) -> Router {
        self.count.fetch_add(1, Ordering::SeqCst);
        let bound = std::net::TcpStream::connect_timeout(&self.listener, Duration::from_secs(1)).is_ok();
        self.bound_when_attached.store(bound, Ordering::SeqCst);
        self.hub.attach(app)
    }
}

/// Environment lookup backed by a fixed set of variables.
pub fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + Send + 'static {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

/// Wait until the orchestrator reaches `target`.
pub async fn wait_for_phase(phases: &mut watch::Receiver<Phase>, target: Phase) {
    tokio::time::timeout(Duration::from_secs(5), phases.wait_for(|p| *p == target))
        .await
        .expect("phase not reached in time")
        .expect("orchestrator dropped");
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

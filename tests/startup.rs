//! Startup ordering and failure tests for the orchestrator.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;

use server_bootstrap::config::{ConfigError, ServerConfig};
use server_bootstrap::db::{ConnectionState, DatabaseError, Endpoint, StateChange, WireDriver};
use server_bootstrap::http::build_router;
use server_bootstrap::lifecycle::{Orchestrator, Phase, StartupError};
use server_bootstrap::net::TransportError;
use server_bootstrap::resilience::RetryPolicy;

mod common;

fn persistent_config(store_addr: SocketAddr, http_port: u16) -> ServerConfig {
    let endpoint = Endpoint::new(format!("mongodb://{}/app", store_addr));
    let mut config = ServerConfig::persistent(endpoint);
    config.bind_host = IpAddr::V4(Ipv4Addr::LOCALHOST);
    config.http_port = http_port;
    config.database.timeouts.connect = Duration::from_secs(1);
    config.database.timeouts.socket = Duration::from_secs(1);
    config
}

#[tokio::test]
async fn ephemeral_store_binds_plain_listener_and_attaches_once() {
    let http_addr: SocketAddr = "127.0.0.1:28401".parse().unwrap();
    let attacher = common::CountingAttacher::new(http_addr);

    let orchestrator = Orchestrator::new().with_realtime(attacher.clone());
    let shutdown = orchestrator.shutdown_handle();
    let mut phases = orchestrator.phases();

    let lookup = common::env(&[
        ("DB_CONNECTION_STRING", "memory"),
        ("HTTP_PORT", "28401"),
        ("BIND_HOST", "127.0.0.1"),
    ]);
    let server = tokio::spawn(orchestrator.run(lookup, build_router));

    common::wait_for_phase(&mut phases, Phase::Running).await;

    let res = common::http_client()
        .get(format!("http://{}/health", http_addr))
        .send()
        .await
        .expect("server unreachable");
    assert_eq!(res.status(), 200);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["database"], "connected");

    assert_eq!(attacher.count(), 1, "realtime channel attached exactly once");
    assert!(attacher.bound_when_attached.load(Ordering::SeqCst), "attached before bind");

    shutdown.trigger();
    let result = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server did not stop")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn persistent_store_listens_while_retrying() {
    let store_addr: SocketAddr = "127.0.0.1:28411".parse().unwrap();
    let http_addr: SocketAddr = "127.0.0.1:28412".parse().unwrap();
    common::start_mock_store(store_addr, None).await;

    let driver = common::FlakyDriver::failing(2).watching(http_addr);
    let attacher = common::CountingAttacher::new(http_addr);

    let mut config = persistent_config(store_addr, http_addr.port());
    config.database.retry = RetryPolicy::unbounded(Duration::from_millis(200));

    let orchestrator = Orchestrator::new()
        .with_driver(driver.clone())
        .with_realtime(attacher.clone());
    let shutdown = orchestrator.shutdown_handle();

    let events: Arc<Mutex<Option<broadcast::Receiver<StateChange>>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&events);
    let server = tokio::spawn(orchestrator.run_with_config(config, move |db| {
        *slot.lock().unwrap() = Some(db.subscribe());
        build_router(db)
    }));

    let mut events = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(rx) = events.lock().unwrap().take() {
                return rx;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("router factory never called");

    let mut seen = Vec::new();
    let connected = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let change = events.recv().await.unwrap();
            seen.push(change.to);
            if change.to == ConnectionState::Connected {
                break change;
            }
        }
    })
    .await
    .expect("never connected");
    assert_eq!(connected.attempt, 3);

    let failures = seen.iter().filter(|s| **s == ConnectionState::Errored).count();
    let successes = seen.iter().filter(|s| **s == ConnectionState::Connected).count();
    assert_eq!(failures, 2);
    assert_eq!(successes, 1);
    assert_eq!(driver.attempts.load(Ordering::SeqCst), 3);

    let listener_up = driver.listener_up.lock().unwrap().clone();
    assert_eq!(listener_up.len(), 3);
    assert!(listener_up[2], "listener should be bound before the third attempt resolves");
    assert_eq!(attacher.count(), 1);

    let res = common::http_client()
        .get(format!("http://{}/health", http_addr))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    shutdown.trigger();
    let result = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server did not stop")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn health_degrades_until_store_appears() {
    let store_addr: SocketAddr = "127.0.0.1:28461".parse().unwrap();
    let http_addr: SocketAddr = "127.0.0.1:28462".parse().unwrap();

    let mut config = persistent_config(store_addr, http_addr.port());
    config.database.retry = RetryPolicy::unbounded(Duration::from_millis(100));

    // The mock store speaks the line protocol
    let orchestrator = Orchestrator::new().with_driver(WireDriver);
    let shutdown = orchestrator.shutdown_handle();
    let mut phases = orchestrator.phases();
    let server = tokio::spawn(orchestrator.run_with_config(config, build_router));

    common::wait_for_phase(&mut phases, Phase::Running).await;
    let client = common::http_client();

    let res = client.get(format!("http://{}/health", http_addr)).send().await.unwrap();
    assert_eq!(res.status(), 503);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["status"], "degraded");

    common::start_mock_store(store_addr, None).await;

    let mut healthy = false;
    for _ in 0..50 {
        let res = client.get(format!("http://{}/health", http_addr)).send().await.unwrap();
        if res.status() == 200 {
            healthy = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(healthy, "server should report healthy once the store is reachable");

    shutdown.trigger();
    let _ = tokio::time::timeout(Duration::from_secs(5), server).await;
}

#[tokio::test]
async fn missing_connection_string_fails_before_side_effects() {
    let http_addr: SocketAddr = "127.0.0.1:28471".parse().unwrap();
    let attacher = common::CountingAttacher::new(http_addr);
    let factory_called = Arc::new(AtomicBool::new(false));

    let orchestrator = Orchestrator::new().with_realtime(attacher.clone());
    let phases = orchestrator.phases();

    let called = Arc::clone(&factory_called);
    let result = orchestrator
        .run(common::env(&[("HTTP_PORT", "28471")]), move |db| {
            called.store(true, Ordering::SeqCst);
            build_router(db)
        })
        .await;

    assert!(matches!(
        result,
        Err(StartupError::Config(ConfigError::Missing { var: "DB_CONNECTION_STRING", .. }))
    ));
    assert_eq!(*phases.borrow(), Phase::Failed);
    assert!(!factory_called.load(Ordering::SeqCst));
    assert_eq!(attacher.count(), 0);
    assert!(tokio::net::TcpStream::connect(http_addr).await.is_err());
}

#[tokio::test]
async fn unreadable_tls_key_aborts_startup() {
    let https_addr: SocketAddr = "127.0.0.1:28421".parse().unwrap();
    let attacher = common::CountingAttacher::new(https_addr);

    let cert_path = std::env::temp_dir().join(format!("server-bootstrap-startup-{}.crt", std::process::id()));
    std::fs::write(&cert_path, "placeholder").unwrap();
    let cert = cert_path.to_string_lossy().to_string();

    let orchestrator = Orchestrator::new().with_realtime(attacher.clone());
    let phases = orchestrator.phases();

    let lookup = common::env(&[
        ("DB_CONNECTION_STRING", "memory"),
        ("USE_SSL", "true"),
        ("SSL_KEY_FILE", "/nonexistent/private.key"),
        ("SSL_CRT_FILE", cert.as_str()),
        ("HTTPS_PORT", "28421"),
        ("BIND_HOST", "127.0.0.1"),
    ]);
    let result = orchestrator.run(lookup, build_router).await;

    match result {
        Err(StartupError::Transport(TransportError::TlsRead { what, .. })) => assert_eq!(what, "private key"),
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(*phases.borrow(), Phase::Failed);
    assert_eq!(attacher.count(), 0, "realtime channel must not be attached");
    assert!(tokio::net::TcpStream::connect(https_addr).await.is_err(), "nothing should be bound");
}

#[tokio::test]
async fn occupied_port_fails_binding() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:28431").unwrap();
    let attacher = common::CountingAttacher::new(occupied.local_addr().unwrap());

    let orchestrator = Orchestrator::new().with_realtime(attacher.clone());
    let lookup = common::env(&[
        ("DB_CONNECTION_STRING", "memory"),
        ("HTTP_PORT", "28431"),
        ("BIND_HOST", "127.0.0.1"),
    ]);
    let result = orchestrator.run(lookup, build_router).await;

    assert!(matches!(result, Err(StartupError::Transport(TransportError::Bind { .. }))));
    assert_eq!(attacher.count(), 0);
}

#[tokio::test]
async fn bounded_retry_policy_stops_the_server() {
    // Nothing listens on the store port
    let store_addr: SocketAddr = "127.0.0.1:28441".parse().unwrap();
    let http_addr: SocketAddr = "127.0.0.1:28442".parse().unwrap();

    let mut config = persistent_config(store_addr, http_addr.port());
    config.database.retry = RetryPolicy::bounded(Duration::from_millis(20), 2);

    let orchestrator = Orchestrator::new().with_driver(WireDriver);
    let phases = orchestrator.phases();
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        orchestrator.run_with_config(config, build_router),
    )
    .await
    .expect("bounded policy should end the run");

    assert!(matches!(
        result,
        Err(StartupError::Database(DatabaseError::RetriesExhausted { attempts: 2, .. }))
    ));
    assert_eq!(*phases.borrow(), Phase::Failed);
}

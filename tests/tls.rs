//! Encrypted transport startup over a generated certificate.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;

use server_bootstrap::http::build_router;
use server_bootstrap::lifecycle::{Orchestrator, Phase};

mod common;

/// Write a self-signed PEM pair for `localhost` / `127.0.0.1` to the temp dir.
fn self_signed_pair(tag: &str) -> (PathBuf, PathBuf) {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string(), "127.0.0.1".to_string()])
        .expect("certificate generation failed");

    let dir = std::env::temp_dir();
    let key_path = dir.join(format!("server-bootstrap-{}-{}.key", tag, std::process::id()));
    let cert_path = dir.join(format!("server-bootstrap-{}-{}.crt", tag, std::process::id()));
    std::fs::write(&key_path, certified.key_pair.serialize_pem()).unwrap();
    std::fs::write(&cert_path, certified.cert.pem()).unwrap();
    (key_path, cert_path)
}

#[tokio::test]
async fn tls_flag_serves_https_only() {
    let https_addr: SocketAddr = "127.0.0.1:28521".parse().unwrap();
    let plain_addr: SocketAddr = "127.0.0.1:28522".parse().unwrap();
    let (key_path, cert_path) = self_signed_pair("tls");
    let key = key_path.to_string_lossy().to_string();
    let cert = cert_path.to_string_lossy().to_string();

    let attacher = common::CountingAttacher::new(https_addr);
    let orchestrator = Orchestrator::new().with_realtime(attacher.clone());
    let shutdown = orchestrator.shutdown_handle();
    let mut phases = orchestrator.phases();

    let lookup = common::env(&[
        ("DB_CONNECTION_STRING", "memory"),
        ("USE_SSL", "true"),
        ("SSL_KEY_FILE", key.as_str()),
        ("SSL_CRT_FILE", cert.as_str()),
        ("HTTPS_PORT", "28521"),
        ("HTTP_PORT", "28522"),
        ("BIND_HOST", "127.0.0.1"),
    ]);
    let server = tokio::spawn(orchestrator.run(lookup, build_router));
    common::wait_for_phase(&mut phases, Phase::Running).await;

    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap();
    let res = client
        .get(format!("https://{}/health", https_addr))
        .send()
        .await
        .expect("https request failed");
    assert_eq!(res.status(), 200);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["database"], "connected");

    assert!(
        tokio::net::TcpStream::connect(plain_addr).await.is_err(),
        "plain port must stay unbound when TLS is on"
    );
    assert_eq!(attacher.count(), 1, "realtime channel attached exactly once");
    assert!(attacher.bound_when_attached.load(Ordering::SeqCst));

    shutdown.trigger();
    let result = tokio::time::timeout(Duration::from_secs(15), server)
        .await
        .expect("server did not stop")
        .unwrap();
    assert!(result.is_ok());

    let _ = std::fs::remove_file(key_path);
    let _ = std::fs::remove_file(cert_path);
}

//! Transport selection and the bound listening socket.
//!
//! # Responsibilities
//! - Bind exactly one listener: plain or encrypted, per the TLS flag
//! - Hold the request router until serving starts
//! - Allow the realtime channel to be attached once, after binding
//! - Serve until the shutdown signal fires

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::{ServerConfig, Transport};
use crate::http::websocket::RealtimeAttacher;
use crate::lifecycle::shutdown::ShutdownSignal;
use crate::net::tls::load_tls_config;

/// Time in-flight requests get to finish once shutdown starts.
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Error type for transport setup and serving.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A TLS file could not be read.
    #[error("failed to read TLS {what} from {}: {source}", path.display())]
    TlsRead {
        what: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },

    /// TLS files were read but do not hold usable material.
    #[error("invalid TLS material: {0}")]
    TlsMaterial(String),

    /// Failed to bind the listening address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// The server stopped with an I/O error.
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),

    /// The realtime channel may only be attached once.
    #[error("realtime channel already attached")]
    AlreadyAttached,
}

enum BoundListener {
    Plain(TcpListener),
    Encrypted {
        listener: std::net::TcpListener,
        tls: RustlsConfig,
    },
}

/// A bound listener plus the router it will serve.
///
/// Only [`bind`] creates one, so the realtime channel can never be attached
/// to an unbound socket.
pub struct ListeningSocket {
    listener: BoundListener,
    local_addr: SocketAddr,
    app: Router,
    realtime_attached: bool,
}

/// Bind the listener selected by `config.transport`, wrapping `app`.
///
/// Encrypted transport loads the TLS material first; a failure there means
/// no socket is bound at all.
pub async fn bind(config: &ServerConfig, app: Router) -> Result<ListeningSocket, TransportError> {
    let addr = config.listen_address();

    let listener = match &config.transport {
        Transport::Plain => BoundListener::Plain(bind_tcp(addr).await?),
        Transport::Encrypted(tls_paths) => {
            let tls = load_tls_config(tls_paths).await?;
            let listener = bind_tcp(addr)
                .await?
                .into_std()
                .map_err(|source| TransportError::Bind { addr, source })?;
            listener
                .set_nonblocking(true)
                .map_err(|source| TransportError::Bind { addr, source })?;
            BoundListener::Encrypted { listener, tls }
        }
    };

    let local_addr = match &listener {
        BoundListener::Plain(l) => l.local_addr(),
        BoundListener::Encrypted { listener, .. } => listener.local_addr(),
    }
    .map_err(|source| TransportError::Bind { addr, source })?;

    tracing::info!(
        address = %local_addr,
        transport = config.transport.name(),
        "Listener bound"
    );

    Ok(ListeningSocket {
        listener,
        local_addr,
        app,
        realtime_attached: false,
    })
}

async fn bind_tcp(addr: SocketAddr) -> Result<TcpListener, TransportError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| TransportError::Bind { addr, source })
}

impl ListeningSocket {
    /// The address actually bound (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self.listener, BoundListener::Encrypted { .. })
    }

    pub fn is_realtime_attached(&self) -> bool {
        self.realtime_attached
    }

    /// Layer the realtime channel onto this socket. Allowed once.
    pub fn attach<R>(&mut self, realtime: &R) -> Result<(), TransportError>
    where
        R: RealtimeAttacher + ?Sized,
    {
        if self.realtime_attached {
            return Err(TransportError::AlreadyAttached);
        }

        let app = std::mem::replace(&mut self.app, Router::new());
        self.app = realtime.attach(app);
        self.realtime_attached = true;

        tracing::info!(address = %self.local_addr, "Realtime channel attached");
        Ok(())
    }

    /// Serve connections until `shutdown` fires.
    pub async fn serve(self, mut shutdown: ShutdownSignal) -> Result<(), TransportError> {
        let service = self.app.into_make_service();

        match self.listener {
            BoundListener::Plain(listener) => {
                axum::serve(listener, service)
                    .with_graceful_shutdown(async move { shutdown.recv().await })
                    .await
                    .map_err(TransportError::Serve)?;
            }
            BoundListener::Encrypted { listener, tls } => {
                let handle = axum_server::Handle::new();
                let stopper = handle.clone();
                tokio::spawn(async move {
                    shutdown.recv().await;
                    stopper.graceful_shutdown(Some(GRACEFUL_SHUTDOWN_TIMEOUT));
                });

                axum_server::from_tcp_rustls(listener, tls)
                    .handle(handle)
                    .serve(service)
                    .await
                    .map_err(TransportError::Serve)?;
            }
        }

        tracing::info!(address = %self.local_addr, "Server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TlsConfig;
    use std::net::{IpAddr, Ipv4Addr};

    fn loopback(port: u16) -> ServerConfig {
        ServerConfig {
            bind_host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            http_port: port,
            ..ServerConfig::ephemeral()
        }
    }

    struct Marker;

    impl RealtimeAttacher for Marker {
        fn attach(&self, app: Router) -> Router {
            app
        }
    }

    #[tokio::test]
    async fn plain_bind_resolves_port_zero() {
        let socket = bind(&loopback(0), Router::new()).await.unwrap();
        assert!(!socket.is_encrypted());
        assert_ne!(socket.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn occupied_port_is_bind_error() {
        let first = bind(&loopback(0), Router::new()).await.unwrap();
        let taken = first.local_addr().port();

        let err = bind(&loopback(taken), Router::new()).await.err().unwrap();
        assert!(matches!(err, TransportError::Bind { .. }));
    }

    #[tokio::test]
    async fn realtime_attaches_only_once() {
        let mut socket = bind(&loopback(0), Router::new()).await.unwrap();
        socket.attach(&Marker).unwrap();
        assert!(socket.is_realtime_attached());
        assert!(matches!(socket.attach(&Marker), Err(TransportError::AlreadyAttached)));
    }

    #[tokio::test]
    async fn unreadable_tls_binds_nothing() {
        let mut config = loopback(0);
        config.transport = Transport::Encrypted(TlsConfig {
            key_path: "/nonexistent/private.key".into(),
            cert_path: "/nonexistent/public.crt".into(),
        });

        let err = bind(&config, Router::new()).await.err().unwrap();
        assert!(matches!(err, TransportError::TlsRead { .. }));
    }
}

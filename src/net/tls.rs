//! TLS material loading.

use std::path::Path;
use std::sync::Once;

use axum_server::tls_rustls::RustlsConfig;

use crate::config::TlsConfig;
use crate::net::listener::TransportError;

/// Load TLS configuration from the configured key and certificate files.
///
/// Both files are read concurrently and both must be readable and hold PEM
/// material before the rustls config is built.
pub async fn load_tls_config(tls: &TlsConfig) -> Result<RustlsConfig, TransportError> {
    let (key, cert) = tokio::try_join!(
        read_material(&tls.key_path, "private key"),
        read_material(&tls.cert_path, "certificate")
    )?;

    validate_pem(&key, &cert, tls)?;

    tracing::debug!(
        key_path = %tls.key_path.display(),
        cert_path = %tls.cert_path.display(),
        "TLS material loaded"
    );

    ensure_crypto_provider();
    RustlsConfig::from_pem(cert, key)
        .await
        .map_err(|e| TransportError::TlsMaterial(e.to_string()))
}

/// Pin the process-wide rustls provider; more than one is compiled in.
fn ensure_crypto_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        // Err means another component installed one first
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}

async fn read_material(path: &Path, what: &'static str) -> Result<Vec<u8>, TransportError> {
    tokio::fs::read(path)
        .await
        .map_err(|source| TransportError::TlsRead {
            what,
            path: path.to_path_buf(),
            source,
        })
}

fn validate_pem(key: &[u8], cert: &[u8], tls: &TlsConfig) -> Result<(), TransportError> {
    match rustls_pemfile::private_key(&mut &key[..]) {
        Ok(Some(_)) => {}
        Ok(None) => {
            return Err(TransportError::TlsMaterial(format!(
                "no private key found in {}",
                tls.key_path.display()
            )))
        }
        Err(e) => {
            return Err(TransportError::TlsMaterial(format!(
                "malformed private key in {}: {}",
                tls.key_path.display(),
                e
            )))
        }
    }

    let certs = rustls_pemfile::certs(&mut &cert[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| {
            TransportError::TlsMaterial(format!(
                "malformed certificate in {}: {}",
                tls.cert_path.display(),
                e
            ))
        })?;
    if certs.is_empty() {
        return Err(TransportError::TlsMaterial(format!(
            "no certificate found in {}",
            tls.cert_path.display()
        )));
    }

    Ok(())
}

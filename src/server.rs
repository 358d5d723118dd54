//! Agent server
//!
//! Serves the agent router over plain HTTP, or over rustls when TLS is
//! configured. With a CA file, client certificates signed by that CA are
//! verified, and required when `require_client_cert` is set.

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use rustls::crypto::aws_lc_rs::default_provider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::TlsConfig;

/// Grace period given to open connections once shutdown starts
const CONNECTION_DRAIN: Duration = Duration::from_secs(5);

/// Bind the agent listener
pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to address {}", addr))
}

/// Serve `app` on `listener` until `shutdown` is cancelled
pub async fn serve(
    app: Router,
    listener: TcpListener,
    tls: Option<ServerConfig>,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr = listener.local_addr().context("Failed to read local address")?;

    match tls {
        Some(server_config) => {
            info!("Agent listening on https://{}", addr);

            let rustls_config =
                axum_server::tls_rustls::RustlsConfig::from_config(Arc::new(server_config));

            let handle = axum_server::Handle::new();
            let drain = handle.clone();
            tokio::spawn(async move {
                shutdown.cancelled().await;
                drain.graceful_shutdown(Some(CONNECTION_DRAIN));
            });

            axum_server::from_tcp_rustls(listener.into_std()?, rustls_config)?
                .handle(handle)
                .serve(app.into_make_service())
                .await
                .context("HTTPS server error")?;
        }
        None => {
            info!("Agent listening on http://{}", addr);

            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
                .context("HTTP server error")?;
        }
    }

    info!("Agent stopped");
    Ok(())
}

/// Build the rustls server configuration
///
/// The CA certificates, when configured, are appended to the served chain.
pub fn build_server_config(tls_config: &TlsConfig) -> Result<ServerConfig> {
    info!("TLS certificate: {:?}", tls_config.cert_file);
    let mut certs = load_certs(&tls_config.cert_file)?;
    let key = load_private_key(&tls_config.key_file)?;

    let provider = Arc::new(default_provider());

    let versions: Vec<&'static rustls::SupportedProtocolVersion> =
        match tls_config.min_version.as_str() {
            "1.3" => vec![&rustls::version::TLS13],
            "1.2" => vec![&rustls::version::TLS12, &rustls::version::TLS13],
            other => anyhow::bail!("Invalid TLS minimum version: {}", other),
        };

    let builder = ServerConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&versions)
        .context("Failed to set TLS protocol versions")?;

    let mut server_config = match tls_config.ca_file {
        Some(ref ca_file) => {
            let ca_certs = load_certs(ca_file)?;
            let mut roots = RootCertStore::empty();
            for cert in &ca_certs {
                roots
                    .add(cert.clone())
                    .with_context(|| format!("Invalid CA certificate in {:?}", ca_file))?;
            }

            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider);
            let verifier = if tls_config.require_client_cert {
                verifier.build()
            } else {
                verifier.allow_unauthenticated().build()
            }
            .context("Failed to build client certificate verifier")?;

            certs.extend(ca_certs);
            builder
                .with_client_cert_verifier(verifier)
                .with_single_cert(certs, key)
        }
        None => builder.with_no_client_auth().with_single_cert(certs, key),
    }
    .context("Failed to build TLS server config")?;

    server_config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    info!(
        "TLS configured (minimum version {}, client certificates {})",
        tls_config.min_version,
        match (&tls_config.ca_file, tls_config.require_client_cert) {
            (None, _) => "ignored",
            (Some(_), false) => "verified",
            (Some(_), true) => "required",
        }
    );

    Ok(server_config)
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open certificate file: {:?}", path))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to read certificates: {:?}", path))?;

    if certs.is_empty() {
        anyhow::bail!("No certificates found in {:?}", path);
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open key file: {:?}", path))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .with_context(|| format!("Failed to read private key: {:?}", path))?
        .ok_or_else(|| anyhow::anyhow!("No private key found in {:?}", path))
}

//! TLS without peer verification, for the probes that need a TLS leg.
//!
//! The scanner connects to attacker-chosen hosts; verifying their certificates
//! would defeat the purpose, so every TLS handshake here accepts whatever the
//! peer presents. Nothing in this module is suitable for carrying data anyone
//! cares to protect.

use std::{sync::Arc, time::SystemTime};

use rustls::{
    client::{ServerCertVerified, ServerCertVerifier, ServerName},
    Certificate,
    ClientConfig,
    Error as TlsError,
};
use tokio::net::TcpStream;
use tokio_rustls::{client::TlsStream, TlsConnector};

use crate::{
    context::ScanContext,
    error::{Error, Result},
};

/// Wraps an already-connected TCP stream in TLS, skipping verification.
pub(crate) async fn wrap(
    ctx: &ScanContext,
    host: &str,
    stream: TcpStream,
) -> Result<TlsStream<TcpStream>> {
    let config = ClientConfig::builder()
        .with_safe_defaults()
        .with_custom_certificate_verifier(Arc::new(NoCertVerifier {}))
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));
    // The name is only used for SNI; verification never consults it.
    let name = ServerName::try_from(host)
        .or_else(|_| ServerName::try_from("target.invalid"))
        .map_err(|e| Error::protocol(format!("invalid server name: {e}")))?;
    let stream = ctx.timeout(connector.connect(name, stream)).await??;
    Ok(stream)
}

struct NoCertVerifier {}

impl ServerCertVerifier for NoCertVerifier {
    fn verify_server_cert(
        &self,
        _: &Certificate,
        _: &[Certificate],
        _: &ServerName,
        _: &mut dyn Iterator<Item = &[u8]>,
        _: &[u8],
        _: SystemTime,
    ) -> std::result::Result<ServerCertVerified, TlsError> {
        Ok(ServerCertVerified::assertion())
    }
}

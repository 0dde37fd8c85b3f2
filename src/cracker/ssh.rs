//! SSH password-authentication probe.
//!
//! The TCP stream is dialed under the context like every other probe, then
//! handed to the SSH client for the handshake. Host keys are accepted
//! unconditionally; the scan is the party choosing targets, and there is nothing
//! to verify them against.

use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{self, AuthResult};
use russh::keys::PublicKey;
use russh::Disconnect;

use super::{Cracker, Verdict};
use crate::{
    auth::{Auth, AuthMode},
    context::ScanContext,
    error::classify_raw,
    runtime::stream,
};

/// Probes SSH password logins.
#[derive(Debug, Default)]
pub struct SshCracker;

#[async_trait]
impl Cracker for SshCracker {
    fn name(&self) -> &'static str {
        "ssh"
    }

    fn mode(&self) -> AuthMode {
        AuthMode::UserPass
    }

    async fn check(&self, ctx: &ScanContext, host: &str, port: u16, auth: &Auth) -> Verdict {
        let tcp = match stream::connect(ctx, host, port).await {
            Ok(tcp) => tcp,
            Err(err) => return Verdict::failed(err),
        };

        let config = Arc::new(client::Config::default());
        let mut session =
            match ctx.timeout(client::connect_stream(config, tcp, AcceptAnyHostKey)).await {
                Ok(Ok(session)) => session,
                Ok(Err(err)) => return classify(&err),
                Err(err) => return Verdict::failed(err),
            };

        let attempt = session.authenticate_password(
            auth.username_or("").to_string(),
            auth.password_or_empty().to_string(),
        );
        let verdict = match ctx.timeout(attempt).await {
            Ok(Ok(AuthResult::Success)) => Verdict::Hit,
            Ok(Ok(AuthResult::Failure { .. })) => Verdict::Rejected,
            Ok(Err(err)) => classify(&err),
            Err(err) => Verdict::failed(err),
        };

        // Channel and request queues drain inside the handle; a disconnect is
        // all the cleanup a one-shot session needs.
        let _ = session
            .disconnect(Disconnect::ByApplication, "", "en")
            .await;
        verdict
    }
}

struct AcceptAnyHostKey;

impl client::Handler for AcceptAnyHostKey {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

fn classify(err: &russh::Error) -> Verdict {
    match err {
        russh::Error::NotAuthenticated => Verdict::Rejected,
        russh::Error::NoAuthMethod => Verdict::Rejected,
        russh::Error::Disconnect => {
            Verdict::Failed(crate::error::Error::connection_failed(err.to_string()))
        }
        russh::Error::IO(io_err) => {
            Verdict::Failed(crate::error::Error::connection_failed(io_err.to_string()))
        }
        other => {
            let message = other.to_string();
            if message.to_ascii_lowercase().contains("unable to authenticate") {
                return Verdict::Rejected;
            }
            Verdict::Failed(classify_raw(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn rejection_errors_classify_as_clean_negatives() {
        for err in [russh::Error::NotAuthenticated, russh::Error::NoAuthMethod] {
            let verdict = classify(&err);
            assert!(!verdict.matched());
            assert!(verdict.error().is_none());
        }
    }

    #[test]
    fn io_errors_classify_as_connection_failures() {
        let err = russh::Error::IO(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
        assert!(classify(&err).error().unwrap().is_connection_failed());
    }

    #[tokio::test]
    async fn listener_that_hangs_up_is_a_connection_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            // Accept and slam the connection shut before any banner.
            while let Ok((mut socket, _)) = listener.accept().await {
                let _ = socket.shutdown().await;
            }
        });

        let ctx = ScanContext::with_timeout(Duration::from_secs(5));
        let verdict = SshCracker
            .check(&ctx, "127.0.0.1", port, &Auth::user_pass("root", "x"))
            .await;
        assert!(!verdict.matched());
        assert!(verdict.error().unwrap().is_connection_failed());
    }

    #[tokio::test]
    async fn http_speaker_is_not_ssh() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let _ = socket.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await;
                let _ = socket.shutdown().await;
            }
        });

        let ctx = ScanContext::with_timeout(Duration::from_secs(5));
        let verdict = SshCracker
            .check(&ctx, "127.0.0.1", port, &Auth::user_pass("root", "x"))
            .await;
        assert!(!verdict.matched());
        assert!(verdict.error().is_some());
    }
}

//! Elasticsearch basic-auth probe.
//!
//! `GET /_security/_authenticate` answers 200 for a valid credential and 401
//! otherwise. Clusters without the security layer answer something else
//! entirely; those are clean negatives, not errors, since there is nothing
//! to brute-force. Deployments sit behind both plain HTTP and TLS, so a
//! transport failure on `http://` earns exactly one retry on `https://`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use super::{Cracker, Verdict};
use crate::{
    auth::{Auth, AuthMode},
    context::ScanContext,
    error::{classify_raw, Error},
};

/// Request budget when the context carries no deadline of its own.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Probes Elasticsearch security via its authenticate endpoint.
#[derive(Debug, Default)]
pub struct ElasticCracker;

#[async_trait]
impl Cracker for ElasticCracker {
    fn name(&self) -> &'static str {
        "elasticsearch"
    }

    fn mode(&self) -> AuthMode {
        AuthMode::UserPass
    }

    async fn check(&self, ctx: &ScanContext, host: &str, port: u16, auth: &Auth) -> Verdict {
        let client = match build_client(ctx) {
            Ok(client) => client,
            Err(err) => return Verdict::failed(err),
        };

        let first = attempt(ctx, &client, "http", host, port, auth).await;
        match first {
            Ok(verdict) => verdict,
            // Any transport error on plain HTTP earns one retry over TLS; the
            // cluster may simply not be listening in cleartext.
            Err(_) => match attempt(ctx, &client, "https", host, port, auth).await {
                Ok(verdict) => verdict,
                Err(err) => Verdict::failed(err),
            },
        }
    }
}

/// A fresh client per attempt: connection reuse would let one probe's
/// authenticated connection answer for the next credential.
fn build_client(ctx: &ScanContext) -> Result<reqwest::Client, Error> {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .connect_timeout(ctx.dial_timeout())
        .timeout(ctx.remaining().unwrap_or(DEFAULT_REQUEST_TIMEOUT))
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| Error::protocol(format!("building http client: {e}")))
}

async fn attempt(
    ctx: &ScanContext,
    client: &reqwest::Client,
    scheme: &str,
    host: &str,
    port: u16,
    auth: &Auth,
) -> Result<Verdict, Error> {
    let url = format!("{scheme}://{host}:{port}/_security/_authenticate");
    let request = client
        .get(&url)
        .basic_auth(auth.username_or(""), Some(auth.password_or_empty()));

    let response = match ctx.timeout(request.send()).await {
        Ok(Ok(response)) => response,
        Ok(Err(err)) => return Err(classify_raw(err.to_string())),
        Err(err) => return Err(err),
    };

    Ok(match response.status() {
        StatusCode::OK => Verdict::Hit,
        StatusCode::UNAUTHORIZED => Verdict::Rejected,
        // Anything else is not an Elasticsearch with security enabled.
        _ => Verdict::Rejected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Serves canned HTTP responses: 200 for the expected authorization
    /// header, 401 otherwise.
    async fn spawn_mock_es(accept_basic: &'static str) -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let (mut socket, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let mut request = String::new();
                    loop {
                        let n = match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => n,
                        };
                        request.push_str(&String::from_utf8_lossy(&buf[..n]));
                        if request.contains("\r\n\r\n") {
                            break;
                        }
                    }
                    let authorized = request
                        .lines()
                        .any(|line| line.eq_ignore_ascii_case(&format!("authorization: Basic {accept_basic}")));
                    let body = if authorized {
                        "HTTP/1.1 200 OK\r\ncontent-length: 21\r\n\r\n{\"username\":\"elastic\"}"
                    } else {
                        "HTTP/1.1 401 Unauthorized\r\ncontent-length: 0\r\n\r\n"
                    };
                    let _ = socket.write_all(body.as_bytes()).await;
                });
            }
        });
        port
    }

    #[tokio::test]
    async fn valid_basic_auth_is_a_hit() {
        // base64("elastic:password")
        let port = spawn_mock_es("ZWxhc3RpYzpwYXNzd29yZA==").await;
        let ctx = ScanContext::with_timeout(Duration::from_secs(5));
        let verdict = ElasticCracker
            .check(&ctx, "127.0.0.1", port, &Auth::user_pass("elastic", "password"))
            .await;
        assert!(verdict.matched());
    }

    #[tokio::test]
    async fn unauthorized_is_a_clean_negative() {
        let port = spawn_mock_es("ZWxhc3RpYzpwYXNzd29yZA==").await;
        let ctx = ScanContext::with_timeout(Duration::from_secs(5));
        let verdict = ElasticCracker
            .check(&ctx, "127.0.0.1", port, &Auth::user_pass("elastic", "wrong"))
            .await;
        assert!(!verdict.matched());
        assert!(verdict.error().is_none());
    }

    #[tokio::test]
    async fn unreachable_hosts_fail_on_both_schemes() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let ctx = ScanContext::with_timeout(Duration::from_secs(5));
        let verdict = ElasticCracker
            .check(&ctx, "127.0.0.1", port, &Auth::user_pass("elastic", "x"))
            .await;
        assert!(verdict.error().unwrap().is_connection_failed());
    }
}

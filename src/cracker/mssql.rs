//! Microsoft SQL Server authentication probe.
//!
//! Uses SQL authentication over TDS with encryption turned off; the login
//! token either succeeds or comes back as a server error. The driver consumes
//! a `futures-io` stream, so the tokio socket goes through the compat adapter.

use async_trait::async_trait;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel};
use tokio_util::compat::TokioAsyncWriteCompatExt;

use super::{Cracker, Verdict};
use crate::{
    auth::{Auth, AuthMode},
    context::ScanContext,
    error::{classify_raw, Error},
    runtime::stream,
};

/// Server error for a failed login.
const LOGIN_FAILED: u32 = 18456;
/// Server error for a password that must change before use; the credential
/// itself was accepted.
const PASSWORD_MUST_CHANGE: u32 = 18488;

/// Probes SQL Server logins.
#[derive(Debug, Default)]
pub struct MssqlCracker;

#[async_trait]
impl Cracker for MssqlCracker {
    fn name(&self) -> &'static str {
        "mssql"
    }

    fn mode(&self) -> AuthMode {
        AuthMode::UserPass
    }

    async fn check(&self, ctx: &ScanContext, host: &str, port: u16, auth: &Auth) -> Verdict {
        let mut config = Config::new();
        config.host(host);
        config.port(port);
        config.database("master");
        config.authentication(AuthMethod::sql_server(
            auth.username_or(""),
            auth.password_or_empty(),
        ));
        config.encryption(EncryptionLevel::NotSupported);
        config.trust_cert();

        let tcp = match stream::connect(ctx, host, port).await {
            Ok(tcp) => tcp,
            Err(err) => return Verdict::failed(err),
        };

        match ctx.timeout(Client::connect(config, tcp.compat_write())).await {
            Ok(Ok(client)) => {
                let _ = ctx.timeout(client.close()).await;
                Verdict::Hit
            }
            Ok(Err(err)) => classify(&err),
            Err(err) => Verdict::failed(err),
        }
    }
}

fn classify(err: &tiberius::error::Error) -> Verdict {
    match err {
        tiberius::error::Error::Server(token) => classify_server(token.code(), token.message()),
        tiberius::error::Error::Io { .. } => {
            Verdict::Failed(Error::connection_failed(err.to_string()))
        }
        tiberius::error::Error::Routing { .. } => {
            Verdict::Failed(Error::connection_failed(err.to_string()))
        }
        other => Verdict::Failed(classify_raw(other.to_string())),
    }
}

fn classify_server(code: u32, message: &str) -> Verdict {
    if code == PASSWORD_MUST_CHANGE {
        tracing::warn!(code, "credential accepted but the password has expired");
        return Verdict::Hit;
    }
    if code == LOGIN_FAILED || message.contains("Login failed") {
        return Verdict::Rejected;
    }
    Verdict::Failed(Error::protocol(format!("mssql error {code}: {message}")))
}

//! PostgreSQL authentication probe.
//!
//! `tokio_postgres::Config::connect` completes startup and authentication
//! before it returns, which is all the probe needs. TLS is not requested; a
//! server that demands it answers the startup packet with an error we classify
//! like any other.

use async_trait::async_trait;
use tokio_postgres::{config::SslMode, Config, NoTls};

use super::{Cracker, Verdict};
use crate::{
    auth::{Auth, AuthMode},
    context::ScanContext,
    error::{classify_raw, Error},
};

/// Database attempted at login; present on effectively every install.
const MAINTENANCE_DB: &str = "postgres";

/// Probes PostgreSQL by completing a startup exchange.
#[derive(Debug, Default)]
pub struct PostgresCracker;

#[async_trait]
impl Cracker for PostgresCracker {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn mode(&self) -> AuthMode {
        AuthMode::UserPass
    }

    async fn check(&self, ctx: &ScanContext, host: &str, port: u16, auth: &Auth) -> Verdict {
        let mut config = Config::new();
        config
            .host(host)
            .port(port)
            .user(auth.username_or(""))
            .password(auth.password_or_empty())
            .dbname(MAINTENANCE_DB)
            .ssl_mode(SslMode::Disable)
            .connect_timeout(ctx.dial_timeout());

        match ctx.timeout(config.connect(NoTls)).await {
            // Dropping both halves tears the session down; nothing was queried.
            Ok(Ok((client, connection))) => {
                drop(client);
                drop(connection);
                Verdict::Hit
            }
            Ok(Err(err)) => classify(&err),
            Err(err) => Verdict::failed(err),
        }
    }
}

fn classify(err: &tokio_postgres::Error) -> Verdict {
    match err.code() {
        Some(code) => classify_sqlstate(code.code()),
        None => Verdict::Failed(classify_raw(err.to_string())),
    }
}

fn classify_sqlstate(code: &str) -> Verdict {
    match code {
        // invalid_password / invalid_authorization_specification
        "28P01" | "28000" => Verdict::Rejected,
        // too_many_connections: the slot ran out before auth could finish.
        "53300" => Verdict::Failed(Error::connection_failed("too many connections (53300)")),
        // invalid_catalog_name: the maintenance database is missing, which the
        // server only says after accepting the credential.
        "3D000" => Verdict::Hit,
        other => Verdict::Failed(Error::protocol(format!("postgres sqlstate {other}"))),
    }
}

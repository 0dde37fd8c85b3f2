//! MySQL authentication probe.
//!
//! Establishing a connection is the authentication exchange; no query runs.
//! The server reports credential rejection with well-known error codes, so
//! classification is numeric rather than string sniffing.

use async_trait::async_trait;
use mysql_async::{Conn, Opts, OptsBuilder};

use super::{Cracker, Verdict};
use crate::{
    auth::{Auth, AuthMode},
    context::ScanContext,
    error::{classify_raw, Error},
};

/// ER_DBACCESS_DENIED_ERROR: valid login, no right to the default schema.
const ER_DBACCESS_DENIED: u16 = 1044;
/// ER_ACCESS_DENIED_ERROR: wrong user or password.
const ER_ACCESS_DENIED: u16 = 1045;
/// ER_CON_COUNT_ERROR: the server is out of connection slots.
const ER_CON_COUNT: u16 = 1040;
/// ER_HOST_NOT_PRIVILEGED / ER_HOST_IS_BLOCKED: our address is filtered, no
/// credential will ever get through.
const ER_HOST_NOT_PRIVILEGED: u16 = 1130;
const ER_HOST_IS_BLOCKED: u16 = 1129;

/// Probes MySQL by completing a handshake.
#[derive(Debug, Default)]
pub struct MysqlCracker;

#[async_trait]
impl Cracker for MysqlCracker {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn mode(&self) -> AuthMode {
        AuthMode::UserPass
    }

    async fn check(&self, ctx: &ScanContext, host: &str, port: u16, auth: &Auth) -> Verdict {
        let opts: Opts = OptsBuilder::default()
            .ip_or_hostname(host)
            .tcp_port(port)
            .user(auth.username.clone())
            .pass(auth.password.clone())
            .prefer_socket(false)
            .into();

        match ctx.timeout(Conn::new(opts)).await {
            Ok(Ok(conn)) => {
                let _ = ctx.timeout(conn.disconnect()).await;
                Verdict::Hit
            }
            Ok(Err(err)) => classify(&err),
            Err(err) => Verdict::failed(err),
        }
    }
}

fn classify(err: &mysql_async::Error) -> Verdict {
    match err {
        mysql_async::Error::Server(server) => classify_server(server.code, &server.message),
        mysql_async::Error::Io(_) => Verdict::Failed(Error::connection_failed(err.to_string())),
        other => Verdict::Failed(classify_raw(other.to_string())),
    }
}

fn classify_server(code: u16, message: &str) -> Verdict {
    match code {
        ER_ACCESS_DENIED | ER_DBACCESS_DENIED => Verdict::Rejected,
        ER_CON_COUNT => Verdict::Failed(Error::connection_failed(message.to_string())),
        ER_HOST_NOT_PRIVILEGED | ER_HOST_IS_BLOCKED => {
            Verdict::Failed(Error::connection_failed(message.to_string()))
        }
        _ => Verdict::Failed(Error::protocol(format!("mysql error {code}: {message}"))),
    }
}

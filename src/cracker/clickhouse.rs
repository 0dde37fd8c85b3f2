//! ClickHouse native-protocol authentication probe.
//!
//! Speaks the native TCP protocol against the `default` database with LZ4
//! compression and pings once; authentication happens inside the hello
//! exchange. Server exceptions carry numeric codes, which beat string
//! matching for classification.

use async_trait::async_trait;
use clickhouse_rs::Pool;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};

use super::{Cracker, Verdict};
use crate::{
    auth::{Auth, AuthMode},
    context::ScanContext,
    error::{classify_raw, Error},
};

/// AUTHENTICATION_FAILED server exception.
const AUTHENTICATION_FAILED: u32 = 516;
/// UNKNOWN_USER server exception.
const UNKNOWN_USER: u32 = 192;
/// WRONG_PASSWORD server exception.
const WRONG_PASSWORD: u32 = 193;
/// IP_ADDRESS_NOT_ALLOWED: the account exists but we are filtered.
const IP_ADDRESS_NOT_ALLOWED: u32 = 195;

/// Probes ClickHouse over its native protocol.
#[derive(Debug, Default)]
pub struct ClickHouseCracker;

#[async_trait]
impl Cracker for ClickHouseCracker {
    fn name(&self) -> &'static str {
        "clickhouse"
    }

    fn mode(&self) -> AuthMode {
        AuthMode::UserPass
    }

    async fn check(&self, ctx: &ScanContext, host: &str, port: u16, auth: &Auth) -> Verdict {
        let user = utf8_percent_encode(auth.username_or("default"), NON_ALPHANUMERIC);
        let password = utf8_percent_encode(auth.password_or_empty(), NON_ALPHANUMERIC);
        let url = format!(
            "tcp://{user}:{password}@{host}:{port}/default?compression=lz4&connection_timeout=3s&send_retries=0"
        );
        let pool = Pool::new(url);

        let probe = async {
            let mut handle = pool.get_handle().await?;
            handle.ping().await?;
            Ok::<_, clickhouse_rs::errors::Error>(())
        };
        match ctx.timeout(probe).await {
            Ok(Ok(())) => Verdict::Hit,
            Ok(Err(err)) => classify(&err),
            Err(err) => Verdict::failed(err),
        }
    }
}

fn classify(err: &clickhouse_rs::errors::Error) -> Verdict {
    use clickhouse_rs::errors::Error as ChError;
    match err {
        ChError::Server(server) => classify_server(server.code, &server.message),
        ChError::Io(io_err) => Verdict::Failed(Error::connection_failed(io_err.to_string())),
        ChError::Connection(_) => Verdict::Failed(Error::connection_failed(err.to_string())),
        ChError::Driver(_) => Verdict::Failed(Error::protocol(err.to_string())),
        other => Verdict::Failed(classify_raw(other.to_string())),
    }
}

fn classify_server(code: u32, message: &str) -> Verdict {
    match code {
        AUTHENTICATION_FAILED | UNKNOWN_USER | WRONG_PASSWORD => Verdict::Rejected,
        IP_ADDRESS_NOT_ALLOWED => {
            Verdict::Failed(Error::connection_failed(message.to_string()))
        }
        _ => Verdict::Failed(Error::protocol(format!(
            "clickhouse exception {code}: {message}"
        ))),
    }
}

//! Redis authentication probe.
//!
//! Credentials ride in the connection info, so authentication happens during
//! connection setup; a `PING` afterwards confirms the session is usable.
//! Legacy `requirepass` deployments take a bare password, while ACL-aware
//! servers also honor the username when one is supplied.

use std::time::Duration;

use async_trait::async_trait;
use redis::{ConnectionAddr, ConnectionInfo, RedisConnectionInfo};

use super::{Cracker, Verdict};
use crate::{
    auth::{Auth, AuthMode},
    context::ScanContext,
    error::classify_raw,
};

/// Budget for the PING round trip once connected.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(3);

/// Probes Redis `AUTH`.
#[derive(Debug, Default)]
pub struct RedisCracker;

#[async_trait]
impl Cracker for RedisCracker {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn mode(&self) -> AuthMode {
        AuthMode::OnlyPass
    }

    async fn check(&self, ctx: &ScanContext, host: &str, port: u16, auth: &Auth) -> Verdict {
        let info = ConnectionInfo {
            addr: ConnectionAddr::Tcp(host.to_string(), port),
            redis: RedisConnectionInfo {
                db: 0,
                username: auth.username.clone(),
                password: auth.password.clone(),
                ..Default::default()
            },
        };
        let client = match redis::Client::open(info) {
            Ok(client) => client,
            Err(err) => return classify(&err),
        };

        let connect = client
            .get_multiplexed_async_connection_with_timeouts(RESPONSE_TIMEOUT, ctx.dial_timeout());
        let mut connection = match ctx.timeout(connect).await {
            Ok(Ok(connection)) => connection,
            Ok(Err(err)) => return classify(&err),
            Err(err) => return Verdict::failed(err),
        };

        let ping = async {
            let pong: String = redis::cmd("PING").query_async(&mut connection).await?;
            Ok::<_, redis::RedisError>(pong)
        };
        match ctx.timeout(ping).await {
            Ok(Ok(_pong)) => Verdict::Hit,
            Ok(Err(err)) => classify(&err),
            Err(err) => Verdict::failed(err),
        }
    }
}

fn classify(err: &redis::RedisError) -> Verdict {
    if err.kind() == redis::ErrorKind::AuthenticationFailed {
        return Verdict::Rejected;
    }
    if let Some(code) = err.code() {
        if matches!(code, "WRONGPASS" | "NOAUTH" | "NOPERM") {
            return Verdict::Rejected;
        }
    }
    let message = err.to_string();
    if message.contains("invalid password")
        || message.contains("invalid username-password pair")
        || message.contains("Client sent AUTH, but no password is set")
    {
        return Verdict::Rejected;
    }
    if err.is_io_error() || err.is_connection_refusal() || err.is_timeout() {
        return Verdict::Failed(crate::error::Error::connection_failed(message));
    }
    Verdict::Failed(classify_raw(message))
}

//! Oracle Database probes: password authentication and SID enumeration.
//!
//! The `oracle` driver is synchronous (it wraps the Oracle call interface),
//! so every connect runs on the blocking pool raced against the context; on
//! expiry the worker finishes on the driver's own schedule. All classification
//! is `ORA-` code sniffing on the error text, the one error surface the
//! driver reliably exposes.

use async_trait::async_trait;

use super::{Cracker, Verdict};
use crate::{
    auth::{Auth, AuthMode},
    context::ScanContext,
    error::{looks_like_network_error, Error},
    runtime,
};

/// System identifier tried when the task does not name one.
const DEFAULT_SID: &str = "ORCL";

/// A credential no sane install accepts, used to poke a SID: the error code
/// tells us whether the SID resolved, not whether the login worked.
const SID_PROBE_USER: &str = "credprobe";
const SID_PROBE_PASSWORD: &str = "credprobe";

fn connect_string(host: &str, port: u16, sid: &str) -> String {
    format!("//{host}:{port}/{sid}")
}

/// Blocking connect, run on the worker pool.
fn try_connect(username: String, password: String, connect: String) -> Option<String> {
    match oracle::Connection::connect(username, password, connect) {
        Ok(conn) => {
            let _ = conn.close();
            None
        }
        Err(err) => Some(err.to_string()),
    }
}

/// Probes Oracle password authentication.
#[derive(Debug, Default)]
pub struct OracleCracker;

#[async_trait]
impl Cracker for OracleCracker {
    fn name(&self) -> &'static str {
        "oracle"
    }

    fn mode(&self) -> AuthMode {
        AuthMode::UserPass
    }

    async fn check(&self, ctx: &ScanContext, host: &str, port: u16, auth: &Auth) -> Verdict {
        let sid = auth.extra("sid").unwrap_or(DEFAULT_SID);
        let username = auth.username_or("").to_string();
        let password = auth.password_or_empty().to_string();
        let connect = connect_string(host, port, sid);

        match runtime::run_blocking(ctx, move || try_connect(username, password, connect)).await {
            Ok(None) => Verdict::Hit,
            Ok(Some(message)) => classify_login(&message),
            Err(err) => Verdict::failed(err),
        }
    }
}

fn classify_login(message: &str) -> Verdict {
    if message.contains("ORA-01017") || message.to_ascii_lowercase().contains("logon denied") {
        return Verdict::Rejected;
    }
    if message.contains("ORA-28000") {
        // The account exists; something (possibly us) locked it.
        tracing::warn!(%message, "oracle account is locked");
        return Verdict::Rejected;
    }
    if message.contains("ORA-28001") {
        tracing::warn!(%message, "oracle password has expired");
        return Verdict::Rejected;
    }
    if message.contains("ORA-12505") || message.contains("ORA-12514") {
        return Verdict::Failed(Error::protocol(format!("service not known: {message}")));
    }
    if is_transport_failure(message) {
        return Verdict::Failed(Error::connection_failed(message.to_string()));
    }
    Verdict::Failed(Error::protocol(message.to_string()))
}

/// Probes which SIDs a listener knows, one candidate per "username".
///
/// An impossible credential is offered against the candidate SID: a credential
/// rejection proves the listener routed us to a database, while ORA-12505 or
/// ORA-12514 proves it did not. Anything else the listener says leaves the
/// candidate unconfirmed.
#[derive(Debug, Default)]
pub struct OracleSidCracker;

#[async_trait]
impl Cracker for OracleSidCracker {
    fn name(&self) -> &'static str {
        "oracle-sid"
    }

    fn mode(&self) -> AuthMode {
        AuthMode::UserPass
    }

    async fn check(&self, ctx: &ScanContext, host: &str, port: u16, auth: &Auth) -> Verdict {
        let candidate = auth.username_or(DEFAULT_SID).to_string();
        let connect = connect_string(host, port, &candidate);

        let outcome = runtime::run_blocking(ctx, move || {
            try_connect(
                SID_PROBE_USER.to_string(),
                SID_PROBE_PASSWORD.to_string(),
                connect,
            )
        })
        .await;
        match outcome {
            // The probe credential somehow logged in; the SID certainly exists.
            Ok(None) => Verdict::Hit,
            Ok(Some(message)) => classify_sid(&message),
            Err(err) => Verdict::failed(err),
        }
    }
}

fn classify_sid(message: &str) -> Verdict {
    if message.contains("ORA-01017")
        || message.contains("ORA-28000")
        || message.contains("ORA-28001")
    {
        // The database behind this SID evaluated our credential: SID is real.
        return Verdict::Hit;
    }
    if message.contains("ORA-12505") || message.contains("ORA-12514") {
        return Verdict::Rejected;
    }
    if is_transport_failure(message) {
        return Verdict::Failed(Error::connection_failed(message.to_string()));
    }
    // Listeners say all kinds of things; an unrecognized message never
    // confirms a SID.
    Verdict::Rejected
}

fn is_transport_failure(message: &str) -> bool {
    // ORA-12541 no listener, ORA-12170 connect timeout, ORA-12537 closed,
    // ORA-03113 end-of-file on channel.
    ["ORA-12541", "ORA-12170", "ORA-12537", "ORA-03113"]
        .iter()
        .any(|code| message.contains(code))
        || looks_like_network_error(message)
}

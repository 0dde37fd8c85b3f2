//! The polymorphic probe capability and its verdicts.
//!
//! One [`Cracker`] exists per protocol. Each drives a complete authentication
//! exchange against a target and collapses whatever its driver reported into a
//! [`Verdict`], so the runner never sees protocol-specific error surfaces.

pub(crate) mod der;
pub(crate) mod ntlm;

mod clickhouse;
mod elastic;
mod ftp;
mod mongo;
mod mssql;
mod mysql;
mod oracle;
mod postgres;
mod rdp;
mod redis;
mod smb;
mod snmp;
mod ssh;
mod telnet;

pub use self::{
    clickhouse::ClickHouseCracker,
    elastic::ElasticCracker,
    ftp::FtpCracker,
    mongo::MongoCracker,
    mssql::MssqlCracker,
    mysql::MysqlCracker,
    oracle::{OracleCracker, OracleSidCracker},
    postgres::PostgresCracker,
    rdp::RdpCracker,
    redis::RedisCracker,
    smb::SmbCracker,
    snmp::SnmpCracker,
    ssh::SshCracker,
    telnet::TelnetCracker,
};

use async_trait::async_trait;

use crate::{
    auth::{Auth, AuthMode},
    context::ScanContext,
    error::Error,
};

/// A stateless probe for one protocol.
///
/// Implementations open a fresh connection per attempt (never pooling; many
/// drivers cache authentication state inside a live connection), respect the
/// context's cancellation and deadline, and close the connection on every exit
/// path.
#[async_trait]
pub trait Cracker: Send + Sync {
    /// Identifier this cracker is registered under. Stable across releases.
    fn name(&self) -> &'static str;

    /// Which credential fields [`check`](Cracker::check) will consult.
    fn mode(&self) -> AuthMode;

    /// Attempts one authentication exchange against `host:port`.
    ///
    /// Blocks until success, rejection, error, or context expiry; after expiry
    /// it must still return within a bounded grace period, reporting a
    /// connection failure.
    async fn check(&self, ctx: &ScanContext, host: &str, port: u16, auth: &Auth) -> Verdict;
}

/// The outcome of a single probe.
///
/// Illegal combinations are unrepresentable: a hit can never carry an error,
/// and a credential rejection is a normal outcome of probing, never an error
/// value.
#[derive(Debug)]
pub enum Verdict {
    /// The service accepted the credential.
    Hit,
    /// The service answered and turned the credential down: a clean negative.
    Rejected,
    /// No answer to classify: the transport failed or the remote end was not
    /// speaking the expected protocol.
    Failed(Error),
}

impl Verdict {
    /// Wraps an error, canonicalizing context cancellation: by the time a
    /// probe reports, "the context ended first" and "the target never
    /// answered" are the same outcome.
    pub(crate) fn failed(err: Error) -> Verdict {
        if err.is_canceled() {
            Verdict::Failed(Error::connection_failed("attempt canceled"))
        } else {
            Verdict::Failed(err)
        }
    }

    /// Whether the credential was accepted.
    pub fn matched(&self) -> bool {
        matches!(self, Verdict::Hit)
    }

    /// The error, for outcomes that carry one.
    pub fn error(&self) -> Option<&Error> {
        match self {
            Verdict::Failed(err) => Some(err),
            _ => None,
        }
    }
}

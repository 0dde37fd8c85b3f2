//! MongoDB authentication probe.
//!
//! Connects directly to the single target (no topology discovery) and runs a
//! `ping` against `admin`, which forces the SCRAM conversation to complete.
//! The driver wraps everything in its own error kinds; unknown ones are
//! conservatively treated as unreachability so a flaky replica never shows up
//! as anything more interesting.

use async_trait::async_trait;
use mongodb::{
    bson::doc,
    options::{ClientOptions, Credential, ServerAddress},
    Client,
};

use super::{Cracker, Verdict};
use crate::{
    auth::{Auth, AuthMode},
    context::ScanContext,
    error::Error,
};

/// Probes MongoDB SCRAM credentials.
#[derive(Debug, Default)]
pub struct MongoCracker;

#[async_trait]
impl Cracker for MongoCracker {
    fn name(&self) -> &'static str {
        "mongodb"
    }

    fn mode(&self) -> AuthMode {
        AuthMode::UserPass
    }

    async fn check(&self, ctx: &ScanContext, host: &str, port: u16, auth: &Auth) -> Verdict {
        let credential = Credential::builder()
            .username(auth.username_or("").to_string())
            .password(auth.password_or_empty().to_string())
            .build();
        let options = ClientOptions::builder()
            .hosts(vec![ServerAddress::Tcp {
                host: host.to_string(),
                port: Some(port),
            }])
            .direct_connection(true)
            .connect_timeout(ctx.dial_timeout())
            .server_selection_timeout(ctx.dial_timeout())
            .credential(credential)
            .build();

        let client = match Client::with_options(options) {
            Ok(client) => client,
            Err(err) => return classify(&err),
        };

        let verdict = match ctx
            .timeout(std::future::IntoFuture::into_future(
                client.database("admin").run_command(doc! { "ping": 1 }),
            ))
            .await
        {
            Ok(Ok(_reply)) => Verdict::Hit,
            Ok(Err(err)) => classify(&err),
            Err(err) => Verdict::failed(err),
        };
        client.shutdown().await;
        verdict
    }
}

/// AuthenticationFailed as reported inside command errors.
const AUTH_FAILED_CODE: i32 = 18;

fn classify(err: &mongodb::error::Error) -> Verdict {
    use mongodb::error::ErrorKind;
    match err.kind.as_ref() {
        ErrorKind::Authentication { message, .. } => classify_message(message),
        ErrorKind::Command(command_error) if command_error.code == AUTH_FAILED_CODE => {
            Verdict::Rejected
        }
        ErrorKind::ServerSelection { message, .. } => {
            Verdict::Failed(Error::connection_failed(message.clone()))
        }
        ErrorKind::Io(io_err) => Verdict::Failed(Error::connection_failed(io_err.to_string())),
        _ => classify_message(&err.to_string()),
    }
}

/// String-level classification, also the fallback for kinds the driver does
/// not distinguish. Unknown messages are treated as unreachability.
fn classify_message(message: &str) -> Verdict {
    let lowered = message.to_ascii_lowercase();
    if lowered.contains("authentication failed")
        || lowered.contains("auth failed")
        || lowered.contains("sasl conversation error")
        || lowered.contains("scram failure")
        || lowered.contains("unauthorized")
    {
        return Verdict::Rejected;
    }
    Verdict::Failed(Error::connection_failed(message.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_messages_are_clean_negatives() {
        for message in [
            "SCRAM failure: Authentication failed.",
            "sasl conversation error: auth failed",
            "Command failed: Unauthorized",
        ] {
            let verdict = classify_message(message);
            assert!(!verdict.matched());
            assert!(verdict.error().is_none(), "{message}");
        }
    }

    #[test]
    fn unknown_messages_fall_back_to_connection_failures() {
        let verdict = classify_message("No suitable servers found");
        assert!(verdict.error().unwrap().is_connection_failed());
    }

    #[test]
    fn io_kinds_are_connection_failures() {
        let err = mongodb::error::Error::from(std::io::Error::from(
            std::io::ErrorKind::ConnectionReset,
        ));
        assert!(classify(&err).error().unwrap().is_connection_failed());
    }
}

//! FTP authentication probe.
//!
//! FTP is a line protocol with three-digit reply codes, so the exchange is
//! driven directly over a TCP stream rather than through a client crate:
//! greeting, `USER`, `PASS`, done.

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
};

use super::{Cracker, Verdict};
use crate::{
    auth::{Auth, AuthMode},
    context::ScanContext,
    error::{Error, Result},
    runtime::stream,
};

/// Reply code for "not logged in".
const NOT_LOGGED_IN: u16 = 530;
/// Reply code for "service not available", the server shedding load.
const SERVICE_NOT_AVAILABLE: u16 = 421;

/// Probes FTP with `USER`/`PASS`.
#[derive(Debug, Default)]
pub struct FtpCracker;

#[async_trait]
impl Cracker for FtpCracker {
    fn name(&self) -> &'static str {
        "ftp"
    }

    fn mode(&self) -> AuthMode {
        AuthMode::UserPass
    }

    async fn check(&self, ctx: &ScanContext, host: &str, port: u16, auth: &Auth) -> Verdict {
        let stream = match stream::connect(ctx, host, port).await {
            Ok(stream) => stream,
            Err(err) => return Verdict::failed(err),
        };
        match login(ctx, stream, auth).await {
            Ok(verdict) => verdict,
            Err(err) => Verdict::failed(err),
        }
    }
}

async fn login(ctx: &ScanContext, stream: TcpStream, auth: &Auth) -> Result<Verdict> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let greeting = read_reply(ctx, &mut reader).await?;
    match greeting {
        code if code == SERVICE_NOT_AVAILABLE => {
            return Ok(Verdict::Failed(Error::connection_failed(
                "ftp service not available (421)",
            )))
        }
        code if (200..300).contains(&code) => {}
        code => {
            return Ok(Verdict::Failed(Error::protocol(format!(
                "unexpected ftp greeting {code}"
            ))))
        }
    }

    send(ctx, &mut write_half, &format!("USER {}", auth.username_or("anonymous"))).await?;
    let reply = read_reply(ctx, &mut reader).await?;
    let reply = match reply {
        // Password not required; some servers log anonymous users straight in.
        code if (200..300).contains(&code) => code,
        331 | 332 => {
            send(ctx, &mut write_half, &format!("PASS {}", auth.password_or_empty())).await?;
            read_reply(ctx, &mut reader).await?
        }
        code => code,
    };

    let verdict = match reply {
        code if (200..300).contains(&code) => {
            // Best-effort polite close; the verdict no longer depends on it.
            let _ = send(ctx, &mut write_half, "QUIT").await;
            Verdict::Hit
        }
        NOT_LOGGED_IN => Verdict::Rejected,
        SERVICE_NOT_AVAILABLE => Verdict::Failed(Error::connection_failed(
            "ftp service not available (421)",
        )),
        code => Verdict::Failed(Error::protocol(format!("unexpected ftp reply {code}"))),
    };
    Ok(verdict)
}

async fn send(ctx: &ScanContext, write_half: &mut OwnedWriteHalf, line: &str) -> Result<()> {
    let data = format!("{line}\r\n");
    ctx.timeout(write_half.write_all(data.as_bytes())).await??;
    Ok(())
}

/// Reads one (possibly multi-line) reply and returns its code.
async fn read_reply(ctx: &ScanContext, reader: &mut BufReader<OwnedReadHalf>) -> Result<u16> {
    let mut in_multiline = false;
    loop {
        let mut line = String::new();
        let read = ctx.timeout(reader.read_line(&mut line)).await??;
        if read == 0 {
            return Err(Error::connection_failed("ftp server closed the connection"));
        }
        match parse_reply_line(&line) {
            Some((code, true)) => return Ok(code),
            // "123-" opens a multi-line reply; drain until "123 ".
            Some((_, false)) => in_multiline = true,
            // Bare text is only legal inside a multi-line reply.
            None if in_multiline => {}
            None => return Err(Error::protocol(format!("not an ftp reply: {}", line.trim_end()))),
        }
    }
}

/// Parses one reply line into its code and whether it terminates the reply.
fn parse_reply_line(line: &str) -> Option<(u16, bool)> {
    let bytes = line.as_bytes();
    if bytes.len() < 4 || !bytes[..3].iter().all(u8::is_ascii_digit) {
        return None;
    }
    let code: u16 = line[..3].parse().ok()?;
    Some((code, bytes[3] == b' '))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    #[test]
    fn reply_lines_parse() {
        assert_eq!(parse_reply_line("220 ready\r\n"), Some((220, true)));
        assert_eq!(parse_reply_line("230-welcome\r\n"), Some((230, false)));
        assert_eq!(parse_reply_line("   info line\r\n"), None);
        assert_eq!(parse_reply_line("53"), None);
    }

    async fn run_against_script(script: &'static [(&'static str, &'static str)]) -> Verdict {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            for (reply, expect) in script {
                socket.write_all(reply.as_bytes()).await.unwrap();
                if expect.is_empty() {
                    break;
                }
                let mut buf = vec![0u8; 256];
                let n = socket.read(&mut buf).await.unwrap();
                let received = String::from_utf8_lossy(&buf[..n]).to_string();
                assert!(
                    received.starts_with(expect),
                    "expected {expect:?}, got {received:?}"
                );
            }
        });

        let ctx = ScanContext::with_timeout(Duration::from_secs(5));
        FtpCracker
            .check(&ctx, "127.0.0.1", port, &Auth::user_pass("admin", "secret"))
            .await
    }

    #[tokio::test]
    async fn accepted_logins_are_hits() {
        let verdict = run_against_script(&[
            ("220 mock ftp\r\n", "USER admin"),
            ("331 need password\r\n", "PASS secret"),
            ("230 logged in\r\n", "QUIT"),
        ])
        .await;
        assert!(verdict.matched());
    }

    #[tokio::test]
    async fn rejected_logins_are_clean_negatives() {
        let verdict = run_against_script(&[
            ("220-mock ftp\r\nwith a banner\r\n220 ready\r\n", "USER admin"),
            ("331 need password\r\n", "PASS secret"),
            ("530 Login incorrect.\r\n", ""),
        ])
        .await;
        assert!(!verdict.matched());
        assert!(verdict.error().is_none());
    }

    #[tokio::test]
    async fn overloaded_servers_are_connection_failures() {
        let verdict = run_against_script(&[("421 too many connections\r\n", "")]).await;
        assert!(verdict.error().unwrap().is_connection_failed());
    }

    #[tokio::test]
    async fn non_ftp_banners_are_protocol_errors() {
        let verdict = run_against_script(&[("SSH-2.0-OpenSSH_9.6\r\n", "")]).await;
        assert!(verdict.error().unwrap().is_protocol());
    }

    #[test]
    fn registered_under_ftp() {
        let registry = Registry::builtin();
        let cracker = registry.lookup("ftp").unwrap();
        assert_eq!(cracker.mode(), AuthMode::UserPass);
    }
}

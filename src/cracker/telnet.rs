//! Telnet authentication probe.
//!
//! There is no protocol to speak of beyond option negotiation: the probe reads
//! whatever the device prints, matches prompts with regexes, and answers them.
//! Every read phase carries its own deadline so a silent device cannot pin an
//! attempt for longer than the context allows.

use std::time::Duration;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

use super::{Cracker, Verdict};
use crate::{
    auth::{Auth, AuthMode},
    context::ScanContext,
    error::{Error, Result},
    runtime::stream,
};

/// Deadline for each read phase of the state machine.
const STEP_TIMEOUT: Duration = Duration::from_secs(3);

lazy_static! {
    static ref LOGIN_PROMPT: Regex = Regex::new(r"(?i)(login|user ?name|account)\s*[:>]?\s*$").unwrap();
    static ref PASSWORD_PROMPT: Regex = Regex::new(r"(?i)pass(word|code)?\s*[:>]?\s*$").unwrap();
    static ref SHELL_PROMPT: Regex = Regex::new(r"[#$>%]\s*$").unwrap();
    static ref FAILURE: Regex = Regex::new(r"(?i)(incorrect|failed|denied|bad|invalid)").unwrap();
}

// Option negotiation commands.
const IAC: u8 = 255;
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SB: u8 = 250;
const SE: u8 = 240;

/// Probes Telnet by walking its login dialogue.
#[derive(Debug, Default)]
pub struct TelnetCracker;

#[async_trait]
impl Cracker for TelnetCracker {
    fn name(&self) -> &'static str {
        "telnet"
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

enum Prompt {
    Login,
    Password,
}

async fn login(ctx: &ScanContext, mut stream: TcpStream, auth: &Auth) -> Result<Verdict> {
    let mut session = Session::default();

    // Wait for the first prompt. Devices that skip accounts entirely ask for a
    // password right away; jump straight to sending it when they do.
    let first = match read_until(ctx, &mut stream, &mut session, |text| {
        if PASSWORD_PROMPT.is_match(text) {
            Some(Prompt::Password)
        } else if LOGIN_PROMPT.is_match(text) {
            Some(Prompt::Login)
        } else {
            None
        }
    })
    .await?
    {
        Some(prompt) => prompt,
        None => return Err(Error::protocol("no login prompt")),
    };

    if let Prompt::Login = first {
        send_line(ctx, &mut stream, auth.username_or("")).await?;
        let got_password_prompt = read_until(ctx, &mut stream, &mut session, |text| {
            PASSWORD_PROMPT.is_match(text).then_some(())
        })
        .await?;
        if got_password_prompt.is_none() {
            return Err(Error::protocol("no password prompt"));
        }
    }
    send_line(ctx, &mut stream, auth.password_or_empty()).await?;

    // Interpret whatever follows: a shell prompt is a hit, failure keywords or
    // a fresh login prompt mean rejection, and silence is also rejection: a
    // device that says nothing did not log us in.
    let outcome = read_until(ctx, &mut stream, &mut session, |text| {
        if FAILURE.is_match(text) || LOGIN_PROMPT.is_match(text) || PASSWORD_PROMPT.is_match(text) {
            Some(Verdict::Rejected)
        } else if SHELL_PROMPT.is_match(text) {
            Some(Verdict::Hit)
        } else {
            None
        }
    })
    .await?;
    Ok(outcome.unwrap_or(Verdict::Rejected))
}

#[derive(Default)]
struct Session {
    /// Bytes carried across reads while an IAC sequence is split between them.
    pending: Vec<u8>,
}

/// Reads until `classify` matches the text received in the current phase, the
/// phase deadline passes (returning `None`), or the peer closes.
async fn read_until<T>(
    ctx: &ScanContext,
    stream: &mut TcpStream,
    session: &mut Session,
    classify: impl Fn(&str) -> Option<T>,
) -> Result<Option<T>> {
    let phase = ctx.attempt(STEP_TIMEOUT);
    let mut text = String::new();
    let mut buf = [0u8; 1024];
    loop {
        let read = match phase.timeout(stream.read(&mut buf)).await {
            Ok(Ok(0)) => {
                return Err(Error::connection_failed("telnet peer closed the connection"))
            }
            Ok(Ok(read)) => read,
            Ok(Err(err)) => return Err(err.into()),
            // Phase deadline: let the caller decide what silence means, but
            // propagate the outer context's cancellation.
            Err(err) if err.is_canceled() => return Err(err),
            Err(_) if ctx.is_done() => {
                return Err(Error::connection_failed("attempt timed out"))
            }
            Err(_) => return Ok(None),
        };
        let payload = negotiate(session, &buf[..read], stream, &phase).await?;
        text.push_str(&String::from_utf8_lossy(&payload));
        if let Some(outcome) = classify(&text) {
            return Ok(Some(outcome));
        }
    }
}

/// Strips IAC sequences from `data`, refusing every option the peer proposes,
/// and returns the remaining payload bytes.
async fn negotiate(
    session: &mut Session,
    data: &[u8],
    stream: &mut TcpStream,
    ctx: &ScanContext,
) -> Result<Vec<u8>> {
    let mut input = std::mem::take(&mut session.pending);
    input.extend_from_slice(data);

    let mut payload = Vec::with_capacity(input.len());
    let mut replies = Vec::new();
    let mut pos = 0;
    while pos < input.len() {
        if input[pos] != IAC {
            payload.push(input[pos]);
            pos += 1;
            continue;
        }
        match input.get(pos + 1) {
            None => {
                // Split sequence; resume on the next read.
                session.pending = input[pos..].to_vec();
                break;
            }
            Some(&IAC) => {
                payload.push(IAC);
                pos += 2;
            }
            Some(&SB) => {
                // Skip subnegotiation through IAC SE.
                match input[pos..].windows(2).position(|w| w == [IAC, SE]) {
                    Some(end) => pos += end + 2,
                    None => {
                        session.pending = input[pos..].to_vec();
                        break;
                    }
                }
            }
            Some(&command) if matches!(command, DO | WILL | DONT | WONT) => match input.get(pos + 2) {
                Some(&option) => {
                    match command {
                        DO => replies.extend_from_slice(&[IAC, WONT, option]),
                        WILL => replies.extend_from_slice(&[IAC, DONT, option]),
                        _ => {}
                    }
                    pos += 3;
                }
                None => {
                    session.pending = input[pos..].to_vec();
                    break;
                }
            },
            Some(_) => pos += 2,
        }
    }
    if !replies.is_empty() {
        ctx.timeout(stream.write_all(&replies)).await??;
    }
    Ok(payload)
}

async fn send_line(ctx: &ScanContext, stream: &mut TcpStream, line: &str) -> Result<()> {
    let data = format!("{line}\r\n");
    ctx.timeout(stream.write_all(data.as_bytes())).await??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_regexes_match_common_devices() {
        for prompt in ["login: ", "Login:", "Username:", "router login:"] {
            assert!(LOGIN_PROMPT.is_match(prompt), "{prompt}");
        }
        for prompt in ["Password: ", "password:", "Passcode:"] {
            assert!(PASSWORD_PROMPT.is_match(prompt), "{prompt}");
        }
        for prompt in ["root@host:~# ", "$ ", "switch> "] {
            assert!(SHELL_PROMPT.is_match(prompt), "{prompt}");
        }
        for line in ["Login incorrect", "Access denied", "invalid password"] {
            assert!(FAILURE.is_match(line), "{line}");
        }
        assert!(!FAILURE.is_match("Welcome to the lab switch"));
    }

    async fn run_against_script(
        script: &'static [(&'static str, Option<&'static str>)],
        auth: Auth,
    ) -> Verdict {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            for (prompt, expect) in script {
                socket.write_all(prompt.as_bytes()).await.unwrap();
                if let Some(expect) = expect {
                    let mut received = String::new();
                    let mut buf = [0u8; 256];
                    while !received.contains("\r\n") {
                        let n = socket.read(&mut buf).await.unwrap();
                        if n == 0 {
                            break;
                        }
                        received.push_str(&String::from_utf8_lossy(&buf[..n]));
                    }
                    assert_eq!(received.trim_end(), *expect);
                }
            }
            // Hold the socket open briefly so the probe reads prompts, not EOF.
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let ctx = ScanContext::with_timeout(Duration::from_secs(10));
        TelnetCracker.check(&ctx, "127.0.0.1", port, &auth).await
    }

    #[tokio::test]
    async fn shell_prompt_after_password_is_a_hit() {
        let verdict = run_against_script(
            &[
                ("login: ", Some("admin")),
                ("Password: ", Some("secret")),
                ("\r\nWelcome!\r\nhost# ", None),
            ],
            Auth::user_pass("admin", "secret"),
        )
        .await;
        assert!(verdict.matched());
    }

    #[tokio::test]
    async fn failure_keyword_is_a_clean_negative() {
        let verdict = run_against_script(
            &[
                ("login: ", Some("admin")),
                ("Password: ", Some("wrong")),
                ("\r\nLogin incorrect\r\n", None),
            ],
            Auth::user_pass("admin", "wrong"),
        )
        .await;
        assert!(!verdict.matched());
        assert!(verdict.error().is_none());
    }

    #[tokio::test]
    async fn password_only_devices_skip_the_username() {
        let verdict = run_against_script(
            &[("Password: ", Some("secret")), ("\r\n> ", None)],
            Auth::user_pass("admin", "secret"),
        )
        .await;
        assert!(verdict.matched());
    }

    #[tokio::test]
    async fn option_negotiation_is_refused_and_stripped() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            // IAC DO ECHO ahead of the prompt.
            socket.write_all(&[IAC, DO, 1]).await.unwrap();
            socket.write_all(b"login: ").await.unwrap();
            let mut buf = [0u8; 16];
            let n = socket.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..3], &[IAC, WONT, 1], "read {:?}", &buf[..n]);
        });

        let ctx = ScanContext::with_timeout(Duration::from_secs(5));
        // The dialogue stops after the refusal; any non-hit outcome is fine.
        let verdict = TelnetCracker
            .check(&ctx, "127.0.0.1", port, &Auth::user_pass("a", "b"))
            .await;
        assert!(!verdict.matched());
    }
}

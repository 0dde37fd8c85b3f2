//! End-to-end scans against in-process mock services.
//!
//! Each test stands up a real listener, points the scanner at it through the
//! public API, and checks both the results and the limiter feedback.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use credprobe::{AdaptiveLimiter, LimiterOptions, Registry, ScanContext, Scanner, ScannerOptions, Task};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

fn scanner(limiter: Arc<AdaptiveLimiter>) -> Scanner {
    Scanner::with_options(
        Arc::new(Registry::builtin()),
        limiter,
        ScannerOptions::builder()
            .attempt_pause(Duration::from_millis(1))
            .build(),
    )
}

fn task(service: &str, port: u16, params: &[(&str, serde_json::Value)]) -> Task {
    let mut task = Task::new("e2e", "127.0.0.1", port.to_string());
    task.params.insert("service", service);
    for (key, value) in params {
        task.params.insert(*key, value.clone());
    }
    task
}

#[tokio::test]
async fn ssh_against_a_listener_that_hangs_up_yields_nothing_and_backs_off() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let _ = socket.shutdown().await;
        }
    });

    let limiter = Arc::new(AdaptiveLimiter::new(
        LimiterOptions::builder()
            .initial(40)
            .min(10)
            .max(40)
            .backoff_window(1)
            .build(),
    ));
    let scanner = scanner(limiter.clone());
    let task = task(
        "ssh",
        port,
        &[
            ("users", serde_json::json!(["root"])),
            ("passwords", serde_json::json!(["x"])),
        ],
    );

    let results = scanner.run(&ScanContext::new(), &task).await.unwrap();
    assert!(results.is_empty());
    assert!(
        limiter.limit() < 40,
        "the connection failure must reach the limiter"
    );
}

/// Minimal HTTP responder implementing the Elasticsearch authenticate
/// endpoint for exactly one credential.
async fn spawn_mock_elasticsearch(accept_basic: &'static str) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = String::new();
                let mut buf = [0u8; 2048];
                while !request.contains("\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.push_str(&String::from_utf8_lossy(&buf[..n])),
                    }
                }
                let ok = request
                    .lines()
                    .any(|l| l.eq_ignore_ascii_case(&format!("authorization: Basic {accept_basic}")));
                let response = if ok {
                    "HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\n{}"
                } else {
                    "HTTP/1.1 401 Unauthorized\r\ncontent-length: 0\r\n\r\n"
                };
                let _ = socket.write_all(response.as_bytes()).await;
            });
        }
    });
    port
}

#[tokio::test]
async fn elasticsearch_scan_finds_exactly_the_valid_credential() {
    // base64("elastic:password")
    let port = spawn_mock_elasticsearch("ZWxhc3RpYzpwYXNzd29yZA==").await;
    let scanner = scanner(Arc::new(AdaptiveLimiter::default()));
    let task = task(
        "elasticsearch",
        port,
        &[
            ("users", serde_json::json!(["elastic", "elastic"])),
            ("passwords", serde_json::json!(["wrong", "password"])),
            ("stop_on_success", serde_json::json!(true)),
        ],
    );

    let results = scanner.run(&ScanContext::new(), &task).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].username, "elastic");
    assert_eq!(results[0].password, "password");
    assert_eq!(results[0].service, "elasticsearch");
}

/// RESP server that requires AUTH with one password. Tracks every password it
/// was offered.
async fn spawn_mock_redis(accept: &'static str, seen: Arc<std::sync::Mutex<Vec<String>>>) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let seen = seen.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                let mut authed = false;
                loop {
                    let n = match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => n,
                    };
                    buf.extend_from_slice(&chunk[..n]);
                    while let Some((command, rest)) = parse_resp_command(&buf) {
                        buf = rest;
                        let reply = match command.first().map(|c| c.to_ascii_uppercase()) {
                            Some(cmd) if cmd == "AUTH" => {
                                let offered = command.last().cloned().unwrap_or_default();
                                seen.lock().unwrap().push(offered.clone());
                                if offered == accept {
                                    authed = true;
                                    "+OK\r\n".to_string()
                                } else {
                                    "-WRONGPASS invalid username-password pair or user is disabled.\r\n"
                                        .to_string()
                                }
                            }
                            Some(cmd) if cmd == "PING" => {
                                if authed {
                                    "+PONG\r\n".to_string()
                                } else {
                                    "-NOAUTH Authentication required.\r\n".to_string()
                                }
                            }
                            Some(cmd) if cmd == "CLIENT" => "+OK\r\n".to_string(),
                            Some(cmd) => format!("-ERR unknown command '{cmd}'\r\n"),
                            None => "-ERR protocol error\r\n".to_string(),
                        };
                        if socket.write_all(reply.as_bytes()).await.is_err() {
                            return;
                        }
                    }
                }
            });
        }
    });
    port
}

/// Parses one complete RESP array of bulk strings; returns it plus leftovers.
fn parse_resp_command(buf: &[u8]) -> Option<(Vec<String>, Vec<u8>)> {
    let text = std::str::from_utf8(buf).ok()?;
    let mut lines = text.split_inclusive("\r\n");
    let mut consumed = 0;

    let header = lines.next()?;
    if !header.ends_with("\r\n") || !header.starts_with('*') {
        return None;
    }
    consumed += header.len();
    let count: usize = header[1..header.len() - 2].parse().ok()?;

    let mut parts = Vec::with_capacity(count);
    for _ in 0..count {
        let len_line = lines.next()?;
        if !len_line.ends_with("\r\n") || !len_line.starts_with('$') {
            return None;
        }
        consumed += len_line.len();
        let len: usize = len_line[1..len_line.len() - 2].parse().ok()?;
        let value = lines.next()?;
        if !value.ends_with("\r\n") || value.len() != len + 2 {
            return None;
        }
        consumed += value.len();
        parts.push(value[..len].to_string());
    }
    Some((parts, buf[consumed..].to_vec()))
}

#[tokio::test]
async fn redis_scan_stops_after_the_valid_password() {
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let port = spawn_mock_redis("secret", seen.clone()).await;
    let scanner = scanner(Arc::new(AdaptiveLimiter::default()));
    let task = task(
        "redis",
        port,
        &[("passwords", serde_json::json!(["wrong", "secret", "other"]))],
    );

    let results = scanner.run(&ScanContext::new(), &task).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].password, "secret");
    assert_eq!(results[0].username, "");

    let seen = seen.lock().unwrap();
    assert!(
        !seen.iter().any(|p| p == "other"),
        "the scan must stop at the hit; server saw {seen:?}"
    );
}

#[tokio::test]
async fn ftp_scan_reports_the_accepted_login() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 512];
                let _ = socket.write_all(b"220 mock ftp\r\n").await;
                loop {
                    let n = match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => n,
                    };
                    let line = String::from_utf8_lossy(&buf[..n]).to_string();
                    let reply: &[u8] = if line.starts_with("USER") {
                        b"331 password please\r\n"
                    } else if line.starts_with("PASS letmein") {
                        b"230 welcome\r\n"
                    } else if line.starts_with("PASS") {
                        b"530 Login incorrect.\r\n"
                    } else {
                        b"221 bye\r\n"
                    };
                    if socket.write_all(reply).await.is_err() {
                        return;
                    }
                }
            });
        }
    });

    let scanner = scanner(Arc::new(AdaptiveLimiter::default()));
    let task = task(
        "ftp",
        port,
        &[
            ("users", serde_json::json!(["backup"])),
            ("passwords", serde_json::json!(["wrong", "letmein"])),
        ],
    );

    let results = scanner.run(&ScanContext::new(), &task).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].username, "backup");
    assert_eq!(results[0].password, "letmein");
}

#[tokio::test]
async fn cancelled_context_surfaces_as_canceled() {
    let scanner = scanner(Arc::new(AdaptiveLimiter::default()));
    let task = task("ssh", 22, &[]);
    let ctx = ScanContext::new();
    ctx.cancel();
    let err = scanner.run(&ctx, &task).await.unwrap_err();
    assert!(err.is_canceled());
}

#[tokio::test]
async fn outer_deadline_bounds_the_whole_scan() {
    // A listener that accepts and then says nothing, forcing attempt timeouts.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let scanner = scanner(Arc::new(AdaptiveLimiter::default()));
    let task = task(
        "ftp",
        port,
        &[
            ("users", serde_json::json!(["a"])),
            ("passwords", serde_json::json!(["1", "2", "3", "4", "5", "6"])),
        ],
    );

    let start = std::time::Instant::now();
    let ctx = ScanContext::with_timeout(Duration::from_secs(2));
    let results = scanner.run(&ctx, &task).await.unwrap();
    assert!(results.is_empty());
    assert!(
        start.elapsed() < Duration::from_secs(10),
        "the outer deadline must cut the dictionary short"
    );
}

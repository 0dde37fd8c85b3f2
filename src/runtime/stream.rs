//! TCP dialing with the per-attempt timeout discipline every probe shares.

use tokio::net::TcpStream;

use crate::{context::ScanContext, error::Result};

/// Connects a fresh TCP stream to `host:port`.
///
/// The dial is bounded by the smaller of the standing dial budget and the
/// context's remaining time; connections are never pooled or reused, since
/// several drivers cache authentication state inside a live connection.
pub(crate) async fn connect(ctx: &ScanContext, host: &str, port: u16) -> Result<TcpStream> {
    let dial = ctx.attempt(ctx.dial_timeout());
    let stream = dial.timeout(TcpStream::connect((host, port))).await??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

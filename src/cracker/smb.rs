//! SMB authentication probe.
//!
//! Speaks just enough SMB2 to get a verdict: negotiate dialect 2.0.2, then an
//! NTLMSSP session setup wrapped in SPNEGO. The session is never used: the
//! status of the final session-setup response is the entire answer. Guest
//! fallback is treated as rejection, since a server that grants guest access
//! never evaluated the password at all.

use async_trait::async_trait;
use bytes::{Buf, BufMut, BytesMut};
use rand::RngCore;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

use super::{der, ntlm, Cracker, Verdict};
use crate::{
    auth::{Auth, AuthMode},
    context::ScanContext,
    error::{Error, Result},
    runtime::stream,
};

const SMB2_MAGIC: &[u8; 4] = b"\xfeSMB";
const SMB1_MAGIC: &[u8; 4] = b"\xffSMB";

const COMMAND_NEGOTIATE: u16 = 0;
const COMMAND_SESSION_SETUP: u16 = 1;

/// The one dialect offered; 2.0.2 keeps negotiation free of preauth contexts.
const DIALECT_2_0_2: u16 = 0x0202;

const STATUS_SUCCESS: u32 = 0x0000_0000;
const STATUS_MORE_PROCESSING_REQUIRED: u32 = 0xc000_0016;
const STATUS_LOGON_FAILURE: u32 = 0xc000_006d;
const STATUS_WRONG_PASSWORD: u32 = 0xc000_006a;
const STATUS_NO_SUCH_USER: u32 = 0xc000_0064;
const STATUS_ACCOUNT_RESTRICTION: u32 = 0xc000_006e;
const STATUS_ACCOUNT_DISABLED: u32 = 0xc000_0072;
const STATUS_ACCOUNT_LOCKED_OUT: u32 = 0xc000_0234;
const STATUS_PASSWORD_EXPIRED: u32 = 0xc000_0071;

/// SessionFlags bit: the server signed us in as guest instead.
const SESSION_FLAG_IS_GUEST: u16 = 0x0001;
/// SessionFlags bit: anonymous (null) session.
const SESSION_FLAG_IS_NULL: u16 = 0x0002;

/// Workstation name presented in the NTLM exchange.
const WORKSTATION: &str = "WORKSTATION";

/// OID 1.3.6.1.5.5.2 (SPNEGO).
const SPNEGO_OID: &[u8] = &[0x2b, 0x06, 0x01, 0x05, 0x05, 0x02];
/// OID 1.3.6.1.4.1.311.2.2.10 (NTLMSSP).
const NTLMSSP_OID: &[u8] = &[0x2b, 0x06, 0x01, 0x04, 0x01, 0x82, 0x37, 0x02, 0x02, 0x0a];

/// Probes SMB (NTLM over SMB2).
#[derive(Debug, Default)]
pub struct SmbCracker;

#[async_trait]
impl Cracker for SmbCracker {
    fn name(&self) -> &'static str {
        "smb"
    }

    fn mode(&self) -> AuthMode {
        AuthMode::UserPass
    }

    async fn check(&self, ctx: &ScanContext, host: &str, port: u16, auth: &Auth) -> Verdict {
        let stream = match stream::connect(ctx, host, port).await {
            Ok(stream) => stream,
            Err(err) => return Verdict::failed(err),
        };
        match session_setup(ctx, stream, auth).await {
            Ok(verdict) => verdict,
            Err(err) => Verdict::failed(err),
        }
    }
}

async fn session_setup(ctx: &ScanContext, mut stream: TcpStream, auth: &Auth) -> Result<Verdict> {
    let mut client_guid = [0u8; 16];
    rand::rng().fill_bytes(&mut client_guid);
    send_frame(ctx, &mut stream, &negotiate_request(&client_guid)).await?;
    let response = read_frame(ctx, &mut stream).await?;
    let header = parse_header(&response)?;
    if header.status != STATUS_SUCCESS || header.command != COMMAND_NEGOTIATE {
        return Err(Error::protocol(format!(
            "smb negotiate failed with status {:#010x}",
            header.status
        )));
    }

    // First round: SPNEGO negTokenInit carrying an NTLM NEGOTIATE.
    let token = spnego_init(&ntlm::negotiate_message(false));
    send_frame(
        ctx,
        &mut stream,
        &session_setup_request(1, 0, &token),
    )
    .await?;
    let response = read_frame(ctx, &mut stream).await?;
    let header = parse_header(&response)?;
    let challenge = match header.status {
        STATUS_MORE_PROCESSING_REQUIRED => {
            let blob = session_setup_blob(&response)?;
            ntlm::parse_challenge(&extract_ntlm_token(blob)?)?
        }
        status => return Ok(classify_status(status, 0)),
    };

    // Second round: negTokenResp carrying the NTLM AUTHENTICATE.
    let mut client_challenge = [0u8; 8];
    rand::rng().fill_bytes(&mut client_challenge);
    let timestamp = challenge.timestamp.unwrap_or_else(ntlm::filetime_now);
    let identity = ntlm::Identity {
        domain: auth.extra("domain").unwrap_or(""),
        username: auth.username_or(""),
        password: auth.password_or_empty(),
        workstation: WORKSTATION,
    };
    let authenticate =
        ntlm::authenticate_message(&challenge, &identity, client_challenge, timestamp, None)?;
    let token = spnego_auth(&authenticate.message);
    send_frame(
        ctx,
        &mut stream,
        &session_setup_request(2, header.session_id, &token),
    )
    .await?;
    let response = read_frame(ctx, &mut stream).await?;
    let header = parse_header(&response)?;
    let session_flags = session_setup_flags(&response).unwrap_or(0);
    Ok(classify_status(header.status, session_flags))
}

fn classify_status(status: u32, session_flags: u16) -> Verdict {
    match status {
        STATUS_SUCCESS => {
            if session_flags & (SESSION_FLAG_IS_GUEST | SESSION_FLAG_IS_NULL) != 0 {
                // The server never checked the password; nothing was cracked.
                Verdict::Rejected
            } else {
                Verdict::Hit
            }
        }
        STATUS_LOGON_FAILURE | STATUS_WRONG_PASSWORD | STATUS_NO_SUCH_USER => Verdict::Rejected,
        STATUS_ACCOUNT_DISABLED | STATUS_ACCOUNT_LOCKED_OUT | STATUS_ACCOUNT_RESTRICTION
        | STATUS_PASSWORD_EXPIRED => {
            tracing::warn!(status = %format!("{status:#010x}"), "account exists but is unusable");
            Verdict::Rejected
        }
        other => Verdict::Failed(Error::protocol(format!(
            "smb session setup failed with status {other:#010x}"
        ))),
    }
}

#[derive(Debug)]
struct Header {
    status: u32,
    command: u16,
    session_id: u64,
}

/// 64-byte SMB2 packet header. `message_id` distinguishes our two rounds.
fn smb2_header(command: u16, message_id: u64, session_id: u64) -> BytesMut {
    let mut buf = BytesMut::with_capacity(64);
    buf.put_slice(SMB2_MAGIC);
    buf.put_u16_le(64); // structure size
    buf.put_u16_le(0); // credit charge
    buf.put_u32_le(0); // status / channel sequence
    buf.put_u16_le(command);
    buf.put_u16_le(1); // credits requested
    buf.put_u32_le(0); // flags
    buf.put_u32_le(0); // next command
    buf.put_u64_le(message_id);
    buf.put_u32_le(0); // reserved
    buf.put_u32_le(0); // tree id
    buf.put_u64_le(session_id);
    buf.put_slice(&[0u8; 16]); // signature
    buf
}

fn negotiate_request(client_guid: &[u8; 16]) -> Vec<u8> {
    let mut buf = smb2_header(COMMAND_NEGOTIATE, 0, 0);
    buf.put_u16_le(36); // structure size
    buf.put_u16_le(1); // dialect count
    buf.put_u16_le(1); // security mode: signing enabled
    buf.put_u16_le(0); // reserved
    buf.put_u32_le(0); // capabilities
    buf.put_slice(client_guid);
    buf.put_u64_le(0); // client start time
    buf.put_u16_le(DIALECT_2_0_2);
    buf.to_vec()
}

fn session_setup_request(message_id: u64, session_id: u64, security_blob: &[u8]) -> Vec<u8> {
    let mut buf = smb2_header(COMMAND_SESSION_SETUP, message_id, session_id);
    buf.put_u16_le(25); // structure size
    buf.put_u8(0); // flags
    buf.put_u8(1); // security mode: signing enabled
    buf.put_u32_le(0); // capabilities
    buf.put_u32_le(0); // channel
    buf.put_u16_le(64 + 24); // security buffer offset
    buf.put_u16_le(security_blob.len() as u16);
    buf.put_u64_le(0); // previous session id
    buf.put_slice(security_blob);
    buf.to_vec()
}

fn parse_header(packet: &[u8]) -> Result<Header> {
    if packet.len() < 64 {
        return Err(Error::protocol("short smb packet"));
    }
    if &packet[..4] == SMB1_MAGIC {
        return Err(Error::protocol("server only speaks SMB1"));
    }
    if &packet[..4] != SMB2_MAGIC {
        return Err(Error::protocol("not an smb2 packet"));
    }
    let mut rest = &packet[8..];
    let status = rest.get_u32_le();
    let command = rest.get_u16_le();
    let _credits = rest.get_u16_le();
    let _flags = rest.get_u32_le();
    let _next = rest.get_u32_le();
    let _message_id = rest.get_u64_le();
    let _reserved = rest.get_u32_le();
    let _tree_id = rest.get_u32_le();
    let session_id = rest.get_u64_le();
    Ok(Header {
        status,
        command,
        session_id,
    })
}

/// The SessionFlags field of a session-setup response body.
fn session_setup_flags(packet: &[u8]) -> Option<u16> {
    let body = packet.get(64..68)?;
    Some(u16::from_le_bytes([body[2], body[3]]))
}

/// The security buffer of a session-setup response body.
fn session_setup_blob(packet: &[u8]) -> Result<&[u8]> {
    let body = packet
        .get(64..72)
        .ok_or_else(|| Error::protocol("short session setup response"))?;
    let offset = u16::from_le_bytes([body[4], body[5]]) as usize;
    let length = u16::from_le_bytes([body[6], body[7]]) as usize;
    packet
        .get(offset..offset + length)
        .ok_or_else(|| Error::protocol("security buffer overruns packet"))
}

/// negTokenInit { mechTypes: [NTLMSSP], mechToken }.
fn spnego_init(ntlm_token: &[u8]) -> Vec<u8> {
    let mech_list = der::tlv(der::SEQUENCE, &der::tlv(der::OID, NTLMSSP_OID));
    let inner = der::tlv(
        der::SEQUENCE,
        &[
            der::tlv(der::context(0), &mech_list),
            der::tlv(
                der::context(2),
                &der::tlv(der::OCTET_STRING, ntlm_token),
            ),
        ]
        .concat(),
    );
    let token = der::tlv(der::context(0), &inner);
    // GSS-API framing: application tag 0x60 { SPNEGO OID, token }.
    der::tlv(
        0x60,
        &[der::tlv(der::OID, SPNEGO_OID), token].concat(),
    )
}

/// negTokenResp { responseToken }.
fn spnego_auth(ntlm_token: &[u8]) -> Vec<u8> {
    let inner = der::tlv(
        der::SEQUENCE,
        &der::tlv(
            der::context(2),
            &der::tlv(der::OCTET_STRING, ntlm_token),
        ),
    );
    der::tlv(der::context(1), &inner)
}

/// Digs the NTLM token out of a server's SPNEGO reply. Falls back to scanning
/// for the NTLMSSP signature, since servers disagree about how much negotiation
/// state they echo.
fn extract_ntlm_token(blob: &[u8]) -> Result<Vec<u8>> {
    if let Some(token) = parse_neg_token_resp(blob) {
        return Ok(token);
    }
    if let Some(position) = blob
        .windows(8)
        .position(|window| window == b"NTLMSSP\0")
    {
        return Ok(blob[position..].to_vec());
    }
    Err(Error::protocol("no NTLM token in security blob"))
}

fn parse_neg_token_resp(blob: &[u8]) -> Option<Vec<u8>> {
    let mut reader = der::Reader::new(blob);
    let inner = reader.expect(der::context(1)).ok()?;
    let mut fields = der::Reader::new(inner);
    let fields_content = fields.expect(der::SEQUENCE).ok()?;
    let mut fields = der::Reader::new(fields_content);
    while !fields.is_empty() {
        let (tag, content) = fields.read_tlv().ok()?;
        if tag == der::context(2) {
            let mut token = der::Reader::new(content);
            return token.expect(der::OCTET_STRING).ok().map(|t| t.to_vec());
        }
    }
    None
}

async fn send_frame(ctx: &ScanContext, stream: &mut TcpStream, packet: &[u8]) -> Result<()> {
    // Direct-TCP transport header: zero byte plus a 24-bit length.
    let mut frame = Vec::with_capacity(4 + packet.len());
    frame.push(0);
    frame.extend_from_slice(&(packet.len() as u32).to_be_bytes()[1..]);
    frame.extend_from_slice(packet);
    ctx.timeout(stream.write_all(&frame)).await??;
    Ok(())
}

async fn read_frame(ctx: &ScanContext, stream: &mut TcpStream) -> Result<Vec<u8>> {
    let mut transport = [0u8; 4];
    ctx.timeout(stream.read_exact(&mut transport)).await??;
    let length = u32::from_be_bytes([0, transport[1], transport[2], transport[3]]) as usize;
    if length == 0 || length > 1 << 20 {
        return Err(Error::protocol("implausible smb frame length"));
    }
    let mut packet = vec![0u8; length];
    ctx.timeout(stream.read_exact(&mut packet)).await??;
    Ok(packet)
}

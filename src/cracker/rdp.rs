//! RDP credential probe via Network Level Authentication.
//!
//! The exchange stops at CredSSP: X.224 negotiation requesting NLA, a TLS
//! handshake (unverified, as everywhere in this crate), then the NTLMv2
//! conversation inside TSRequest messages. Reaching the server's pubKeyAuth
//! reply proves the credential; an errorCode or a hang-up after our
//! AUTHENTICATE message is the server turning it down. Servers that only
//! offer Standard RDP Security never evaluate an NLA credential at all and
//! are reported as clean negatives.

use async_trait::async_trait;
use rand::RngCore;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
};
use tokio_rustls::client::TlsStream;

use super::{der, ntlm, Cracker, Verdict};
use crate::{
    auth::{Auth, AuthMode},
    context::ScanContext,
    error::{Error, Result},
    runtime::{stream, tls},
};

/// TLS-only security, without CredSSP.
const PROTOCOL_SSL: u32 = 0x0000_0001;
/// NLA: TLS plus CredSSP.
const PROTOCOL_HYBRID: u32 = 0x0000_0002;
/// NLA with early user authorization.
const PROTOCOL_HYBRID_EX: u32 = 0x0000_0008;

const NEG_TYPE_RESPONSE: u8 = 0x02;
const NEG_TYPE_FAILURE: u8 = 0x03;

/// Negotiation failure: the server refuses TLS-based security outright.
const SSL_NOT_ALLOWED_BY_SERVER: u32 = 0x02;
/// Negotiation failure: the server has no certificate for TLS.
const SSL_CERT_NOT_ON_SERVER: u32 = 0x03;

/// CredSSP protocol version offered in TSRequests.
const TS_VERSION: u32 = 2;

/// NTSTATUS codes a server returns in a TSRequest errorCode for bad logons.
const LOGON_FAILURE_CODES: &[u32] = &[
    0xc000_006d, // STATUS_LOGON_FAILURE
    0xc000_006a, // STATUS_WRONG_PASSWORD
    0xc000_0064, // STATUS_NO_SUCH_USER
    0xc000_0072, // STATUS_ACCOUNT_DISABLED
    0xc000_0234, // STATUS_ACCOUNT_LOCKED_OUT
    0xc000_0071, // STATUS_PASSWORD_EXPIRED
];

const WORKSTATION: &str = "WORKSTATION";

/// Probes RDP logons through CredSSP.
#[derive(Debug, Default)]
pub struct RdpCracker;

#[async_trait]
impl Cracker for RdpCracker {
    fn name(&self) -> &'static str {
        "rdp"
    }

    fn mode(&self) -> AuthMode {
        AuthMode::UserPass
    }

    async fn check(&self, ctx: &ScanContext, host: &str, port: u16, auth: &Auth) -> Verdict {
        let mut tcp = match stream::connect(ctx, host, port).await {
            Ok(tcp) => tcp,
            Err(err) => return Verdict::failed(err),
        };

        match negotiate(ctx, &mut tcp).await {
            Ok(Negotiation::Hybrid) => {}
            Ok(Negotiation::StandardOnly) => return Verdict::Rejected,
            Ok(Negotiation::TlsWithoutNla) => {
                return Verdict::Failed(Error::protocol(
                    "server selected TLS without NLA; credential cannot be evaluated",
                ))
            }
            Err(err) => return Verdict::failed(err),
        }

        let tls_stream = match tls::wrap(ctx, host, tcp).await {
            Ok(tls_stream) => tls_stream,
            Err(err) => return Verdict::failed(err),
        };
        match credssp(ctx, tls_stream, auth).await {
            Ok(verdict) => verdict,
            Err(err) => Verdict::failed(err),
        }
    }
}

enum Negotiation {
    Hybrid,
    StandardOnly,
    TlsWithoutNla,
}

/// X.224 connection request carrying an RDP_NEG_REQ for SSL|HYBRID, and the
/// confirm that answers it.
async fn negotiate(ctx: &ScanContext, stream: &mut TcpStream) -> Result<Negotiation> {
    let mut request = Vec::with_capacity(19);
    request.extend_from_slice(&[0x03, 0x00, 0x00, 19]); // TPKT
    request.push(14); // X.224 length indicator
    request.push(0xe0); // connection request
    request.extend_from_slice(&[0, 0]); // dst-ref
    request.extend_from_slice(&[0, 0]); // src-ref
    request.push(0); // class 0
    request.push(0x01); // RDP_NEG_REQ
    request.push(0); // flags
    request.extend_from_slice(&8u16.to_le_bytes());
    request.extend_from_slice(&(PROTOCOL_SSL | PROTOCOL_HYBRID).to_le_bytes());
    ctx.timeout(stream.write_all(&request)).await??;

    let mut tpkt = [0u8; 4];
    ctx.timeout(stream.read_exact(&mut tpkt)).await??;
    if tpkt[0] != 0x03 {
        return Err(Error::protocol("not a TPKT header"));
    }
    let total = u16::from_be_bytes([tpkt[2], tpkt[3]]) as usize;
    if !(7..=1024).contains(&total) {
        return Err(Error::protocol("implausible TPKT length"));
    }
    let mut payload = vec![0u8; total - 4];
    ctx.timeout(stream.read_exact(&mut payload)).await??;
    if payload.get(1) != Some(&0xd0) {
        return Err(Error::protocol("expected X.224 connection confirm"));
    }

    // Negotiation response starts after the 7-byte X.224 part, when present.
    let Some(neg) = payload.get(7..15) else {
        // Ancient servers confirm with no negotiation data: Standard RDP
        // Security only.
        return Ok(Negotiation::StandardOnly);
    };
    let code = u32::from_le_bytes([neg[4], neg[5], neg[6], neg[7]]);
    match neg[0] {
        NEG_TYPE_RESPONSE => {
            if code & (PROTOCOL_HYBRID | PROTOCOL_HYBRID_EX) != 0 {
                Ok(Negotiation::Hybrid)
            } else if code & PROTOCOL_SSL != 0 {
                Ok(Negotiation::TlsWithoutNla)
            } else {
                Ok(Negotiation::StandardOnly)
            }
        }
        NEG_TYPE_FAILURE => match code {
            SSL_NOT_ALLOWED_BY_SERVER | SSL_CERT_NOT_ON_SERVER => Ok(Negotiation::StandardOnly),
            other => Err(Error::protocol(format!(
                "rdp negotiation failure {other:#x}"
            ))),
        },
        other => Err(Error::protocol(format!("unexpected negotiation type {other:#x}"))),
    }
}

async fn credssp(
    ctx: &ScanContext,
    mut stream: TlsStream<TcpStream>,
    auth: &Auth,
) -> Result<Verdict> {
    let public_key = {
        let (_, connection) = stream.get_ref();
        let certs = connection
            .peer_certificates()
            .and_then(|certs| certs.first())
            .ok_or_else(|| Error::protocol("server presented no certificate"))?;
        public_key_from_cert(&certs.0)?
    };

    // NEGOTIATE out, CHALLENGE back.
    let request = encode_ts_request(Some(&ntlm::negotiate_message(true)), None);
    ctx.timeout(stream.write_all(&request)).await??;
    let reply = read_ts_request(ctx, &mut stream).await?;
    if let Some(code) = reply.error_code {
        return Ok(error_code_verdict(code));
    }
    let challenge = ntlm::parse_challenge(
        &reply
            .nego_token
            .ok_or_else(|| Error::protocol("no NTLM challenge in TSRequest"))?,
    )?;

    // AUTHENTICATE plus the sealed server public key.
    let mut client_challenge = [0u8; 8];
    rand::rng().fill_bytes(&mut client_challenge);
    let mut exported_session_key = [0u8; 16];
    rand::rng().fill_bytes(&mut exported_session_key);
    let timestamp = challenge.timestamp.unwrap_or_else(ntlm::filetime_now);
    let identity = ntlm::Identity {
        domain: auth.extra("domain").unwrap_or(""),
        username: auth.username_or(""),
        password: auth.password_or_empty(),
        workstation: WORKSTATION,
    };
    let authenticate = ntlm::authenticate_message(
        &challenge,
        &identity,
        client_challenge,
        timestamp,
        Some(exported_session_key),
    )?;
    let mut sealing = ntlm::SealingContext::client(&authenticate.session_key)?;
    let pub_key_auth = sealing.seal(&public_key)?;
    let request = encode_ts_request(Some(&authenticate.message), Some(&pub_key_auth));
    ctx.timeout(stream.write_all(&request)).await??;

    // The server either proves possession of its key (credential accepted) or
    // reports/hangs up.
    match read_ts_request(ctx, &mut stream).await {
        Ok(reply) => Ok(match (reply.error_code, reply.pub_key_auth) {
            (Some(code), _) => error_code_verdict(code),
            (None, Some(_)) => Verdict::Hit,
            (None, None) => Verdict::Rejected,
        }),
        // A hang-up after the AUTHENTICATE message is how most servers say no.
        Err(err) if err.is_connection_failed() && !ctx.is_done() => Ok(Verdict::Rejected),
        Err(err) => Err(err),
    }
}

fn error_code_verdict(code: u32) -> Verdict {
    if LOGON_FAILURE_CODES.contains(&code) {
        Verdict::Rejected
    } else {
        // STATUS_TIME_DIFFERENCE_AT_DC and friends say nothing about the
        // credential.
        Verdict::Failed(Error::protocol(format!("credssp error {code:#010x}")))
    }
}

/// TSRequest fields the probe cares about.
#[derive(Debug, Default)]
struct TsRequest {
    nego_token: Option<Vec<u8>>,
    pub_key_auth: Option<Vec<u8>>,
    error_code: Option<u32>,
}

fn encode_ts_request(nego_token: Option<&[u8]>, pub_key_auth: Option<&[u8]>) -> Vec<u8> {
    let mut fields = der::tlv(der::context(0), &der::uint(TS_VERSION));
    if let Some(token) = nego_token {
        let item = der::tlv(
            der::SEQUENCE,
            &der::tlv(der::context(0), &der::tlv(der::OCTET_STRING, token)),
        );
        let nego_data = der::tlv(der::SEQUENCE, &item);
        fields.extend_from_slice(&der::tlv(der::context(1), &nego_data));
    }
    if let Some(sealed) = pub_key_auth {
        fields.extend_from_slice(&der::tlv(
            der::context(3),
            &der::tlv(der::OCTET_STRING, sealed),
        ));
    }
    der::tlv(der::SEQUENCE, &fields)
}

fn parse_ts_request(buf: &[u8]) -> Result<TsRequest> {
    let mut outer = der::Reader::new(buf);
    let fields = outer.expect(der::SEQUENCE)?;
    let mut fields = der::Reader::new(fields);
    let mut request = TsRequest::default();
    while !fields.is_empty() {
        let (tag, content) = fields.read_tlv()?;
        match tag {
            tag if tag == der::context(1) => {
                let mut nego_data = der::Reader::new(content);
                let item = nego_data.expect(der::SEQUENCE)?;
                let mut item = der::Reader::new(item);
                let inner = item.expect(der::SEQUENCE)?;
                let mut inner = der::Reader::new(inner);
                let token = inner.expect(der::context(0))?;
                let mut token = der::Reader::new(token);
                request.nego_token = Some(token.expect(der::OCTET_STRING)?.to_vec());
            }
            tag if tag == der::context(3) => {
                let mut wrapped = der::Reader::new(content);
                request.pub_key_auth = Some(wrapped.expect(der::OCTET_STRING)?.to_vec());
            }
            tag if tag == der::context(4) => {
                let mut wrapped = der::Reader::new(content);
                request.error_code = Some(der::read_uint(wrapped.expect(der::INTEGER)?)?);
            }
            _ => {} // version, authInfo, anything newer
        }
    }
    Ok(request)
}

/// Reads one DER message (a TSRequest) off the TLS stream.
async fn read_ts_request<S>(ctx: &ScanContext, stream: &mut S) -> Result<TsRequest>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut head = [0u8; 2];
    ctx.timeout(stream.read_exact(&mut head)).await??;
    let mut message = head.to_vec();
    let content_length = if head[1] & 0x80 == 0 {
        head[1] as usize
    } else {
        let count = (head[1] & 0x7f) as usize;
        if count == 0 || count > 4 {
            return Err(Error::protocol("unsupported TSRequest length"));
        }
        let mut long = vec![0u8; count];
        ctx.timeout(stream.read_exact(&mut long)).await??;
        message.extend_from_slice(&long);
        long.iter().fold(0usize, |acc, b| (acc << 8) | *b as usize)
    };
    if content_length > 1 << 16 {
        return Err(Error::protocol("implausible TSRequest length"));
    }
    let mut content = vec![0u8; content_length];
    ctx.timeout(stream.read_exact(&mut content)).await??;
    message.extend_from_slice(&content);
    parse_ts_request(&message)
}

/// Pulls the raw public key (the content of the SubjectPublicKeyInfo BIT
/// STRING) out of a DER certificate; that is the value CredSSP seals.
fn public_key_from_cert(cert: &[u8]) -> Result<Vec<u8>> {
    let mut outer = der::Reader::new(cert);
    let certificate = outer.expect(der::SEQUENCE)?;
    let mut certificate = der::Reader::new(certificate);
    let tbs = certificate.expect(der::SEQUENCE)?;
    let mut tbs = der::Reader::new(tbs);
    if tbs.peek_tag() == Some(der::context(0)) {
        tbs.read_tlv()?; // version
    }
    tbs.expect(der::INTEGER)?; // serial
    for _ in 0..4 {
        tbs.expect(der::SEQUENCE)?; // sig alg, issuer, validity, subject
    }
    let spki = tbs.expect(der::SEQUENCE)?;
    let mut spki = der::Reader::new(spki);
    spki.expect(der::SEQUENCE)?; // algorithm
    let bits = spki.expect(0x03)?; // subjectPublicKey
    match bits.split_first() {
        // First octet counts unused bits; zero for any real key.
        Some((0, key)) if !key.is_empty() => Ok(key.to_vec()),
        _ => Err(Error::protocol("malformed subjectPublicKey")),
    }
}

//! SNMP community-string probe.
//!
//! Sends a single SNMPv2c GetRequest for sysDescr over UDP and treats any
//! well-formed, error-free response as proof the community string is accepted.
//! UDP gives us nothing to distinguish a wrong community from packet loss, so
//! silence is reported as a clean negative rather than a transport failure.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::net::UdpSocket;

use super::{der, Cracker, Verdict};
use crate::{
    auth::{Auth, AuthMode},
    context::ScanContext,
    error::{Error, Result},
};

/// SNMP version field value for v2c.
const VERSION_2C: u32 = 1;
/// Context tag of a GetRequest PDU.
const GET_REQUEST: u8 = 0xa0;
/// Context tag of a GetResponse PDU.
const GET_RESPONSE: u8 = 0xa2;
/// sysDescr.0, the one OID everything answers.
const SYS_DESCR: &[u8] = &[0x2b, 0x06, 0x01, 0x02, 0x01, 0x01, 0x01, 0x00];
/// ASN.1 NULL, the placeholder value in a request varbind.
const NULL: &[u8] = &[0x05, 0x00];

/// How long to wait for a datagram before concluding the community is wrong.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Probes SNMP v2c; the candidate "password" is the community string.
#[derive(Debug, Default)]
pub struct SnmpCracker;

#[async_trait]
impl Cracker for SnmpCracker {
    fn name(&self) -> &'static str {
        "snmp"
    }

    fn mode(&self) -> AuthMode {
        AuthMode::OnlyPass
    }

    async fn check(&self, ctx: &ScanContext, host: &str, port: u16, auth: &Auth) -> Verdict {
        match get_sys_descr(ctx, host, port, auth.password_or_empty()).await {
            Ok(true) => Verdict::Hit,
            Ok(false) => Verdict::Rejected,
            Err(err) => Verdict::failed(err),
        }
    }
}

async fn get_sys_descr(ctx: &ScanContext, host: &str, port: u16, community: &str) -> Result<bool> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    ctx.timeout(socket.connect((host, port))).await??;

    let request_id: u32 = rand::rng().random_range(1..=0x7fff_ffff);
    let request = encode_get_request(community, request_id);
    ctx.timeout(socket.send(&request)).await??;

    let wait = ctx.attempt(RESPONSE_TIMEOUT);
    let mut buf = [0u8; 4096];
    let received = match wait.timeout(socket.recv(&mut buf)).await {
        Ok(Ok(received)) => received,
        // ICMP port-unreachable surfaces as a recv error on a connected socket.
        Ok(Err(err)) => return Err(err.into()),
        Err(err) if err.is_canceled() => return Err(err),
        // No answer inside the window: indistinguishable from a bad community.
        Err(_) => return Ok(false),
    };
    decode_response(&buf[..received], request_id)
}

fn encode_get_request(community: &str, request_id: u32) -> Vec<u8> {
    let varbind = der::tlv(
        der::SEQUENCE,
        &[der::tlv(der::OID, SYS_DESCR), NULL.to_vec()].concat(),
    );
    let varbind_list = der::tlv(der::SEQUENCE, &varbind);

    let pdu = der::tlv(
        GET_REQUEST,
        &[
            der::uint(request_id),
            der::uint(0), // error-status
            der::uint(0), // error-index
            varbind_list,
        ]
        .concat(),
    );

    der::tlv(
        der::SEQUENCE,
        &[
            der::uint(VERSION_2C),
            der::tlv(der::OCTET_STRING, community.as_bytes()),
            pdu,
        ]
        .concat(),
    )
}

/// Returns whether the datagram is an error-free GetResponse with a non-empty
/// value for our request.
fn decode_response(datagram: &[u8], request_id: u32) -> Result<bool> {
    let mut outer = der::Reader::new(datagram);
    let message = outer.expect(der::SEQUENCE)?;

    let mut message = der::Reader::new(message);
    message.expect(der::INTEGER)?; // version
    message.expect(der::OCTET_STRING)?; // community echo
    let pdu = message.expect(GET_RESPONSE)?;

    let mut pdu = der::Reader::new(pdu);
    let echoed_id = der::read_uint(pdu.expect(der::INTEGER)?)?;
    if echoed_id != request_id {
        return Err(Error::protocol("response for a different request"));
    }
    let error_status = der::read_uint(pdu.expect(der::INTEGER)?)?;
    pdu.expect(der::INTEGER)?; // error-index
    if error_status != 0 {
        return Ok(false);
    }

    let varbind_list = pdu.expect(der::SEQUENCE)?;
    let mut varbind_list = der::Reader::new(varbind_list);
    let varbind = varbind_list.expect(der::SEQUENCE)?;
    let mut varbind = der::Reader::new(varbind);
    varbind.expect(der::OID)?;
    let (value_tag, value) = varbind.read_tlv()?;
    // noSuchObject/noSuchInstance/endOfMibView are context tags 0x80..0x82.
    Ok(value_tag < 0x80 && value_tag != 0x05 && !value.is_empty())
}

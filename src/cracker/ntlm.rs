//! NTLM (NTLMv2) message building and session crypto, shared by the SMB and
//! RDP probes.
//!
//! Only the client side of the three-message exchange is implemented, with
//! extended session security. Key derivation follows \[MS-NLMP\]; the hashes
//! come from the same RustCrypto family the rest of the crate already uses.

use hmac::{Hmac, Mac};
use md4::Md4;
use md5::{Digest, Md5};

use crate::error::{Error, Result};

const SIGNATURE: &[u8; 8] = b"NTLMSSP\0";

const MESSAGE_NEGOTIATE: u32 = 1;
const MESSAGE_CHALLENGE: u32 = 2;
const MESSAGE_AUTHENTICATE: u32 = 3;

const NEGOTIATE_UNICODE: u32 = 0x0000_0001;
const REQUEST_TARGET: u32 = 0x0000_0004;
const NEGOTIATE_SIGN: u32 = 0x0000_0010;
const NEGOTIATE_SEAL: u32 = 0x0000_0020;
const NEGOTIATE_NTLM: u32 = 0x0000_0200;
const NEGOTIATE_ALWAYS_SIGN: u32 = 0x0000_8000;
const NEGOTIATE_EXTENDED_SESSION_SECURITY: u32 = 0x0008_0000;
const NEGOTIATE_128: u32 = 0x2000_0000;
const NEGOTIATE_KEY_EXCHANGE: u32 = 0x4000_0000;
const NEGOTIATE_56: u32 = 0x8000_0000;

/// AvId for the server timestamp inside the challenge's target info.
const AV_TIMESTAMP: u16 = 0x0007;
const AV_EOL: u16 = 0x0000;

/// Seconds between the Windows epoch (1601) and the Unix epoch (1970).
const FILETIME_UNIX_OFFSET_SECS: u64 = 11_644_473_600;

type HmacMd5 = Hmac<Md5>;

fn base_flags(seal: bool) -> u32 {
    let mut flags = NEGOTIATE_UNICODE
        | REQUEST_TARGET
        | NEGOTIATE_NTLM
        | NEGOTIATE_ALWAYS_SIGN
        | NEGOTIATE_EXTENDED_SESSION_SECURITY
        | NEGOTIATE_128
        | NEGOTIATE_56;
    if seal {
        flags |= NEGOTIATE_SIGN | NEGOTIATE_SEAL | NEGOTIATE_KEY_EXCHANGE;
    }
    flags
}

/// Builds the NEGOTIATE (type 1) message. `seal` requests the signing and
/// sealing capabilities CredSSP needs; plain SMB authentication leaves it off.
pub(crate) fn negotiate_message(seal: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(32);
    out.extend_from_slice(SIGNATURE);
    out.extend_from_slice(&MESSAGE_NEGOTIATE.to_le_bytes());
    out.extend_from_slice(&base_flags(seal).to_le_bytes());
    // Empty domain and workstation fields, offsets pointing past the header.
    for _ in 0..2 {
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&32u32.to_le_bytes());
    }
    out
}

/// The fields of a CHALLENGE (type 2) message the client needs.
#[derive(Debug)]
pub(crate) struct Challenge {
    pub(crate) server_challenge: [u8; 8],
    pub(crate) target_info: Vec<u8>,
    /// Server timestamp from the target info, when it advertises one.
    pub(crate) timestamp: Option<u64>,
}

/// Parses a CHALLENGE message.
pub(crate) fn parse_challenge(buf: &[u8]) -> Result<Challenge> {
    if buf.len() < 32 || &buf[..8] != SIGNATURE {
        return Err(Error::protocol("malformed NTLM challenge"));
    }
    let message_type = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
    if message_type != MESSAGE_CHALLENGE {
        return Err(Error::protocol("unexpected NTLM message type"));
    }
    let mut server_challenge = [0u8; 8];
    server_challenge.copy_from_slice(&buf[24..32]);

    let target_info = if buf.len() >= 48 {
        let len = u16::from_le_bytes([buf[40], buf[41]]) as usize;
        let offset = u32::from_le_bytes([buf[44], buf[45], buf[46], buf[47]]) as usize;
        match offset.checked_add(len) {
            Some(end) if end <= buf.len() => buf[offset..end].to_vec(),
            _ => return Err(Error::protocol("NTLM target info overruns message")),
        }
    } else {
        Vec::new()
    };

    let timestamp = find_av_timestamp(&target_info);
    Ok(Challenge {
        server_challenge,
        target_info,
        timestamp,
    })
}

fn find_av_timestamp(target_info: &[u8]) -> Option<u64> {
    let mut pos = 0;
    while target_info.len() >= pos + 4 {
        let id = u16::from_le_bytes([target_info[pos], target_info[pos + 1]]);
        let len = u16::from_le_bytes([target_info[pos + 2], target_info[pos + 3]]) as usize;
        pos += 4;
        if id == AV_EOL {
            break;
        }
        let value = target_info.get(pos..pos + len)?;
        if id == AV_TIMESTAMP && len == 8 {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(value);
            return Some(u64::from_le_bytes(raw));
        }
        pos += len;
    }
    None
}

/// An AUTHENTICATE (type 3) message plus the session key it established.
#[derive(Debug)]
pub(crate) struct Authenticate {
    pub(crate) message: Vec<u8>,
    pub(crate) session_key: [u8; 16],
}

/// Credential material for the AUTHENTICATE message.
#[derive(Debug)]
pub(crate) struct Identity<'a> {
    pub(crate) domain: &'a str,
    pub(crate) username: &'a str,
    pub(crate) password: &'a str,
    pub(crate) workstation: &'a str,
}

/// Builds the AUTHENTICATE (type 3) message for `challenge`.
///
/// `client_challenge` and `exported_session_key` are supplied by the caller so
/// this stays deterministic under test; `exported_session_key` enables key
/// exchange and must be set when the session key will seal traffic (CredSSP).
pub(crate) fn authenticate_message(
    challenge: &Challenge,
    identity: &Identity<'_>,
    client_challenge: [u8; 8],
    timestamp: u64,
    exported_session_key: Option<[u8; 16]>,
) -> Result<Authenticate> {
    let ntowf = ntowf_v2(identity.password, identity.username, identity.domain)?;
    let (proof, nt_response) = ntlmv2_response(
        &ntowf,
        &challenge.server_challenge,
        timestamp,
        &client_challenge,
        &challenge.target_info,
    )?;
    let session_base_key = hmac_md5(&ntowf, &proof)?;

    let lm_response = [0u8; 24];
    let domain = utf16le(identity.domain);
    let username = utf16le(identity.username);
    let workstation = utf16le(identity.workstation);
    let (encrypted_key, session_key) = match exported_session_key {
        Some(exported) => {
            let encrypted = Rc4::new(&session_base_key).process(&exported);
            (encrypted, exported)
        }
        None => (Vec::new(), session_base_key),
    };

    let mut flags = base_flags(exported_session_key.is_some());
    if exported_session_key.is_none() {
        flags &= !NEGOTIATE_KEY_EXCHANGE;
    }

    // Fixed part is 64 bytes; payload fields follow in declaration order.
    let mut message = Vec::with_capacity(64 + 256);
    message.extend_from_slice(SIGNATURE);
    message.extend_from_slice(&MESSAGE_AUTHENTICATE.to_le_bytes());
    let mut offset = 64u32;
    let mut field = |message: &mut Vec<u8>, len: usize| {
        message.extend_from_slice(&(len as u16).to_le_bytes());
        message.extend_from_slice(&(len as u16).to_le_bytes());
        message.extend_from_slice(&offset.to_le_bytes());
        offset += len as u32;
    };
    // Payload order on the wire: domain, user, workstation, LM, NT, key.
    // Each descriptor is 8 bytes: len, maxlen, offset.
    let mut header = Vec::with_capacity(48);
    field(&mut header, domain.len());
    field(&mut header, username.len());
    field(&mut header, workstation.len());
    field(&mut header, lm_response.len());
    field(&mut header, nt_response.len());
    field(&mut header, encrypted_key.len());

    // Field descriptors appear in a different order than the payload:
    // LM and NT responses come first in the fixed part.
    message.extend_from_slice(&header[24..40]); // LM, NT
    message.extend_from_slice(&header[..24]); // domain, user, workstation
    message.extend_from_slice(&header[40..48]); // session key
    message.extend_from_slice(&flags.to_le_bytes());
    message.extend_from_slice(&domain);
    message.extend_from_slice(&username);
    message.extend_from_slice(&workstation);
    message.extend_from_slice(&lm_response);
    message.extend_from_slice(&nt_response);
    message.extend_from_slice(&encrypted_key);

    Ok(Authenticate {
        message,
        session_key,
    })
}

/// NTOWFv2: HMAC-MD5 of the MD4 password hash over the uppercased username
/// concatenated with the domain, all UTF-16LE.
fn ntowf_v2(password: &str, username: &str, domain: &str) -> Result<[u8; 16]> {
    let mut md4 = Md4::new();
    md4.update(utf16le(password));
    let password_hash = md4.finalize();

    let mut target = username.to_uppercase();
    target.push_str(domain);
    hmac_md5(&password_hash, &utf16le(&target))
}

/// Computes the NTLMv2 proof and full NT response for a challenge.
fn ntlmv2_response(
    ntowf: &[u8; 16],
    server_challenge: &[u8; 8],
    timestamp: u64,
    client_challenge: &[u8; 8],
    target_info: &[u8],
) -> Result<([u8; 16], Vec<u8>)> {
    let mut temp = Vec::with_capacity(32 + target_info.len());
    temp.push(0x01); // response version
    temp.push(0x01); // highest response version
    temp.extend_from_slice(&[0u8; 6]);
    temp.extend_from_slice(&timestamp.to_le_bytes());
    temp.extend_from_slice(client_challenge);
    temp.extend_from_slice(&[0u8; 4]);
    temp.extend_from_slice(target_info);
    temp.extend_from_slice(&[0u8; 4]);

    let mut to_mac = Vec::with_capacity(8 + temp.len());
    to_mac.extend_from_slice(server_challenge);
    to_mac.extend_from_slice(&temp);
    let proof = hmac_md5(ntowf, &to_mac)?;

    let mut response = Vec::with_capacity(16 + temp.len());
    response.extend_from_slice(&proof);
    response.extend_from_slice(&temp);
    Ok((proof, response))
}

fn hmac_md5(key: &[u8], input: &[u8]) -> Result<[u8; 16]> {
    let mut mac = HmacMd5::new_from_slice(key)
        .map_err(|_| Error::protocol("invalid HMAC key length"))?;
    mac.update(input);
    let mut out = [0u8; 16];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

fn utf16le(value: &str) -> Vec<u8> {
    value
        .encode_utf16()
        .flat_map(|unit| unit.to_le_bytes())
        .collect()
}

/// The current time as a Windows FILETIME, for challenges that carry no
/// server timestamp.
pub(crate) fn filetime_now() -> u64 {
    match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        Ok(since_epoch) => {
            (since_epoch.as_secs() + FILETIME_UNIX_OFFSET_SECS) * 10_000_000
                + u64::from(since_epoch.subsec_nanos() / 100)
        }
        Err(_) => FILETIME_UNIX_OFFSET_SECS * 10_000_000,
    }
}

/// Client-to-server sealing state for messages protected with the established
/// session key (CredSSP's pubKeyAuth).
pub(crate) struct SealingContext {
    seal: Rc4,
    sign_key: [u8; 16],
    sequence: u32,
}

impl SealingContext {
    pub(crate) fn client(session_key: &[u8; 16]) -> Result<Self> {
        Ok(Self {
            seal: Rc4::new(&derive_key(
                session_key,
                b"session key to client-to-server sealing key magic constant\0",
            )),
            sign_key: derive_key(
                session_key,
                b"session key to client-to-server signing key magic constant\0",
            ),
            sequence: 0,
        })
    }

    /// Seals `data`, returning the 16-byte signature followed by the
    /// ciphertext. The RC4 stream is shared between payload and checksum, in
    /// that order.
    pub(crate) fn seal(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let sealed = self.seal.process(data);

        let mut to_sign = Vec::with_capacity(4 + data.len());
        to_sign.extend_from_slice(&self.sequence.to_le_bytes());
        to_sign.extend_from_slice(data);
        let checksum = hmac_md5(&self.sign_key, &to_sign)?;
        let checksum = self.seal.process(&checksum[..8]);

        let mut out = Vec::with_capacity(16 + sealed.len());
        out.extend_from_slice(&1u32.to_le_bytes()); // signature version
        out.extend_from_slice(&checksum);
        out.extend_from_slice(&self.sequence.to_le_bytes());
        out.extend_from_slice(&sealed);
        self.sequence += 1;
        Ok(out)
    }
}

fn derive_key(session_key: &[u8; 16], magic: &[u8]) -> [u8; 16] {
    let mut md5 = Md5::new();
    md5.update(session_key);
    md5.update(magic);
    let mut out = [0u8; 16];
    out.copy_from_slice(&md5.finalize());
    out
}

/// RC4 stream cipher. Hand-rolled: the handful of bytes NTLM runs through it
/// does not justify a dependency, and no crate in our stack provides it.
pub(crate) struct Rc4 {
    s: [u8; 256],
    i: u8,
    j: u8,
}

impl Rc4 {
    pub(crate) fn new(key: &[u8]) -> Self {
        let mut s = [0u8; 256];
        for (index, slot) in s.iter_mut().enumerate() {
            *slot = index as u8;
        }
        let mut j = 0u8;
        for i in 0..256 {
            j = j
                .wrapping_add(s[i])
                .wrapping_add(key[i % key.len()]);
            s.swap(i, j as usize);
        }
        Self { s, i: 0, j: 0 }
    }

    pub(crate) fn process(&mut self, data: &[u8]) -> Vec<u8> {
        data.iter()
            .map(|byte| {
                self.i = self.i.wrapping_add(1);
                self.j = self.j.wrapping_add(self.s[self.i as usize]);
                self.s.swap(self.i as usize, self.j as usize);
                let k = self.s
                    [(self.s[self.i as usize].wrapping_add(self.s[self.j as usize])) as usize];
                byte ^ k
            })
            .collect()
    }
}

//! Minimal DER/BER helpers shared by the SPNEGO, CredSSP and SNMP codecs.
//!
//! Only what those encoders need: definite-length TLVs, small integers, and a
//! forgiving reader. This is not a general ASN.1 implementation.

use crate::error::{Error, Result};

/// Universal SEQUENCE tag.
pub(crate) const SEQUENCE: u8 = 0x30;
/// Universal OCTET STRING tag.
pub(crate) const OCTET_STRING: u8 = 0x04;
/// Universal INTEGER tag.
pub(crate) const INTEGER: u8 = 0x02;
/// Universal OBJECT IDENTIFIER tag.
pub(crate) const OID: u8 = 0x06;

/// Context-specific constructed tag `[n]`.
pub(crate) const fn context(n: u8) -> u8 {
    0xa0 | n
}

/// Encodes one TLV with definite length.
pub(crate) fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 4);
    out.push(tag);
    write_len(&mut out, content.len());
    out.extend_from_slice(content);
    out
}

fn write_len(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes = len.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        out.push(0x80 | (bytes.len() - skip) as u8);
        out.extend_from_slice(&bytes[skip..]);
    }
}

/// Encodes a non-negative INTEGER, minimal two's complement.
pub(crate) fn uint(value: u32) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes
        .iter()
        .take_while(|b| **b == 0)
        .count()
        .min(bytes.len() - 1);
    let mut content = bytes[skip..].to_vec();
    if content[0] & 0x80 != 0 {
        content.insert(0, 0);
    }
    tlv(INTEGER, &content)
}

/// Reads the integer value out of an INTEGER's content bytes.
pub(crate) fn read_uint(content: &[u8]) -> Result<u32> {
    if content.is_empty() || content.len() > 5 || (content.len() == 5 && content[0] != 0) {
        return Err(Error::protocol("integer out of range"));
    }
    let mut value: u64 = 0;
    for byte in content {
        value = (value << 8) | u64::from(*byte);
    }
    Ok(value as u32)
}

/// Sequential TLV reader over a byte slice.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    /// Tag of the next TLV without consuming it.
    pub(crate) fn peek_tag(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    /// Reads the next TLV, returning its tag and content.
    pub(crate) fn read_tlv(&mut self) -> Result<(u8, &'a [u8])> {
        let tag = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| Error::protocol("truncated encoding"))?;
        self.pos += 1;
        let len = self.read_len()?;
        let start = self.pos;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| Error::protocol("length overruns buffer"))?;
        self.pos = end;
        Ok((tag, &self.buf[start..end]))
    }

    /// Reads the next TLV and requires its tag.
    pub(crate) fn expect(&mut self, tag: u8) -> Result<&'a [u8]> {
        let (found, content) = self.read_tlv()?;
        if found == tag {
            Ok(content)
        } else {
            Err(Error::protocol(format!(
                "expected tag {tag:#04x}, found {found:#04x}"
            )))
        }
    }

    fn read_len(&mut self) -> Result<usize> {
        let first = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| Error::protocol("truncated length"))?;
        self.pos += 1;
        if first & 0x80 == 0 {
            return Ok(first as usize);
        }
        let count = (first & 0x7f) as usize;
        if count == 0 || count > 4 {
            return Err(Error::protocol("unsupported length form"));
        }
        let mut len = 0usize;
        for _ in 0..count {
            let byte = *self
                .buf
                .get(self.pos)
                .ok_or_else(|| Error::protocol("truncated length"))?;
            self.pos += 1;
            len = (len << 8) | byte as usize;
        }
        Ok(len)
    }
}

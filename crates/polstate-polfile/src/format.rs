//! On-disk framing.
//!
//! ```text
//! u32 signature  "PReg" (0x67655250, little-endian)
//! u32 version    1
//! entries:
//!   '[' key\0 ';' value\0 ';' type:u32 ';' size:u32 ';' data[size] ']'
//! ```
//! Separators are UTF-16 code units; strings are NUL-terminated UTF-16LE.

use crate::error::PolFileError;

pub const SIGNATURE: u32 = 0x6765_5250;
pub const VERSION: u32 = 1;

const OPEN: u16 = b'[' as u16;
const SEP: u16 = b';' as u16;
const CLOSE: u16 = b']' as u16;

/// One framed entry as it appears on disk, original casing intact.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct RawEntry {
    pub key: String,
    pub value: String,
    pub kind: u32,
    pub data: Vec<u8>,
}

pub(crate) fn parse(bytes: &[u8]) -> Result<Vec<RawEntry>, PolFileError> {
    let mut cur = Cursor { bytes, pos: 0 };

    let signature = cur.u32()?;
    if signature != SIGNATURE {
        return Err(PolFileError::BadSignature(signature));
    }
    let version = cur.u32()?;
    if version != VERSION {
        return Err(PolFileError::UnsupportedVersion(version));
    }

    let mut out = Vec::new();
    while !cur.at_end() {
        let start = cur.pos;
        cur.expect(OPEN, "expected '['")?;
        let key = cur.sz()?;
        cur.expect(SEP, "expected ';' after key")?;
        let value = cur.sz()?;
        cur.expect(SEP, "expected ';' after value name")?;
        let kind = cur.u32()?;
        cur.expect(SEP, "expected ';' after type")?;
        let size = cur.u32()? as usize;
        cur.expect(SEP, "expected ';' after size")?;
        let data = cur.take(size)?.to_vec();
        cur.expect(CLOSE, "expected ']'")
            .map_err(|e| relocate(e, start))?;
        out.push(RawEntry {
            key,
            value,
            kind,
            data,
        });
    }
    Ok(out)
}

pub(crate) fn write_header(out: &mut Vec<u8>) {
    out.extend_from_slice(&SIGNATURE.to_le_bytes());
    out.extend_from_slice(&VERSION.to_le_bytes());
}

pub(crate) fn write_entry(out: &mut Vec<u8>, key: &str, value: &str, kind: u32, data: &[u8]) {
    out.extend_from_slice(&OPEN.to_le_bytes());
    write_sz(out, key);
    out.extend_from_slice(&SEP.to_le_bytes());
    write_sz(out, value);
    out.extend_from_slice(&SEP.to_le_bytes());
    out.extend_from_slice(&kind.to_le_bytes());
    out.extend_from_slice(&SEP.to_le_bytes());
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(&SEP.to_le_bytes());
    out.extend_from_slice(data);
    out.extend_from_slice(&CLOSE.to_le_bytes());
}

fn write_sz(out: &mut Vec<u8>, text: &str) {
    for unit in text.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out.extend_from_slice(&0u16.to_le_bytes());
}

// Report a missing ']' against the entry start so the offset names the broken entry.
fn relocate(err: PolFileError, start: usize) -> PolFileError {
    match err {
        PolFileError::MalformedEntry { reason, .. } => PolFileError::MalformedEntry {
            offset: start,
            reason,
        },
        other => other,
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], PolFileError> {
        let remaining = self.bytes.len() - self.pos;
        if remaining < n {
            return Err(PolFileError::Truncated {
                offset: self.pos,
                needed: n - remaining,
            });
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u16(&mut self) -> Result<u16, PolFileError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, PolFileError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn expect(&mut self, unit: u16, reason: &str) -> Result<(), PolFileError> {
        let offset = self.pos;
        let got = self.u16()?;
        if got != unit {
            return Err(PolFileError::MalformedEntry {
                offset,
                reason: format!("{reason}, found {got:#06x}"),
            });
        }
        Ok(())
    }

    fn sz(&mut self) -> Result<String, PolFileError> {
        let offset = self.pos;
        let mut units = Vec::new();
        loop {
            let unit = self.u16()?;
            if unit == 0 {
                break;
            }
            units.push(unit);
        }
        String::from_utf16(&units).map_err(|_| PolFileError::MalformedEntry {
            offset,
            reason: "string is not valid UTF-16".to_string(),
        })
    }
}

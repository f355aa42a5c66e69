//! Minimal OSC 1.0 message codec
//!
//! Only what the relay needs: an address pattern and a list of int32
//! arguments. Layout:
//!
//! ```text
//! [address\0 pad4][",iii"\0 pad4][i32 BE]...
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Errors raised while decoding an OSC datagram
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OscError {
    #[error("unterminated OSC string at offset {0}")]
    UnterminatedString(usize),

    #[error("OSC string at offset {0} is not valid UTF-8")]
    InvalidUtf8(usize),

    #[error("type tag string must start with ',' (got {0:?})")]
    MissingTypeTag(String),

    #[error("unsupported OSC argument type '{0}'")]
    UnsupportedType(char),

    #[error("datagram truncated: need {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },
}

/// OSC message with int32 arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OscMessage {
    pub address: String,
    pub args: Vec<i32>,
}

impl OscMessage {
    pub fn new(address: impl Into<String>, args: Vec<i32>) -> Self {
        Self {
            address: address.into(),
            args,
        }
    }

    /// Serialize to the OSC binary layout
    pub fn encode(&self) -> Bytes {
        let type_tags: String = std::iter::once(',')
            .chain(std::iter::repeat('i').take(self.args.len()))
            .collect();

        let mut buf = BytesMut::with_capacity(
            padded_len(self.address.len()) + padded_len(type_tags.len()) + 4 * self.args.len(),
        );
        put_padded_str(&mut buf, &self.address);
        put_padded_str(&mut buf, &type_tags);
        for arg in &self.args {
            buf.put_i32(*arg);
        }
        buf.freeze()
    }

    /// Parse an OSC message carrying only int32 arguments
    pub fn decode(data: &[u8]) -> Result<Self, OscError> {
        let (address, mut offset) = read_padded_str(data, 0)?;
        let (type_tags, next) = read_padded_str(data, offset)?;
        offset = next;

        let tags = type_tags
            .strip_prefix(',')
            .ok_or_else(|| OscError::MissingTypeTag(type_tags.clone()))?;

        let mut args = Vec::with_capacity(tags.len());
        for tag in tags.chars() {
            if tag != 'i' {
                return Err(OscError::UnsupportedType(tag));
            }
            let end = offset + 4;
            let bytes = data.get(offset..end).ok_or(OscError::Truncated {
                needed: end,
                available: data.len(),
            })?;
            args.push(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]));
            offset = end;
        }

        Ok(Self { address, args })
    }
}

/// Length of a string plus its null terminator, rounded up to 4 bytes
fn padded_len(len: usize) -> usize {
    (len + 4) & !3
}

fn put_padded_str(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    let padding = padded_len(s.len()) - s.len();
    buf.put_bytes(0, padding);
}

fn read_padded_str(data: &[u8], offset: usize) -> Result<(String, usize), OscError> {
    let rest = data.get(offset..).unwrap_or_default();
    let nul = rest
        .iter()
        .position(|&b| b == 0)
        .ok_or(OscError::UnterminatedString(offset))?;
    let s = std::str::from_utf8(&rest[..nul])
        .map_err(|_| OscError::InvalidUtf8(offset))?
        .to_string();
    let next = offset + padded_len(nul);
    if next > data.len() {
        return Err(OscError::Truncated {
            needed: next,
            available: data.len(),
        });
    }
    Ok((s, next))
}

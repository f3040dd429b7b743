use crate::error::{ProtocolError, Result};
use crate::sequence::SequenceNumber;

pub const SIGNATURE: &[u8; 2] = b"SL";
pub const INFO_SIGNATURE: &[u8; 6] = b"SLINFO";
pub const HEADER_LEN: usize = 8;

/// The decoded 8-byte SeedLink frame header.
///
/// A header is either a data frame carrying a 6-hex-digit sequence number
/// (`SLxxxxxx`) or an INFO frame (`SLINFO` + padding) whose final byte
/// distinguishes a continuation (`' '`) from the terminating frame (`'*'`).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameHeader {
    Data { sequence: SequenceNumber },
    Info { terminated: bool },
}

impl FrameHeader {
    pub fn parse(header: &[u8; HEADER_LEN]) -> Result<Self> {
        if &header[0..2] != SIGNATURE.as_slice() {
            return Err(ProtocolError::InvalidSignature([header[0], header[1]]));
        }
        if &header[0..6] == INFO_SIGNATURE.as_slice() {
            return Ok(Self::Info {
                terminated: header[7] == b'*',
            });
        }
        let hex = std::str::from_utf8(&header[2..8]).map_err(|_| {
            ProtocolError::InvalidSequence("sequence bytes are not ASCII".into())
        })?;
        let sequence = SequenceNumber::from_hex(hex)?;
        Ok(Self::Data { sequence })
    }

    /// Encode back to the 8-byte wire form. INFO headers use a space pad.
    pub fn to_wire(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        match self {
            Self::Data { sequence } => {
                out[0..2].copy_from_slice(SIGNATURE);
                out[2..8].copy_from_slice(sequence.to_hex().as_bytes());
            }
            Self::Info { terminated } => {
                out[0..6].copy_from_slice(INFO_SIGNATURE);
                out[6] = b' ';
                out[7] = if *terminated { b'*' } else { b' ' };
            }
        }
        out
    }
}

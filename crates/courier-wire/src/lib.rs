// Wire format for framing JSON control envelopes on the network.
//
// On the wire a frame is a fixed 12-byte preamble followed by the envelope
// bytes:
//
//   magic (u32) | version (u16) | flags (u16) | payload length (u32)
//
// all big-endian. Header assembly and parsing live in `encode_header` /
// `parse_header`; both the buffer-based `Frame` methods and the async codec
// go through that one pair, so there is exactly one place that knows the
// layout.
use bytes::Bytes;

mod codec;
mod envelope;

pub use codec::{read_frame, write_frame, write_request, write_response};
pub use envelope::{ErrorCode, ErrorDetail, Request, Response};

pub const MAGIC: u32 = 0x43525731;
pub const VERSION: u16 = 1;
pub const HEADER_LEN: usize = 12;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("frame header is truncated")]
    TruncatedHeader,
    #[error("bad magic 0x{0:08x}")]
    BadMagic(u32),
    #[error("protocol version {0} is not supported")]
    VersionMismatch(u16),
    #[error("payload of {got} bytes exceeds limit of {limit}")]
    PayloadTooLarge { got: usize, limit: usize },
    #[error("payload ends before the length given in the header")]
    TruncatedPayload,
    #[error("envelope: {0}")]
    Envelope(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// The payload length must fit the u32 length field.
const MAX_WIRE_PAYLOAD: usize = u32::MAX as usize;

pub(crate) fn encode_header(flags: u16, length: u32) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[0..4].copy_from_slice(&MAGIC.to_be_bytes());
    header[4..6].copy_from_slice(&VERSION.to_be_bytes());
    header[6..8].copy_from_slice(&flags.to_be_bytes());
    header[8..12].copy_from_slice(&length.to_be_bytes());
    header
}

/// Parse a frame preamble, returning the flags and the declared payload
/// length. Rejects short input and anything not speaking our protocol.
pub(crate) fn parse_header(bytes: &[u8]) -> Result<(u16, usize)> {
    if bytes.len() < HEADER_LEN {
        return Err(Error::TruncatedHeader);
    }
    let magic = u32::from_be_bytes(bytes[0..4].try_into().expect("4-byte field"));
    let version = u16::from_be_bytes(bytes[4..6].try_into().expect("2-byte field"));
    let flags = u16::from_be_bytes(bytes[6..8].try_into().expect("2-byte field"));
    let length = u32::from_be_bytes(bytes[8..12].try_into().expect("4-byte field"));
    if magic != MAGIC {
        return Err(Error::BadMagic(magic));
    }
    if version != VERSION {
        return Err(Error::VersionMismatch(version));
    }
    Ok((flags, length as usize))
}

/// One frame: flags plus the envelope bytes. The preamble is derived at
/// encode time rather than stored.
///
/// ```
/// use bytes::Bytes;
/// use courier_wire::{Frame, HEADER_LEN};
///
/// let frame = Frame::new(0, Bytes::from_static(br#"{"type":"ping"}"#)).expect("frame");
/// let bytes = frame.encode();
/// assert_eq!(bytes.len(), HEADER_LEN + 15);
/// assert_eq!(Frame::decode(bytes).expect("decode"), frame);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub flags: u16,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(flags: u16, payload: Bytes) -> Result<Self> {
        if payload.len() > MAX_WIRE_PAYLOAD {
            return Err(Error::PayloadTooLarge {
                got: payload.len(),
                limit: MAX_WIRE_PAYLOAD,
            });
        }
        Ok(Self { flags, payload })
    }

    pub fn encode(&self) -> Bytes {
        let header = encode_header(self.flags, self.payload.len() as u32);
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&header);
        buf.extend_from_slice(&self.payload);
        Bytes::from(buf)
    }

    pub fn decode(input: Bytes) -> Result<Self> {
        let (flags, length) = parse_header(&input)?;
        if input.len() - HEADER_LEN < length {
            return Err(Error::TruncatedPayload);
        }
        Ok(Self {
            flags,
            payload: input.slice(HEADER_LEN..HEADER_LEN + length),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded_ping() -> Vec<u8> {
        Frame::new(0x3, Bytes::from_static(br#"{"type":"ping"}"#))
            .expect("frame")
            .encode()
            .to_vec()
    }

    #[test]
    fn encode_decode_preserves_flags_and_payload() {
        let frame = Frame::new(0x3, Bytes::from_static(br#"{"type":"ping"}"#)).expect("frame");
        let decoded = Frame::decode(frame.encode()).expect("decode");
        assert_eq!(decoded, frame);
        assert_eq!(decoded.flags, 0x3);
    }

    #[test]
    fn parse_header_rejects_short_input() {
        // Direct coverage for the truncation guard, independent of
        // Frame::decode.
        for len in 0..HEADER_LEN {
            let err = parse_header(&vec![0u8; len]).expect_err("short header");
            assert!(matches!(err, Error::TruncatedHeader), "len {len}");
        }
    }

    #[test]
    fn corrupted_magic_is_reported_with_its_value() {
        let mut bytes = encoded_ping();
        bytes[0..4].copy_from_slice(&0xDEADBEEFu32.to_be_bytes());
        let err = Frame::decode(Bytes::from(bytes)).expect_err("bad magic");
        assert!(matches!(err, Error::BadMagic(0xDEADBEEF)));
    }

    #[test]
    fn future_version_is_rejected() {
        let mut bytes = encoded_ping();
        bytes[4..6].copy_from_slice(&(VERSION + 1).to_be_bytes());
        let err = Frame::decode(Bytes::from(bytes)).expect_err("future version");
        assert!(matches!(err, Error::VersionMismatch(v) if v == VERSION + 1));
    }

    #[test]
    fn decode_needs_the_whole_payload() {
        let mut bytes = encoded_ping();
        bytes.truncate(HEADER_LEN + 2);
        let err = Frame::decode(Bytes::from(bytes)).expect_err("truncated payload");
        assert!(matches!(err, Error::TruncatedPayload));
    }

    #[test]
    fn header_round_trips_through_parse() {
        let header = encode_header(0x7, 42);
        let (flags, length) = parse_header(&header).expect("parse");
        assert_eq!(flags, 0x7);
        assert_eq!(length, 42);
    }
}

//! Raw-socket transport framing.
//!
//! WebSocket transport is handled entirely by `parity-ws` (HTTP upgrade,
//! RFC 6455 framing, sub-protocol negotiation). Raw-socket has no such
//! crate in the teacher's dependency stack, so this module implements the
//! byte-level handshake and per-message framing directly over a plain
//! stream, matching the wire format used by reference WAMP routers:
//!
//! Handshake (4 bytes each direction):
//!   `[0x7F][(max_length_exponent << 4) | serializer][0x00][0x00]`
//!
//! Frame header (4 bytes, big-endian) followed by `length` payload bytes:
//!   bits 31..24: frame type (0 = WAMP message, 1 = PING, 2 = PONG)
//!   bits 23..0:  payload length

use std::io::{Read, Write};

use crate::{Error, ErrorKind, WampResult};

const MAGIC: u8 = 0x7F;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Serializer {
    Json,
    MsgPack,
}

impl Serializer {
    fn to_nibble(self) -> u8 {
        match self {
            Serializer::Json => 1,
            Serializer::MsgPack => 2,
        }
    }

    fn from_nibble(nibble: u8) -> WampResult<Serializer> {
        match nibble {
            1 => Ok(Serializer::Json),
            2 => Ok(Serializer::MsgPack),
            n => Err(Error::new(ErrorKind::BadHandshake(format!(
                "unsupported serializer id {}",
                n
            )))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Message,
    Ping,
    Pong,
}

impl FrameType {
    fn to_byte(self) -> u8 {
        match self {
            FrameType::Message => 0,
            FrameType::Ping => 1,
            FrameType::Pong => 2,
        }
    }

    fn from_byte(byte: u8) -> WampResult<FrameType> {
        match byte {
            0 => Ok(FrameType::Message),
            1 => Ok(FrameType::Ping),
            2 => Ok(FrameType::Pong),
            n => Err(Error::new(ErrorKind::ProtocolViolation(format!(
                "unknown raw-socket frame type {}",
                n
            )))),
        }
    }
}

/// Builds the 4-byte handshake sent by either peer. `max_length_exponent`
/// advertises a maximum frame size of `2^(9 + max_length_exponent)` bytes,
/// per the raw-socket handshake's length nibble.
pub fn build_handshake(serializer: Serializer, max_length_exponent: u8) -> [u8; 4] {
    [
        MAGIC,
        (max_length_exponent << 4) | serializer.to_nibble(),
        0,
        0,
    ]
}

/// Parsed view of a peer's handshake bytes.
#[derive(Debug, Clone, Copy)]
pub struct Handshake {
    pub serializer: Serializer,
    pub max_length_exponent: u8,
}

pub fn parse_handshake(bytes: [u8; 4]) -> WampResult<Handshake> {
    if bytes[0] != MAGIC {
        return Err(Error::new(ErrorKind::BadHandshake(
            "missing raw-socket magic byte".to_string(),
        )));
    }
    if bytes[2] != 0 || bytes[3] != 0 {
        return Err(Error::new(ErrorKind::BadHandshake(
            "reserved handshake bytes must be zero".to_string(),
        )));
    }
    let max_length_exponent = bytes[1] >> 4;
    let serializer = Serializer::from_nibble(bytes[1] & 0x0F)?;
    Ok(Handshake {
        serializer,
        max_length_exponent,
    })
}

/// Performs the client side of the raw-socket handshake: send our
/// preference, read the router's reply, and confirm it echoes an
/// acceptable serializer.
pub fn client_handshake<S: Read + Write>(
    stream: &mut S,
    serializer: Serializer,
    max_length_exponent: u8,
) -> WampResult<Handshake> {
    stream.write_all(&build_handshake(serializer, max_length_exponent))?;
    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply)?;
    let handshake = parse_handshake(reply)?;
    if handshake.serializer != serializer {
        return Err(Error::new(ErrorKind::BadHandshake(
            "router replied with a different serializer than requested".to_string(),
        )));
    }
    Ok(handshake)
}

/// Performs the router side: read the client's handshake and echo it back
/// verbatim (this crate always accepts whatever serializer the client asks
/// for, as long as it is one we support).
pub fn server_handshake<S: Read + Write>(
    stream: &mut S,
    max_length_exponent: u8,
) -> WampResult<Handshake> {
    let mut request = [0u8; 4];
    stream.read_exact(&mut request)?;
    let handshake = parse_handshake(request)?;
    stream.write_all(&build_handshake(handshake.serializer, max_length_exponent))?;
    Ok(handshake)
}

/// Writes one framed message: a 4-byte big-endian header followed by the
/// payload.
pub fn write_frame<S: Write>(stream: &mut S, frame_type: FrameType, payload: &[u8]) -> WampResult<()> {
    if payload.len() > 0x00FF_FFFF {
        return Err(Error::new(ErrorKind::NumericRange));
    }
    let header = ((frame_type.to_byte() as u32) << 24) | (payload.len() as u32);
    stream.write_all(&header.to_be_bytes())?;
    stream.write_all(payload)?;
    Ok(())
}

/// Reads one framed message, returning its type and payload bytes.
pub fn read_frame<S: Read>(stream: &mut S) -> WampResult<(FrameType, Vec<u8>)> {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header)?;
    let word = u32::from_be_bytes(header);
    let frame_type = FrameType::from_byte((word >> 24) as u8)?;
    let length = (word & 0x00FF_FFFF) as usize;
    let mut payload = vec![0u8; length];
    stream.read_exact(&mut payload)?;
    Ok((frame_type, payload))
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn handshake_round_trips() {
        let bytes = build_handshake(Serializer::MsgPack, 5);
        let parsed = parse_handshake(bytes).unwrap();
        assert_eq!(parsed.serializer, Serializer::MsgPack);
        assert_eq!(parsed.max_length_exponent, 5);
    }

    #[test]
    fn rejects_bad_magic() {
        let err = parse_handshake([0x00, 0x11, 0, 0]);
        assert!(err.is_err());
    }

    #[test]
    fn frame_round_trips() {
        let mut buf = Vec::new();
        write_frame(&mut buf, FrameType::Message, b"hello").unwrap();
        let mut cursor = Cursor::new(buf);
        let (ty, payload) = read_frame(&mut cursor).unwrap();
        assert_eq!(ty, FrameType::Message);
        assert_eq!(payload, b"hello");
    }
}

//! Length-prefixed codec for IPC queue framing
//!
//! All packets are framed as:
//! ```text
//! [ 4 bytes: length (u32, big-endian) ][ N bytes: protobuf IpcPacket ]
//! ```
//!
//! This keeps packet boundaries intact over Unix stream sockets.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::Message;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use crate::IpcPacket;

/// Maximum packet size (64 KiB). Queue entries are tiny; anything larger is corruption.
pub const MAX_PACKET_SIZE: u32 = 64 * 1024;

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Packet too large: {0} bytes (max: {MAX_PACKET_SIZE})")]
    PacketTooLarge(usize),

    #[error("Invalid packet length prefix: {0}")]
    InvalidLength(u32),

    #[error("Protobuf decode error: {0}")]
    DecodeError(#[from] prost::DecodeError),

    #[error("Protobuf encode error: {0}")]
    EncodeError(#[from] prost::EncodeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Encode a packet into a length-prefixed byte buffer
pub fn encode(packet: &IpcPacket) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::new();
    encode_into(packet, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a packet directly into a provided buffer
pub fn encode_into(packet: &IpcPacket, buf: &mut BytesMut) -> Result<(), CodecError> {
    let msg_len = packet.encoded_len();

    if msg_len > MAX_PACKET_SIZE as usize {
        return Err(CodecError::PacketTooLarge(msg_len));
    }

    buf.reserve(4 + msg_len);
    buf.put_u32(msg_len as u32);
    packet.encode(buf)?;

    Ok(())
}

/// Try to decode a length-prefixed packet from a buffer
///
/// Returns:
/// - `Ok(Some(packet))` if a complete packet was decoded
/// - `Ok(None)` if more data is needed
/// - `Err(...)` if the data is invalid
pub fn decode(buf: &mut BytesMut) -> Result<Option<IpcPacket>, CodecError> {
    if buf.len() < 4 {
        return Ok(None);
    }

    // Peek at the length prefix without consuming
    let msg_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);

    if msg_len > MAX_PACKET_SIZE {
        return Err(CodecError::InvalidLength(msg_len));
    }

    let total_len = 4 + msg_len as usize;
    if buf.len() < total_len {
        buf.reserve(total_len - buf.len());
        return Ok(None);
    }

    buf.advance(4);
    let msg_bytes = buf.split_to(msg_len as usize);

    Ok(Some(IpcPacket::decode(msg_bytes)?))
}

/// `tokio_util` codec adapter used by the socket queue backend
#[derive(Debug, Default, Clone, Copy)]
pub struct IpcCodec;

impl Decoder for IpcCodec {
    type Item = IpcPacket;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        decode(src)
    }
}

impl Encoder<IpcPacket> for IpcCodec {
    type Error = CodecError;

    fn encode(&mut self, item: IpcPacket, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_into(&item, dst)
    }
}

//! Framing: turning the buffered byte region into discrete messages.
//!
//! [`FrameCodec`] is the pluggable contract a session drives; the bundled
//! [`PacketCodec`] implements the reference STX/length/ETX wire format.

pub use packet::{protocol_id, Packet, SequenceGenerator, ETX, HEADER_SIZE, STX, TAIL_SIZE};
pub use packet_codec::PacketCodec;

mod packet;
mod packet_codec;

use bytes::Bytes;

use crate::AppResult;

/// Contract between a session and its wire format.
///
/// `try_extract` scans `buffer` from `*offset` for one complete frame:
/// - `Ok(None)`: no frame start found, or the frame is still incomplete.
///   Never an error for partial input.
/// - `Ok(Some(frame))`: a frame was decoded; `*offset` now points one past
///   its last byte, so the caller can consume everything up to it.
/// - `Err(..)`: an apparently complete frame failed to decode. `*offset` has
///   still been advanced so the scan makes forward progress; the caller
///   should log the rejection and keep scanning.
///
/// One buffered chunk may contain several frames, so callers invoke
/// `try_extract` in a loop until it stops producing.
pub trait FrameCodec: Send + Sync + 'static {
    type Frame: Send + 'static;

    fn try_extract(&self, buffer: &[u8], offset: &mut usize) -> AppResult<Option<Self::Frame>>;

    /// Pure, deterministic serialization of one frame.
    fn serialize(&self, frame: &Self::Frame) -> Bytes;
}

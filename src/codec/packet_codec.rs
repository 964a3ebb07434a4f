use bytes::{BufMut, Bytes, BytesMut};

use super::{FrameCodec, Packet, ETX, HEADER_SIZE, STX, TAIL_SIZE};
use crate::{AppError, AppResult};

/// Reference codec for the STX/length/ETX packet layout.
///
/// Scan policy for damaged input: a length field claiming more than
/// `max_frame_size`, or a wrong tail byte, means the header itself is
/// suspect, so the scan advances a single byte past the STX and looks for
/// the next plausible frame start. A structurally complete frame whose
/// payload fails UTF-16 decoding is skipped whole. Either way the offset
/// moves, so a caller looping on `try_extract` always makes forward
/// progress.
#[derive(Debug)]
pub struct PacketCodec {
    max_frame_size: usize,
}

impl PacketCodec {
    pub fn new(max_frame_size: usize) -> PacketCodec {
        PacketCodec { max_frame_size }
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        PacketCodec::new(1024 * 1024)
    }
}

impl FrameCodec for PacketCodec {
    type Frame = Packet;

    fn try_extract(&self, buffer: &[u8], offset: &mut usize) -> AppResult<Option<Packet>> {
        let scan_from = *offset;
        if buffer.len() < scan_from + HEADER_SIZE + TAIL_SIZE {
            return Ok(None);
        }

        let stx = match buffer[scan_from..].iter().position(|&b| b == STX) {
            Some(i) => scan_from + i,
            None => return Ok(None),
        };
        if buffer.len() < stx + HEADER_SIZE {
            return Ok(None);
        }

        let data_len =
            u32::from_le_bytes(buffer[stx + 1..stx + 5].try_into().unwrap()) as usize;
        let frame_size = HEADER_SIZE + data_len + TAIL_SIZE;
        if frame_size > self.max_frame_size {
            *offset = stx + 1;
            return Err(AppError::MalformedFrame(format!(
                "frame of length {} exceeds limit {}",
                frame_size, self.max_frame_size
            )));
        }

        let end = stx + frame_size;
        if end > buffer.len() {
            return Ok(None);
        }

        if buffer[end - 1] != ETX {
            *offset = stx + 1;
            return Err(AppError::MalformedFrame(format!(
                "expected ETX 0x{:02x}, found 0x{:02x}",
                ETX,
                buffer[end - 1]
            )));
        }

        let protocol_id = u16::from_le_bytes(buffer[stx + 5..stx + 7].try_into().unwrap());
        let sequence_id = u16::from_le_bytes(buffer[stx + 7..stx + 9].try_into().unwrap());

        let payload_bytes = &buffer[stx + HEADER_SIZE..end - TAIL_SIZE];
        if payload_bytes.len() % 2 != 0 {
            *offset = end;
            return Err(AppError::MalformedFrame(
                "odd payload byte count for UTF-16LE text".to_string(),
            ));
        }
        let units: Vec<u16> = payload_bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        let payload = match String::from_utf16(&units) {
            Ok(s) => s,
            Err(_) => {
                *offset = end;
                return Err(AppError::MalformedFrame(
                    "payload is not valid UTF-16".to_string(),
                ));
            }
        };

        *offset = end;
        Ok(Some(Packet {
            protocol_id,
            sequence_id,
            payload,
        }))
    }

    fn serialize(&self, packet: &Packet) -> Bytes {
        let data: Vec<u8> = packet
            .payload
            .encode_utf16()
            .flat_map(|unit| unit.to_le_bytes())
            .collect();
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + data.len() + TAIL_SIZE);
        buf.put_u8(STX);
        buf.put_u32_le(data.len() as u32);
        buf.put_u16_le(packet.protocol_id);
        buf.put_u16_le(packet.sequence_id);
        buf.put_slice(&data);
        buf.put_u8(ETX);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::buffer::ReceiveBuffer;
    use crate::codec::protocol_id;

    fn codec() -> PacketCodec {
        PacketCodec::new(64 * 1024)
    }

    #[test]
    fn round_trip_of_a_two_char_payload_is_fourteen_bytes() {
        let codec = codec();
        let packet = Packet::new(3, 7, "hi");
        let bytes = codec.serialize(&packet);
        assert_eq!(bytes.len(), 14);
        assert_eq!(bytes[0], STX);
        assert_eq!(bytes[13], ETX);

        let mut offset = 0;
        let decoded = codec.try_extract(&bytes, &mut offset).unwrap().unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(offset, 14);
    }

    #[test]
    fn straddled_read_needs_the_second_chunk() {
        let codec = codec();
        let bytes = codec.serialize(&Packet::new(3, 7, "hi"));
        let (first, second) = bytes.split_at(6);

        let mut offset = 0;
        assert!(codec.try_extract(first, &mut offset).unwrap().is_none());
        assert_eq!(offset, 0);

        let mut whole = first.to_vec();
        whole.extend_from_slice(second);
        let decoded = codec.try_extract(&whole, &mut offset).unwrap().unwrap();
        assert_eq!(decoded.payload, "hi");
        assert_eq!(offset, 14);
    }

    #[test]
    fn garbage_before_the_frame_is_skipped() {
        let codec = codec();
        let mut wire = vec![0x10, 0x20, 0x30];
        wire.extend_from_slice(&codec.serialize(&Packet::new(3, 7, "hi")));

        let mut offset = 0;
        let decoded = codec.try_extract(&wire, &mut offset).unwrap().unwrap();
        assert_eq!(decoded.payload, "hi");
        // consumed length covers the junk plus the 14-byte frame from STX
        assert_eq!(offset, 17);
    }

    #[test]
    fn several_frames_in_one_buffer_come_out_in_order() {
        let codec = codec();
        let mut wire = Vec::new();
        for i in 0..3u16 {
            wire.extend_from_slice(&codec.serialize(&Packet::new(
                protocol_id::SEND_REQ,
                i,
                format!("m{}", i),
            )));
        }

        let mut offset = 0;
        let mut seen = Vec::new();
        while let Some(packet) = codec.try_extract(&wire, &mut offset).unwrap() {
            seen.push(packet.payload);
        }
        assert_eq!(seen, vec!["m0", "m1", "m2"]);
        assert_eq!(offset, wire.len());
    }

    #[rstest]
    #[case(1)]
    #[case(3)]
    #[case(5)]
    #[case(13)]
    fn arbitrary_chunking_yields_the_same_frames(#[case] chunk: usize) {
        let codec = codec();
        let mut wire = Vec::new();
        for i in 0..4u16 {
            wire.extend_from_slice(&codec.serialize(&Packet::new(
                protocol_id::SEND_REQ,
                i,
                format!("frame-{}", i),
            )));
        }

        let mut buf = ReceiveBuffer::new(8);
        let mut seen = Vec::new();
        for piece in wire.chunks(chunk) {
            for &b in piece {
                buf.ensure_capacity();
                buf.spare_mut()[0] = b;
                buf.accumulate(1);
            }
            let mut offset = 0;
            while let Some(packet) = codec.try_extract(buf.buffered(), &mut offset).unwrap() {
                seen.push(packet.sequence_id);
            }
            buf.consume(offset).unwrap();
        }
        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert_eq!(buf.buffered_len(), 0);
    }

    #[test]
    fn oversized_length_field_resyncs_one_byte_past_stx() {
        let small = PacketCodec::new(32);
        let mut wire = vec![STX, 0xff, 0xff, 0xff, 0xff, 0, 0, 0, 0, 0];
        // a valid frame right after the poisoned header
        wire.extend_from_slice(&small.serialize(&Packet::new(3, 7, "ok")));

        let mut offset = 0;
        let err = small.try_extract(&wire, &mut offset).unwrap_err();
        assert!(matches!(err, AppError::MalformedFrame(_)));
        assert_eq!(offset, 1);

        let decoded = small.try_extract(&wire, &mut offset).unwrap().unwrap();
        assert_eq!(decoded.payload, "ok");
    }

    #[test]
    fn wrong_tail_byte_is_rejected_and_rescanned() {
        let codec = codec();
        let mut wire = codec.serialize(&Packet::new(3, 7, "hi")).to_vec();
        wire[13] = 0x00;

        let mut offset = 0;
        let err = codec.try_extract(&wire, &mut offset).unwrap_err();
        assert!(matches!(err, AppError::MalformedFrame(_)));
        assert_eq!(offset, 1);
    }

    #[test]
    fn unpaired_surrogate_payload_is_skipped_whole() {
        let codec = codec();
        let mut wire = vec![STX];
        wire.extend_from_slice(&2u32.to_le_bytes());
        wire.extend_from_slice(&3u16.to_le_bytes());
        wire.extend_from_slice(&7u16.to_le_bytes());
        wire.extend_from_slice(&0xd800u16.to_le_bytes()); // lone high surrogate
        wire.push(ETX);

        let mut offset = 0;
        let err = codec.try_extract(&wire, &mut offset).unwrap_err();
        assert!(matches!(err, AppError::MalformedFrame(_)));
        assert_eq!(offset, wire.len());
    }

    #[test]
    fn empty_payload_frame_round_trips() {
        let codec = codec();
        let bytes = codec.serialize(&Packet::linktest_rsp(8));
        assert_eq!(bytes.len(), 10);

        let mut offset = 0;
        let decoded = codec.try_extract(&bytes, &mut offset).unwrap().unwrap();
        assert_eq!(decoded.protocol_id, protocol_id::LINKTEST_RSP);
        assert_eq!(decoded.sequence_id, 8);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn no_stx_in_buffer_reports_nothing() {
        let codec = codec();
        let wire = vec![0u8; 32];
        let mut offset = 0;
        assert!(codec.try_extract(&wire, &mut offset).unwrap().is_none());
        assert_eq!(offset, 0);
    }
}

use std::fmt;
use std::sync::atomic::{AtomicU16, Ordering};

pub const STX: u8 = 0x02;
pub const ETX: u8 = 0x03;

/// STX(1) + DataLength(4) + ProtocolId(2) + SequenceId(2).
pub const HEADER_SIZE: usize = 9;
pub const TAIL_SIZE: usize = 1;

/// Well-known protocol ids carried in the packet header.
pub mod protocol_id {
    pub const SOCKET_CLOSING: u16 = 1;
    pub const SOCKET_CLOSED: u16 = 2;
    pub const LINKTEST_REQ: u16 = 3;
    pub const LINKTEST_RSP: u16 = 4;
    pub const SEND_REQ: u16 = 11;
    pub const SEND_RSP: u16 = 12;
    pub const USER_PACKET: u16 = 14;
}

/// The reference application message: a protocol id, a sequence id and a
/// text payload carried as UTF-16LE on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub protocol_id: u16,
    pub sequence_id: u16,
    pub payload: String,
}

impl Packet {
    pub fn new(protocol_id: u16, sequence_id: u16, payload: impl Into<String>) -> Packet {
        Packet {
            protocol_id,
            sequence_id,
            payload: payload.into(),
        }
    }

    /// An outgoing SEND_REQ with a freshly drawn sequence id.
    pub fn send_req(sequences: &SequenceGenerator, payload: impl Into<String>) -> Packet {
        Packet::new(protocol_id::SEND_REQ, sequences.next(), payload)
    }

    /// The SEND_RSP answering `request`, echoing its sequence id and payload.
    pub fn reply(request: &Packet) -> Packet {
        Packet::new(
            protocol_id::SEND_RSP,
            request.sequence_id,
            request.payload.clone(),
        )
    }

    pub fn linktest_req(sequences: &SequenceGenerator) -> Packet {
        Packet::new(protocol_id::LINKTEST_REQ, sequences.next(), "")
    }

    pub fn linktest_rsp(sequence_id: u16) -> Packet {
        Packet::new(protocol_id::LINKTEST_RSP, sequence_id, "")
    }

    /// Payload size in wire bytes (UTF-16LE code units, two bytes each).
    pub fn payload_wire_len(&self) -> usize {
        self.payload.encode_utf16().count() * 2
    }

    /// Total frame size on the wire, header and tail included.
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload_wire_len() + TAIL_SIZE
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{ protocol_id: {}, sequence_id: {}, payload: {:?} }}",
            self.protocol_id, self.sequence_id, self.payload
        )
    }
}

/// Generator for outgoing sequence ids.
///
/// Starts at 2 and steps by 2, wrapping on overflow. Owned by whichever
/// component constructs outgoing packets; there is intentionally no
/// process-wide counter shared across independent clients.
#[derive(Debug)]
pub struct SequenceGenerator {
    next: AtomicU16,
}

impl SequenceGenerator {
    pub fn new() -> SequenceGenerator {
        SequenceGenerator {
            next: AtomicU16::new(2),
        }
    }

    pub fn next(&self) -> u16 {
        self.next.fetch_add(2, Ordering::Relaxed)
    }
}

impl Default for SequenceGenerator {
    fn default() -> Self {
        SequenceGenerator::new()
    }
}

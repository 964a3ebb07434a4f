//! A small framed-message TCP engine.
//!
//! Bytes arrive on a socket, a [`ReceiveBuffer`] accumulates them, a
//! [`FrameCodec`] extracts complete messages, and a [`Session`] delivers
//! them to the application in order. A [`Server`] runs the accept loop with
//! admission backpressure over a [`SessionRegistry`]; a [`Client`] wraps one
//! reconnectable session. The bundled [`PacketCodec`] implements the
//! reference STX/length/ETX wire format.

mod buffer;
mod client;
mod codec;
mod server;
mod service;
mod session;

pub use buffer::ReceiveBuffer;
pub use client::Client;
pub use codec::{
    protocol_id, FrameCodec, Packet, PacketCodec, SequenceGenerator, ETX, HEADER_SIZE, STX,
    TAIL_SIZE,
};
pub use server::Server;
pub use service::{
    is_benign_disconnect, setup_local_tracing, AppError, AppResult, ClientConfig, ServerConfig,
};
pub use session::{NoopEvents, Session, SessionEvents, SessionRegistry, SessionState};

use std::sync::Arc;

use crate::codec::FrameCodec;
use crate::AppError;

use super::Session;

/// Lifecycle callbacks a session invokes.
///
/// Every method defaults to a no-op, so implementors override only what they
/// care about. Handed to a session as `Arc<dyn SessionEvents<C>>` at
/// construction time; there is no subclassing involved, a session stays a
/// concrete type.
///
/// Callbacks run on the session's receive task (or on the sender's task for
/// `on_sent`), so they must not block; spawn for anything long-running.
pub trait SessionEvents<C: FrameCodec>: Send + Sync + 'static {
    /// One call per extracted frame, in wire order.
    fn on_received(&self, session: &Arc<Session<C>>, frame: C::Frame) {
        let _ = (session, frame);
    }

    /// A frame was fully written to the socket.
    fn on_sent(&self, session: &Arc<Session<C>>, frame: &C::Frame) {
        let _ = (session, frame);
    }

    /// Server side only: a session was accepted and registered.
    fn on_accepted(&self, session: &Arc<Session<C>>) {
        let _ = session;
    }

    /// The session's receive loop has fully exited and its socket is
    /// released. Fired exactly once per started session.
    fn on_closed(&self, session: &Arc<Session<C>>) {
        let _ = session;
    }

    fn on_error(&self, error: &AppError) {
        let _ = error;
    }

    /// Human-readable lifecycle lines ("session added: ...", frame
    /// rejections, and so on).
    fn on_log(&self, line: &str) {
        let _ = line;
    }
}

/// The do-nothing callback set.
pub struct NoopEvents;

impl<C: FrameCodec> SessionEvents<C> for NoopEvents {}

//! Sessions: the per-connection state machine and its registry.

pub use events::{NoopEvents, SessionEvents};
pub use registry::SessionRegistry;
pub use session::{Session, SessionState};

mod events;
mod registry;
#[allow(clippy::module_inception)]
mod session;

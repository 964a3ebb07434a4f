pub use config::{ClientConfig, ServerConfig};
pub use error::{is_benign_disconnect, AppError, AppResult};
pub use trace::setup_local_tracing;

mod config;
mod error;
mod trace;

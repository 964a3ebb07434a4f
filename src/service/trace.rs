use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

use super::{AppError, AppResult};

/// Installs a process-wide fmt subscriber with local timestamps.
///
/// Intended for binaries and tests; libraries embedding the engine should
/// install their own subscriber instead. The filter honors `RUST_LOG` and
/// falls back to the given default directive.
pub fn setup_local_tracing(default_directive: &str) -> AppResult<()> {
    let timer = ChronoLocal::new("%Y-%m-%d %H:%M:%S%.6f".to_string());
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let subscriber = tracing_subscriber::fmt()
        .with_timer(timer)
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_line_number(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| AppError::IllegalState(format!("set tracing subscriber: {}", e)))
}

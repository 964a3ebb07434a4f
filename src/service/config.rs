use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{AppError, AppResult};

/// Settings for a listening [`Server`](crate::Server).
///
/// Loadable from a TOML file via [`ServerConfig::from_file`]; every field has
/// a workable default so demo and test setups can start from
/// `ServerConfig::default()`. There is deliberately no process-global config
/// cell: server and client instances are independent of each other.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub ip: String,
    pub port: u16,
    /// Maximum number of concurrently registered sessions. When reached the
    /// accept loop stops until a session closes (admission backpressure).
    pub accept_limit: Option<usize>,
    /// Initial size of each session's receive buffer. Grows by doubling.
    pub read_buffer_size: usize,
    /// Upper bound on a single frame, header and tail included. A length
    /// field above this is treated as a corrupt header.
    pub max_frame_size: usize,
    /// Delay before the accept loop is relaunched once the session count
    /// drops back below `accept_limit`.
    pub accept_restart_delay_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            ip: "0.0.0.0".to_string(),
            port: 5020,
            accept_limit: None,
            read_buffer_size: 4 * 1024,
            max_frame_size: 1024 * 1024,
            accept_restart_delay_ms: 3000,
        }
    }
}

/// Settings for a [`Client`](crate::Client).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub ip: String,
    pub port: u16,
    pub read_buffer_size: usize,
    pub max_frame_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            ip: "127.0.0.1".to_string(),
            port: 5020,
            read_buffer_size: 4 * 1024,
            max_frame_size: 1024 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<ServerConfig> {
        load_config(path)
    }
}

impl ClientConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<ClientConfig> {
        load_config(path)
    }
}

fn load_config<P: AsRef<Path>, T: for<'de> Deserialize<'de>>(path: P) -> AppResult<T> {
    let path_str = path.as_ref().to_str().ok_or_else(|| {
        AppError::InvalidValue(format!(
            "config file path: {}",
            path.as_ref().to_string_lossy()
        ))
    })?;
    let config = config::Config::builder()
        .add_source(config::File::with_name(path_str))
        .build()?;
    Ok(config.try_deserialize()?)
}

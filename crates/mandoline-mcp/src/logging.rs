use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, ServerConfig};
use crate::error::ServerError;

/// Installs the global subscriber. Safe to call once per process.
pub fn init(config: &ServerConfig) -> Result<(), ServerError> {
    let filter = EnvFilter::try_new(&config.log_level)
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| ServerError::Config(format!("invalid log filter: {e}")))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    let result = match config.log_format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.compact().try_init(),
    };
    result.map_err(|e| ServerError::Config(format!("failed to install logger: {e}")))
}

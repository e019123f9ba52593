use std::process::ExitCode;

use mandoline_mcp::{daemon, logging, ServerConfig};
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    let config = ServerConfig::from_env();
    if let Err(err) = logging::init(&config) {
        // No subscriber yet, so this is the only way to surface it.
        let _ = std::io::Write::write_all(&mut std::io::stderr(), format!("{err}\n").as_bytes());
        return ExitCode::FAILURE;
    }

    match daemon::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "startup failed");
            ExitCode::FAILURE
        }
    }
}

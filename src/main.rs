use std::process::ExitCode;
use std::sync::Arc;

use tracing::info;

use filedock::web::WebServer;
use filedock::{Config, FileStore};

const DEFAULT_CONFIG_PATH: &str = "filedock.toml";

#[tokio::main]
async fn main() -> ExitCode {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    // Load configuration
    let config = match Config::load_with_env(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {config_path}: {e}");
            eprintln!("Using default configuration.");
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    };

    filedock::logging::init_or_console(&config.logging);

    if let Err(e) = config.validate() {
        tracing::error!("{e}");
        return ExitCode::FAILURE;
    }

    info!("Filedock file drop");

    let store = match FileStore::initialize(&config.storage.root, &config.storage.temp_dir) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!("Cannot initialize storage root {}: {e}", config.storage.root);
            return ExitCode::FAILURE;
        }
    };

    let server = match WebServer::new(&config, store) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        "Server configured on {}:{}",
        config.server.host, config.server.port
    );

    if let Err(e) = server.run().await {
        tracing::error!("Web server stopped: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

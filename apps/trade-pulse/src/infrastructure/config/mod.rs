//! Configuration Module
//!
//! Configuration loading for the hub server and the subscriber client.

mod settings;

pub use settings::{
    BroadcastSettings, ClientConfig, ConfigError, HubConfig, ServerSettings, WebSocketSettings,
    parse_reconnect_delays,
};

/// Load a `.env` file from the current directory or the nearest ancestor
/// that has one. A missing file is not an error.
pub fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

//! Server configuration from environment variables

use std::env;
use std::path::PathBuf;

/// Digest realm baked into stored credential hashes. Changing it
/// invalidates every password.
pub const DEFAULT_REALM: &str = "kalends";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Directory holding the calendar database.
    pub caldir: PathBuf,
    pub realm: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, String> {
        let caldir = env::var("KALENDS_DIR").map_err(|_| "KALENDS_DIR must be set".to_string())?;
        Ok(Self {
            host: env::var("KALENDS_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("KALENDS_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .map_err(|e| format!("failed to parse KALENDS_PORT: {e}"))?,
            caldir: PathBuf::from(caldir),
            realm: env::var("KALENDS_REALM").unwrap_or_else(|_| DEFAULT_REALM.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config {
            host: "0.0.0.0".to_string(),
            port: 8080,
            caldir: PathBuf::from("/var/calendars"),
            realm: DEFAULT_REALM.to_string(),
        };
        assert_eq!(config.realm, "kalends");
        assert_eq!(config.port, 8080);
    }
}

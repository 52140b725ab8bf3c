//! Gateway configuration, resolved from the environment.
//!
//! Every knob has an `M8LINK_`-prefixed environment variable; the CLI flags
//! in `m8link-cli` override whatever the environment resolved. Unparsable
//! values fall back to the default with a warning rather than aborting.

use std::time::Duration;

use tracing::warn;

/// Default HTTP (REST + WebSocket) port.
pub const DEFAULT_HTTP_PORT: u16 = 8080;
/// Default raw-TCP broadcaster port; 0 disables the broadcaster.
pub const DEFAULT_TCP_PORT: u16 = 3333;
/// Default serial baud rate.
pub const DEFAULT_BAUD: u32 = 115_200;
/// Default reconnect scan period.
pub const DEFAULT_RECONNECT_MS: u64 = 1000;

/// Runtime configuration for the whole gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// REST + WebSocket bind port.
    pub http_port: u16,
    /// Raw TCP broadcaster port; 0 disables.
    pub tcp_port: u16,
    /// Explicit serial device path; `None` scans by vendor/product id.
    pub serial_port: Option<String>,
    /// Serial baud rate.
    pub baud: u32,
    /// Run the reconnect loop after a link loss.
    pub auto_reconnect: bool,
    /// Reconnect scan period.
    pub reconnect_interval: Duration,
    /// Enable the audio capture pipeline.
    pub audio: bool,
    /// Audio capture command line; stdout must be s16le 44.1 kHz stereo PCM.
    pub audio_command: Vec<String>,
    /// Log filter directive (`error`..`trace`).
    pub log_level: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            http_port: DEFAULT_HTTP_PORT,
            tcp_port: DEFAULT_TCP_PORT,
            serial_port: None,
            baud: DEFAULT_BAUD,
            auto_reconnect: true,
            reconnect_interval: Duration::from_millis(DEFAULT_RECONNECT_MS),
            audio: true,
            audio_command: vec!["m8-audio-capture".to_string()],
            log_level: "info".to_string(),
        }
    }
}

impl GatewayConfig {
    /// Resolve configuration from `M8LINK_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            http_port: env_parsed("M8LINK_HTTP_PORT", defaults.http_port),
            tcp_port: env_parsed("M8LINK_TCP_PORT", defaults.tcp_port),
            serial_port: std::env::var("M8LINK_SERIAL_PORT")
                .ok()
                .filter(|s| !s.is_empty()),
            baud: env_parsed("M8LINK_BAUD", defaults.baud),
            auto_reconnect: env_parsed("M8LINK_RECONNECT", defaults.auto_reconnect),
            reconnect_interval: Duration::from_millis(env_parsed(
                "M8LINK_RECONNECT_MS",
                DEFAULT_RECONNECT_MS,
            )),
            audio: env_parsed("M8LINK_AUDIO", defaults.audio),
            audio_command: std::env::var("M8LINK_AUDIO_COMMAND")
                .ok()
                .map(|raw| raw.split_whitespace().map(str::to_string).collect())
                .filter(|parts: &Vec<String>| !parts.is_empty())
                .unwrap_or(defaults.audio_command),
            log_level: std::env::var("M8LINK_LOG").unwrap_or(defaults.log_level),
        }
    }
}

fn env_parsed<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(var = name, value = %raw, "unparsable value, using default");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = GatewayConfig::default();
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.tcp_port, 3333);
        assert_eq!(config.baud, 115_200);
        assert!(config.auto_reconnect);
        assert_eq!(config.reconnect_interval, Duration::from_millis(1000));
        assert!(config.audio);
        assert!(config.serial_port.is_none());
    }
}

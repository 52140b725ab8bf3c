//! CLI entry point - the composition root's front door.
//!
//! Resolution order: defaults → `M8LINK_*` environment (after `.env`) →
//! command-line flags. Everything else is wired in `m8link_axum::bootstrap`.

mod parser;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use m8link_runtime::GatewayConfig;
use parser::Cli;

fn apply_flags(mut config: GatewayConfig, cli: &Cli) -> GatewayConfig {
    if let Some(port) = cli.http_port {
        config.http_port = port;
    }
    if let Some(port) = cli.tcp_port {
        config.tcp_port = port;
    }
    if let Some(path) = &cli.serial_port {
        config.serial_port = Some(path.clone());
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    if let Some(baud) = cli.baud {
        config.baud = baud;
    }
    if cli.no_reconnect {
        config.auto_reconnect = false;
    }
    if cli.no_audio {
        config.audio = false;
    }
    config
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = apply_flags(GatewayConfig::from_env(), &cli);

    // Initialize logging from the resolved level; RUST_LOG still wins when
    // set explicitly.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // A bind failure propagates out of main as a non-zero exit.
    m8link_axum::start_server(config).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_env_resolution() {
        let cli = Cli::parse_from(["m8link", "-h", "9999", "--no-reconnect", "--baud", "57600"]);
        let config = apply_flags(GatewayConfig::default(), &cli);
        assert_eq!(config.http_port, 9999);
        assert_eq!(config.baud, 57_600);
        assert!(!config.auto_reconnect);
        // Untouched flags keep their defaults.
        assert_eq!(config.tcp_port, 3333);
        assert!(config.audio);
    }
}

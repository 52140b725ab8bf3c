//! Command-line argument definitions.
//!
//! Flags mirror the `M8LINK_*` environment variables and override them.
//! `-h` is taken by `--http-port` (matching the original tool), so the
//! automatic help short flag is disabled and `--help` is declared explicitly.

use clap::{ArgAction, Parser};

/// Remote-access gateway for the Dirtywave M8 tracker.
#[derive(Parser, Debug)]
#[command(name = "m8link")]
#[command(about = "Serve the M8's display and audio to TCP, WebSocket, and REST consumers")]
#[command(version, disable_help_flag = true)]
pub struct Cli {
    /// HTTP (REST + WebSocket) port
    #[arg(short = 'h', long = "http-port")]
    pub http_port: Option<u16>,

    /// Raw TCP broadcaster port (0 disables)
    #[arg(short = 't', long = "tcp-port")]
    pub tcp_port: Option<u16>,

    /// Serial device path (skips the vendor/product scan)
    #[arg(short = 'p', long = "serial-port")]
    pub serial_port: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Serial baud rate
    #[arg(long)]
    pub baud: Option<u32>,

    /// Disable the auto-reconnect loop
    #[arg(long = "no-reconnect", action = ArgAction::SetTrue)]
    pub no_reconnect: bool,

    /// Disable the audio capture pipeline
    #[arg(long = "no-audio", action = ArgAction::SetTrue)]
    pub no_audio: bool,

    /// Print help
    #[arg(long, action = ArgAction::Help)]
    pub help: Option<bool>,
}

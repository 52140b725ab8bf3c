//! Device-facing I/O for the M8 gateway.
//!
//! This crate owns everything with a file descriptor in it: the serial link
//! and its reconnect loop, the sysfs USB recovery ladder, the audio capture
//! subprocess and hub, the raw-TCP broadcaster, and the fan-out coordinator
//! that routes every serial chunk and parsed command to the right consumers.
//!
//! The HTTP adapter (`m8link-axum`) composes these pieces; the domain logic
//! they route lives in `m8link-core`.

pub mod audio;
pub mod config;
pub mod error;
pub mod fanout;
pub mod recovery;
pub mod sequencer;
pub mod serial;
pub mod shutdown;
pub mod subscribers;
pub mod tcp;

pub use audio::{AudioCapture, AudioHub, FRAME_CONTROL, FRAME_PCM};
pub use config::GatewayConfig;
pub use error::LinkError;
pub use fanout::Fanout;
pub use recovery::{RecoveryOutcome, RecoveryProcedure, UsbRecovery};
pub use sequencer::{InputSequencer, LinkPort};
pub use serial::{LinkEvent, PortInfo, SerialLink};
pub use subscribers::SubscriberSet;
pub use tcp::{TAG_AUDIO, TAG_DISPLAY, TcpBroadcaster};

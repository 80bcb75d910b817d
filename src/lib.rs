//! # mountlink
//!
//! An async Rust library for talking to telescope mount controllers over a
//! serial link.
//!
//! The controller speaks a small request/response protocol with fixed-length
//! responses and no request ids. This crate serializes commands on the link,
//! validates every response (separators, fixed-width fields, XOR checksums),
//! retries corrupted responses, and shares one physical link between any
//! number of logical clients.
//!
//! ## Features
//!
//! - Async/await based API using Tokio, with cancellation on every operation
//! - One shared channel, opened for the first connected client and closed
//!   after the last
//! - Single-flight caching of the extended-status poll
//! - An in-process simulator that answers the same wire protocol
//!
//! ## Quick Start
//!
//! ```no_run
//! use mountlink::{
//!     ChannelConfig, ConnectionManager, Coordinates, DeviceSession, Precision, SerialConfig,
//!     SessionConfig,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), mountlink::Error> {
//!     let manager = ConnectionManager::new(ChannelConfig::Serial(SerialConfig::new(
//!         "/dev/ttyUSB0",
//!     )));
//!     let cancel = CancellationToken::new();
//!
//!     let client = manager.register_client().await;
//!     let channel = manager.connect(client, &cancel).await?;
//!
//!     let session = DeviceSession::new(channel, SessionConfig::default());
//!     let firmware = session.initialize(&cancel).await?;
//!     println!("Firmware: {firmware}");
//!
//!     let status = session.read_extended_status(&cancel).await?;
//!     println!("RA {:.4}h Dec {:+.4}", status.position.ra_hours, status.position.dec_degrees);
//!
//!     session
//!         .slew(&Coordinates::new(5.5881, -5.3911), Precision::Extended, &cancel)
//!         .await?;
//!
//!     manager.disconnect(client).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`transport`] - Byte channels (serial port and simulator) and the shared channel
//! - [`protocol`] - Opcodes, request encoding and response validation
//! - [`types`] - Coordinates, motion flags, firmware version and axis configuration
//! - [`cache`] - Keyed single-flight cache with expiry
//! - [`session`] - [`DeviceSession`], the typed command engine
//! - [`connection`] - [`ConnectionManager`], the logical client registry
//! - [`event`] - Connection lifecycle events

pub mod cache;
pub mod connection;
pub mod error;
pub mod event;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use cache::{Expiration, ExpiryPolicy, MicroCache};
pub use connection::{ClientId, ConnectionManager};
pub use error::{Error, ErrorKind, FrameError, Result};
pub use event::{Event, EventDispatcher, EventFilter, Subscription};
pub use protocol::Opcode;
pub use session::{DeviceSession, SessionConfig};
pub use transport::{
    Channel, ChannelConfig, ChannelFactory, ChannelGuard, SerialChannel, SerialConfig,
    SharedChannel, SimulatorChannel, SimulatorConfig, SimulatorHandle, list_ports,
};
pub use types::{
    Axis, AxisConfig, AxisParameter, Coordinates, Direction, ExtendedStatus, FirmwareConfig,
    FirmwareVersion, MotionFlags, MoveRate, Precision, SlewOutcome,
};

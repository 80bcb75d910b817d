//! Transport layer for mount communication.
//!
//! A [`Channel`] is a byte pipe with no framing of its own: the protocol
//! engine writes a request and then reads exactly as many bytes as that
//! command's response is long. Two implementations exist, a real serial
//! port ([`SerialChannel`]) and an in-process mount simulator
//! ([`SimulatorChannel`]).

pub mod serial;
pub mod simulator;

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::{Mutex, MutexGuard};

use crate::error::Result;

pub use serial::{SerialChannel, SerialConfig, list_ports};
pub use simulator::{SimulatorChannel, SimulatorConfig, SimulatorHandle};

/// Trait for byte-level channel implementations.
pub trait Channel: Send {
    /// Opens the underlying resource. Opening an open channel is a no-op.
    fn open(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Closes the underlying resource. Closing a closed channel is a no-op.
    fn close(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Returns true if the channel is open.
    fn is_open(&self) -> bool;

    /// Writes all of `data`.
    fn write<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, Result<()>>;

    /// Reads exactly `len` bytes, failing if they do not arrive in time.
    fn read_exactly(&mut self, len: usize) -> BoxFuture<'_, Result<Bytes>>;

    /// Drains and returns whatever is buffered, without waiting for more.
    fn discard_pending(&mut self) -> BoxFuture<'_, Result<Bytes>>;
}

/// The single physical channel shared by every connected client.
///
/// Cloning shares the same channel. Locking it yields a [`ChannelGuard`]
/// which only exposes I/O; opening and closing is reserved for the
/// connection manager. Holding the guard is what serializes commands on
/// the link.
#[derive(Clone)]
pub struct SharedChannel {
    inner: Arc<Mutex<Box<dyn Channel>>>,
}

impl SharedChannel {
    /// Wraps a channel for sharing.
    #[must_use]
    pub fn new(channel: Box<dyn Channel>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(channel)),
        }
    }

    /// Waits for exclusive access to the channel.
    pub async fn lock(&self) -> ChannelGuard<'_> {
        ChannelGuard {
            channel: self.inner.lock().await,
        }
    }

    /// Returns true if the channel is open.
    pub async fn is_open(&self) -> bool {
        self.inner.lock().await.is_open()
    }

    /// Returns true if both handles share the same channel.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) async fn open(&self) -> Result<()> {
        self.inner.lock().await.open().await
    }

    pub(crate) async fn close(&self) -> Result<()> {
        self.inner.lock().await.close().await
    }
}

impl fmt::Debug for SharedChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedChannel")
            .field("handles", &Arc::strong_count(&self.inner))
            .finish_non_exhaustive()
    }
}

/// Exclusive I/O access to a [`SharedChannel`].
pub struct ChannelGuard<'a> {
    channel: MutexGuard<'a, Box<dyn Channel>>,
}

impl ChannelGuard<'_> {
    /// Returns true if the channel is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    /// Writes all of `data`.
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.channel.write(data).await
    }

    /// Reads exactly `len` bytes.
    pub async fn read_exactly(&mut self, len: usize) -> Result<Bytes> {
        self.channel.read_exactly(len).await
    }

    /// Drains whatever is buffered.
    pub async fn discard_pending(&mut self) -> Result<Bytes> {
        self.channel.discard_pending().await
    }
}

/// Selects which channel implementation to build.
#[derive(Debug, Clone)]
pub enum ChannelConfig {
    /// A physical serial port.
    Serial(SerialConfig),
    /// The in-process mount simulator.
    Simulator(SimulatorConfig),
}

/// Builds channels for the connection manager.
///
/// Implemented by [`ChannelConfig`] and by any
/// `Fn() -> Box<dyn Channel>` closure.
pub trait ChannelFactory: Send + Sync {
    /// Creates a new, closed channel.
    fn create(&self) -> Box<dyn Channel>;
}

impl ChannelFactory for ChannelConfig {
    fn create(&self) -> Box<dyn Channel> {
        match self {
            Self::Serial(config) => Box::new(SerialChannel::new(config.clone())),
            Self::Simulator(config) => Box::new(SimulatorChannel::new(config.clone())),
        }
    }
}

impl<F> ChannelFactory for F
where
    F: Fn() -> Box<dyn Channel> + Send + Sync,
{
    fn create(&self) -> Box<dyn Channel> {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_config_builds_closed_channels() {
        let serial = ChannelConfig::Serial(SerialConfig::new("/dev/ttyUSB0")).create();
        assert!(!serial.is_open());

        let sim = ChannelConfig::Simulator(SimulatorConfig::default()).create();
        assert!(!sim.is_open());
    }

    #[tokio::test]
    async fn test_shared_channel_handles() {
        let shared = SharedChannel::new(Box::new(SimulatorChannel::new(
            SimulatorConfig::default(),
        )));
        let clone = shared.clone();
        assert!(shared.ptr_eq(&clone));
        assert!(!shared.is_open().await);

        shared.open().await.unwrap();
        assert!(clone.is_open().await);
        assert!(clone.lock().await.is_open());

        clone.close().await.unwrap();
        assert!(!shared.is_open().await);
    }
}

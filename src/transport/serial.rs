//! Serial port channel implementation.
//!
//! This module provides the physical RS-232/USB link to the mount
//! controller.

use std::io;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{
    DataBits, FlowControl, Parity, SerialPort, SerialPortBuilderExt, SerialStream, StopBits,
};

use crate::error::{Error, Result};
use crate::transport::Channel;

/// Default baud rate for mount controllers.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default read and write timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for the serial channel.
///
/// Defaults to 9600-8-N-1 without handshake and 10 second timeouts.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0" or "COM3").
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Data bits per character.
    pub data_bits: DataBits,
    /// Parity checking mode.
    pub parity: Parity,
    /// Stop bits per character.
    pub stop_bits: StopBits,
    /// Handshake mode.
    pub flow_control: FlowControl,
    /// Time allowed for a full response to arrive.
    pub read_timeout: Duration,
    /// Time allowed for a request to be written.
    pub write_timeout: Duration,
}

impl SerialConfig {
    /// Creates a new serial configuration with default settings.
    #[must_use]
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            read_timeout: DEFAULT_TIMEOUT,
            write_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Sets the baud rate.
    #[must_use]
    pub const fn baud_rate(mut self, rate: u32) -> Self {
        self.baud_rate = rate;
        self
    }

    /// Sets the data bits.
    #[must_use]
    pub const fn data_bits(mut self, data_bits: DataBits) -> Self {
        self.data_bits = data_bits;
        self
    }

    /// Sets the parity mode.
    #[must_use]
    pub const fn parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    /// Sets the stop bits.
    #[must_use]
    pub const fn stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    /// Sets the handshake mode.
    #[must_use]
    pub const fn flow_control(mut self, flow_control: FlowControl) -> Self {
        self.flow_control = flow_control;
        self
    }

    /// Sets the read timeout.
    #[must_use]
    pub const fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Sets the write timeout.
    #[must_use]
    pub const fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }
}

fn timeout_error(timeout: Duration) -> Error {
    Error::Timeout {
        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
    }
}

/// Serial channel to a mount controller.
pub struct SerialChannel {
    config: SerialConfig,
    stream: Option<SerialStream>,
}

impl SerialChannel {
    /// Creates a new, closed serial channel.
    #[must_use]
    pub const fn new(config: SerialConfig) -> Self {
        Self {
            config,
            stream: None,
        }
    }

    /// Creates a new serial channel for the given port with default settings.
    #[must_use]
    pub fn with_port(port: impl Into<String>) -> Self {
        Self::new(SerialConfig::new(port))
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &SerialConfig {
        &self.config
    }

    fn stream_mut(&mut self) -> Result<&mut SerialStream> {
        self.stream.as_mut().ok_or(Error::NotConnected)
    }
}

impl Channel for SerialChannel {
    fn open(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.stream.is_some() {
                return Ok(());
            }

            tracing::info!(
                port = %self.config.port,
                baud = self.config.baud_rate,
                "opening serial port"
            );

            let stream = tokio_serial::new(&self.config.port, self.config.baud_rate)
                .data_bits(self.config.data_bits)
                .parity(self.config.parity)
                .stop_bits(self.config.stop_bits)
                .flow_control(self.config.flow_control)
                .timeout(self.config.read_timeout)
                .open_native_async()
                .map_err(Error::Serial)?;

            // Stale bytes from a previous session would misalign the first response.
            if let Err(e) = stream.clear(tokio_serial::ClearBuffer::All) {
                tracing::warn!("failed to clear serial buffers: {}", e);
            }

            self.stream = Some(stream);
            tracing::info!("serial port open");
            Ok(())
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.stream.take().is_some() {
                tracing::info!(port = %self.config.port, "serial port closed");
            }
            Ok(())
        })
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn write<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let timeout = self.config.write_timeout;
            let stream = self.stream_mut()?;
            tracing::trace!("writing {} bytes: {:02x?}", data.len(), data);

            tokio::time::timeout(timeout, async {
                stream.write_all(data).await?;
                stream.flush().await
            })
            .await
            .map_err(|_| timeout_error(timeout))?
            .map_err(Error::Io)
        })
    }

    fn read_exactly(&mut self, len: usize) -> BoxFuture<'_, Result<Bytes>> {
        Box::pin(async move {
            let timeout = self.config.read_timeout;
            let stream = self.stream_mut()?;
            let mut buf = vec![0u8; len];
            let mut filled = 0usize;

            let outcome = tokio::time::timeout(timeout, async {
                while filled < len {
                    let n = stream.read(&mut buf[filled..]).await?;
                    if n == 0 {
                        return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
                    }
                    filled += n;
                }
                Ok::<(), io::Error>(())
            })
            .await;

            match outcome {
                Ok(Ok(())) => {
                    tracing::trace!("read {} bytes: {:02x?}", len, buf);
                    Ok(Bytes::from(buf))
                }
                Ok(Err(e)) if e.kind() == io::ErrorKind::UnexpectedEof => Err(Error::EndOfStream {
                    expected: len,
                    got: filled,
                }),
                Ok(Err(e)) => Err(Error::Io(e)),
                Err(_) => {
                    tracing::debug!("read timed out with {} of {} bytes", filled, len);
                    Err(timeout_error(timeout))
                }
            }
        })
    }

    fn discard_pending(&mut self) -> BoxFuture<'_, Result<Bytes>> {
        Box::pin(async move {
            let timeout = self.config.read_timeout;
            let stream = self.stream_mut()?;
            let available = stream.bytes_to_read().map_err(Error::Serial)? as usize;
            if available == 0 {
                return Ok(Bytes::new());
            }

            // The bytes are already buffered, so this read completes immediately.
            let mut buf = vec![0u8; available];
            tokio::time::timeout(timeout, stream.read_exact(&mut buf))
                .await
                .map_err(|_| timeout_error(timeout))?
                .map_err(Error::Io)?;
            Ok(Bytes::from(buf))
        })
    }
}

/// Lists available serial ports.
///
/// # Errors
///
/// Returns an error if the port list cannot be retrieved.
pub fn list_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports().map_err(Error::Serial)?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_config_defaults() {
        let config = SerialConfig::new("/dev/ttyUSB0");
        assert_eq!(config.port, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(config.data_bits, DataBits::Eight);
        assert_eq!(config.parity, Parity::None);
        assert_eq!(config.stop_bits, StopBits::One);
        assert_eq!(config.flow_control, FlowControl::None);
        assert_eq!(config.read_timeout, Duration::from_secs(10));
        assert_eq!(config.write_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_serial_config_builder() {
        let config = SerialConfig::new("COM3")
            .baud_rate(19_200)
            .parity(Parity::Even)
            .stop_bits(StopBits::Two)
            .flow_control(FlowControl::Hardware)
            .read_timeout(Duration::from_secs(2));
        assert_eq!(config.baud_rate, 19_200);
        assert_eq!(config.parity, Parity::Even);
        assert_eq!(config.stop_bits, StopBits::Two);
        assert_eq!(config.flow_control, FlowControl::Hardware);
        assert_eq!(config.read_timeout, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_closed_channel_rejects_io() {
        let mut channel = SerialChannel::with_port("/dev/does-not-exist");
        assert!(!channel.is_open());
        assert!(matches!(
            channel.write(b"V").await,
            Err(Error::NotConnected)
        ));
        assert!(matches!(
            channel.read_exactly(5).await,
            Err(Error::NotConnected)
        ));
        channel.close().await.unwrap();
    }

    #[test]
    #[ignore = "Requires /sys/class/tty - not available in sandboxed builds"]
    fn test_list_ports() {
        // Just verify it doesn't panic
        let _ = list_ports();
    }
}

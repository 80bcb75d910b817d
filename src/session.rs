//! Device session: the command/response engine.
//!
//! A [`DeviceSession`] issues typed commands over a [`SharedChannel`].
//! The wire protocol carries no request ids or delimiters, so every
//! command runs as one exclusive transaction on the channel:
//!
//! 1. lock the channel (the lock is the command gate for every session
//!    sharing the link)
//! 2. fail with [`Error::NotConnected`] if the channel is closed
//! 3. drain stale bytes left by an earlier failure
//! 4. write the request and read the command's fixed-length response
//! 5. validate the response, mapping defects to
//!    [`Error::UnexpectedResponse`]
//!
//! The lock is released when the transaction's guard drops, including
//! when the caller's future is dropped on cancellation. Unexpected
//! responses are retried after a short backoff; every other error is
//! returned immediately.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::cache::{Expiration, MicroCache};
use crate::error::{Error, FrameError, Result};
use crate::protocol::{
    ACK_LEN, Opcode, encode_abort, encode_move, encode_simple, encode_slew, encode_tracking,
    encode_write_config, parse_ack, parse_axis_config, parse_extended_status,
    parse_firmware_version, parse_position, parse_slew_outcome,
};
use crate::transport::SharedChannel;
use crate::types::{
    Coordinates, Direction, ExtendedStatus, FirmwareConfig, FirmwareVersion, MoveRate, Precision,
    SlewOutcome,
};

/// Default number of attempts per command.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default pause between attempts.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Default lifetime of a memoized extended status.
pub const DEFAULT_STATUS_TTL: Duration = Duration::from_millis(500);

const STATUS_CACHE_KEY: &str = "extended-status";

/// Configuration for a device session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Attempts per command before an unexpected response is returned.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub retry_backoff: Duration,
    /// How long an extended status is served from cache.
    pub status_ttl: Duration,
    /// Refuse firmware that does not acknowledge commands.
    pub require_supported_firmware: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            status_ttl: DEFAULT_STATUS_TTL,
            require_supported_firmware: true,
        }
    }
}

impl SessionConfig {
    /// Sets the attempt count. Values below 1 are treated as 1.
    #[must_use]
    pub const fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the retry backoff.
    #[must_use]
    pub const fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Sets the extended-status cache lifetime.
    #[must_use]
    pub const fn status_ttl(mut self, ttl: Duration) -> Self {
        self.status_ttl = ttl;
        self
    }

    /// Sets whether firmware 60 and older is refused.
    #[must_use]
    pub const fn require_supported_firmware(mut self, require: bool) -> Self {
        self.require_supported_firmware = require;
        self
    }
}

/// Typed command interface to one mount.
pub struct DeviceSession {
    channel: SharedChannel,
    config: SessionConfig,
    status_cache: MicroCache<ExtendedStatus>,
    initialized: AtomicBool,
    firmware: OnceCell<FirmwareVersion>,
}

impl DeviceSession {
    /// Creates an uninitialized session over `channel`.
    #[must_use]
    pub fn new(channel: SharedChannel, config: SessionConfig) -> Self {
        Self {
            channel,
            config,
            status_cache: MicroCache::new(),
            initialized: AtomicBool::new(false),
            firmware: OnceCell::new(),
        }
    }

    /// Returns the channel this session talks over.
    #[must_use]
    pub const fn channel(&self) -> &SharedChannel {
        &self.channel
    }

    /// Returns the session configuration.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns true once [`initialize`](Self::initialize) has succeeded and
    /// the channel has not been seen closed since.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Queries the firmware version and marks the session usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if the channel is closed,
    /// [`Error::UnsupportedFirmware`] for firmware 60 and older unless
    /// [`SessionConfig::require_supported_firmware`] is off, or any error of
    /// the version query.
    pub async fn initialize(&self, cancel: &CancellationToken) -> Result<FirmwareVersion> {
        let version = self.firmware_version(cancel).await?;
        // A cached version does not prove the channel is still open.
        if !self.channel.is_open().await {
            self.invalidate().await;
            return Err(Error::NotConnected);
        }
        if !version.acknowledges_commands() {
            if self.config.require_supported_firmware {
                tracing::warn!(%version, "refusing unsupported firmware");
                return Err(Error::UnsupportedFirmware {
                    version: version.to_string(),
                });
            }
            tracing::warn!(%version, "legacy firmware, commands will not be acknowledged");
        }
        self.initialized.store(true, Ordering::Release);
        tracing::info!(%version, "device session initialized");
        Ok(version)
    }

    /// Returns the firmware version, querying the device the first time.
    ///
    /// Unlike the other operations this does not require an initialized
    /// session, only an open channel.
    pub async fn firmware_version(&self, cancel: &CancellationToken) -> Result<FirmwareVersion> {
        let request = encode_simple(Opcode::FirmwareVersion);
        let version = self
            .firmware
            .get_or_try_init(|| {
                self.request(
                    Opcode::FirmwareVersion.name(),
                    &request,
                    Opcode::FirmwareVersion.response_len(),
                    parse_firmware_version,
                    cancel,
                )
            })
            .await?;
        Ok(*version)
    }

    /// Reads the current position.
    pub async fn read_position(&self, cancel: &CancellationToken) -> Result<Coordinates> {
        self.ensure_initialized()?;
        self.request(
            Opcode::ReadPosition.name(),
            &encode_simple(Opcode::ReadPosition),
            Opcode::ReadPosition.response_len(),
            parse_position,
            cancel,
        )
        .await
    }

    /// Reads position and motion flags.
    ///
    /// Results are memoized for [`SessionConfig::status_ttl`]; concurrent
    /// callers share one device round trip.
    pub async fn read_extended_status(&self, cancel: &CancellationToken) -> Result<ExtendedStatus> {
        self.ensure_initialized()?;
        let request = encode_simple(Opcode::ReadExtendedStatus);
        self.status_cache
            .get_or_try_add(
                STATUS_CACHE_KEY,
                || {
                    self.request(
                        Opcode::ReadExtendedStatus.name(),
                        &request,
                        Opcode::ReadExtendedStatus.response_len(),
                        parse_extended_status,
                        cancel,
                    )
                },
                Expiration::After(self.config.status_ttl),
            )
            .await
    }

    /// Drops the memoized extended status so the next read hits the device.
    pub async fn invalidate_status(&self) {
        self.status_cache.remove(STATUS_CACHE_KEY).await;
    }

    /// Slews to `target`.
    ///
    /// [`SlewOutcome::Rejected`] is a valid answer, not an error. Legacy
    /// firmware sends no answer and yields [`SlewOutcome::Unacknowledged`].
    pub async fn slew(
        &self,
        target: &Coordinates,
        precision: Precision,
        cancel: &CancellationToken,
    ) -> Result<SlewOutcome> {
        self.ensure_initialized()?;
        let request = encode_slew(target, precision)?;
        let opcode = match precision {
            Precision::Standard => Opcode::Slew,
            Precision::Extended => Opcode::SlewExtended,
        };
        let outcome = self
            .gated(opcode, opcode.name(), &request, parse_slew_outcome, cancel)
            .await?
            .unwrap_or(SlewOutcome::Unacknowledged);
        self.invalidate_status().await;
        tracing::debug!(?outcome, ra = target.ra_hours, dec = target.dec_degrees, "slew");
        Ok(outcome)
    }

    /// Stops any slew or manual motion.
    pub async fn abort(&self, cancel: &CancellationToken) -> Result<()> {
        self.ensure_initialized()?;
        self.gated(
            Opcode::Slew,
            "abort",
            &encode_abort(),
            |data| parse_ack(data, b"X").map(drop),
            cancel,
        )
        .await?;
        self.invalidate_status().await;
        Ok(())
    }

    /// Starts (or with [`MoveRate::STOP`], stops) manual motion.
    pub async fn move_axis(
        &self,
        direction: Direction,
        rate: MoveRate,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.ensure_initialized()?;
        self.request(
            Opcode::Move.name(),
            &encode_move(direction, rate),
            ACK_LEN,
            |data| parse_ack(data, b"M").map(drop),
            cancel,
        )
        .await?;
        self.invalidate_status().await;
        Ok(())
    }

    /// Turns sidereal tracking on or off.
    pub async fn set_tracking(&self, enabled: bool, cancel: &CancellationToken) -> Result<()> {
        self.ensure_initialized()?;
        self.gated(
            Opcode::Tracking,
            Opcode::Tracking.name(),
            &encode_tracking(enabled),
            |data| parse_ack(data, b"T").map(drop),
            cancel,
        )
        .await?;
        self.invalidate_status().await;
        Ok(())
    }

    /// Parks the mount.
    pub async fn park(&self, cancel: &CancellationToken) -> Result<()> {
        self.simple_gated(Opcode::Park, b"P", cancel).await
    }

    /// Unparks the mount.
    pub async fn unpark(&self, cancel: &CancellationToken) -> Result<()> {
        self.simple_gated(Opcode::Unpark, b"U", cancel).await
    }

    /// Reads both axes' firmware configuration.
    pub async fn read_axis_config(&self, cancel: &CancellationToken) -> Result<FirmwareConfig> {
        self.ensure_initialized()?;
        self.request(
            Opcode::ReadConfig.name(),
            &encode_simple(Opcode::ReadConfig),
            Opcode::ReadConfig.response_len(),
            parse_axis_config,
            cancel,
        )
        .await
    }

    /// Writes both axes' firmware configuration.
    pub async fn write_axis_config(
        &self,
        config: &FirmwareConfig,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.ensure_initialized()?;
        self.request(
            Opcode::WriteConfig.name(),
            &encode_write_config(config),
            ACK_LEN,
            |data| parse_ack(data, b"W").map(drop),
            cancel,
        )
        .await
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    /// Marks the session unusable after the channel was seen closed.
    async fn invalidate(&self) {
        if self.initialized.swap(false, Ordering::AcqRel) {
            tracing::info!("channel closed, device session invalidated");
        }
        self.invalidate_status().await;
    }

    async fn simple_gated(
        &self,
        opcode: Opcode,
        ack: &'static [u8],
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.ensure_initialized()?;
        self.gated(
            opcode,
            opcode.name(),
            &encode_simple(opcode),
            |data| parse_ack(data, ack).map(drop),
            cancel,
        )
        .await?;
        self.invalidate_status().await;
        Ok(())
    }

    /// Runs a command whose single-byte reply legacy firmware may omit.
    ///
    /// Returns `None` when the command was sent without expecting a reply.
    async fn gated<T>(
        &self,
        opcode: Opcode,
        command: &'static str,
        request: &[u8],
        parse: impl Fn(&[u8]) -> std::result::Result<T, FrameError>,
        cancel: &CancellationToken,
    ) -> Result<Option<T>> {
        let firmware = self.firmware.get().copied().ok_or(Error::NotConnected)?;
        if !opcode.is_firmware_gated() || firmware.acknowledges_commands() {
            let value = self.request(command, request, ACK_LEN, parse, cancel).await?;
            Ok(Some(value))
        } else {
            self.request(command, request, 0, |_| Ok(()), cancel).await?;
            tracing::debug!(command, %firmware, "sent without acknowledgement");
            Ok(None)
        }
    }

    /// Runs one command with bounded retries on unexpected responses.
    async fn request<T>(
        &self,
        command: &'static str,
        request: &[u8],
        response_len: usize,
        parse: impl Fn(&[u8]) -> std::result::Result<T, FrameError>,
        cancel: &CancellationToken,
    ) -> Result<T> {
        let result = self
            .with_retry(command, cancel, || {
                self.transaction(command, request, response_len, &parse)
            })
            .await;
        if matches!(result, Err(Error::NotConnected)) {
            self.invalidate().await;
        }
        result
    }

    async fn with_retry<F, Fut, T>(
        &self,
        command: &'static str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempts = 0;
        loop {
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Error::Cancelled),
                result = op() => result,
            };
            match result {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempts += 1;
                    if !err.is_retryable() || attempts >= max_attempts {
                        return Err(err);
                    }
                    tracing::warn!(
                        attempt = attempts,
                        max_attempts,
                        "command '{}' failed: {}. Retrying in {:?}",
                        command,
                        err,
                        self.config.retry_backoff
                    );
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return Err(Error::Cancelled),
                        () = tokio::time::sleep(self.config.retry_backoff) => {}
                    }
                }
            }
        }
    }

    /// One exclusive request/response exchange.
    async fn transaction<T>(
        &self,
        command: &'static str,
        request: &[u8],
        response_len: usize,
        parse: &impl Fn(&[u8]) -> std::result::Result<T, FrameError>,
    ) -> Result<T> {
        let mut channel = self.channel.lock().await;
        if !channel.is_open() {
            return Err(Error::NotConnected);
        }

        let stale = channel.discard_pending().await?;
        if !stale.is_empty() {
            tracing::debug!(
                "discarded {} stale bytes before {}: {}",
                stale.len(),
                command,
                hex::encode(&stale)
            );
        }

        channel.write(request).await?;
        let response = if response_len == 0 {
            Bytes::new()
        } else {
            channel.read_exactly(response_len).await?
        };
        drop(channel);

        parse(&response).map_err(|source| {
            tracing::debug!(command, "unexpected response: {}", source);
            Error::UnexpectedResponse { command, source }
        })
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("channel", &self.channel)
            .field("initialized", &self.is_initialized())
            .field("firmware", &self.firmware.get())
            .finish_non_exhaustive()
    }
}

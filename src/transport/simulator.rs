//! In-process mount simulator.
//!
//! [`SimulatorChannel`] implements [`Channel`] by answering requests the
//! way the controller does: `write` decodes the request and queues a
//! fixed-length response, `read_exactly` drains that queue. Mount state
//! lives behind a [`SimulatorHandle`] so it survives the channel being
//! closed and reopened, like a physical device on the end of a cable.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;

use crate::error::{Error, Result};
use crate::protocol::command::{CONFIG_FRAME_LEN, Opcode};
use crate::protocol::frame::{
    encode_config_frame, encode_position_response, encode_status_response,
    encode_version_response, xor_checksum,
};
use crate::protocol::parser::{parse_axis_config, parse_slew_request};
use crate::transport::Channel;
use crate::types::{
    Coordinates, Direction, ExtendedStatus, FirmwareConfig, FirmwareVersion, MotionFlags,
};

/// Default firmware version reported by the simulator.
pub const DEFAULT_FIRMWARE: FirmwareVersion = FirmwareVersion::new(62, 1);

/// Default delay before a rejected move is answered with `'X'`.
pub const DEFAULT_NAK_DELAY: Duration = Duration::from_millis(250);

/// Default time a read waits before reporting missing bytes.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Configuration for the simulator.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Firmware version reported by the version query.
    pub firmware: FirmwareVersion,
    /// Initial position.
    pub position: Coordinates,
    /// Whether the mount starts aligned.
    pub aligned: bool,
    /// Delay before answering a move whose checksum is wrong.
    pub nak_delay: Duration,
    /// Time a read waits before failing when too few bytes are queued.
    pub read_timeout: Duration,
    /// Send every extended-status response with a wrong checksum.
    pub corrupt_status_checksum: bool,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            firmware: DEFAULT_FIRMWARE,
            position: Coordinates::new(0.0, 90.0),
            aligned: true,
            nak_delay: DEFAULT_NAK_DELAY,
            read_timeout: DEFAULT_READ_TIMEOUT,
            corrupt_status_checksum: false,
        }
    }
}

impl SimulatorConfig {
    /// Sets the firmware version.
    #[must_use]
    pub const fn firmware(mut self, firmware: FirmwareVersion) -> Self {
        self.firmware = firmware;
        self
    }

    /// Sets the initial position.
    #[must_use]
    pub const fn position(mut self, position: Coordinates) -> Self {
        self.position = position;
        self
    }

    /// Sets the rejected-move delay.
    #[must_use]
    pub const fn nak_delay(mut self, delay: Duration) -> Self {
        self.nak_delay = delay;
        self
    }

    /// Sets the read timeout.
    #[must_use]
    pub const fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Corrupts the checksum of every extended-status response.
    #[must_use]
    pub const fn corrupt_status_checksum(mut self, corrupt: bool) -> Self {
        self.corrupt_status_checksum = corrupt;
        self
    }
}

#[derive(Debug)]
struct MountState {
    config: SimulatorConfig,
    position: Coordinates,
    flags: MotionFlags,
    axis_config: FirmwareConfig,
    corrupt_status_checksum: bool,
    requests: HashMap<u8, usize>,
    open_channels: usize,
}

/// Shared view of the simulated mount.
///
/// Every [`SimulatorChannel`] built from the same handle talks to the same
/// mount. Tests use it to inspect state and inject faults.
#[derive(Debug, Clone)]
pub struct SimulatorHandle {
    state: Arc<Mutex<MountState>>,
}

impl SimulatorHandle {
    /// Creates a simulated mount.
    #[must_use]
    pub fn new(config: SimulatorConfig) -> Self {
        let mut flags = MotionFlags::NONE;
        flags.set(MotionFlags::ALIGNED, config.aligned);
        Self {
            state: Arc::new(Mutex::new(MountState {
                position: config.position,
                flags,
                axis_config: FirmwareConfig::default(),
                corrupt_status_checksum: config.corrupt_status_checksum,
                requests: HashMap::new(),
                open_channels: 0,
                config,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, MountState> {
        // A panic while holding the lock cannot leave the state half-written.
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Returns a new channel to this mount.
    #[must_use]
    pub fn channel(&self) -> SimulatorChannel {
        SimulatorChannel {
            handle: self.clone(),
            pending: VecDeque::new(),
            open: false,
        }
    }

    /// Current position.
    #[must_use]
    pub fn position(&self) -> Coordinates {
        self.state().position
    }

    /// Moves the mount without a command.
    pub fn set_position(&self, position: Coordinates) {
        self.state().position = position;
    }

    /// Current motion flags.
    #[must_use]
    pub fn flags(&self) -> MotionFlags {
        self.state().flags
    }

    /// Current axis configuration.
    #[must_use]
    pub fn axis_config(&self) -> FirmwareConfig {
        self.state().axis_config
    }

    /// Replaces the axis configuration.
    pub fn set_axis_config(&self, config: FirmwareConfig) {
        self.state().axis_config = config;
    }

    /// Changes the firmware version, as if the controller were reflashed.
    pub fn set_firmware(&self, firmware: FirmwareVersion) {
        self.state().config.firmware = firmware;
    }

    /// Makes every extended-status response carry a wrong checksum.
    pub fn set_corrupt_status_checksum(&self, corrupt: bool) {
        self.state().corrupt_status_checksum = corrupt;
    }

    /// Number of requests received for an opcode.
    #[must_use]
    pub fn requests(&self, opcode: Opcode) -> usize {
        self.state()
            .requests
            .get(&u8::from(opcode))
            .copied()
            .unwrap_or(0)
    }

    /// Number of channels currently open to this mount.
    #[must_use]
    pub fn open_channels(&self) -> usize {
        self.state().open_channels
    }
}

/// What the mount does with one request.
struct Reply {
    bytes: Vec<u8>,
    delay: Option<Duration>,
}

impl Reply {
    const fn none() -> Self {
        Self {
            bytes: Vec::new(),
            delay: None,
        }
    }

    fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            delay: None,
        }
    }
}

impl MountState {
    fn acknowledges(&self) -> bool {
        self.config.firmware.acknowledges_commands()
    }

    /// A gated acknowledgement: sent only by firmware newer than 60.
    fn gated(&self, ack: u8) -> Reply {
        if self.acknowledges() {
            Reply::bytes([ack])
        } else {
            Reply::none()
        }
    }

    fn handle(&mut self, data: &[u8]) -> Reply {
        let Some(opcode) = data.first().copied().and_then(Opcode::from_byte) else {
            tracing::debug!("simulator ignoring unknown request {:02x?}", data);
            return Reply::none();
        };
        *self.requests.entry(opcode.into()).or_insert(0) += 1;

        match opcode {
            Opcode::ReadPosition => Reply::bytes(encode_position_response(&self.position)),
            Opcode::ReadExtendedStatus => {
                let mut frame = encode_status_response(&ExtendedStatus {
                    position: self.position,
                    flags: self.flags,
                })
                .to_vec();
                if self.corrupt_status_checksum {
                    frame[19] ^= 0x5a;
                }
                Reply::bytes(frame)
            }
            Opcode::FirmwareVersion => Reply::bytes(encode_version_response(self.config.firmware)),
            Opcode::Slew | Opcode::SlewExtended => self.slew(data),
            Opcode::Move => self.manual_move(data),
            Opcode::Tracking => match data.get(1) {
                Some(b'1') if data.len() == 2 => {
                    self.flags.set(MotionFlags::TRACKING, true);
                    self.gated(b'T')
                }
                Some(b'0') if data.len() == 2 => {
                    self.flags.set(MotionFlags::TRACKING, false);
                    self.gated(b'T')
                }
                _ => Reply::none(),
            },
            Opcode::Park => {
                self.flags = MotionFlags::PARKED
                    | MotionFlags::from_byte(self.flags.as_byte() & MotionFlags::ALIGNED.as_byte());
                self.gated(b'P')
            }
            Opcode::Unpark => {
                self.flags.set(MotionFlags::PARKED, false);
                self.gated(b'U')
            }
            Opcode::ReadConfig => Reply::bytes(encode_config_frame(&self.axis_config)),
            Opcode::WriteConfig => self.write_config(data),
        }
    }

    fn slew(&mut self, data: &[u8]) -> Reply {
        let Ok((_, target)) = parse_slew_request(data) else {
            return self.gated(b'X');
        };
        if target.ra_hours >= 24.0 {
            // The impossible target aborts any motion.
            self.flags.set(MotionFlags::GOTO, false);
            self.flags.set(MotionFlags::USER_MOTION, false);
            return self.gated(b'X');
        }
        if self.flags.is_parked() || target.validate().is_err() {
            return self.gated(b'X');
        }
        // The simulated mount arrives instantly.
        self.position = target;
        self.flags.set(MotionFlags::GOTO, false);
        self.gated(b'G')
    }

    fn manual_move(&mut self, data: &[u8]) -> Reply {
        let valid = data.len() == 4
            && data[1] ^ data[2] == data[3]
            && Direction::from_byte(data[1]).is_some()
            && (b'0'..=b'4').contains(&data[2]);
        if !valid || self.flags.is_parked() {
            return Reply {
                bytes: vec![b'X'],
                delay: Some(self.config.nak_delay),
            };
        }
        self.flags.set(MotionFlags::USER_MOTION, data[2] != b'0');
        Reply::bytes([b'M'])
    }

    fn write_config(&mut self, data: &[u8]) -> Reply {
        if data.len() != CONFIG_FRAME_LEN + 2 {
            return Reply::bytes([b'X']);
        }
        let frame = &data[1..=CONFIG_FRAME_LEN];
        if xor_checksum(frame) != data[CONFIG_FRAME_LEN + 1] {
            return Reply::bytes([b'X']);
        }
        match parse_axis_config(frame) {
            Ok(config) => {
                self.axis_config = config;
                Reply::bytes([b'W'])
            }
            Err(_) => Reply::bytes([b'X']),
        }
    }
}

/// Simulated channel to a mount.
pub struct SimulatorChannel {
    handle: SimulatorHandle,
    pending: VecDeque<u8>,
    open: bool,
}

impl SimulatorChannel {
    /// Creates a channel to a fresh simulated mount.
    #[must_use]
    pub fn new(config: SimulatorConfig) -> Self {
        SimulatorHandle::new(config).channel()
    }

    /// Returns the handle of the mount behind this channel.
    #[must_use]
    pub const fn handle(&self) -> &SimulatorHandle {
        &self.handle
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }
}

impl Channel for SimulatorChannel {
    fn open(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if !self.open {
                self.open = true;
                self.pending.clear();
                self.handle.state().open_channels += 1;
                tracing::info!("simulator channel open");
            }
            Ok(())
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.open {
                self.open = false;
                self.pending.clear();
                self.handle.state().open_channels -= 1;
                tracing::info!("simulator channel closed");
            }
            Ok(())
        })
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn write<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.ensure_open()?;
            tracing::trace!("simulator received {:02x?}", data);
            let reply = self.handle.state().handle(data);
            if let Some(delay) = reply.delay {
                tokio::time::sleep(delay).await;
            }
            self.pending.extend(reply.bytes);
            Ok(())
        })
    }

    fn read_exactly(&mut self, len: usize) -> BoxFuture<'_, Result<Bytes>> {
        Box::pin(async move {
            self.ensure_open()?;
            if self.pending.len() < len {
                // Nothing else will arrive; behave like a port that times out.
                let timeout = self.handle.state().config.read_timeout;
                tokio::time::sleep(timeout).await;
                tracing::debug!("simulator read wanted {} bytes, had {}", len, self.pending.len());
                self.pending.clear();
                return Err(Error::Timeout {
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
            Ok(self.pending.drain(..len).collect())
        })
    }

    fn discard_pending(&mut self) -> BoxFuture<'_, Result<Bytes>> {
        Box::pin(async move {
            self.ensure_open()?;
            Ok(self.pending.drain(..).collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::{encode_move, encode_slew, encode_tracking, encode_write_config};
    use crate::protocol::parser::{parse_extended_status, parse_position};
    use crate::types::{AxisParameter, MoveRate, Precision};

    async fn open_sim(config: SimulatorConfig) -> SimulatorChannel {
        let mut channel = SimulatorChannel::new(config);
        channel.open().await.unwrap();
        channel
    }

    #[tokio::test]
    async fn test_position_request_yields_16_bytes() {
        let mut sim =
            open_sim(SimulatorConfig::default().position(Coordinates::new(10.5, -33.25))).await;
        sim.write(&[0x0D]).await.unwrap();
        let response = sim.read_exactly(16).await.unwrap();

        assert_eq!(&response[..], b"10.5000-33.2500#");
        assert_eq!(response[7], b'-');
        let position = parse_position(&response).unwrap();
        assert!((position.dec_degrees + 33.25).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_move_acknowledged() {
        let mut sim = open_sim(SimulatorConfig::default()).await;
        sim.write(&[b'M', b'N', b'2', b'N' ^ b'2']).await.unwrap();
        assert_eq!(&sim.read_exactly(1).await.unwrap()[..], b"M");
        assert!(sim.handle().flags().contains(MotionFlags::USER_MOTION));

        sim.write(&encode_move(Direction::North, MoveRate::STOP))
            .await
            .unwrap();
        assert_eq!(&sim.read_exactly(1).await.unwrap()[..], b"M");
        assert!(!sim.handle().flags().is_moving());
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_bad_checksum_rejected_after_delay() {
        let mut sim = open_sim(SimulatorConfig::default()).await;
        let started = tokio::time::Instant::now();
        sim.write(&[b'M', b'N', b'2', 0x00]).await.unwrap();
        assert!(started.elapsed() >= DEFAULT_NAK_DELAY);
        assert_eq!(&sim.read_exactly(1).await.unwrap()[..], b"X");
    }

    #[tokio::test]
    async fn test_slew_moves_mount() {
        let mut sim = open_sim(SimulatorConfig::default()).await;
        let target = Coordinates::new(5.5, 22.0);
        sim.write(&encode_slew(&target, Precision::Standard).unwrap())
            .await
            .unwrap();
        assert_eq!(&sim.read_exactly(1).await.unwrap()[..], b"G");
        assert_eq!(sim.handle().position(), target);
    }

    #[tokio::test]
    async fn test_legacy_firmware_sends_no_ack() {
        let mut sim =
            open_sim(SimulatorConfig::default().firmware(FirmwareVersion::new(60, 2))).await;
        sim.write(&encode_tracking(true)).await.unwrap();
        assert!(sim.discard_pending().await.unwrap().is_empty());
        assert!(sim.handle().flags().is_tracking());
    }

    #[tokio::test]
    async fn test_corrupt_status_checksum() {
        let mut sim = open_sim(SimulatorConfig::default()).await;
        sim.handle().set_corrupt_status_checksum(true);
        sim.write(&[0x0E]).await.unwrap();
        let response = sim.read_exactly(20).await.unwrap();
        assert!(parse_extended_status(&response).is_err());
        assert_eq!(sim.handle().requests(Opcode::ReadExtendedStatus), 1);
    }

    #[tokio::test]
    async fn test_write_config_stored() {
        let mut sim = open_sim(SimulatorConfig::default()).await;
        let mut config = FirmwareConfig::default();
        config.azimuth.set(AxisParameter::GuideRate, -300);
        sim.write(&encode_write_config(&config)).await.unwrap();
        assert_eq!(&sim.read_exactly(1).await.unwrap()[..], b"W");
        assert_eq!(sim.handle().axis_config(), config);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_read_times_out() {
        let mut sim = open_sim(SimulatorConfig::default()).await;
        sim.write(b"V").await.unwrap();
        let err = sim.read_exactly(16).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let handle = SimulatorHandle::new(SimulatorConfig::default());
        let mut first = handle.channel();
        first.open().await.unwrap();
        first.write(b"P").await.unwrap();
        first.close().await.unwrap();

        let mut second = handle.channel();
        second.open().await.unwrap();
        assert!(handle.flags().is_parked());
        assert_eq!(handle.open_channels(), 1);
        assert!(matches!(first.write(b"U").await, Err(Error::NotConnected)));
    }
}

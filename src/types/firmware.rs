//! Firmware version and axis configuration types.

use std::fmt;

/// Newest firmware major version that lacks command acknowledgements.
pub const LEGACY_FIRMWARE_MAX: u8 = 60;

/// Number of parameters stored per axis.
pub const AXIS_PARAMETER_COUNT: usize = 14;

/// Firmware version reported as `NN.S`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FirmwareVersion {
    /// Two-digit major version.
    pub major: u8,
    /// Single-digit sub version.
    pub sub: u8,
}

impl FirmwareVersion {
    /// Creates a new version.
    #[must_use]
    pub const fn new(major: u8, sub: u8) -> Self {
        Self { major, sub }
    }

    /// Returns true if the firmware acknowledges slew, tracking and park commands.
    ///
    /// Versions up to 60 silently accept those commands without replying.
    #[must_use]
    pub const fn acknowledges_commands(self) -> bool {
        self.major > LEGACY_FIRMWARE_MAX
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}.{}", self.major, self.sub)
    }
}

/// One of the two motor axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    /// Azimuth / right ascension axis.
    Azimuth,
    /// Altitude / declination axis.
    Altitude,
}

impl Axis {
    /// Both axes in wire order.
    pub const ALL: [Self; 2] = [Self::Azimuth, Self::Altitude];

    /// Two-character section tag.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Azimuth => "AZ",
            Self::Altitude => "AL",
        }
    }
}

/// Per-axis firmware parameter, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AxisParameter {
    /// Maximum slew rate.
    MaxRate = b'A',
    /// Goto slew rate.
    SlewRate = b'B',
    /// Acceleration ramp.
    Acceleration = b'C',
    /// Deceleration ramp.
    Deceleration = b'D',
    /// Guide rate.
    GuideRate = b'E',
    /// Backlash compensation, in steps.
    Backlash = b'F',
    /// Rate at which backlash is taken up.
    BacklashRate = b'G',
    /// Encoder steps per revolution (scaled).
    EncoderResolution = b'H',
    /// Lower soft limit.
    SoftLimitLow = b'I',
    /// Upper soft limit.
    SoftLimitHigh = b'J',
    /// Motor current setting.
    MotorCurrent = b'K',
    /// Park position.
    ParkPosition = b'L',
    /// Home sensor offset.
    HomeOffset = b'M',
    /// Tracking rate trim.
    TrackingRate = b'N',
}

impl AxisParameter {
    /// All parameters in wire order.
    pub const ALL: [Self; AXIS_PARAMETER_COUNT] = [
        Self::MaxRate,
        Self::SlewRate,
        Self::Acceleration,
        Self::Deceleration,
        Self::GuideRate,
        Self::Backlash,
        Self::BacklashRate,
        Self::EncoderResolution,
        Self::SoftLimitLow,
        Self::SoftLimitHigh,
        Self::MotorCurrent,
        Self::ParkPosition,
        Self::HomeOffset,
        Self::TrackingRate,
    ];

    /// Tag byte preceding the value on the wire.
    #[must_use]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Position of this parameter within an axis section.
    #[must_use]
    pub const fn index(self) -> usize {
        (self as u8 - b'A') as usize
    }
}

/// Firmware parameters of a single axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct AxisConfig {
    values: [i16; AXIS_PARAMETER_COUNT],
}

impl AxisConfig {
    /// Creates an axis configuration from raw values in wire order.
    #[must_use]
    pub const fn from_values(values: [i16; AXIS_PARAMETER_COUNT]) -> Self {
        Self { values }
    }

    /// Returns the value of a parameter.
    #[must_use]
    pub const fn get(&self, param: AxisParameter) -> i16 {
        self.values[param.index()]
    }

    /// Sets the value of a parameter.
    pub const fn set(&mut self, param: AxisParameter, value: i16) {
        self.values[param.index()] = value;
    }

    /// Returns all values in wire order.
    #[must_use]
    pub const fn values(&self) -> &[i16; AXIS_PARAMETER_COUNT] {
        &self.values
    }
}

/// Firmware configuration of both axes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FirmwareConfig {
    /// Azimuth axis parameters.
    pub azimuth: AxisConfig,
    /// Altitude axis parameters.
    pub altitude: AxisConfig,
}

impl FirmwareConfig {
    /// Returns the configuration of one axis.
    #[must_use]
    pub const fn axis(&self, axis: Axis) -> &AxisConfig {
        match axis {
            Axis::Azimuth => &self.azimuth,
            Axis::Altitude => &self.altitude,
        }
    }

    /// Returns the configuration of one axis, mutably.
    pub const fn axis_mut(&mut self, axis: Axis) -> &mut AxisConfig {
        match axis {
            Axis::Azimuth => &mut self.azimuth,
            Axis::Altitude => &mut self.altitude,
        }
    }
}

//! Position and motion status types.

use crate::error::{Error, Result};

/// Largest right ascension the mount accepts, in hours (exclusive).
pub const MAX_RA_HOURS: f64 = 24.0;

/// Largest declination magnitude, in degrees.
pub const MAX_DEC_DEGREES: f64 = 90.0;

/// A celestial position as exchanged with the mount.
///
/// Right ascension is in hours `[0, 24)`, declination in degrees
/// `[-90, 90]`. The astronomical meaning of the pair is the caller's
/// business; this crate only encodes it on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    /// Right ascension in hours.
    pub ra_hours: f64,
    /// Declination in degrees.
    pub dec_degrees: f64,
}

impl Coordinates {
    /// Creates a new coordinate pair.
    #[must_use]
    pub const fn new(ra_hours: f64, dec_degrees: f64) -> Self {
        Self {
            ra_hours,
            dec_degrees,
        }
    }

    /// Checks that both values are finite and within the mount's range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if either value is out of range.
    pub fn validate(&self) -> Result<()> {
        if !self.ra_hours.is_finite() || !(0.0..MAX_RA_HOURS).contains(&self.ra_hours) {
            return Err(Error::InvalidArgument {
                reason: format!("right ascension {} out of range (0 to 24)", self.ra_hours),
            });
        }
        if !self.dec_degrees.is_finite() || self.dec_degrees.abs() > MAX_DEC_DEGREES {
            return Err(Error::InvalidArgument {
                reason: format!("declination {} out of range (-90 to 90)", self.dec_degrees),
            });
        }
        Ok(())
    }
}

/// Wire precision used by the slew command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Precision {
    /// Four fractional digits (`HH.HHHH`).
    #[default]
    Standard,
    /// Five fractional digits (`HH.HHHHH`).
    Extended,
}

impl Precision {
    /// Number of fractional digits in each field.
    #[must_use]
    pub const fn fraction_digits(self) -> usize {
        match self {
            Self::Standard => 4,
            Self::Extended => 5,
        }
    }
}

/// Mount motion flags reported by the extended status poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MotionFlags(u8);

impl MotionFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);

    /// Sidereal tracking is on.
    pub const TRACKING: Self = Self(1 << 0);

    /// A manual (direction/rate) move is in progress.
    pub const USER_MOTION: Self = Self(1 << 1);

    /// A goto slew is in progress.
    pub const GOTO: Self = Self(1 << 2);

    /// The mount is parked.
    pub const PARKED: Self = Self(1 << 3);

    /// The mount has been aligned.
    pub const ALIGNED: Self = Self(1 << 4);

    /// Creates flags from a raw byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// Returns the raw byte value.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self.0
    }

    /// Check if a flag is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Sets or clears a flag.
    pub const fn set(&mut self, flag: Self, on: bool) {
        if on {
            self.0 |= flag.0;
        } else {
            self.0 &= !flag.0;
        }
    }

    /// Returns true if tracking is on.
    #[must_use]
    pub const fn is_tracking(self) -> bool {
        self.contains(Self::TRACKING)
    }

    /// Returns true if the mount is moving for any reason.
    #[must_use]
    pub const fn is_moving(self) -> bool {
        (self.0 & (Self::USER_MOTION.0 | Self::GOTO.0)) != 0
    }

    /// Returns true if the mount is parked.
    #[must_use]
    pub const fn is_parked(self) -> bool {
        self.contains(Self::PARKED)
    }

    /// Returns true if the mount is aligned.
    #[must_use]
    pub const fn is_aligned(self) -> bool {
        self.contains(Self::ALIGNED)
    }
}

impl std::ops::BitOr for MotionFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Result of the extended status poll.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtendedStatus {
    /// Current position.
    pub position: Coordinates,
    /// Motion flags.
    pub flags: MotionFlags,
}

/// Manual move direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Direction {
    /// Towards increasing declination.
    North = b'N',
    /// Towards decreasing declination.
    South = b'S',
    /// Towards increasing right ascension.
    East = b'E',
    /// Towards decreasing right ascension.
    West = b'W',
}

impl Direction {
    /// Parses a direction byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'N' => Some(Self::North),
            b'S' => Some(Self::South),
            b'E' => Some(Self::East),
            b'W' => Some(Self::West),
            _ => None,
        }
    }
}

impl From<Direction> for u8 {
    fn from(dir: Direction) -> Self {
        dir as Self
    }
}

/// Manual move rate, 0 (stop) to 4 (fastest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MoveRate(u8);

impl MoveRate {
    /// Stops motion on the axis.
    pub const STOP: Self = Self(0);

    /// Fastest manual rate.
    pub const MAX: Self = Self(4);

    /// Creates a rate, rejecting values above 4.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `rate > 4`.
    pub fn new(rate: u8) -> Result<Self> {
        if rate > Self::MAX.0 {
            return Err(Error::InvalidArgument {
                reason: format!("move rate {rate} out of range (0 to 4)"),
            });
        }
        Ok(Self(rate))
    }

    /// Returns the numeric rate.
    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }

    /// Returns the ASCII digit sent on the wire.
    #[must_use]
    pub const fn as_ascii(self) -> u8 {
        b'0' + self.0
    }
}

/// Device verdict on a slew request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlewOutcome {
    /// The device accepted the target (`'G'`).
    Accepted,
    /// The device refused the target (`'X'`).
    Rejected,
    /// Legacy firmware; the device sends no verdict.
    Unacknowledged,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinates_validate() {
        assert!(Coordinates::new(0.0, 0.0).validate().is_ok());
        assert!(Coordinates::new(23.9999, -90.0).validate().is_ok());
        assert!(Coordinates::new(24.0, 0.0).validate().is_err());
        assert!(Coordinates::new(-0.1, 0.0).validate().is_err());
        assert!(Coordinates::new(1.0, 90.5).validate().is_err());
        assert!(Coordinates::new(f64::NAN, 0.0).validate().is_err());
    }

    #[test]
    fn test_motion_flags() {
        let mut flags = MotionFlags::TRACKING | MotionFlags::ALIGNED;
        assert!(flags.is_tracking());
        assert!(flags.is_aligned());
        assert!(!flags.is_moving());

        flags.set(MotionFlags::GOTO, true);
        assert!(flags.is_moving());
        assert_eq!(flags.as_byte(), 0x15);

        flags.set(MotionFlags::TRACKING, false);
        assert!(!flags.is_tracking());
    }

    #[test]
    fn test_move_rate_bounds() {
        assert_eq!(MoveRate::new(2).unwrap().as_ascii(), b'2');
        assert_eq!(MoveRate::STOP.as_ascii(), b'0');
        assert!(MoveRate::new(5).is_err());
    }

    #[test]
    fn test_direction_bytes() {
        assert_eq!(u8::from(Direction::North), b'N');
        assert_eq!(Direction::from_byte(b'W'), Some(Direction::West));
        assert_eq!(Direction::from_byte(b'x'), None);
    }
}

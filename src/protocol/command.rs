//! Command opcodes for the mount protocol.
//!
//! Every request starts with an opcode byte, optionally followed by
//! fixed-width parameters. Each opcode has a fixed response length; the
//! protocol carries no delimiters, so the length is the only framing.

/// Length of the read-position response.
pub const POSITION_RESPONSE_LEN: usize = 16;

/// Length of the extended-status response.
pub const STATUS_RESPONSE_LEN: usize = 20;

/// Length of the firmware-version response.
pub const VERSION_RESPONSE_LEN: usize = 5;

/// Length of one axis section in the configuration frame.
pub const AXIS_SECTION_LEN: usize = 3 + 14 * 4;

/// Length of the axis configuration frame.
pub const CONFIG_FRAME_LEN: usize = 2 * AXIS_SECTION_LEN;

/// Length of a single-byte acknowledgement.
pub const ACK_LEN: usize = 1;

/// Command opcodes sent to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Read position, returns 16 bytes.
    ReadPosition = 0x0D,
    /// Read position plus motion flags, returns 20 bytes.
    ReadExtendedStatus = 0x0E,
    /// Read firmware version, returns `NN.S\0`.
    FirmwareVersion = b'V',
    /// Slew with four fractional digits.
    Slew = b'S',
    /// Slew with five fractional digits.
    SlewExtended = b's',
    /// Manual move in a direction at a rate.
    Move = b'M',
    /// Tracking on/off.
    Tracking = b'T',
    /// Park the mount.
    Park = b'P',
    /// Unpark the mount.
    Unpark = b'U',
    /// Read firmware axis configuration, returns 118 bytes.
    ReadConfig = b'C',
    /// Write firmware axis configuration.
    WriteConfig = b'W',
}

impl Opcode {
    /// Parses an opcode byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x0D => Some(Self::ReadPosition),
            0x0E => Some(Self::ReadExtendedStatus),
            b'V' => Some(Self::FirmwareVersion),
            b'S' => Some(Self::Slew),
            b's' => Some(Self::SlewExtended),
            b'M' => Some(Self::Move),
            b'T' => Some(Self::Tracking),
            b'P' => Some(Self::Park),
            b'U' => Some(Self::Unpark),
            b'C' => Some(Self::ReadConfig),
            b'W' => Some(Self::WriteConfig),
            _ => None,
        }
    }

    /// Human-readable command name used in logs and errors.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ReadPosition => "read position",
            Self::ReadExtendedStatus => "read extended status",
            Self::FirmwareVersion => "firmware version",
            Self::Slew => "slew",
            Self::SlewExtended => "extended slew",
            Self::Move => "move",
            Self::Tracking => "tracking",
            Self::Park => "park",
            Self::Unpark => "unpark",
            Self::ReadConfig => "read axis config",
            Self::WriteConfig => "write axis config",
        }
    }

    /// Response length for firmware that acknowledges commands.
    #[must_use]
    pub const fn response_len(self) -> usize {
        match self {
            Self::ReadPosition => POSITION_RESPONSE_LEN,
            Self::ReadExtendedStatus => STATUS_RESPONSE_LEN,
            Self::FirmwareVersion => VERSION_RESPONSE_LEN,
            Self::ReadConfig => CONFIG_FRAME_LEN,
            Self::Slew
            | Self::SlewExtended
            | Self::Move
            | Self::Tracking
            | Self::Park
            | Self::Unpark
            | Self::WriteConfig => ACK_LEN,
        }
    }

    /// Returns true if legacy firmware sends no reply to this command.
    #[must_use]
    pub const fn is_firmware_gated(self) -> bool {
        matches!(
            self,
            Self::Slew | Self::SlewExtended | Self::Tracking | Self::Park | Self::Unpark
        )
    }
}

impl From<Opcode> for u8 {
    fn from(cmd: Opcode) -> Self {
        cmd as Self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_values() {
        assert_eq!(Opcode::ReadPosition as u8, 0x0D);
        assert_eq!(Opcode::Move as u8, b'M');
        assert_eq!(u8::from(Opcode::SlewExtended), b's');
    }

    #[test]
    fn test_opcode_from_byte() {
        assert_eq!(Opcode::from_byte(0x0E), Some(Opcode::ReadExtendedStatus));
        assert_eq!(Opcode::from_byte(b'W'), Some(Opcode::WriteConfig));
        assert_eq!(Opcode::from_byte(b'?'), None);
    }

    #[test]
    fn test_response_lengths() {
        assert_eq!(CONFIG_FRAME_LEN, 118);
        assert_eq!(Opcode::ReadConfig.response_len(), 118);
        assert_eq!(Opcode::Park.response_len(), 1);
        assert!(Opcode::Tracking.is_firmware_gated());
        assert!(!Opcode::Move.is_firmware_gated());
    }
}

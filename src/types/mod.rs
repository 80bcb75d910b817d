//! Data types exchanged with the mount.
//!
//! - Coordinates, motion flags and manual move parameters
//! - Firmware version and per-axis configuration

pub mod firmware;
pub mod position;

pub use firmware::{
    AXIS_PARAMETER_COUNT, Axis, AxisConfig, AxisParameter, FirmwareConfig, FirmwareVersion,
    LEGACY_FIRMWARE_MAX,
};
pub use position::{
    Coordinates, Direction, ExtendedStatus, MotionFlags, MoveRate, Precision, SlewOutcome,
};

//! Frame encoding for the mount protocol.
//!
//! Numbers travel as fixed-width ASCII decimal with a literal `.` and, for
//! declination, an explicit sign character:
//! ```text
//! right ascension   HH.HHHH      (standard)   HH.HHHHH     (extended)
//! declination      sDD.DDDD      (standard)  sDD.DDDDD     (extended)
//! ```
//! Commands that carry coordinates end with an XOR checksum of every byte
//! after the opcode.
//!
//! Both directions are encoded here: requests for the session and
//! responses for the simulator.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::Result;
use crate::protocol::command::{CONFIG_FRAME_LEN, Opcode};
use crate::types::{
    Axis, AxisParameter, Coordinates, Direction, ExtendedStatus, FirmwareConfig,
    FirmwareVersion, MoveRate, Precision,
};

/// Integer digits in every coordinate field.
pub const INTEGER_DIGITS: usize = 2;

/// Right ascension of the "impossible" abort target, in hours.
pub const ABORT_SENTINEL: f64 = 99.9999;

/// Header byte of the extended-status response.
pub const STATUS_HEADER: u8 = b'E';

/// Terminator of the read-position response.
pub const POSITION_TERMINATOR: u8 = b'#';

/// Separator between configuration entries.
pub const CONFIG_SEPARATOR: u8 = b'\r';

/// Running XOR of a byte range.
#[must_use]
pub fn xor_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

/// Scales a non-negative value to an integer count of `10^-frac_digits` units.
fn scale(value: f64, frac_digits: usize) -> u64 {
    let factor = 10f64.powi(frac_digits as i32);
    // Callers validate range; rounding keeps 12.34565 from truncating.
    (value.abs() * factor).round() as u64
}

/// Writes `scaled` as `II.FFFF` with the given digit counts.
fn put_scaled(buf: &mut BytesMut, scaled: u64, frac_digits: usize) {
    let divisor = 10u64.pow(frac_digits as u32);
    let text = format!(
        "{:0iw$}.{:0fw$}",
        scaled / divisor,
        scaled % divisor,
        iw = INTEGER_DIGITS,
        fw = frac_digits
    );
    buf.put_slice(text.as_bytes());
}

/// Writes a right ascension field. 24h wraps to zero after rounding.
pub fn put_ra(buf: &mut BytesMut, hours: f64, precision: Precision) {
    let frac = precision.fraction_digits();
    let mut scaled = scale(hours, frac);
    if hours < 24.0 && scaled == 24 * 10u64.pow(frac as u32) {
        scaled = 0;
    }
    put_scaled(buf, scaled, frac);
}

/// Writes a sign character followed by a declination magnitude.
///
/// Values that round to zero are always sent as `+`.
pub fn put_signed(buf: &mut BytesMut, degrees: f64, precision: Precision) {
    let frac = precision.fraction_digits();
    let scaled = scale(degrees, frac);
    let sign = if degrees < 0.0 && scaled != 0 { b'-' } else { b'+' };
    buf.put_u8(sign);
    put_scaled(buf, scaled, frac);
}

/// Encodes a slew request without validating the target.
fn encode_slew_raw(ra_hours: f64, dec_degrees: f64, precision: Precision) -> Bytes {
    let opcode = match precision {
        Precision::Standard => Opcode::Slew,
        Precision::Extended => Opcode::SlewExtended,
    };
    let field = INTEGER_DIGITS + 1 + precision.fraction_digits();
    let mut buf = BytesMut::with_capacity(2 * field + 3);
    buf.put_u8(opcode.into());
    put_ra(&mut buf, ra_hours, precision);
    put_signed(&mut buf, dec_degrees, precision);
    let checksum = xor_checksum(&buf[1..]);
    buf.put_u8(checksum);
    buf.freeze()
}

/// Encodes a slew request.
///
/// # Errors
///
/// Returns [`crate::Error::InvalidArgument`] if the target is out of range.
pub fn encode_slew(target: &Coordinates, precision: Precision) -> Result<Bytes> {
    target.validate()?;
    Ok(encode_slew_raw(target.ra_hours, target.dec_degrees, precision))
}

/// Encodes the abort request: a standard slew to an unreachable target.
#[must_use]
pub fn encode_abort() -> Bytes {
    encode_slew_raw(ABORT_SENTINEL, ABORT_SENTINEL, Precision::Standard)
}

/// Encodes a manual move request: opcode, direction, rate, XOR of the two.
#[must_use]
pub fn encode_move(direction: Direction, rate: MoveRate) -> Bytes {
    let dir = u8::from(direction);
    let rate = rate.as_ascii();
    Bytes::copy_from_slice(&[Opcode::Move.into(), dir, rate, dir ^ rate])
}

/// Encodes the tracking on/off request.
#[must_use]
pub fn encode_tracking(enabled: bool) -> Bytes {
    let arg = if enabled { b'1' } else { b'0' };
    Bytes::copy_from_slice(&[Opcode::Tracking.into(), arg])
}

/// Encodes a request that is just its opcode.
#[must_use]
pub fn encode_simple(opcode: Opcode) -> Bytes {
    Bytes::copy_from_slice(&[opcode.into()])
}

/// Encodes the 118-byte axis configuration frame.
///
/// Each axis section is its two-character tag and a carriage return,
/// followed by fourteen `tag, value (i16 big-endian), '\r'` entries.
#[must_use]
pub fn encode_config_frame(config: &FirmwareConfig) -> BytesMut {
    let mut buf = BytesMut::with_capacity(CONFIG_FRAME_LEN);
    for axis in Axis::ALL {
        buf.put_slice(axis.tag().as_bytes());
        buf.put_u8(CONFIG_SEPARATOR);
        let values = config.axis(axis);
        for param in AxisParameter::ALL {
            buf.put_u8(param.tag());
            buf.put_i16(values.get(param));
            buf.put_u8(CONFIG_SEPARATOR);
        }
    }
    buf
}

/// Encodes the write-configuration request: opcode, frame, XOR of the frame.
#[must_use]
pub fn encode_write_config(config: &FirmwareConfig) -> Bytes {
    let frame = encode_config_frame(config);
    let mut buf = BytesMut::with_capacity(CONFIG_FRAME_LEN + 2);
    buf.put_u8(Opcode::WriteConfig.into());
    buf.put_slice(&frame);
    buf.put_u8(xor_checksum(&frame));
    buf.freeze()
}

/// Encodes a 16-byte read-position response.
#[must_use]
pub fn encode_position_response(position: &Coordinates) -> Bytes {
    let mut buf = BytesMut::with_capacity(16);
    put_ra(&mut buf, position.ra_hours, Precision::Standard);
    put_signed(&mut buf, position.dec_degrees, Precision::Standard);
    buf.put_u8(POSITION_TERMINATOR);
    buf.freeze()
}

/// Encodes a 20-byte extended-status response.
#[must_use]
pub fn encode_status_response(status: &ExtendedStatus) -> Bytes {
    let mut buf = BytesMut::with_capacity(20);
    buf.put_u8(STATUS_HEADER);
    put_ra(&mut buf, status.position.ra_hours, Precision::Extended);
    put_signed(&mut buf, status.position.dec_degrees, Precision::Extended);
    buf.put_u8(status.flags.as_byte());
    let checksum = xor_checksum(&buf[1..]);
    buf.put_u8(checksum);
    buf.freeze()
}

/// Encodes a 5-byte `NN.S\0` firmware-version response.
#[must_use]
pub fn encode_version_response(version: FirmwareVersion) -> Bytes {
    let mut buf = BytesMut::with_capacity(5);
    buf.put_slice(format!("{:02}.{}", version.major % 100, version.sub % 10).as_bytes());
    buf.put_u8(0);
    buf.freeze()
}

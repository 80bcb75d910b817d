//! Response parsing for the mount protocol.
//!
//! Every parser validates the fixed layout before trusting any field and
//! reports the first defect as a [`FrameError`] carrying the raw bytes.

use crate::error::FrameError;
use crate::protocol::command::{
    AXIS_SECTION_LEN, CONFIG_FRAME_LEN, POSITION_RESPONSE_LEN, STATUS_RESPONSE_LEN,
    VERSION_RESPONSE_LEN,
};
use crate::protocol::frame::{
    CONFIG_SEPARATOR, INTEGER_DIGITS, POSITION_TERMINATOR, STATUS_HEADER, xor_checksum,
};
use crate::types::{
    AXIS_PARAMETER_COUNT, Axis, AxisConfig, AxisParameter, Coordinates, ExtendedStatus,
    FirmwareConfig, FirmwareVersion, MotionFlags, Precision, SlewOutcome,
};

type ParseResult<T> = std::result::Result<T, FrameError>;

fn check_len(data: &[u8], expected: usize) -> ParseResult<()> {
    if data.len() == expected {
        Ok(())
    } else {
        Err(FrameError::Length {
            expected,
            got: data.len(),
            bytes: data.to_vec(),
        })
    }
}

fn check_byte(data: &[u8], offset: usize, expected: u8) -> ParseResult<()> {
    let actual = data[offset];
    if actual == expected {
        Ok(())
    } else {
        Err(FrameError::Separator {
            offset,
            expected,
            actual,
            bytes: data.to_vec(),
        })
    }
}

/// Parses an unsigned `II.FFFF` field starting at `offset`.
fn parse_fixed(
    data: &[u8],
    offset: usize,
    precision: Precision,
    field: &'static str,
) -> ParseResult<f64> {
    let frac_digits = precision.fraction_digits();
    let width = INTEGER_DIGITS + 1 + frac_digits;
    let numeric = || FrameError::Numeric {
        field,
        offset,
        bytes: data.to_vec(),
    };

    let text = data.get(offset..offset + width).ok_or_else(numeric)?;
    let mut scaled: u64 = 0;
    for (i, &byte) in text.iter().enumerate() {
        if i == INTEGER_DIGITS {
            if byte != b'.' {
                return Err(numeric());
            }
            continue;
        }
        if !byte.is_ascii_digit() {
            return Err(numeric());
        }
        scaled = scaled * 10 + u64::from(byte - b'0');
    }

    #[allow(clippy::cast_precision_loss)]
    let value = scaled as f64 / 10f64.powi(frac_digits as i32);
    Ok(value)
}

/// Parses a sign character followed by an unsigned field.
fn parse_signed(
    data: &[u8],
    offset: usize,
    precision: Precision,
    field: &'static str,
) -> ParseResult<f64> {
    let magnitude = parse_fixed(data, offset + 1, precision, field)?;
    match data[offset] {
        b'+' => Ok(magnitude),
        b'-' => Ok(-magnitude),
        _ => Err(FrameError::Numeric {
            field,
            offset,
            bytes: data.to_vec(),
        }),
    }
}

/// Parses the read-position response.
///
/// Format:
/// ```text
/// [ra:7 HH.HHHH] [sign:1] [dec:7 DD.DDDD] ['#']
/// ```
pub fn parse_position(data: &[u8]) -> ParseResult<Coordinates> {
    check_len(data, POSITION_RESPONSE_LEN)?;
    check_byte(data, POSITION_RESPONSE_LEN - 1, POSITION_TERMINATOR)?;
    let ra_hours = parse_fixed(data, 0, Precision::Standard, "right ascension")?;
    let dec_degrees = parse_signed(data, 7, Precision::Standard, "declination")?;
    Ok(Coordinates::new(ra_hours, dec_degrees))
}

/// Parses the extended-status response.
///
/// Format:
/// ```text
/// ['E'] [ra:8 HH.HHHHH] [sign:1] [dec:8 DD.DDDDD] [flags:1] [xor of bytes 1..=18]
/// ```
pub fn parse_extended_status(data: &[u8]) -> ParseResult<ExtendedStatus> {
    check_len(data, STATUS_RESPONSE_LEN)?;
    check_byte(data, 0, STATUS_HEADER)?;

    let computed = xor_checksum(&data[1..STATUS_RESPONSE_LEN - 1]);
    let received = data[STATUS_RESPONSE_LEN - 1];
    if computed != received {
        return Err(FrameError::Checksum {
            computed,
            received,
            bytes: data.to_vec(),
        });
    }

    let ra_hours = parse_fixed(data, 1, Precision::Extended, "right ascension")?;
    let dec_degrees = parse_signed(data, 9, Precision::Extended, "declination")?;
    Ok(ExtendedStatus {
        position: Coordinates::new(ra_hours, dec_degrees),
        flags: MotionFlags::from_byte(data[18]),
    })
}

/// Parses the `NN.S\0` firmware-version response.
pub fn parse_firmware_version(data: &[u8]) -> ParseResult<FirmwareVersion> {
    check_len(data, VERSION_RESPONSE_LEN)?;
    check_byte(data, 2, b'.')?;
    check_byte(data, 4, 0)?;

    let digit = |offset: usize| -> ParseResult<u8> {
        let byte = data[offset];
        if byte.is_ascii_digit() {
            Ok(byte - b'0')
        } else {
            Err(FrameError::Numeric {
                field: "firmware version",
                offset,
                bytes: data.to_vec(),
            })
        }
    };

    Ok(FirmwareVersion::new(digit(0)? * 10 + digit(1)?, digit(3)?))
}

/// Parses a single-byte acknowledgement that must be one of `expected`.
pub fn parse_ack(data: &[u8], expected: &[u8]) -> ParseResult<u8> {
    check_len(data, 1)?;
    let actual = data[0];
    if expected.contains(&actual) {
        Ok(actual)
    } else {
        Err(FrameError::Acknowledgement {
            expected: expected.to_vec(),
            actual,
        })
    }
}

/// Parses the slew verdict: `'G'` accepted, `'X'` rejected.
pub fn parse_slew_outcome(data: &[u8]) -> ParseResult<SlewOutcome> {
    match parse_ack(data, b"GX")? {
        b'G' => Ok(SlewOutcome::Accepted),
        _ => Ok(SlewOutcome::Rejected),
    }
}

/// Parses a slew request as the device receives it.
///
/// The target is returned unvalidated so the abort sentinel survives.
pub fn parse_slew_request(data: &[u8]) -> ParseResult<(Precision, Coordinates)> {
    let precision = match data.first() {
        Some(&b'S') => Precision::Standard,
        Some(&b's') => Precision::Extended,
        _ => {
            return Err(FrameError::Numeric {
                field: "slew opcode",
                offset: 0,
                bytes: data.to_vec(),
            });
        }
    };
    let field = INTEGER_DIGITS + 1 + precision.fraction_digits();
    let len = 2 * field + 3;
    check_len(data, len)?;

    let computed = xor_checksum(&data[1..len - 1]);
    let received = data[len - 1];
    if computed != received {
        return Err(FrameError::Checksum {
            computed,
            received,
            bytes: data.to_vec(),
        });
    }

    let ra_hours = parse_fixed(data, 1, precision, "right ascension")?;
    let dec_degrees = parse_signed(data, 1 + field, precision, "declination")?;
    Ok((precision, Coordinates::new(ra_hours, dec_degrees)))
}

fn parse_axis_section(data: &[u8], axis: Axis, start: usize) -> ParseResult<AxisConfig> {
    let tag = axis.tag().as_bytes();
    if &data[start..start + 2] != tag {
        return Err(FrameError::SectionTag {
            expected: axis.tag(),
            offset: start,
            bytes: data.to_vec(),
        });
    }
    check_byte(data, start + 2, CONFIG_SEPARATOR)?;

    let mut values = [0i16; AXIS_PARAMETER_COUNT];
    for param in AxisParameter::ALL {
        let entry = start + 3 + param.index() * 4;
        check_byte(data, entry, param.tag())?;
        check_byte(data, entry + 3, CONFIG_SEPARATOR)?;
        values[param.index()] = i16::from_be_bytes([data[entry + 1], data[entry + 2]]);
    }
    Ok(AxisConfig::from_values(values))
}

/// Parses the 118-byte axis configuration frame.
///
/// Format (per axis, `AZ` then `AL`):
/// ```text
/// [tag:2] ['\r'] 14 × ([param tag:1] [value:2 i16 BE] ['\r'])
/// ```
pub fn parse_axis_config(data: &[u8]) -> ParseResult<FirmwareConfig> {
    check_len(data, CONFIG_FRAME_LEN)?;
    Ok(FirmwareConfig {
        azimuth: parse_axis_section(data, Axis::Azimuth, 0)?,
        altitude: parse_axis_section(data, Axis::Altitude, AXIS_SECTION_LEN)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::{
        encode_abort, encode_config_frame, encode_position_response, encode_slew,
        encode_status_response, encode_version_response,
    };

    #[test]
    fn test_parse_position() {
        let position = parse_position(b"12.3456-07.5000#").unwrap();
        assert!((position.ra_hours - 12.3456).abs() < 1e-9);
        assert!((position.dec_degrees + 7.5).abs() < 1e-9);
    }

    #[test]
    fn test_parse_position_bad_terminator() {
        let err = parse_position(b"12.3456-07.5000X").unwrap_err();
        assert!(matches!(err, FrameError::Separator { offset: 15, .. }));
    }

    #[test]
    fn test_parse_position_bad_sign() {
        let err = parse_position(b"12.3456*07.5000#").unwrap_err();
        assert!(matches!(err, FrameError::Numeric { offset: 7, .. }));
    }

    #[test]
    fn test_parse_position_short() {
        let err = parse_position(b"12.3456").unwrap_err();
        assert!(matches!(
            err,
            FrameError::Length {
                expected: 16,
                got: 7,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_extended_status() {
        let status = ExtendedStatus {
            position: Coordinates::new(18.5, -30.125),
            flags: MotionFlags::TRACKING | MotionFlags::ALIGNED,
        };
        let frame = encode_status_response(&status);
        let parsed = parse_extended_status(&frame).unwrap();
        assert!((parsed.position.ra_hours - 18.5).abs() < 1e-9);
        assert!((parsed.position.dec_degrees + 30.125).abs() < 1e-9);
        assert_eq!(parsed.flags, status.flags);
    }

    #[test]
    fn test_parse_extended_status_checksum_mismatch() {
        let frame = encode_status_response(&ExtendedStatus {
            position: Coordinates::new(1.0, 1.0),
            flags: MotionFlags::NONE,
        });
        let mut corrupted = frame.to_vec();
        corrupted[19] ^= 0xff;
        let err = parse_extended_status(&corrupted).unwrap_err();
        assert!(matches!(err, FrameError::Checksum { .. }));
    }

    #[test]
    fn test_parse_firmware_version() {
        let version = parse_firmware_version(&encode_version_response(FirmwareVersion::new(
            62, 1,
        )))
        .unwrap();
        assert_eq!(version, FirmwareVersion::new(62, 1));
        assert!(parse_firmware_version(b"62,1\0").is_err());
        assert!(parse_firmware_version(b"6a.1\0").is_err());
    }

    #[test]
    fn test_parse_ack() {
        assert_eq!(parse_ack(b"M", b"M").unwrap(), b'M');
        assert!(matches!(
            parse_ack(b"X", b"M").unwrap_err(),
            FrameError::Acknowledgement { actual: b'X', .. }
        ));
        assert!(parse_ack(b"", b"M").is_err());
    }

    #[test]
    fn test_parse_slew_outcome() {
        assert_eq!(parse_slew_outcome(b"G").unwrap(), SlewOutcome::Accepted);
        assert_eq!(parse_slew_outcome(b"X").unwrap(), SlewOutcome::Rejected);
        assert!(parse_slew_outcome(b"?").is_err());
    }

    #[test]
    fn test_parse_slew_request() {
        let target = Coordinates::new(6.75, -20.5);
        let frame = encode_slew(&target, Precision::Extended).unwrap();
        let (precision, parsed) = parse_slew_request(&frame).unwrap();
        assert_eq!(precision, Precision::Extended);
        assert!((parsed.ra_hours - 6.75).abs() < 1e-9);
        assert!((parsed.dec_degrees + 20.5).abs() < 1e-9);

        let (_, sentinel) = parse_slew_request(&encode_abort()).unwrap();
        assert!(sentinel.ra_hours > 24.0);

        let mut corrupted = frame.to_vec();
        corrupted[3] = b'9';
        assert!(matches!(
            parse_slew_request(&corrupted).unwrap_err(),
            FrameError::Checksum { .. }
        ));
    }

    #[test]
    fn test_position_sign_placement() {
        let frame = encode_position_response(&Coordinates::new(0.25, -0.5));
        assert_eq!(frame[7], b'-');
        let parsed = parse_position(&frame).unwrap();
        assert!((parsed.dec_degrees + 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_axis_config_round_trip() {
        let mut config = FirmwareConfig::default();
        for (i, param) in AxisParameter::ALL.iter().enumerate() {
            let i = i16::try_from(i).unwrap();
            config.azimuth.set(*param, i16::MIN + i);
            config.altitude.set(*param, i16::MAX - i * 1000);
        }
        config.altitude.set(AxisParameter::Backlash, -1);
        config.azimuth.set(AxisParameter::Backlash, 0);

        let frame = encode_config_frame(&config);
        assert_eq!(parse_axis_config(&frame).unwrap(), config);
    }

    #[test]
    fn test_axis_config_missing_section() {
        let mut frame = encode_config_frame(&FirmwareConfig::default()).to_vec();
        frame[AXIS_SECTION_LEN] = b'X';
        let err = parse_axis_config(&frame).unwrap_err();
        assert!(matches!(
            err,
            FrameError::SectionTag {
                expected: "AL",
                offset: AXIS_SECTION_LEN,
                ..
            }
        ));
    }

    #[test]
    fn test_axis_config_separator_mismatch() {
        let mut frame = encode_config_frame(&FirmwareConfig::default()).to_vec();
        frame[6] = b'\n';
        let err = parse_axis_config(&frame).unwrap_err();
        assert!(matches!(err, FrameError::Separator { offset: 6, .. }));
    }
}

//! Protocol definitions for mount communication.
//!
//! This module contains the low-level protocol types including:
//! - Command opcodes and their fixed response lengths
//! - Fixed-width ASCII field and checksum encoding
//! - Response validation and parsing

pub mod command;
pub mod frame;
pub mod parser;

pub use command::{
    ACK_LEN, CONFIG_FRAME_LEN, Opcode, POSITION_RESPONSE_LEN, STATUS_RESPONSE_LEN,
    VERSION_RESPONSE_LEN,
};
pub use frame::{
    ABORT_SENTINEL, encode_abort, encode_config_frame, encode_move, encode_simple, encode_slew,
    encode_tracking, encode_write_config, xor_checksum,
};
pub use parser::{
    parse_ack, parse_axis_config, parse_extended_status, parse_firmware_version, parse_position,
    parse_slew_outcome, parse_slew_request,
};

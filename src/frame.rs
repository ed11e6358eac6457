//! MBAP framing for Modbus TCP
//!
//! ```text
//! | transaction id (2) | protocol id (2) = 0 | length (2) | unit id (1) | PDU |
//! ```
//!
//! `length` counts the unit id plus the PDU. Frames are accumulated in a
//! [`BytesMut`] and split off once complete, so partial reads and several
//! frames in one segment are both handled by the same loop.

use bytes::{Buf, BufMut, BytesMut};

use crate::constants::{MAX_MBAP_LENGTH, MAX_TCP_FRAME_SIZE, MBAP_HEADER_LEN, MODBUS_PROTOCOL_ID};
use crate::error::{ModbusError, ModbusResult};
use crate::pdu::ModbusPdu;

/// MBAP header fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    pub length: u16,
    pub unit_id: u8,
}

impl MbapHeader {
    /// Header for a PDU of `pdu_len` bytes
    pub fn new(transaction_id: u16, unit_id: u8, pdu_len: usize) -> Self {
        Self {
            transaction_id,
            protocol_id: MODBUS_PROTOCOL_ID,
            length: (pdu_len + 1) as u16,
            unit_id,
        }
    }
}

/// Encode a complete MBAP frame
pub fn encode_frame(transaction_id: u16, unit_id: u8, pdu: &ModbusPdu) -> Vec<u8> {
    let header = MbapHeader::new(transaction_id, unit_id, pdu.len());
    let mut buf = BytesMut::with_capacity(MBAP_HEADER_LEN + 1 + pdu.len());
    buf.put_u16(header.transaction_id);
    buf.put_u16(header.protocol_id);
    buf.put_u16(header.length);
    buf.put_u8(header.unit_id);
    buf.put_slice(pdu.as_slice());
    buf.to_vec()
}

/// Split one complete frame off the front of `buf`.
///
/// Returns `Ok(None)` while more bytes are needed. A header with a non-zero
/// protocol id or an impossible length is a [`ModbusError::Frame`]; the
/// stream cannot be resynchronised after that.
pub fn decode_frame(buf: &mut BytesMut) -> ModbusResult<Option<(MbapHeader, ModbusPdu)>> {
    if buf.len() < MBAP_HEADER_LEN + 1 {
        return Ok(None);
    }

    let protocol_id = u16::from_be_bytes([buf[2], buf[3]]);
    if protocol_id != MODBUS_PROTOCOL_ID {
        return Err(ModbusError::frame(format!(
            "Invalid protocol id: {}",
            protocol_id
        )));
    }

    let length = u16::from_be_bytes([buf[4], buf[5]]) as usize;
    // unit id + function code at minimum
    if !(2..=MAX_MBAP_LENGTH).contains(&length) {
        return Err(ModbusError::frame(format!(
            "Invalid MBAP length: {} (expected 2..={})",
            length, MAX_MBAP_LENGTH
        )));
    }

    let frame_len = MBAP_HEADER_LEN + length;
    debug_assert!(frame_len <= MAX_TCP_FRAME_SIZE);
    if buf.len() < frame_len {
        buf.reserve(frame_len - buf.len());
        return Ok(None);
    }

    let mut frame = buf.split_to(frame_len);
    let header = MbapHeader {
        transaction_id: frame.get_u16(),
        protocol_id: frame.get_u16(),
        length: frame.get_u16(),
        unit_id: frame.get_u8(),
    };
    let pdu = ModbusPdu::from_slice(&frame)?;

    Ok(Some((header, pdu)))
}

//! Modbus protocol definitions
//!
//! Function codes, exception codes and the request/response structures shared
//! by the client session and the server dispatcher. Both sides convert to and
//! from [`ModbusPdu`] here so the encoding lives in exactly one place.

use std::fmt;

use crate::constants::{
    COIL_OFF, COIL_ON, EXCEPTION_FLAG, EXCEPTION_ILLEGAL_DATA_ADDRESS,
    EXCEPTION_ILLEGAL_DATA_VALUE, EXCEPTION_ILLEGAL_FUNCTION, EXCEPTION_SERVER_DEVICE_FAILURE,
    FC_READ_COILS, FC_READ_DISCRETE_INPUTS, FC_READ_HOLDING_REGISTERS, FC_WRITE_MULTIPLE_COILS,
    FC_WRITE_MULTIPLE_REGISTERS, FC_WRITE_SINGLE_COIL,
};
use crate::error::{ModbusError, ModbusResult};
use crate::pdu::{pack_bits, unpack_bits, ModbusPdu, PduBuilder};

/// Modbus slave/unit identifier
pub type SlaveId = u8;

/// Function codes handled by the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ModbusFunction {
    /// Read Coils (0x01)
    ReadCoils = FC_READ_COILS,
    /// Read Discrete Inputs (0x02)
    ReadDiscreteInputs = FC_READ_DISCRETE_INPUTS,
    /// Read Holding Registers (0x03)
    ReadHoldingRegisters = FC_READ_HOLDING_REGISTERS,
    /// Write Single Coil (0x05)
    WriteSingleCoil = FC_WRITE_SINGLE_COIL,
    /// Write Multiple Coils (0x0F)
    WriteMultipleCoils = FC_WRITE_MULTIPLE_COILS,
    /// Write Multiple Registers (0x10)
    WriteMultipleRegisters = FC_WRITE_MULTIPLE_REGISTERS,
}

impl ModbusFunction {
    pub fn from_u8(value: u8) -> ModbusResult<Self> {
        match value {
            FC_READ_COILS => Ok(Self::ReadCoils),
            FC_READ_DISCRETE_INPUTS => Ok(Self::ReadDiscreteInputs),
            FC_READ_HOLDING_REGISTERS => Ok(Self::ReadHoldingRegisters),
            FC_WRITE_SINGLE_COIL => Ok(Self::WriteSingleCoil),
            FC_WRITE_MULTIPLE_COILS => Ok(Self::WriteMultipleCoils),
            FC_WRITE_MULTIPLE_REGISTERS => Ok(Self::WriteMultipleRegisters),
            _ => Err(ModbusError::invalid_function(value)),
        }
    }

    #[inline]
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ModbusFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (0x{:02X})",
            ModbusPdu::function_code_description(self.to_u8()),
            self.to_u8()
        )
    }
}

/// Modbus exception codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ModbusException {
    IllegalFunction = EXCEPTION_ILLEGAL_FUNCTION,
    IllegalDataAddress = EXCEPTION_ILLEGAL_DATA_ADDRESS,
    IllegalDataValue = EXCEPTION_ILLEGAL_DATA_VALUE,
    ServerDeviceFailure = EXCEPTION_SERVER_DEVICE_FAILURE,
}

impl ModbusException {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            EXCEPTION_ILLEGAL_FUNCTION => Some(Self::IllegalFunction),
            EXCEPTION_ILLEGAL_DATA_ADDRESS => Some(Self::IllegalDataAddress),
            EXCEPTION_ILLEGAL_DATA_VALUE => Some(Self::IllegalDataValue),
            EXCEPTION_SERVER_DEVICE_FAILURE => Some(Self::ServerDeviceFailure),
            _ => None,
        }
    }

    #[inline]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::IllegalFunction => {
                "The function code received in the query is not an allowable action for the server"
            }
            Self::IllegalDataAddress => {
                "The data address received in the query is not an allowable address for the server"
            }
            Self::IllegalDataValue => {
                "A value contained in the query data field is not an allowable value for the server"
            }
            Self::ServerDeviceFailure => concat!(
                "An unrecoverable error occurred while the server was attempting ",
                "to perform the requested action"
            ),
        }
    }
}

impl fmt::Display for ModbusException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Modbus Exception 0x{:02X}: {}", self.to_u8(), self.description())
    }
}

/// A single Modbus request.
///
/// `data` carries the function-specific payload:
/// - FC05: the two value bytes (`FF 00` / `00 00`)
/// - FC0F: packed coil bytes, LSB first
/// - FC10: register values, big-endian
/// - reads: empty
#[derive(Debug, Clone, PartialEq)]
pub struct ModbusRequest {
    pub slave_id: SlaveId,
    pub function: ModbusFunction,
    pub address: u16,
    pub quantity: u16,
    pub data: Vec<u8>,
}

impl ModbusRequest {
    /// Create a read request (FC01/02/03)
    pub fn new_read(
        slave_id: SlaveId,
        function: ModbusFunction,
        address: u16,
        quantity: u16,
    ) -> Self {
        Self {
            slave_id,
            function,
            address,
            quantity,
            data: Vec::new(),
        }
    }

    /// Create a write single coil request (FC05)
    pub fn write_single_coil(slave_id: SlaveId, address: u16, value: bool) -> Self {
        let raw = if value { COIL_ON } else { COIL_OFF };
        Self {
            slave_id,
            function: ModbusFunction::WriteSingleCoil,
            address,
            quantity: 1,
            data: raw.to_be_bytes().to_vec(),
        }
    }

    /// Create a write multiple coils request (FC0F)
    pub fn write_multiple_coils(slave_id: SlaveId, address: u16, values: &[bool]) -> Self {
        Self {
            slave_id,
            function: ModbusFunction::WriteMultipleCoils,
            address,
            quantity: values.len() as u16,
            data: pack_bits(values),
        }
    }

    /// Create a write multiple registers request (FC10)
    pub fn write_multiple_registers(slave_id: SlaveId, address: u16, values: &[u16]) -> Self {
        let mut data = Vec::with_capacity(values.len() * 2);
        for &value in values {
            data.extend_from_slice(&value.to_be_bytes());
        }
        Self {
            slave_id,
            function: ModbusFunction::WriteMultipleRegisters,
            address,
            quantity: values.len() as u16,
            data,
        }
    }

    /// Value of a FC05 request. `None` if the payload is neither ON nor OFF.
    pub fn coil_value(&self) -> Option<bool> {
        if self.data.len() < 2 {
            return None;
        }
        match u16::from_be_bytes([self.data[0], self.data[1]]) {
            COIL_ON => Some(true),
            COIL_OFF => Some(false),
            _ => None,
        }
    }

    /// Unpacked coil values of a FC0F request
    pub fn coil_values(&self) -> Vec<bool> {
        unpack_bits(&self.data, self.quantity as usize)
    }

    /// Register values of a FC10 request
    pub fn register_values(&self) -> Vec<u16> {
        self.data
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect()
    }

    /// Encode as a request PDU
    pub fn to_pdu(&self) -> ModbusResult<ModbusPdu> {
        let builder = PduBuilder::new()
            .function_code(self.function.to_u8())?
            .address(self.address)?;

        let pdu = match self.function {
            ModbusFunction::ReadCoils
            | ModbusFunction::ReadDiscreteInputs
            | ModbusFunction::ReadHoldingRegisters => builder.quantity(self.quantity)?.build(),
            ModbusFunction::WriteSingleCoil => {
                let value = self
                    .coil_value()
                    .ok_or_else(|| {
                        ModbusError::invalid_data("Write single coil needs FF00 or 0000")
                    })?;
                builder
                    .quantity(if value { COIL_ON } else { COIL_OFF })?
                    .build()
            }
            ModbusFunction::WriteMultipleCoils | ModbusFunction::WriteMultipleRegisters => builder
                .quantity(self.quantity)?
                .byte(self.data.len() as u8)?
                .data(&self.data)?
                .build(),
        };
        Ok(pdu)
    }

    /// Decode a request PDU received by the server.
    ///
    /// Unknown function codes map to `IllegalFunction`, structurally broken
    /// payloads to `IllegalDataValue`. Address legality is not checked here.
    pub fn from_pdu(slave_id: SlaveId, pdu: &ModbusPdu) -> Result<Self, ModbusException> {
        let bytes = pdu.as_slice();
        let fc = pdu.function_code().ok_or(ModbusException::IllegalDataValue)?;
        let function =
            ModbusFunction::from_u8(fc).map_err(|_| ModbusException::IllegalFunction)?;

        if bytes.len() < 5 {
            return Err(ModbusException::IllegalDataValue);
        }
        let address = u16::from_be_bytes([bytes[1], bytes[2]]);
        let word = u16::from_be_bytes([bytes[3], bytes[4]]);

        match function {
            ModbusFunction::ReadCoils
            | ModbusFunction::ReadDiscreteInputs
            | ModbusFunction::ReadHoldingRegisters => {
                Ok(Self::new_read(slave_id, function, address, word))
            }
            ModbusFunction::WriteSingleCoil => Ok(Self {
                slave_id,
                function,
                address,
                quantity: 1,
                data: bytes[3..5].to_vec(),
            }),
            ModbusFunction::WriteMultipleCoils | ModbusFunction::WriteMultipleRegisters => {
                if bytes.len() < 6 {
                    return Err(ModbusException::IllegalDataValue);
                }
                let byte_count = bytes[5] as usize;
                let expected = if function == ModbusFunction::WriteMultipleCoils {
                    (word as usize).div_ceil(8)
                } else {
                    word as usize * 2
                };
                if byte_count != expected || bytes.len() != 6 + byte_count {
                    return Err(ModbusException::IllegalDataValue);
                }
                Ok(Self {
                    slave_id,
                    function,
                    address,
                    quantity: word,
                    data: bytes[6..].to_vec(),
                })
            }
        }
    }
}

/// A Modbus response.
///
/// For successful responses `data` holds the PDU bytes after the function
/// code (byte count + values for reads, the echo for writes).
#[derive(Debug, Clone, PartialEq)]
pub struct ModbusResponse {
    pub slave_id: SlaveId,
    pub function: ModbusFunction,
    pub data: Vec<u8>,
    pub exception_code: Option<u8>,
}

impl ModbusResponse {
    pub fn new_success(slave_id: SlaveId, function: ModbusFunction, data: Vec<u8>) -> Self {
        Self {
            slave_id,
            function,
            data,
            exception_code: None,
        }
    }

    pub fn new_exception(slave_id: SlaveId, function: ModbusFunction, code: u8) -> Self {
        Self {
            slave_id,
            function,
            data: Vec::new(),
            exception_code: Some(code),
        }
    }

    /// Response payload after the function code
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_exception(&self) -> bool {
        self.exception_code.is_some()
    }

    pub fn exception(&self) -> Option<ModbusException> {
        self.exception_code.and_then(ModbusException::from_u8)
    }

    /// Exception as an error value, if present
    pub fn get_exception(&self) -> Option<ModbusError> {
        self.exception_code
            .map(|code| ModbusError::exception(self.function.to_u8(), code))
    }

    /// Decode a response PDU received by the client
    pub fn from_pdu(slave_id: SlaveId, pdu: &ModbusPdu) -> ModbusResult<Self> {
        let fc = pdu
            .function_code()
            .ok_or_else(|| ModbusError::frame("Empty response PDU"))?;

        if pdu.is_exception() {
            let function = ModbusFunction::from_u8(fc & !EXCEPTION_FLAG)?;
            let code = pdu
                .exception_code()
                .ok_or_else(|| ModbusError::frame("Exception response without code"))?;
            return Ok(Self::new_exception(slave_id, function, code));
        }

        let function = ModbusFunction::from_u8(fc)?;
        Ok(Self::new_success(slave_id, function, pdu.as_slice()[1..].to_vec()))
    }

    /// Encode as a response PDU
    pub fn to_pdu(&self) -> ModbusResult<ModbusPdu> {
        match self.exception_code {
            Some(code) => PduBuilder::build_exception(self.function.to_u8(), code),
            None => Ok(PduBuilder::new()
                .function_code(self.function.to_u8())?
                .data(&self.data)?
                .build()),
        }
    }

    /// Parse FC03 response data as registers
    pub fn parse_registers(&self) -> ModbusResult<Vec<u16>> {
        if let Some(error) = self.get_exception() {
            return Err(error);
        }
        let (&byte_count, values) = self
            .data
            .split_first()
            .ok_or_else(|| ModbusError::frame("Empty response data"))?;
        let byte_count = byte_count as usize;
        if values.len() < byte_count || byte_count % 2 != 0 {
            return Err(ModbusError::frame("Invalid register data length"));
        }
        Ok(values[..byte_count]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect())
    }

    /// Parse FC01/FC02 response data as bits (padded to a multiple of 8)
    pub fn parse_bits(&self) -> ModbusResult<Vec<bool>> {
        if let Some(error) = self.get_exception() {
            return Err(error);
        }
        let (&byte_count, values) = self
            .data
            .split_first()
            .ok_or_else(|| ModbusError::frame("Empty response data"))?;
        let byte_count = byte_count as usize;
        if values.len() < byte_count {
            return Err(ModbusError::frame("Incomplete bit data"));
        }
        Ok(unpack_bits(&values[..byte_count], byte_count * 8))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_conversion() {
        assert_eq!(
            ModbusFunction::from_u8(0x03).unwrap(),
            ModbusFunction::ReadHoldingRegisters
        );
        assert_eq!(ModbusFunction::WriteMultipleCoils.to_u8(), 0x0F);
        // FC04 and FC06 are not served
        assert!(ModbusFunction::from_u8(0x04).is_err());
        assert!(ModbusFunction::from_u8(0x06).is_err());
    }

    #[test]
    fn test_exception_codes() {
        for code in [
            EXCEPTION_ILLEGAL_FUNCTION,
            EXCEPTION_ILLEGAL_DATA_ADDRESS,
            EXCEPTION_ILLEGAL_DATA_VALUE,
            EXCEPTION_SERVER_DEVICE_FAILURE,
        ] {
            assert_eq!(ModbusException::from_u8(code).unwrap().to_u8(), code);
        }
        assert_eq!(ModbusException::IllegalDataAddress.to_u8(), 0x02);
        assert_eq!(ModbusException::from_u8(0x05), None);
        assert!(ModbusException::ServerDeviceFailure
            .description()
            .contains("attempting to perform"));
    }

    #[test]
    fn test_request_pdu_layout() {
        let req = ModbusRequest::new_read(1, ModbusFunction::ReadCoils, 0, 48);
        assert_eq!(req.to_pdu().unwrap().as_slice(), &[0x01, 0x00, 0x00, 0x00, 0x30]);

        let req = ModbusRequest::write_single_coil(1, 0x00AC, true);
        assert_eq!(req.to_pdu().unwrap().as_slice(), &[0x05, 0x00, 0xAC, 0xFF, 0x00]);

        let req = ModbusRequest::write_multiple_coils(1, 0x0013, &[true, false, true, true]);
        assert_eq!(
            req.to_pdu().unwrap().as_slice(),
            &[0x0F, 0x00, 0x13, 0x00, 0x04, 0x01, 0b0000_1101]
        );

        let req = ModbusRequest::write_multiple_registers(1, 0x0001, &[0x000A, 0x0102]);
        assert_eq!(
            req.to_pdu().unwrap().as_slice(),
            &[0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02]
        );
    }

    #[test]
    fn test_request_from_pdu() {
        let pdu = ModbusPdu::from_slice(&[0x0F, 0x00, 0x05, 0x00, 0x0A, 0x02, 0xFF, 0x01]).unwrap();
        let req = ModbusRequest::from_pdu(7, &pdu).unwrap();
        assert_eq!(req.slave_id, 7);
        assert_eq!(req.address, 5);
        assert_eq!(req.quantity, 10);
        let coils = req.coil_values();
        assert_eq!(coils.len(), 10);
        assert!(coils[..9].iter().all(|&c| c));
        assert!(!coils[9]);
    }

    #[test]
    fn test_request_from_pdu_rejects_malformed() {
        // Unsupported function code
        let pdu = ModbusPdu::from_slice(&[0x2B, 0x0E, 0x01, 0x00]).unwrap();
        assert_eq!(
            ModbusRequest::from_pdu(1, &pdu),
            Err(ModbusException::IllegalFunction)
        );

        // Truncated read
        let pdu = ModbusPdu::from_slice(&[0x01, 0x00, 0x00]).unwrap();
        assert_eq!(
            ModbusRequest::from_pdu(1, &pdu),
            Err(ModbusException::IllegalDataValue)
        );

        // Byte count disagrees with quantity
        let pdu = ModbusPdu::from_slice(&[0x10, 0x00, 0x00, 0x00, 0x02, 0x02, 0x00, 0x01]).unwrap();
        assert_eq!(
            ModbusRequest::from_pdu(1, &pdu),
            Err(ModbusException::IllegalDataValue)
        );
    }

    #[test]
    fn test_coil_value_decoding() {
        let pdu = ModbusPdu::from_slice(&[0x05, 0x00, 0x01, 0x12, 0x34]).unwrap();
        let req = ModbusRequest::from_pdu(1, &pdu).unwrap();
        assert_eq!(req.coil_value(), None);

        let pdu = ModbusPdu::from_slice(&[0x05, 0x00, 0x01, 0x00, 0x00]).unwrap();
        let req = ModbusRequest::from_pdu(1, &pdu).unwrap();
        assert_eq!(req.coil_value(), Some(false));
    }

    #[test]
    fn test_response_parsing() {
        let response = ModbusResponse::new_success(
            1,
            ModbusFunction::ReadHoldingRegisters,
            vec![4, 0x12, 0x34, 0x56, 0x78],
        );
        assert_eq!(response.parse_registers().unwrap(), vec![0x1234, 0x5678]);

        let response =
            ModbusResponse::new_success(1, ModbusFunction::ReadCoils, vec![1, 0b1010_1010]);
        let bits = response.parse_bits().unwrap();
        assert_eq!(bits.len(), 8);
        assert!(!bits[0]); // LSB first
        assert!(bits[1]);
    }

    #[test]
    fn test_exception_response_roundtrip_through_pdu() {
        let pdu = ModbusPdu::from_slice(&[0x81, 0x02]).unwrap();
        let response = ModbusResponse::from_pdu(1, &pdu).unwrap();
        assert!(response.is_exception());
        assert_eq!(response.function, ModbusFunction::ReadCoils);
        assert_eq!(response.exception(), Some(ModbusException::IllegalDataAddress));
        assert!(matches!(
            response.parse_bits(),
            Err(ModbusError::Exception { code: 0x02, .. })
        ));
        assert_eq!(response.to_pdu().unwrap().as_slice(), &[0x81, 0x02]);
    }
}

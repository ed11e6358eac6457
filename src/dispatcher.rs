//! Server-side request dispatcher
//!
//! Each request is handled on its own against the shared [`DataTable`]. The
//! range check always runs before any write, so an illegal multi-value write
//! leaves the table untouched and yields `IllegalDataAddress (0x02)`.

use tracing::{debug, warn};

use crate::constants::{MAX_READ_COILS, MAX_READ_REGISTERS, MAX_WRITE_COILS, MAX_WRITE_REGISTERS};
use crate::error::ModbusResult;
use crate::pdu::{ModbusPdu, PduBuilder};
use crate::protocol::{ModbusException, ModbusFunction, ModbusRequest, ModbusResponse, SlaveId};
use crate::table::{DataTable, TableSizes};

type DispatchResult<T> = Result<T, ModbusException>;

/// Answers Modbus requests from an in-memory table
#[derive(Debug, Clone, Default)]
pub struct RequestDispatcher {
    table: DataTable,
}

impl RequestDispatcher {
    pub fn new(sizes: TableSizes) -> Self {
        Self {
            table: DataTable::new(sizes),
        }
    }

    pub fn with_table(table: DataTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &DataTable {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut DataTable {
        &mut self.table
    }

    // ------------------------------------------------------------------------
    // Typed operations
    // ------------------------------------------------------------------------

    /// FC01
    pub fn read_coils(&self, address: u16, quantity: u16) -> DispatchResult<Vec<bool>> {
        let coils = self.table.read_coils(address, quantity)?;
        check_limit(quantity, MAX_READ_COILS)?;
        Ok(coils.to_vec())
    }

    /// FC02
    pub fn read_discrete_inputs(&self, address: u16, quantity: u16) -> DispatchResult<Vec<bool>> {
        let inputs = self.table.read_discrete_inputs(address, quantity)?;
        check_limit(quantity, MAX_READ_COILS)?;
        Ok(inputs.to_vec())
    }

    /// FC05
    pub fn write_single_coil(&mut self, address: u16, value: bool) -> DispatchResult<()> {
        self.table.write_coils(address, &[value])
    }

    /// FC0F
    pub fn write_multiple_coils(&mut self, address: u16, values: &[bool]) -> DispatchResult<()> {
        self.table.write_coils(address, values)
    }

    /// FC03
    pub fn read_holding_registers(&self, address: u16, quantity: u16) -> DispatchResult<Vec<u16>> {
        let registers = self.table.read_holding_registers(address, quantity)?;
        check_limit(quantity, MAX_READ_REGISTERS)?;
        Ok(registers.to_vec())
    }

    /// FC10
    pub fn write_holding_registers(&mut self, address: u16, values: &[u16]) -> DispatchResult<()> {
        self.table.write_holding_registers(address, values)
    }

    // ------------------------------------------------------------------------
    // Request handling
    // ------------------------------------------------------------------------

    /// Handle a decoded request and build the response
    pub fn handle_request(&mut self, request: &ModbusRequest) -> ModbusResponse {
        debug!(
            "Dispatching {} addr={} qty={}",
            request.function, request.address, request.quantity
        );

        match self.execute(request) {
            Ok(response) => response,
            Err(exception) => {
                warn!(
                    "Rejecting {} addr={} qty={}: {}",
                    request.function, request.address, request.quantity, exception
                );
                ModbusResponse::new_exception(request.slave_id, request.function, exception.to_u8())
            }
        }
    }

    /// Handle a raw request PDU and build the response PDU.
    ///
    /// Unknown function codes get `IllegalFunction`, malformed payloads get
    /// `IllegalDataValue`.
    pub fn handle_pdu(&mut self, unit_id: SlaveId, pdu: &ModbusPdu) -> ModbusResult<ModbusPdu> {
        match ModbusRequest::from_pdu(unit_id, pdu) {
            Ok(request) => self.handle_request(&request).to_pdu(),
            Err(exception) => {
                let fc = pdu.function_code().unwrap_or(0) & 0x7F;
                warn!("Rejecting request FC=0x{:02X}: {}", fc, exception);
                PduBuilder::build_exception(fc, exception.to_u8())
            }
        }
    }

    fn execute(&mut self, request: &ModbusRequest) -> DispatchResult<ModbusResponse> {
        let function = request.function;
        let (address, quantity) = (request.address, request.quantity);

        let pdu = match function {
            ModbusFunction::ReadCoils => {
                let values = self.read_coils(address, quantity)?;
                PduBuilder::build_bits_response(function.to_u8(), &values)
            }
            ModbusFunction::ReadDiscreteInputs => {
                let values = self.read_discrete_inputs(address, quantity)?;
                PduBuilder::build_bits_response(function.to_u8(), &values)
            }
            ModbusFunction::ReadHoldingRegisters => {
                let values = self.read_holding_registers(address, quantity)?;
                PduBuilder::build_registers_response(function.to_u8(), &values)
            }
            ModbusFunction::WriteSingleCoil => {
                // Address first, so an out-of-range coil is always 0x02
                crate::validator::check_range(self.table.sizes().coils, address, 1)?;
                let value = request.coil_value().ok_or(ModbusException::IllegalDataValue)?;
                self.write_single_coil(address, value)?;
                // FC05 acknowledges by echoing the request
                request.to_pdu()
            }
            ModbusFunction::WriteMultipleCoils => {
                crate::validator::check_range(self.table.sizes().coils, address, quantity)?;
                check_limit(quantity, MAX_WRITE_COILS)?;
                self.write_multiple_coils(address, &request.coil_values())?;
                PduBuilder::build_write_ack(function.to_u8(), address, quantity)
            }
            ModbusFunction::WriteMultipleRegisters => {
                let size = self.table.sizes().holding_registers;
                crate::validator::check_range(size, address, quantity)?;
                check_limit(quantity, MAX_WRITE_REGISTERS)?;
                self.write_holding_registers(address, &request.register_values())?;
                PduBuilder::build_write_ack(function.to_u8(), address, quantity)
            }
        }
        .map_err(|_| ModbusException::ServerDeviceFailure)?;

        Ok(ModbusResponse::new_success(
            request.slave_id,
            function,
            pdu.as_slice()[1..].to_vec(),
        ))
    }
}

/// Quantities beyond what one PDU can carry
fn check_limit(quantity: u16, max: usize) -> DispatchResult<()> {
    if quantity as usize > max {
        return Err(ModbusException::IllegalDataValue);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher() -> RequestDispatcher {
        RequestDispatcher::default()
    }

    fn pdu(bytes: &[u8]) -> ModbusPdu {
        ModbusPdu::from_slice(bytes).unwrap()
    }

    #[test]
    fn test_read_coils_out_of_range() {
        let mut d = dispatcher();
        // 95 + 10 = 105 > 100
        let request = ModbusRequest::new_read(1, ModbusFunction::ReadCoils, 95, 10);
        let response = d.handle_request(&request);
        assert_eq!(response.exception(), Some(ModbusException::IllegalDataAddress));
        assert_eq!(response.to_pdu().unwrap().as_slice(), &[0x81, 0x02]);
    }

    #[test]
    fn test_write_single_coil_acknowledged() {
        let mut d = dispatcher();
        let request = ModbusRequest::write_single_coil(1, 50, true);
        let response = d.handle_request(&request);
        assert!(!response.is_exception());
        assert_eq!(
            response.to_pdu().unwrap().as_slice(),
            &[0x05, 0x00, 0x32, 0xFF, 0x00]
        );
        assert_eq!(d.table().read_coils(50, 1).unwrap(), &[true]);
    }

    #[test]
    fn test_write_multiple_coils_is_acknowledged() {
        let mut d = dispatcher();
        let request = ModbusRequest::write_multiple_coils(1, 10, &[true, true, false, true]);
        let response = d.handle_request(&request);
        assert_eq!(
            response.to_pdu().unwrap().as_slice(),
            &[0x0F, 0x00, 0x0A, 0x00, 0x04]
        );

        let coils = d.table().read_coils(0, 100).unwrap();
        for (i, &c) in coils.iter().enumerate() {
            let expected = matches!(i, 10 | 11 | 13);
            assert_eq!(c, expected, "coil {}", i);
        }
    }

    #[test]
    fn test_write_multiple_coils_illegal_range_mutates_nothing() {
        let mut d = dispatcher();
        let request = ModbusRequest::write_multiple_coils(1, 98, &[true; 5]);
        let response = d.handle_request(&request);
        assert_eq!(response.exception(), Some(ModbusException::IllegalDataAddress));
        assert!(d.table().read_coils(0, 100).unwrap().iter().all(|&c| !c));
    }

    #[test]
    fn test_registers_roundtrip() {
        let mut d = dispatcher();
        let write = ModbusRequest::write_multiple_registers(1, 3, &[0x1234, 0xABCD]);
        let ack = d.handle_request(&write).to_pdu().unwrap();
        assert_eq!(ack.as_slice(), &[0x10, 0x00, 0x03, 0x00, 0x02]);

        let read = ModbusRequest::new_read(1, ModbusFunction::ReadHoldingRegisters, 2, 3);
        let response = d.handle_request(&read);
        assert_eq!(response.parse_registers().unwrap(), vec![0, 0x1234, 0xABCD]);

        let illegal = ModbusRequest::write_multiple_registers(1, 99, &[1, 2]);
        assert!(d.handle_request(&illegal).is_exception());
        assert_eq!(d.table().read_holding_registers(99, 1).unwrap(), &[0]);
    }

    #[test]
    fn test_read_discrete_inputs() {
        let mut d = dispatcher();
        d.table_mut().set_discrete_input(3, true).unwrap();
        let response = d.handle_request(&ModbusRequest::new_read(
            1,
            ModbusFunction::ReadDiscreteInputs,
            0,
            8,
        ));
        assert_eq!(response.data(), &[0x01, 0b0000_1000]);

        let response = d.handle_request(&ModbusRequest::new_read(
            1,
            ModbusFunction::ReadDiscreteInputs,
            100,
            1,
        ));
        assert_eq!(response.exception(), Some(ModbusException::IllegalDataAddress));
    }

    #[test]
    fn test_zero_quantity_is_illegal_address() {
        let mut d = dispatcher();
        let request = ModbusRequest::new_read(1, ModbusFunction::ReadCoils, 0, 0);
        let response = d.handle_request(&request);
        assert_eq!(response.exception(), Some(ModbusException::IllegalDataAddress));
    }

    #[test]
    fn test_handle_pdu_errors() {
        let mut d = dispatcher();
        // FC06 is not served
        let response = d.handle_pdu(1, &pdu(&[0x06, 0x00, 0x01, 0x00, 0x03])).unwrap();
        assert_eq!(response.as_slice(), &[0x86, 0x01]);

        // Truncated FC03
        let response = d.handle_pdu(1, &pdu(&[0x03, 0x00])).unwrap();
        assert_eq!(response.as_slice(), &[0x83, 0x03]);

        // Bad FC05 value
        let response = d.handle_pdu(1, &pdu(&[0x05, 0x00, 0x01, 0x12, 0x34])).unwrap();
        assert_eq!(response.as_slice(), &[0x85, 0x03]);
        assert_eq!(d.table().read_coils(1, 1).unwrap(), &[false]);
    }

    #[test]
    fn test_handle_pdu_read_coils() {
        let mut d = dispatcher();
        d.write_single_coil(0, true).unwrap();
        d.write_single_coil(9, true).unwrap();
        let response = d.handle_pdu(1, &pdu(&[0x01, 0x00, 0x00, 0x00, 0x0A])).unwrap();
        assert_eq!(response.as_slice(), &[0x01, 0x02, 0b0000_0001, 0b0000_0010]);
    }

    #[test]
    fn test_protocol_limit_on_large_table() {
        let mut d = RequestDispatcher::new(TableSizes {
            coils: 100,
            discrete_inputs: 100,
            holding_registers: 500,
            input_registers: 100,
        });
        let response = d.handle_request(&ModbusRequest::new_read(
            1,
            ModbusFunction::ReadHoldingRegisters,
            0,
            200,
        ));
        assert_eq!(response.exception(), Some(ModbusException::IllegalDataValue));
    }
}

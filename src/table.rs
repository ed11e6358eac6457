//! Server-side data tables
//!
//! Four fixed-length tables: coils and discrete inputs hold one bit per slot,
//! holding and input registers one 16-bit value per slot. Sizes are set at
//! construction and never change. Every accessor validates its range with
//! [`check_range`] before touching memory, so an illegal write is rejected
//! as a whole.

use crate::constants::DEFAULT_TABLE_SIZE;
use crate::protocol::ModbusException;
use crate::validator::check_range;

type TableResult<T> = Result<T, ModbusException>;

/// Table sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSizes {
    pub coils: usize,
    pub discrete_inputs: usize,
    pub holding_registers: usize,
    pub input_registers: usize,
}

impl Default for TableSizes {
    fn default() -> Self {
        Self {
            coils: DEFAULT_TABLE_SIZE,
            discrete_inputs: DEFAULT_TABLE_SIZE,
            holding_registers: DEFAULT_TABLE_SIZE,
            input_registers: DEFAULT_TABLE_SIZE,
        }
    }
}

/// In-memory coil / register storage
#[derive(Debug, Clone)]
pub struct DataTable {
    coils: Vec<bool>,
    discrete_inputs: Vec<bool>,
    holding_registers: Vec<u16>,
    input_registers: Vec<u16>,
}

impl DataTable {
    /// All-zero tables of the given sizes
    pub fn new(sizes: TableSizes) -> Self {
        Self {
            coils: vec![false; sizes.coils],
            discrete_inputs: vec![false; sizes.discrete_inputs],
            holding_registers: vec![0; sizes.holding_registers],
            input_registers: vec![0; sizes.input_registers],
        }
    }

    pub fn sizes(&self) -> TableSizes {
        TableSizes {
            coils: self.coils.len(),
            discrete_inputs: self.discrete_inputs.len(),
            holding_registers: self.holding_registers.len(),
            input_registers: self.input_registers.len(),
        }
    }

    pub fn read_coils(&self, address: u16, quantity: u16) -> TableResult<&[bool]> {
        let range = check_range(self.coils.len(), address, quantity)?;
        Ok(&self.coils[range])
    }

    pub fn write_coils(&mut self, address: u16, values: &[bool]) -> TableResult<()> {
        let quantity =
            u16::try_from(values.len()).map_err(|_| ModbusException::IllegalDataAddress)?;
        let range = check_range(self.coils.len(), address, quantity)?;
        self.coils[range].copy_from_slice(values);
        Ok(())
    }

    pub fn read_discrete_inputs(&self, address: u16, quantity: u16) -> TableResult<&[bool]> {
        let range = check_range(self.discrete_inputs.len(), address, quantity)?;
        Ok(&self.discrete_inputs[range])
    }

    /// Discrete inputs are read-only on the wire; this is for simulation.
    pub fn set_discrete_input(&mut self, address: u16, value: bool) -> TableResult<()> {
        let range = check_range(self.discrete_inputs.len(), address, 1)?;
        self.discrete_inputs[range.start] = value;
        Ok(())
    }

    pub fn read_holding_registers(&self, address: u16, quantity: u16) -> TableResult<&[u16]> {
        let range = check_range(self.holding_registers.len(), address, quantity)?;
        Ok(&self.holding_registers[range])
    }

    pub fn write_holding_registers(&mut self, address: u16, values: &[u16]) -> TableResult<()> {
        let quantity =
            u16::try_from(values.len()).map_err(|_| ModbusException::IllegalDataAddress)?;
        let range = check_range(self.holding_registers.len(), address, quantity)?;
        self.holding_registers[range].copy_from_slice(values);
        Ok(())
    }

    pub fn read_input_registers(&self, address: u16, quantity: u16) -> TableResult<&[u16]> {
        let range = check_range(self.input_registers.len(), address, quantity)?;
        Ok(&self.input_registers[range])
    }

    /// Input registers are read-only on the wire; this is for simulation.
    pub fn set_input_register(&mut self, address: u16, value: u16) -> TableResult<()> {
        let range = check_range(self.input_registers.len(), address, 1)?;
        self.input_registers[range.start] = value;
        Ok(())
    }
}

impl Default for DataTable {
    fn default() -> Self {
        Self::new(TableSizes::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sizes() {
        let table = DataTable::default();
        assert_eq!(table.sizes(), TableSizes::default());
        assert_eq!(table.read_coils(0, 100).unwrap().len(), 100);
        assert!(table.read_coils(0, 101).is_err());
    }

    #[test]
    fn test_coil_write_read() {
        let mut table = DataTable::default();
        table.write_coils(10, &[true, false, true]).unwrap();
        assert_eq!(table.read_coils(9, 5).unwrap(), &[false, true, false, true, false]);
    }

    #[test]
    fn test_illegal_write_does_not_mutate() {
        let mut table = DataTable::default();
        assert_eq!(
            table.write_coils(98, &[true, true, true]),
            Err(ModbusException::IllegalDataAddress)
        );
        assert!(table.read_coils(0, 100).unwrap().iter().all(|&c| !c));

        assert!(table.write_holding_registers(99, &[1, 2]).is_err());
        assert_eq!(table.read_holding_registers(99, 1).unwrap(), &[0]);
    }

    #[test]
    fn test_simulation_setters() {
        let mut table = DataTable::new(TableSizes {
            coils: 8,
            discrete_inputs: 8,
            holding_registers: 4,
            input_registers: 4,
        });
        table.set_discrete_input(7, true).unwrap();
        table.set_input_register(3, 0xBEEF).unwrap();
        assert_eq!(table.read_discrete_inputs(7, 1).unwrap(), &[true]);
        assert_eq!(table.read_input_registers(3, 1).unwrap(), &[0xBEEF]);
        assert!(table.set_discrete_input(8, true).is_err());
        assert!(table.set_input_register(4, 1).is_err());
    }
}

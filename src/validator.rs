//! Address range checks for server-side tables
//!
//! One rule for every function: a request `(address, quantity)` against a
//! table of `size` slots is legal iff `quantity >= 1` and
//! `address + quantity <= size`. Addresses are `u16` so they cannot be
//! negative, and the sum is computed in `usize` so it cannot wrap.

use std::ops::Range;

use crate::protocol::ModbusException;

/// Check a request range and return the slot range it covers.
///
/// Fails with [`ModbusException::IllegalDataAddress`] for any illegal range.
#[inline]
pub fn check_range(
    table_size: usize,
    address: u16,
    quantity: u16,
) -> Result<Range<usize>, ModbusException> {
    let start = address as usize;
    let end = start + quantity as usize;
    if quantity == 0 || end > table_size {
        return Err(ModbusException::IllegalDataAddress);
    }
    Ok(start..end)
}

/// Boolean form of [`check_range`]
#[inline]
pub fn is_legal(table_size: usize, address: u16, quantity: u16) -> bool {
    check_range(table_size, address, quantity).is_ok()
}

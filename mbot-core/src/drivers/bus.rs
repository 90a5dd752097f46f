//! Register-addressed I2C device plumbing.
//!
//! Every peripheral in the stack is a bank of 8-bit registers behind a 7-bit
//! bus address. [`RegDevice`] wraps the bus handle and address and exposes the
//! four primitives the drivers need: single-register read/write and
//! multi-byte block read/write. Widths of multi-byte fields are the caller's
//! business; this layer does not track them.

use embedded_hal::i2c::I2c;

use super::Error;

/// Largest payload the stack writes in one transaction: the IMU's 21-byte
/// calibration block.
const MAX_BLOCK: usize = 21;

/// A register-mapped peripheral at a fixed 7-bit address.
pub struct RegDevice<I2C> {
    i2c: I2C,
    address: u8,
}

impl<I2C, E> RegDevice<I2C>
where
    I2C: I2c<Error = E>,
{
    /// Wrap a bus handle and device address. No bus traffic is generated.
    pub fn new(i2c: I2C, address: u8) -> Self {
        Self { i2c, address }
    }

    /// The device's 7-bit bus address.
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Returns the underlying bus handle, consuming this device.
    pub fn release(self) -> I2C {
        self.i2c
    }

    /// Read a single register.
    pub fn read_reg(&mut self, reg: u8) -> Result<u8, Error<E>> {
        let mut buf = [0u8; 1];
        self.i2c
            .write_read(self.address, &[reg], &mut buf)
            .map_err(Error::Bus)?;
        Ok(buf[0])
    }

    /// Write a single register.
    pub fn write_reg(&mut self, reg: u8, value: u8) -> Result<(), Error<E>> {
        self.i2c.write(self.address, &[reg, value]).map_err(Error::Bus)
    }

    /// Read `N` bytes starting at `reg`.
    pub fn read_block<const N: usize>(&mut self, reg: u8) -> Result<[u8; N], Error<E>> {
        let mut buf = [0u8; N];
        self.read_block_into(reg, &mut buf)?;
        Ok(buf)
    }

    /// Read `buf.len()` bytes starting at `reg` into a caller-provided
    /// buffer. Hot-path variant; nothing is allocated.
    pub fn read_block_into(&mut self, reg: u8, buf: &mut [u8]) -> Result<(), Error<E>> {
        self.i2c
            .write_read(self.address, &[reg], buf)
            .map_err(Error::Bus)
    }

    /// Write `data` starting at `reg` as one bus transaction.
    ///
    /// `data` must fit the stack's largest register block (`MAX_BLOCK`
    /// bytes).
    pub fn write_block(&mut self, reg: u8, data: &[u8]) -> Result<(), Error<E>> {
        debug_assert!(data.len() <= MAX_BLOCK);
        let mut buf = [0u8; MAX_BLOCK + 1];
        buf[0] = reg;
        buf[1..=data.len()].copy_from_slice(data);
        self.i2c
            .write(self.address, &buf[..=data.len()])
            .map_err(Error::Bus)
    }
}

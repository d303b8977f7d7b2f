use byteorder::ByteOrder;
use util::Endian;

use crate::constants;

/// The flat, 4 KiB byte-addressable memory shared by variables, the stack,
/// the interrupt vector table and the memory-mapped I/O ports. Word access
/// is little-endian; out-of-range reads or writes are reported rather than
/// panicking, so the caller can fail just the one instruction.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Memory {
    data: Vec<u8>,
}

/// An attempt to read or write outside of `[0, MEMORY_SIZE)`, or a word
/// access straddling the end of memory.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct OutOfBounds;

impl Default for Memory {
    fn default() -> Memory {
        Memory {
            data: vec![0; constants::MEMORY_SIZE],
        }
    }
}

impl Memory {
    pub fn new() -> Memory {
        Memory::default()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn check(&self, address: u16, size: usize) -> Result<(), OutOfBounds> {
        if (address as usize) + size <= self.data.len() {
            Ok(())
        } else {
            Err(OutOfBounds)
        }
    }

    pub fn read_byte(&self, address: u16) -> Result<u8, OutOfBounds> {
        self.check(address, 1)?;
        Ok(self.data[address as usize])
    }

    pub fn write_byte(&mut self, address: u16, value: u8) -> Result<(), OutOfBounds> {
        self.check(address, 1)?;
        self.data[address as usize] = value;
        Ok(())
    }

    pub fn read_word(&self, address: u16) -> Result<u16, OutOfBounds> {
        self.check(address, 2)?;
        let a = address as usize;
        Ok(Endian::read_u16(&self.data[a..a + 2]))
    }

    pub fn write_word(&mut self, address: u16, value: u16) -> Result<(), OutOfBounds> {
        self.check(address, 2)?;
        let a = address as usize;
        Endian::write_u16(&mut self.data[a..a + 2], value);
        Ok(())
    }

    pub fn read_port(&self, port: u8) -> Result<u16, OutOfBounds> {
        self.read_word(constants::port_address(port))
    }

    pub fn write_port(&mut self, port: u8, value: u16) -> Result<(), OutOfBounds> {
        self.write_word(constants::port_address(port), value)
    }

    pub fn read_vector(&self, vector: u8) -> Result<u16, OutOfBounds> {
        self.read_word(constants::vector_address(vector))
    }

    pub fn write_vector(&mut self, vector: u8, handler: u16) -> Result<(), OutOfBounds> {
        self.write_word(constants::vector_address(vector), handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_access_is_little_endian() {
        let mut mem = Memory::new();
        mem.write_word(0x0100, 0x0304).unwrap();
        assert_eq!(mem.read_byte(0x0100).unwrap(), 0x04);
        assert_eq!(mem.read_byte(0x0101).unwrap(), 0x03);
    }

    #[test]
    fn out_of_range_access_fails() {
        let mem = Memory::new();
        assert_eq!(mem.read_word(4095), Err(OutOfBounds));
        assert_eq!(mem.read_byte(4096), Err(OutOfBounds));
    }

    #[test]
    fn ports_and_vectors_map_into_flat_memory() {
        let mut mem = Memory::new();
        mem.write_port(3, 42).unwrap();
        assert_eq!(mem.read_word(0x0300 + 6).unwrap(), 42);

        mem.write_vector(1, 0x0200).unwrap();
        assert_eq!(mem.read_word(2).unwrap(), 0x0200);
    }
}

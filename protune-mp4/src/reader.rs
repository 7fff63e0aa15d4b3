/*
    REFERENCES
    ----------

    1. https://github.com/shaka-project/shaka-player/blob/f539147d480fff9cc8d685f3aac0e6f5dc28a182/lib/util/data_view_reader.js

*/

use crate::{Error, Result};

/// Big-endian cursor over an owned byte buffer.
///
/// Every read is bounds checked and returns [`Error::Read`] on underrun, so a
/// truncated or malformed box can never panic the parser.
#[derive(Clone, Default)]
pub struct Reader {
    data: Vec<u8>,
    position: usize,
}

impl Reader {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, position: 0 }
    }

    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    pub fn get_length(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn get_position(&self) -> u64 {
        self.position as u64
    }

    /// The whole underlying buffer, independent of the position.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    pub fn skip(&mut self, bytes: u64) -> Result<()> {
        self.take(bytes as usize).map(|_| ())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    /// Read a four character code.
    pub fn read_fourcc(&mut self) -> Result<[u8; 4]> {
        self.array()
    }

    pub fn read_bytes_u8(&mut self, bytes: usize) -> Result<Vec<u8>> {
        Ok(self.take(bytes)?.to_vec())
    }

    /// Read everything from the current position up to the end.
    pub fn read_remaining(&mut self) -> Vec<u8> {
        let rest = self.data[self.position..].to_vec();
        self.position = self.data.len();
        rest
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    fn take(&mut self, bytes: usize) -> Result<&[u8]> {
        let end = self
            .position
            .checked_add(bytes)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                Error::Read(format!(
                    "{} bytes at offset {} (only {} bytes available)",
                    bytes,
                    self.position,
                    self.remaining()
                ))
            })?;

        let start = self.position;
        self.position = end;
        Ok(&self.data[start..end])
    }
}

//! Box serialization with size back-patching.
//!
//! Every box is framed as a 4-byte big-endian size, a 4-byte type and its payload.
//! Sizes are only known once the children are written, so [`BoxWriter::start_box`]
//! reserves the size field and [`BoxWriter::end_box`] fills it in.

use crate::{Error, Result};

#[derive(Default)]
pub struct BoxWriter {
    data: Vec<u8>,
    open: Vec<usize>,
}

impl BoxWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current absolute write position.
    pub fn position(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn start_box(&mut self, name: &[u8; 4]) -> &mut Self {
        self.open.push(self.data.len());
        self.data.extend_from_slice(&[0; 4]);
        self.data.extend_from_slice(name);
        self
    }

    pub fn start_full_box(&mut self, name: &[u8; 4], version: u8, flags: u32) -> &mut Self {
        self.start_box(name);
        self.u32(((version as u32) << 24) | (flags & 0xFFFFFF))
    }

    /// Close the innermost open box, writing its final size.
    pub fn end_box(&mut self) -> Result<&mut Self> {
        let start = self
            .open
            .pop()
            .ok_or_else(|| Error::format("end_box called without an open box"))?;
        let size = u32::try_from(self.data.len() - start)
            .map_err(|_| Error::format("box larger than 4 GiB needs a 64-bit header"))?;
        self.data[start..start + 4].copy_from_slice(&size.to_be_bytes());
        Ok(self)
    }

    /// Write a complete box in one go.
    pub fn write_box(&mut self, name: &[u8; 4], payload: &[u8]) -> Result<&mut Self> {
        self.start_box(name).bytes(payload).end_box()
    }

    /// Append an already serialized box (or any raw bytes) verbatim.
    pub fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.data.extend_from_slice(bytes);
        self
    }

    pub fn zeros(&mut self, count: usize) -> &mut Self {
        self.data.resize(self.data.len() + count, 0);
        self
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.data.push(value);
        self
    }

    pub fn u16(&mut self, value: u16) -> &mut Self {
        self.bytes(&value.to_be_bytes())
    }

    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.bytes(&value.to_be_bytes())
    }

    pub fn i32(&mut self, value: i32) -> &mut Self {
        self.bytes(&value.to_be_bytes())
    }

    pub fn u64(&mut self, value: u64) -> &mut Self {
        self.bytes(&value.to_be_bytes())
    }

    /// Write the header of an `mdat` holding `payload_size` bytes, switching to
    /// the 64-bit size escape when the compact form cannot hold it.
    pub fn mdat_header(&mut self, payload_size: u64) -> &mut Self {
        if payload_size + 8 > u32::MAX as u64 {
            self.u32(1).bytes(b"mdat").u64(payload_size + 16)
        } else {
            self.u32((payload_size + 8) as u32).bytes(b"mdat")
        }
    }

    pub fn patch_u32(&mut self, at: u64, value: u32) -> Result<()> {
        self.patch(at, &value.to_be_bytes())
    }

    pub fn patch_u64(&mut self, at: u64, value: u64) -> Result<()> {
        self.patch(at, &value.to_be_bytes())
    }

    fn patch(&mut self, at: u64, bytes: &[u8]) -> Result<()> {
        let start = at as usize;
        let target = self
            .data
            .get_mut(start..start + bytes.len())
            .ok_or_else(|| Error::format(format!("patch point {} is outside the buffer", at)))?;
        target.copy_from_slice(bytes);
        Ok(())
    }

    /// Finish writing. Fails if a box was left open.
    pub fn into_inner(self) -> Result<Vec<u8>> {
        if !self.open.is_empty() {
            return Err(Error::format(format!(
                "{} box(es) left open when finishing",
                self.open.len()
            )));
        }

        Ok(self.data)
    }
}

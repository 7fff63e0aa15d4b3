/*
    REFERENCES
    ----------

    1. https://github.com/shaka-project/shaka-player/blob/7098f43f70119226bca2e5583833aaf27b498e33/lib/util/mp4_box_parsers.js#L554-L567
    2. ISO/IEC 23001-7 section 8.2 (TrackEncryptionBox)

*/

use crate::{ParsedBox, Result};

/// Track encryption defaults.
#[derive(Clone, Debug, Default)]
pub struct TencBox {
    pub is_protected: bool,
    /// 0, 8 or 16. Zero means every sample shares `constant_iv`.
    pub per_sample_iv_size: u8,
    pub default_kid: [u8; 16],
    /// Only set by version 1 boxes.
    pub crypt_byte_block: u8,
    /// Only set by version 1 boxes.
    pub skip_byte_block: u8,
    pub constant_iv: Vec<u8>,
}

impl TencBox {
    pub fn new(box_: &mut ParsedBox) -> Result<Self> {
        let reader = &mut box_.reader;
        let version = box_.version.unwrap_or(0);

        reader.skip(1)?; // reserved

        let mut tenc = Self::default();
        let pattern = reader.read_u8()?;

        if version > 0 {
            tenc.crypt_byte_block = pattern >> 4;
            tenc.skip_byte_block = pattern & 0x0f;
        }

        tenc.is_protected = reader.read_u8()? == 1;
        tenc.per_sample_iv_size = reader.read_u8()?;
        tenc.default_kid.copy_from_slice(&reader.read_bytes_u8(16)?);

        if tenc.is_protected && tenc.per_sample_iv_size == 0 {
            let constant_iv_size = reader.read_u8()?;
            tenc.constant_iv = reader.read_bytes_u8(constant_iv_size as usize)?;
        }

        Ok(tenc)
    }
}

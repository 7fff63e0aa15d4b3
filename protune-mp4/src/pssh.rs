/*
    REFERENCES
    ----------

    1. https://github.com/shaka-project/shaka-player/blob/4e933116984beb630d31ce7a0b8c9bc6f8b48c06/lib/util/pssh.js
    2. https://github.com/rlaphoenix/pywidevine/blob/master/pywidevine/pssh.py

*/

use crate::{
    Result, bail, data,
    parser::{self, Mp4Parser, ParsedBox},
};

pub const WIDEVINE_SYSTEM_ID: [u8; 16] = [
    0xed, 0xef, 0x8b, 0xa9, 0x79, 0xd6, 0x4a, 0xce, 0xa3, 0xc8, 0x27, 0xdc, 0xd5, 0x1d, 0x21, 0xed,
];

/// Protection system specific header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PsshBox {
    pub system_id: [u8; 16],
    /// Only version 1 boxes list key ids.
    pub key_ids: Vec<[u8; 16]>,
    /// System specific payload.
    pub data: Vec<u8>,
    /// The whole box, as init data is usually exchanged.
    pub raw: Vec<u8>,
}

impl PsshBox {
    /// Every `pssh` box found in `moov` or `moof` boxes.
    pub fn from_init(data: &[u8]) -> Result<Vec<Self>> {
        let boxes = data!(Vec::new());

        Mp4Parser::new()
            .base_box("moov", parser::children)
            .base_box("moof", parser::children)
            .full_box("pssh", {
                let boxes = boxes.clone();
                move |mut box_| {
                    boxes.borrow_mut().push(Self::new(&mut box_)?);
                    Ok(())
                }
            })
            .parse(data, true, false)?;

        Ok(boxes.take())
    }

    pub fn new(box_: &mut ParsedBox) -> Result<Self> {
        let version = box_.version.unwrap_or(0);

        if version > 1 {
            bail!("unrecognized pssh box version {}", version);
        }

        let raw = box_.full_data();
        let reader = &mut box_.reader;
        let mut system_id = [0; 16];
        system_id.copy_from_slice(&reader.read_bytes_u8(16)?);

        let mut key_ids = Vec::new();

        if version > 0 {
            for _ in 0..reader.read_u32()? {
                let mut key_id = [0; 16];
                key_id.copy_from_slice(&reader.read_bytes_u8(16)?);
                key_ids.push(key_id);
            }
        }

        let size = reader.read_u32()?;
        let data = reader.read_bytes_u8(size as usize)?;

        Ok(Self {
            system_id,
            key_ids,
            data,
            raw,
        })
    }

    pub fn is_widevine(&self) -> bool {
        self.system_id == WIDEVINE_SYSTEM_ID
    }
}

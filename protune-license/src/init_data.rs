use crate::{Error, Result, license_protocol::WidevinePsshData};
use base64::Engine;
use log::debug;
use prost::Message;

pub const WIDEVINE_SYSTEM_ID: [u8; 16] = [
    0xed, 0xef, 0x8b, 0xa9, 0x79, 0xd6, 0x4a, 0xce, 0xa3, 0xc8, 0x27, 0xdc, 0xd5, 0x1d, 0x21, 0xed,
];

/// Decoded initialization data.
///
/// Accepts either a complete `pssh` box, whose header is stripped, or the raw
/// widevine protection system data it wraps.
#[derive(Clone, Debug, PartialEq)]
pub struct InitData {
    raw: Vec<u8>,
    data: WidevinePsshData,
    box_key_ids: Vec<Vec<u8>>,
}

impl InitData {
    pub fn from_base64(data: &str) -> Result<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data.trim())
            .map_err(|x| Error::InitData(format!("not valid base64 ({})", x)))?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::InitData("no bytes to decode".to_owned()));
        }

        if bytes.len() >= 8 && &bytes[4..8] == b"pssh" {
            match Self::from_pssh_box(bytes) {
                Ok(init_data) => return Ok(init_data),
                Err(e) => debug!("init data is not a usable pssh box, trying raw data: {}", e),
            }
        }

        Self::from_raw(bytes.to_vec(), Vec::new())
    }

    fn from_pssh_box(bytes: &[u8]) -> Result<Self> {
        let truncated = || Error::InitData("pssh box is truncated".to_owned());
        let read_u32 = |at: usize| -> Result<u32> {
            bytes
                .get(at..at + 4)
                .map(|x| u32::from_be_bytes([x[0], x[1], x[2], x[3]]))
                .ok_or_else(truncated)
        };

        let version = *bytes.get(8).ok_or_else(truncated)?;
        let system_id = bytes.get(12..28).ok_or_else(truncated)?;

        if system_id != WIDEVINE_SYSTEM_ID {
            return Err(Error::InitData(format!(
                "pssh box belongs to system {}",
                hex::encode(system_id)
            )));
        }

        let mut position = 28;
        let mut box_key_ids = Vec::new();

        if version > 0 {
            let count = read_u32(position)? as usize;
            position += 4;

            for _ in 0..count {
                box_key_ids.push(
                    bytes
                        .get(position..position + 16)
                        .ok_or_else(truncated)?
                        .to_vec(),
                );
                position += 16;
            }
        }

        let size = read_u32(position)? as usize;
        position += 4;
        let data = bytes.get(position..position + size).ok_or_else(truncated)?;
        Self::from_raw(data.to_vec(), box_key_ids)
    }

    fn from_raw(raw: Vec<u8>, box_key_ids: Vec<Vec<u8>>) -> Result<Self> {
        let data = WidevinePsshData::decode(raw.as_slice())
            .map_err(|x| Error::InitData(format!("not widevine pssh data ({})", x)))?;

        Ok(Self {
            raw,
            data,
            box_key_ids,
        })
    }

    /// Protection system data exactly as it is sent in license requests.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn data(&self) -> &WidevinePsshData {
        &self.data
    }

    /// Key ids listed by the protection system data, or by a version 1 box header
    /// when the data lists none.
    pub fn key_ids(&self) -> &[Vec<u8>] {
        if self.data.key_ids.is_empty() {
            &self.box_key_ids
        } else {
            &self.data.key_ids
        }
    }
}

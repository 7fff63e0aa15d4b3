use crate::{ParsedBox, Result};

pub struct MdhdBox {
    /// ISO/IEC 14496-12: an integer that specifies the time‐scale for this media;
    /// this is the number of time units that pass in one second
    pub timescale: u32,
    pub duration: u64,
    /// ISO-639-2/T code, `und` when unset.
    pub language: String,
}

impl MdhdBox {
    /// Parses a MDHD Box.
    pub fn new(box_: &mut ParsedBox) -> Result<Self> {
        let reader = &mut box_.reader;
        let version = box_.version.unwrap_or(0);

        let (timescale, duration) = if version == 1 {
            reader.skip(16)?;
            (reader.read_u32()?, reader.read_u64()?)
        } else {
            reader.skip(8)?;
            (reader.read_u32()?, reader.read_u32()? as u64)
        };

        let language = decode_language(reader.read_u16()?);

        Ok(Self {
            timescale,
            duration,
            language,
        })
    }
}

/// The language is stored as three 5-bit fields, each the difference between
/// its ASCII value and 0x60.
pub fn decode_language(packed: u16) -> String {
    if packed == 0 {
        return "und".to_owned();
    }

    [(packed >> 10) & 0x1f, (packed >> 5) & 0x1f, packed & 0x1f]
        .iter()
        .map(|x| char::from(*x as u8 + 0x60))
        .collect()
}

pub fn encode_language(language: &str) -> u16 {
    let bytes = language.as_bytes();

    if bytes.len() != 3 || !bytes.iter().all(|x| x.is_ascii_lowercase()) {
        return encode_language("und");
    }

    bytes
        .iter()
        .fold(0, |packed, x| (packed << 5) | (*x - 0x60) as u16)
}

use crate::{ParsedBox, Result};

/// Track fragment header.
#[derive(Clone, Debug, Default)]
pub struct TfhdBox {
    pub track_id: u32,
    /// Absolute offset every `trun` data offset is relative to. When absent the
    /// fragment header itself is the base.
    pub base_data_offset: Option<u64>,
    /// Overrides `trex` for this fragment. 1-based.
    pub sample_description_index: Option<u32>,
    /// Overrides `trex` for this fragment.
    pub default_sample_duration: Option<u32>,
    /// Overrides `trex` for this fragment.
    pub default_sample_size: Option<u32>,
}

impl TfhdBox {
    /// Parses a TFHD Box.
    pub fn new(box_: &mut ParsedBox) -> Result<Self> {
        let reader = &mut box_.reader;
        let flags = box_.flags.unwrap_or(0);

        let mut tfhd = Self {
            track_id: reader.read_u32()?,
            ..Default::default()
        };

        if (flags & 0x000001) != 0 {
            tfhd.base_data_offset = Some(reader.read_u64()?);
        }

        if (flags & 0x000002) != 0 {
            tfhd.sample_description_index = Some(reader.read_u32()?);
        }

        if (flags & 0x000008) != 0 {
            tfhd.default_sample_duration = Some(reader.read_u32()?);
        }

        if (flags & 0x000010) != 0 {
            tfhd.default_sample_size = Some(reader.read_u32()?);
        }

        // "default_sample_flags" is of no use here.

        Ok(tfhd)
    }
}

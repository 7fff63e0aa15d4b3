use crate::{ParsedBox, Result};

#[derive(Clone, Debug, Default)]
pub struct TrunSample {
    /// The length of the sample in timescale units.
    pub sample_duration: Option<u32>,
    /// The size of the sample in bytes.
    pub sample_size: Option<u32>,
}

/// Track fragment run.
#[derive(Clone, Debug, Default)]
pub struct TrunBox {
    pub sample_count: u32,
    pub sample_data: Vec<TrunSample>,
    /// Signed offset of the first sample, relative to the fragment's base data offset.
    pub data_offset: Option<i32>,
}

impl TrunBox {
    /// Parses a TRUN Box.
    pub fn new(box_: &mut ParsedBox) -> Result<Self> {
        let reader = &mut box_.reader;
        let flags = box_.flags.unwrap_or(0);

        let sample_count = reader.read_u32()?;
        let mut data_offset = None;

        if (flags & 0x000001) != 0 {
            data_offset = Some(reader.read_i32()?);
        }

        // Skip "first_sample_flags" if present.
        if (flags & 0x000004) != 0 {
            reader.skip(4)?;
        }

        // Capacity bounded by what the remaining payload can hold.
        let entry_size = [0x000100, 0x000200, 0x000400, 0x000800]
            .iter()
            .filter(|flag| (flags & **flag) != 0)
            .count()
            * 4;
        let capacity = if entry_size == 0 {
            0
        } else {
            (sample_count as usize).min(reader.remaining() / entry_size)
        };
        let mut sample_data = Vec::with_capacity(capacity);

        for _ in 0..sample_count {
            let mut sample = TrunSample::default();

            if (flags & 0x000100) != 0 {
                sample.sample_duration = Some(reader.read_u32()?);
            }

            if (flags & 0x000200) != 0 {
                sample.sample_size = Some(reader.read_u32()?);
            }

            // Skip "sample_flags" and "sample_composition_time_offset" if present.
            if (flags & 0x000400) != 0 {
                reader.skip(4)?;
            }

            if (flags & 0x000800) != 0 {
                reader.skip(4)?;
            }

            sample_data.push(sample);
        }

        Ok(Self {
            sample_count,
            sample_data,
            data_offset,
        })
    }
}

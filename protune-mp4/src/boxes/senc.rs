use crate::{Reader, Result, extract::Subsample};

/// Sample encryption information for a single sample.
#[derive(Clone, Debug, Default)]
pub struct SencSample {
    pub iv: Vec<u8>,
    pub subsamples: Vec<Subsample>,
}

/// Sample Encryption Box (senc) - contains per-sample encryption info.
#[derive(Clone, Debug, Default)]
pub struct SencBox {
    pub samples: Vec<SencSample>,
}

impl SencBox {
    /// Parse a senc payload (after version and flags).
    ///
    /// `iv_size` comes from the track encryption defaults; a box carrying the
    /// override flag (0x1) replaces it with its own.
    pub fn parse(reader: &mut Reader, flags: u32, iv_size: u8) -> Result<Self> {
        let mut iv_size = iv_size;

        if flags & 0x01 != 0 {
            reader.skip(3)?; // algorithm id
            iv_size = reader.read_u8()?;
            reader.skip(16)?; // kid
        }

        let sample_count = reader.read_u32()?;
        let has_subsamples = flags & 0x02 != 0;
        let mut samples = Vec::with_capacity((sample_count as usize).min(reader.remaining()));

        for _ in 0..sample_count {
            let iv = reader.read_bytes_u8(iv_size as usize)?;
            let mut subsamples = Vec::new();

            if has_subsamples {
                let subsample_count = reader.read_u16()?;

                for _ in 0..subsample_count {
                    subsamples.push(Subsample {
                        clear: reader.read_u16()? as u32,
                        cipher: reader.read_u32()?,
                    });
                }
            }

            samples.push(SencSample { iv, subsamples });
        }

        Ok(Self { samples })
    }
}

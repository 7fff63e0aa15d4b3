use crate::{ParsedBox, Result};

pub struct TkhdBox {
    pub track_id: u32,
}

impl TkhdBox {
    pub fn new(box_: &mut ParsedBox) -> Result<Self> {
        let reader = &mut box_.reader;

        // creation and modification times
        if box_.version == Some(1) {
            reader.skip(16)?;
        } else {
            reader.skip(8)?;
        }

        Ok(Self {
            track_id: reader.read_u32()?,
        })
    }
}

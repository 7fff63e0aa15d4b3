use crate::{ParsedBox, Result};

pub struct HdlrBox {
    /// `soun`, `vide`, `text`, `subt` ...
    pub handler_type: [u8; 4],
}

impl HdlrBox {
    pub fn new(box_: &mut ParsedBox) -> Result<Self> {
        let reader = &mut box_.reader;
        reader.skip(4)?; // pre_defined

        Ok(Self {
            handler_type: reader.read_fourcc()?,
        })
    }
}

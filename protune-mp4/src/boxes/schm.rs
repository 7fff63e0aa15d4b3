use crate::{ParsedBox, Result};

/// Scheme Type Box (schm) - identifies the protection scheme.
pub struct SchmBox {
    /// The scheme type as a 4-byte code (e.g., 'cenc', 'cbcs').
    pub scheme_type: [u8; 4],
}

impl SchmBox {
    pub fn new(box_: &mut ParsedBox) -> Result<Self> {
        // scheme_version and the optional scheme_uri are not needed
        Ok(Self {
            scheme_type: box_.reader.read_fourcc()?,
        })
    }
}

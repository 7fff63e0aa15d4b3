//! Parsers for the individual boxes the extractors need.

mod hdlr;
mod mdhd;
mod schm;
mod senc;
mod tenc;
mod tfhd;
mod tkhd;
mod trex;
mod trun;

pub use hdlr::HdlrBox;
pub use mdhd::{MdhdBox, decode_language, encode_language};
pub use schm::SchmBox;
pub use senc::{SencBox, SencSample};
pub use tenc::TencBox;
pub use tfhd::TfhdBox;
pub use tkhd::TkhdBox;
pub use trex::TrexBox;
pub use trun::{TrunBox, TrunSample};

#[macro_export]
macro_rules! data {
    () => {
        std::rc::Rc::new(std::cell::RefCell::new(None))
    };
    ($val:expr) => {
        std::rc::Rc::new(std::cell::RefCell::new($val))
    };
}

#![cfg_attr(docsrs, feature(doc_cfg))]

//! Fragmented mp4 audio handling: a box parser ported from
//! [shaka-player](https://github.com/shaka-project/shaka-player), protection
//! scheme and sample extraction, `cenc`/`cbcs` sample decryption and a writer for
//! non-fragmented containers.
//!
//! ```no_run
//! use protune_mp4::{ParseMode, Reassembler, decrypt::{Decrypter, KeyRing}, extract_samples};
//!
//! # fn main() -> protune_mp4::Result<()> {
//! let data = std::fs::read("encrypted.m4a")?;
//! let track = extract_samples(&data, ParseMode::Lenient)?;
//! let keys = KeyRing::new().kid_hex(
//!     "eb676abbcb345e96bbcf616630f1a3da",
//!     "100b6c20940f779a4589152b57d2dacb",
//! )?;
//! let decrypted = Decrypter::new(keys, track.schemes.clone()).decrypt(track.samples)?;
//! std::fs::write("decrypted.m4a", Reassembler::new(&track.skeleton).write(&decrypted)?)?;
//! # Ok(())
//! # }
//! ```

pub mod boxes;
pub mod decrypt;
pub mod pssh;

mod error;
mod extract;
mod movie;
mod parser;
mod reader;
mod remux;
mod scheme;
mod skeleton;
mod writer;

pub use error::{Error, Result};
pub use extract::{ExtractedTrack, Sample, SampleInfo, Subsample, extract_samples};
pub use movie::{MovieInfo, Protection, SampleEntry, TrackInfo};
pub use parser::*;
pub use reader::Reader;
pub use remux::Reassembler;
pub use scheme::{EncryptionScheme, SchemeMap, SchemeType, extract_scheme};
pub use skeleton::ContainerSkeleton;
pub use writer::BoxWriter;

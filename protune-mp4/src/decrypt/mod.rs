//! Sample decryption for `cenc` and `cbcs` protected audio.
//!
//! ```no_run
//! use protune_mp4::{ParseMode, decrypt::{Decrypter, KeyRing}, extract_samples};
//!
//! # fn main() -> protune_mp4::Result<()> {
//! let data = std::fs::read("encrypted.m4a")?;
//! let track = extract_samples(&data, ParseMode::Lenient)?;
//! let keys = KeyRing::new().index_hex(1, "100b6c20940f779a4589152b57d2dacb")?;
//! let decrypted = Decrypter::new(keys, track.schemes.clone()).decrypt(track.samples)?;
//! # Ok(())
//! # }
//! ```

mod cipher;
mod engine;
mod keys;

pub use cipher::{decrypt_sample, pad_iv};
pub use engine::{DecryptedTrack, Decrypter, UnmappedKeyPolicy};
pub use keys::{KeyRing, parse_hex_16};

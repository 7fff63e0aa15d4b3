//! Encryption scheme of the audio track, resolved from its sample descriptions.

use crate::{
    Error, ParseMode, Result,
    movie::{MovieInfo, SampleEntry, TrackInfo},
};
use log::{debug, warn};
use std::{collections::BTreeMap, fmt};

/// Supported sample encryption schemes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchemeType {
    /// AES-128 counter mode.
    Cenc,
    /// AES-128 CBC, no chaining across samples.
    Cbcs,
}

impl SchemeType {
    pub fn from_fourcc(code: &[u8; 4]) -> Result<Self> {
        match code {
            b"cenc" => Ok(Self::Cenc),
            b"cbcs" => Ok(Self::Cbcs),
            x => Err(Error::UnsupportedScheme(
                String::from_utf8_lossy(x).into_owned(),
            )),
        }
    }

    pub fn fourcc(&self) -> &'static [u8; 4] {
        match self {
            Self::Cenc => b"cenc",
            Self::Cbcs => b"cbcs",
        }
    }
}

impl fmt::Display for SchemeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.fourcc()))
    }
}

/// How the samples of one description index are protected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptionScheme {
    pub scheme_type: SchemeType,
    /// 0, 8 or 16.
    pub per_sample_iv_size: u8,
    /// Non-empty whenever `per_sample_iv_size` is 0.
    pub constant_iv: Vec<u8>,
    pub default_key_id: [u8; 16],
}

impl EncryptionScheme {
    pub fn new(
        scheme_type: SchemeType,
        per_sample_iv_size: u8,
        constant_iv: Vec<u8>,
        default_key_id: [u8; 16],
    ) -> Result<Self> {
        if !matches!(per_sample_iv_size, 0 | 8 | 16) {
            return Err(Error::format(format!(
                "per sample iv size must be 0, 8 or 16 (found {})",
                per_sample_iv_size
            )));
        }

        if per_sample_iv_size == 0 && constant_iv.is_empty() {
            return Err(Error::format(
                "scheme without per sample ivs must carry a constant iv",
            ));
        }

        if constant_iv.len() > 16 {
            return Err(Error::format(format!(
                "constant iv is {} bytes long (max 16)",
                constant_iv.len()
            )));
        }

        Ok(Self {
            scheme_type,
            per_sample_iv_size,
            constant_iv,
            default_key_id,
        })
    }

    fn from_entry(entry: &SampleEntry) -> Result<Option<Self>> {
        let Some(protection) = &entry.protection else {
            return Ok(None);
        };

        let Some(tenc) = &protection.tenc else {
            return Err(Error::format(format!(
                "sample entry {} is protected but has no tenc box",
                entry.index
            )));
        };

        if !tenc.is_protected {
            return Ok(None);
        }

        let scheme_type = match &protection.scheme_type {
            Some(x) => SchemeType::from_fourcc(x)?,
            None => {
                return Err(Error::format(format!(
                    "sample entry {} is protected but has no schm box",
                    entry.index
                )));
            }
        };

        if tenc.skip_byte_block != 0 {
            warn!(
                "sample entry {} declares a {}:{} encryption pattern, treating every block as encrypted",
                entry.index, tenc.crypt_byte_block, tenc.skip_byte_block
            );
        }

        Self::new(
            scheme_type,
            tenc.per_sample_iv_size,
            tenc.constant_iv.clone(),
            tenc.default_kid,
        )
        .map(Some)
    }
}

/// Either one scheme for the whole asset or one per description index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SchemeMap {
    Single(EncryptionScheme),
    PerDescription(BTreeMap<u32, EncryptionScheme>),
}

impl SchemeMap {
    pub fn get(&self, description_index: u32) -> Option<&EncryptionScheme> {
        match self {
            Self::Single(scheme) => Some(scheme),
            Self::PerDescription(schemes) => schemes.get(&description_index),
        }
    }

    /// Apply caller supplied schemes on top of what the container declares.
    ///
    /// Overrides always switch the asset to per description schemes. A single
    /// scheme is first spread over every index in `1..=description_count`.
    pub fn with_overrides(
        found: Option<Self>,
        overrides: &BTreeMap<u32, EncryptionScheme>,
        description_count: u32,
    ) -> Option<Self> {
        if overrides.is_empty() {
            return found;
        }

        let mut schemes = match found {
            Some(Self::PerDescription(schemes)) => schemes,
            Some(Self::Single(scheme)) => (1..=description_count.max(1))
                .map(|x| (x, scheme.clone()))
                .collect(),
            None => BTreeMap::new(),
        };

        for (index, scheme) in overrides {
            debug!("overriding scheme of description index {} with {}", index, scheme.scheme_type);
            schemes.insert(*index, scheme.clone());
        }

        Some(Self::PerDescription(schemes))
    }
}

/// Resolve the encryption scheme of the first audio track in `data` (a whole
/// container or just its `moov` box).
///
/// A track without protection metadata yields `None`. In lenient mode a
/// malformed structure does too, after logging what was ignored.
pub fn extract_scheme(data: &[u8], mode: ParseMode) -> Result<Option<SchemeMap>> {
    let movie = match MovieInfo::from_container(data, mode) {
        Ok(movie) => movie,
        Err(e) if !mode.is_strict() => {
            warn!("cannot read container metadata, assuming no scheme: {}", e);
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    match movie.audio_track() {
        Some(track) => schemes_of_track(track, mode),
        None if mode.is_strict() => Err(Error::format("no audio track found")),
        None => {
            warn!("no audio track found, assuming no scheme");
            Ok(None)
        }
    }
}

pub(crate) fn schemes_of_track(track: &TrackInfo, mode: ParseMode) -> Result<Option<SchemeMap>> {
    let mut schemes = BTreeMap::new();

    for entry in &track.entries {
        match EncryptionScheme::from_entry(entry) {
            Ok(Some(scheme)) => {
                debug!(
                    "sample description {} uses {} (iv size {}, kid {})",
                    entry.index,
                    scheme.scheme_type,
                    scheme.per_sample_iv_size,
                    hex::encode(scheme.default_key_id)
                );
                schemes.insert(entry.index, scheme);
            }
            Ok(None) => (),
            Err(e) if !mode.is_strict() => {
                warn!("ignoring protection info of sample description {}: {}", entry.index, e)
            }
            Err(e) => return Err(e),
        }
    }

    if schemes.is_empty() {
        return Ok(None);
    }

    if track.entries.len() == 1 {
        return Ok(schemes.into_values().next().map(SchemeMap::Single));
    }

    Ok(Some(SchemeMap::PerDescription(schemes)))
}

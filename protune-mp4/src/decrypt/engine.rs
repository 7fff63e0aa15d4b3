use crate::{
    Error, Result,
    decrypt::{KeyRing, cipher},
    extract::{Sample, SampleInfo},
    scheme::SchemeMap,
};
use log::{debug, warn};
use std::collections::BTreeMap;

/// What to do with a protected sample whose description index has no key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UnmappedKeyPolicy {
    /// Stop with [`Error::UnmappedKey`].
    #[default]
    Fail,
    /// Copy the ciphertext through unchanged and log a warning.
    PassThrough,
}

/// Decrypted sample bytes plus the bookkeeping of every original sample.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DecryptedTrack {
    pub data: Vec<u8>,
    pub samples: Vec<SampleInfo>,
}

impl DecryptedTrack {
    /// Concatenate samples that need no decryption.
    pub fn from_clear(samples: Vec<Sample>) -> Self {
        let mut track = Self {
            data: Vec::with_capacity(samples.iter().map(|x| x.data.len()).sum()),
            samples: Vec::with_capacity(samples.len()),
        };

        for sample in samples {
            track.push(sample);
        }

        track
    }

    pub fn total_duration(&self) -> u64 {
        self.samples.iter().map(|x| x.duration as u64).sum()
    }

    fn push(&mut self, sample: Sample) {
        self.samples.push(sample.info());
        self.data.extend_from_slice(&sample.data);
    }
}

/// Applies content keys to extracted samples according to their schemes.
pub struct Decrypter {
    keys: KeyRing,
    schemes: Option<SchemeMap>,
    policy: UnmappedKeyPolicy,
}

impl Decrypter {
    pub fn new(keys: KeyRing, schemes: Option<SchemeMap>) -> Self {
        Self {
            keys,
            schemes,
            policy: UnmappedKeyPolicy::default(),
        }
    }

    pub fn unmapped_key(mut self, policy: UnmappedKeyPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Decrypt every sample, keeping their order.
    pub fn decrypt(&self, samples: Vec<Sample>) -> Result<DecryptedTrack> {
        let mut track = DecryptedTrack {
            data: Vec::with_capacity(samples.iter().map(|x| x.data.len()).sum()),
            samples: Vec::with_capacity(samples.len()),
        };
        let mut passed_through = BTreeMap::<u32, usize>::new();
        let mut decrypted = 0;

        for (index, mut sample) in samples.into_iter().enumerate() {
            if self.decrypt_sample(index, &mut sample)? {
                decrypted += 1;
            } else if self.is_protected(sample.description_index) {
                *passed_through.entry(sample.description_index).or_default() += 1;
            }

            track.push(sample);
        }

        for (description_index, count) in passed_through {
            warn!(
                "{} sample(s) of description index {} have no key and were left encrypted",
                count, description_index
            );
        }

        debug!(
            "decrypted {} of {} sample(s)",
            decrypted,
            track.samples.len()
        );
        Ok(track)
    }

    fn is_protected(&self, description_index: u32) -> bool {
        self.schemes
            .as_ref()
            .and_then(|x| x.get(description_index))
            .is_some()
    }

    /// Returns true when the sample was decrypted, false when it was left as is.
    fn decrypt_sample(&self, index: usize, sample: &mut Sample) -> Result<bool> {
        let Some(scheme) = self
            .schemes
            .as_ref()
            .and_then(|x| x.get(sample.description_index))
        else {
            return Ok(false);
        };

        let Some(key) = self.keys.lookup(sample.description_index, Some(scheme)) else {
            return match self.policy {
                UnmappedKeyPolicy::Fail => Err(Error::UnmappedKey {
                    description_index: sample.description_index,
                }),
                UnmappedKeyPolicy::PassThrough => Ok(false),
            };
        };

        let iv = if !sample.iv.is_empty() {
            cipher::pad_iv(&sample.iv)
        } else if !scheme.constant_iv.is_empty() {
            cipher::pad_iv(&scheme.constant_iv)
        } else {
            return Err(Error::MissingIv { index });
        };

        cipher::decrypt_sample(
            scheme.scheme_type,
            key,
            &iv,
            &mut sample.data,
            &sample.subsamples,
        )?;
        Ok(true)
    }
}

use anyhow::{Context, Result, bail};
use protune_license::{Device, LicenseType, SignaturePolicy};
use protune_mp4::{
    EncryptionScheme, ParseMode, SchemeType,
    decrypt::{UnmappedKeyPolicy, parse_hex_16},
};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};

/// Pipeline settings. Every field has a default, so `{}` is a valid config file.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Assets processed at the same time.
    pub max_concurrency: usize,
    /// Attempts after the first one, for failures that may go away.
    pub max_retries: u8,
    /// Delay before the first retry, doubled for every following one.
    pub retry_backoff_ms: u64,
    pub parse_mode: Strictness,
    pub unmapped_key: UnmappedKey,
    pub signature_policy: Strictness,
    pub license_type: License,
    /// `.wvd` device file.
    pub device_path: Option<PathBuf>,
    pub service_certificate_path: Option<PathBuf>,
    /// Schemes for legacy assets whose containers do not declare one, keyed by
    /// sample description index.
    pub scheme_overrides: BTreeMap<u32, SchemeOverride>,
    pub output_directory: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            max_retries: 3,
            retry_backoff_ms: 500,
            parse_mode: Strictness::Lenient,
            unmapped_key: UnmappedKey::Fail,
            signature_policy: Strictness::Lenient,
            license_type: License::Streaming,
            device_path: None,
            service_certificate_path: None,
            scheme_overrides: BTreeMap::new(),
            output_directory: None,
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        let config = serde_json::from_str::<Self>(&text)
            .with_context(|| format!("cannot parse config file {}", path.display()))?;

        if config.max_concurrency == 0 {
            bail!("max_concurrency must be at least 1");
        }

        Ok(config)
    }

    pub fn load_device(&self) -> Result<Option<Arc<Device>>> {
        let Some(path) = &self.device_path else {
            return Ok(None);
        };

        let device = Device::from_file(path)
            .with_context(|| format!("cannot load device {}", path.display()))?;
        Ok(Some(Arc::new(device)))
    }

    pub fn load_service_certificate(&self) -> Result<Option<Vec<u8>>> {
        let Some(path) = &self.service_certificate_path else {
            return Ok(None);
        };

        std::fs::read(path)
            .map(Some)
            .with_context(|| format!("cannot read service certificate {}", path.display()))
    }

    pub fn schemes(&self) -> Result<BTreeMap<u32, EncryptionScheme>> {
        self.scheme_overrides
            .iter()
            .map(|(index, x)| {
                x.to_scheme()
                    .with_context(|| {
                        format!("invalid scheme override for description index {}", index)
                    })
                    .map(|scheme| (*index, scheme))
            })
            .collect()
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Strictness {
    #[default]
    Lenient,
    Strict,
}

impl From<Strictness> for ParseMode {
    fn from(value: Strictness) -> Self {
        match value {
            Strictness::Lenient => Self::Lenient,
            Strictness::Strict => Self::Strict,
        }
    }
}

impl From<Strictness> for SignaturePolicy {
    fn from(value: Strictness) -> Self {
        match value {
            Strictness::Lenient => Self::Lenient,
            Strictness::Strict => Self::Strict,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnmappedKey {
    #[default]
    Fail,
    PassThrough,
}

impl From<UnmappedKey> for UnmappedKeyPolicy {
    fn from(value: UnmappedKey) -> Self {
        match value {
            UnmappedKey::Fail => Self::Fail,
            UnmappedKey::PassThrough => Self::PassThrough,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum License {
    #[default]
    Streaming,
    Offline,
}

impl From<License> for LicenseType {
    fn from(value: License) -> Self {
        match value {
            License::Streaming => Self::Streaming,
            License::Offline => Self::Offline,
        }
    }
}

/// A scheme supplied by the caller instead of read from the container.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct SchemeOverride {
    /// `cenc` or `cbcs`.
    pub scheme: String,
    #[serde(default)]
    pub per_sample_iv_size: u8,
    /// Hex encoded.
    #[serde(default)]
    pub constant_iv: Option<String>,
    /// Hex encoded.
    #[serde(default)]
    pub default_key_id: Option<String>,
}

impl SchemeOverride {
    pub fn to_scheme(&self) -> Result<EncryptionScheme> {
        let code: [u8; 4] = self
            .scheme
            .as_bytes()
            .try_into()
            .with_context(|| format!("'{}' is not a four character code", self.scheme))?;
        let constant_iv = match &self.constant_iv {
            Some(x) => hex::decode(x.trim())?,
            None => Vec::new(),
        };
        let default_key_id = match &self.default_key_id {
            Some(x) => parse_hex_16(x)?,
            None => [0; 16],
        };

        Ok(EncryptionScheme::new(
            SchemeType::from_fourcc(&code)?,
            self.per_sample_iv_size,
            constant_iv,
            default_key_id,
        )?)
    }
}

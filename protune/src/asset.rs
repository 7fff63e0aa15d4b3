use anyhow::{Context, Result};
use protune_license::{ContentKey, KeyType};
use protune_mp4::decrypt::KeyRing;
use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

/// Where the encrypted container comes from.
#[derive(Clone, Debug)]
pub enum Source {
    Bytes(Arc<[u8]>),
    File(PathBuf),
}

impl Source {
    pub(crate) async fn load(&self) -> Result<Arc<[u8]>> {
        match self {
            Self::Bytes(data) => Ok(data.clone()),
            Self::File(path) => tokio::fs::read(path)
                .await
                .map(Arc::from)
                .with_context(|| format!("cannot read {}", path.display())),
        }
    }
}

/// One encrypted audio stream to turn into a playable file.
#[derive(Clone, Debug)]
pub struct Asset {
    pub name: String,
    pub source: Source,
    /// Base64 init data. Read from the container's widevine `pssh` box when
    /// missing.
    pub init_data: Option<String>,
    /// Hex keys delivered out of band, by sample description index.
    pub keys: BTreeMap<u32, String>,
    /// Also map the first content key of the license to this description index.
    pub license_key_index: Option<u32>,
    /// Overrides `output_directory/<name>.m4a`.
    pub output: Option<PathBuf>,
}

impl Asset {
    pub fn new<T: Into<String>>(name: T, source: Source) -> Self {
        Self {
            name: name.into(),
            source,
            init_data: None,
            keys: BTreeMap::new(),
            license_key_index: None,
            output: None,
        }
    }

    pub fn init_data<T: Into<String>>(mut self, init_data: T) -> Self {
        self.init_data = Some(init_data.into());
        self
    }

    pub fn key<T: Into<String>>(mut self, description_index: u32, key: T) -> Self {
        self.keys.insert(description_index, key.into());
        self
    }

    pub fn license_key_index(mut self, description_index: u32) -> Self {
        self.license_key_index = Some(description_index);
        self
    }

    pub fn output<T: Into<PathBuf>>(mut self, path: T) -> Self {
        self.output = Some(path.into());
        self
    }

    pub(crate) fn key_ring(&self, license_keys: &[ContentKey]) -> Result<KeyRing> {
        let mut ring = KeyRing::new();

        for (index, key) in &self.keys {
            ring = ring
                .index_hex(*index, key)
                .with_context(|| format!("invalid key for description index {}", index))?;
        }

        let content_keys = license_keys
            .iter()
            .filter(|x| x.key_type == KeyType::Content)
            .filter_map(|x| x.pair_16())
            .collect::<Vec<_>>();

        if let (Some(index), Some((_, key))) = (self.license_key_index, content_keys.first()) {
            ring.insert_index(index, *key);
        }

        for (kid, key) in content_keys {
            ring.insert_kid(kid, key);
        }

        Ok(ring)
    }
}

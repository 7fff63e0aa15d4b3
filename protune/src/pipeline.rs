use crate::{
    asset::Asset,
    config::Config,
    transport::LicenseTransport,
};
use anyhow::{Context, Result, bail};
use base64::Engine;
use colored::Colorize;
use log::{debug, info, warn};
use protune_license::{ContentKey, Device, InitData, Session};
use protune_mp4::{
    EncryptionScheme, ExtractedTrack, ParseMode, Reassembler, SchemeMap,
    decrypt::{DecryptedTrack, Decrypter, UnmappedKeyPolicy},
    extract_samples,
    pssh::PsshBox,
};
use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

/// What came out of one asset.
#[derive(Debug)]
pub struct Processed {
    /// The reassembled, non-fragmented container.
    pub data: Vec<u8>,
    /// Where `data` was written to, if anywhere.
    pub output: Option<PathBuf>,
    pub samples: usize,
    /// In media timescale units.
    pub duration: u64,
    pub keys: Vec<ContentKey>,
    /// The license signature did not verify but its keys were used anyway.
    pub signature_mismatch: bool,
    /// Some fragment ran out of data and its remaining samples were dropped.
    pub truncated: bool,
}

/// Shared, read-only state for processing assets.
pub struct Pipeline<T> {
    config: Config,
    device: Option<Arc<Device>>,
    service_certificate: Option<Vec<u8>>,
    scheme_overrides: BTreeMap<u32, EncryptionScheme>,
    transport: T,
}

impl<T: LicenseTransport> Pipeline<T> {
    pub fn new(config: Config, transport: T) -> Self {
        Self {
            config,
            device: None,
            service_certificate: None,
            scheme_overrides: BTreeMap::new(),
            transport,
        }
    }

    /// Load the device, service certificate and scheme overrides named by `config`.
    pub fn from_config(config: Config, transport: T) -> Result<Self> {
        let device = config.load_device()?;
        let service_certificate = config.load_service_certificate()?;
        let scheme_overrides = config.schemes()?;

        Ok(Self {
            config,
            device,
            service_certificate,
            scheme_overrides,
            transport,
        })
    }

    pub fn device(mut self, device: Arc<Device>) -> Self {
        self.device = Some(device);
        self
    }

    pub fn service_certificate(mut self, certificate: Vec<u8>) -> Self {
        self.service_certificate = Some(certificate);
        self
    }

    pub fn scheme_override(mut self, description_index: u32, scheme: EncryptionScheme) -> Self {
        self.scheme_overrides.insert(description_index, scheme);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Extract, license, decrypt and reassemble one asset.
    ///
    /// Container work runs on the blocking thread pool. The license exchange is
    /// the only await on the network.
    pub async fn process(&self, asset: &Asset) -> Result<Processed> {
        info!("Processing asset {}", asset.name.bold());

        let data = asset.source.load().await?;
        let mode: ParseMode = self.config.parse_mode.into();
        let want_pssh = asset.init_data.is_none() && self.device.is_some();

        let (mut track, pssh) = tokio::task::spawn_blocking(move || {
            let track = extract_samples(&data, mode)?;
            let pssh = if want_pssh {
                widevine_pssh(&data)
            } else {
                None
            };
            anyhow::Ok((track, pssh))
        })
        .await?
        .with_context(|| format!("cannot read samples of {}", asset.name))?;

        let schemes = SchemeMap::with_overrides(
            track.schemes.take(),
            &self.scheme_overrides,
            track.description_count,
        );

        let (keys, signature_mismatch) = match (&schemes, &self.device) {
            (None, _) => {
                debug!("{} is not protected", asset.name);
                (Vec::new(), false)
            }
            (Some(_), Some(device)) => {
                let init_data = match (&asset.init_data, pssh) {
                    (Some(x), _) => Some(InitData::from_base64(x)?),
                    (None, Some(x)) => Some(x),
                    (None, None) => None,
                };

                match init_data {
                    Some(init_data) => self.license(device.clone(), init_data).await?,
                    None if asset.keys.is_empty() => {
                        bail!("{} is protected but has no init data", asset.name)
                    }
                    None => (Vec::new(), false),
                }
            }
            (Some(_), None) if asset.keys.is_empty() => {
                bail!("{} is protected but no device or keys are configured", asset.name)
            }
            (Some(_), None) => (Vec::new(), false),
        };

        let ring = asset.key_ring(&keys)?;
        let policy: UnmappedKeyPolicy = self.config.unmapped_key.into();
        let ExtractedTrack {
            samples,
            skeleton,
            truncated,
            ..
        } = track;

        let data = tokio::task::spawn_blocking(move || {
            let decrypted = if schemes.is_some() {
                Decrypter::new(ring, schemes)
                    .unmapped_key(policy)
                    .decrypt(samples)?
            } else {
                DecryptedTrack::from_clear(samples)
            };
            let data = Reassembler::new(&skeleton).write(&decrypted)?;
            anyhow::Ok((data, decrypted.samples.len(), decrypted.total_duration()))
        })
        .await?
        .with_context(|| format!("cannot decrypt {}", asset.name))?;
        let (data, samples, duration) = data;

        let output = match (&asset.output, &self.config.output_directory) {
            (Some(path), _) => Some(path.clone()),
            (None, Some(directory)) => Some(directory.join(format!("{}.m4a", asset.name))),
            (None, None) => None,
        };

        if let Some(path) = &output {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(path, &data)
                .await
                .with_context(|| format!("cannot write {}", path.display()))?;
            info!("Saved {}", path.to_string_lossy());
        }

        Ok(Processed {
            data,
            output,
            samples,
            duration,
            keys,
            signature_mismatch,
            truncated,
        })
    }

    /// One license exchange. The session is closed on every path.
    async fn license(
        &self,
        device: Arc<Device>,
        init_data: InitData,
    ) -> Result<(Vec<ContentKey>, bool)> {
        let mut session = Session::with_init_data(device, init_data);
        session.set_license_type(self.config.license_type.into());
        session.set_signature_policy(self.config.signature_policy.into());

        let result = self.exchange(&mut session).await;
        let signature_mismatch = session.signature_mismatch();
        session.close();

        let keys = result?;
        for key in &keys {
            debug!("[{}] {}", key.key_type.to_string().green(), key);
        }

        if signature_mismatch {
            warn!("using keys from a license whose signature did not verify");
        }

        Ok((keys, signature_mismatch))
    }

    async fn exchange(&self, session: &mut Session) -> Result<Vec<ContentKey>> {
        if let Some(certificate) = &self.service_certificate {
            session.set_service_certificate(certificate)?;
        }

        let challenge = session.build_request()?;
        let response = self.transport.exchange(challenge).await?;
        Ok(session.consume_response(&response)?)
    }
}

/// Init data of the first widevine `pssh` box of a container.
fn widevine_pssh(data: &[u8]) -> Option<InitData> {
    let boxes = match PsshBox::from_init(data) {
        Ok(x) => x,
        Err(e) => {
            debug!("cannot look for pssh boxes: {}", e);
            return None;
        }
    };

    let pssh = boxes.into_iter().find(|x| x.is_widevine())?;
    debug!(
        "using pssh box from container {}",
        base64::engine::general_purpose::STANDARD.encode(&pssh.raw)
    );
    InitData::from_bytes(&pssh.raw).ok()
}

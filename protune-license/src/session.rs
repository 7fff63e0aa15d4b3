use crate::{
    Error, Result,
    device::Device,
    init_data::InitData,
    keys::{ContentKey, DerivedKeys},
    license_protocol::{
        self, ContentIdentification, DrmCertificate, EncryptedClientIdentification, License,
        LicenseRequest, MessageType, ProtocolVersion, RequestType, SignedDrmCertificate,
        SignedMessage, content_identification,
    },
};
use aes::{
    Aes128,
    cipher::{BlockEncryptMut, KeyIvInit, block_padding::Pkcs7},
};
use base64::Engine;
use log::{debug, info, warn};
use prost::Message;
use rand::{Rng, RngCore};
use rsa::{
    Oaep, RsaPublicKey,
    pkcs1::DecodeRsaPublicKey,
    pss::SigningKey,
    signature::{RandomizedSigner, SignatureEncoding},
};
use sha1::Sha1;
use std::{
    fmt,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

/// Lifecycle of a [`Session`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Requested,
    Licensed,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Open => "open",
            Self::Requested => "requested",
            Self::Licensed => "licensed",
            Self::Closed => "closed",
        })
    }
}

/// What to do when a license signature does not verify.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SignaturePolicy {
    /// Log a warning, set [`Session::signature_mismatch`] and keep the keys.
    #[default]
    Lenient,
    Strict,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LicenseType {
    #[default]
    Streaming,
    Offline,
}

impl From<LicenseType> for license_protocol::LicenseType {
    fn from(value: LicenseType) -> Self {
        match value {
            LicenseType::Streaming => Self::Streaming,
            LicenseType::Offline => Self::Offline,
        }
    }
}

/// Provider certificate used to encrypt the client identification.
#[derive(Clone, Debug)]
pub struct ServiceCertificate {
    pub provider_id: String,
    pub serial_number: Vec<u8>,
    public_key: RsaPublicKey,
}

impl ServiceCertificate {
    /// Accepts a `SignedMessage` of type `SERVICE_CERTIFICATE` or a bare
    /// `SignedDrmCertificate`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let signed = match SignedMessage::decode(data) {
            Ok(message) if message.r#type == Some(MessageType::ServiceCertificate as i32) => {
                let msg = message.msg.unwrap_or_default();
                SignedDrmCertificate::decode(msg.as_slice())
            }
            _ => SignedDrmCertificate::decode(data),
        }
        .map_err(|x| Error::ServiceCertificate(x.to_string()))?;

        let certificate = signed
            .drm_certificate
            .as_deref()
            .ok_or_else(|| Error::ServiceCertificate("no drm certificate".to_owned()))
            .and_then(|x| {
                DrmCertificate::decode(x).map_err(|x| Error::ServiceCertificate(x.to_string()))
            })?;

        let public_key = certificate
            .public_key
            .as_deref()
            .ok_or_else(|| Error::ServiceCertificate("no public key".to_owned()))
            .and_then(|x| {
                RsaPublicKey::from_pkcs1_der(x)
                    .map_err(|x| Error::ServiceCertificate(x.to_string()))
            })?;

        Ok(Self {
            provider_id: certificate.provider_id.unwrap_or_default(),
            serial_number: certificate.serial_number.unwrap_or_default(),
            public_key,
        })
    }

    /// AES-CBC encrypt `client_id` under a fresh key, itself RSA-OAEP encrypted
    /// under the provider key.
    fn encrypt(&self, client_id: &[u8]) -> Result<EncryptedClientIdentification> {
        let mut rng = rand::thread_rng();
        let key = rng.r#gen::<[u8; 16]>();
        let iv = rng.r#gen::<[u8; 16]>();

        let encrypted_client_id = cbc::Encryptor::<Aes128>::new(&key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(client_id);
        let encrypted_privacy_key = self
            .public_key
            .encrypt(&mut rng, Oaep::new::<Sha1>(), &key)?;

        Ok(EncryptedClientIdentification {
            provider_id: Some(self.provider_id.clone()),
            service_certificate_serial_number: Some(self.serial_number.clone()),
            encrypted_client_id: Some(encrypted_client_id),
            encrypted_client_id_iv: Some(iv.to_vec()),
            encrypted_privacy_key: Some(encrypted_privacy_key),
        })
    }
}

/// One license exchange.
///
/// `open -> build_request -> consume_response -> close`. A session is owned by a
/// single caller and must not be reused for another asset.
pub struct Session {
    id: [u8; 16],
    device: Arc<Device>,
    init_data: InitData,
    license_type: LicenseType,
    signature_policy: SignaturePolicy,
    service_certificate: Option<ServiceCertificate>,
    state: SessionState,
    request: Option<Vec<u8>>,
    signature_mismatch: bool,
}

impl Session {
    /// Open a session for base64 encoded init data.
    pub fn open(device: Arc<Device>, init_data: &str) -> Result<Self> {
        Ok(Self::with_init_data(device, InitData::from_base64(init_data)?))
    }

    pub fn with_init_data(device: Arc<Device>, init_data: InitData) -> Self {
        let mut id = [0; 16];
        rand::thread_rng().fill_bytes(&mut id);
        debug!("opened license session {}", hex::encode(id));

        Self {
            id,
            device,
            init_data,
            license_type: LicenseType::default(),
            signature_policy: SignaturePolicy::default(),
            service_certificate: None,
            state: SessionState::Open,
            request: None,
            signature_mismatch: false,
        }
    }

    pub fn id(&self) -> &[u8; 16] {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn init_data(&self) -> &InitData {
        &self.init_data
    }

    pub fn set_license_type(&mut self, license_type: LicenseType) {
        self.license_type = license_type;
    }

    pub fn set_signature_policy(&mut self, policy: SignaturePolicy) {
        self.signature_policy = policy;
    }

    /// True when the last consumed license did not verify.
    pub fn signature_mismatch(&self) -> bool {
        self.signature_mismatch
    }

    /// Enable privacy mode for the next request.
    pub fn set_service_certificate(&mut self, certificate: &[u8]) -> Result<()> {
        self.expect_state(SessionState::Open)?;
        let certificate = ServiceCertificate::parse(certificate)?;
        debug!(
            "privacy mode enabled for provider {:?}",
            certificate.provider_id
        );
        self.service_certificate = Some(certificate);
        Ok(())
    }

    /// Serialized `SignedMessage` carrying a signed license request.
    pub fn build_request(&mut self) -> Result<Vec<u8>> {
        self.expect_state(SessionState::Open)?;
        let private_key = self.device.private_key()?;

        let mut request = LicenseRequest {
            content_id: Some(ContentIdentification {
                content_id_variant: Some(
                    content_identification::ContentIdVariant::WidevinePsshData(
                        content_identification::WidevinePsshData {
                            pssh_data: vec![self.init_data.raw().to_vec()],
                            license_type: Some(
                                license_protocol::LicenseType::from(self.license_type) as i32,
                            ),
                            request_id: Some(self.id.to_vec()),
                        },
                    ),
                ),
            }),
            r#type: Some(RequestType::New as i32),
            request_time: Some(unix_time()),
            protocol_version: Some(ProtocolVersion::Version21 as i32),
            key_control_nonce: Some(rand::thread_rng().gen_range(1..=i32::MAX as u32)),
            ..Default::default()
        };

        match &self.service_certificate {
            Some(certificate) => {
                request.encrypted_client_id =
                    Some(certificate.encrypt(self.device.client_id_blob())?);
            }
            None => request.client_id = Some(self.device.client_id()?),
        }

        let msg = request.encode_to_vec();
        let signature = SigningKey::<Sha1>::new(private_key.clone())
            .sign_with_rng(&mut rand::thread_rng(), &msg)
            .to_vec();

        let signed = SignedMessage {
            r#type: Some(MessageType::LicenseRequest as i32),
            msg: Some(msg.clone()),
            signature: Some(signature),
            ..Default::default()
        };

        self.request = Some(msg);
        self.state = SessionState::Requested;
        Ok(signed.encode_to_vec())
    }

    pub fn build_request_base64(&mut self) -> Result<String> {
        Ok(base64::engine::general_purpose::STANDARD.encode(self.build_request()?))
    }

    /// Unwrap the content keys of a serialized `SignedMessage` license.
    pub fn consume_response(&mut self, response: &[u8]) -> Result<Vec<ContentKey>> {
        self.expect_state(SessionState::Requested)?;
        let request = self
            .request
            .as_deref()
            .ok_or(Error::InvalidState {
                expected: SessionState::Requested,
                found: self.state,
            })?;

        let signed = SignedMessage::decode(response)
            .map_err(|x| Error::LicenseParse(format!("not a signed message ({})", x)))?;

        match signed.r#type.map(MessageType::try_from) {
            Some(Ok(MessageType::License)) | None => (),
            Some(Ok(MessageType::ErrorResponse)) => {
                return Err(Error::LicenseParse(
                    "license service returned an error response".to_owned(),
                ));
            }
            Some(x) => {
                return Err(Error::LicenseParse(format!(
                    "expected a license message, found {:?}",
                    x.map_err(|x| x.0)
                )));
            }
        }

        let msg = signed
            .msg
            .as_deref()
            .ok_or_else(|| Error::LicenseParse("signed message has no payload".to_owned()))?;
        let session_key = signed
            .session_key
            .as_deref()
            .ok_or_else(|| Error::LicenseParse("signed message has no session key".to_owned()))?;

        let session_key = self
            .device
            .private_key()?
            .decrypt(Oaep::new::<Sha1>(), session_key)
            .map_err(|x| Error::LicenseParse(format!("cannot unwrap session key ({})", x)))?;
        let derived = DerivedKeys::derive(&session_key, request)?;

        let core_message = signed.oemcrypto_core_message.as_deref().unwrap_or_default();
        let signature = signed.signature.as_deref().unwrap_or_default();

        if !derived.verify_license(core_message, msg, signature)? {
            if self.signature_policy == SignaturePolicy::Strict {
                return Err(Error::SignatureMismatch);
            }

            warn!(
                "license signature of session {} does not verify, keys are used unverified",
                hex::encode(self.id)
            );
            self.signature_mismatch = true;
        }

        let license = License::decode(msg)
            .map_err(|x| Error::LicenseParse(format!("not a license ({})", x)))?;
        let mut keys = Vec::with_capacity(license.key.len());

        for container in &license.key {
            let key = derived.decrypt_key(container)?;
            keys.push(ContentKey::from_container(container, key)?);
        }

        info!(
            "license of session {} carries {} key(s)",
            hex::encode(self.id),
            keys.len()
        );
        self.state = SessionState::Licensed;
        Ok(keys)
    }

    pub fn consume_response_base64(&mut self, response: &str) -> Result<Vec<ContentKey>> {
        let response = base64::engine::general_purpose::STANDARD
            .decode(response.trim())
            .map_err(|x| Error::LicenseParse(format!("not valid base64 ({})", x)))?;
        self.consume_response(&response)
    }

    /// Release the request state. Closing twice does nothing.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }

        debug!("closing license session {}", hex::encode(self.id));
        self.request = None;
        self.service_certificate = None;
        self.state = SessionState::Closed;
    }

    fn expect_state(&self, expected: SessionState) -> Result<()> {
        if self.state != expected {
            return Err(Error::InvalidState {
                expected,
                found: self.state,
            });
        }

        Ok(())
    }
}

fn unix_time() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|x| x.as_secs() as i64)
        .unwrap_or_default()
}

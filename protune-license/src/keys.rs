use crate::{
    Error, Result,
    license_protocol::{KeyContainer, key_container},
};
use aes::{
    Aes128,
    cipher::{BlockDecryptMut, KeyIvInit, block_padding::Pkcs7},
};
use cmac::{Cmac, Mac};
use hmac::Hmac;
use sha2::Sha256;
use std::fmt;

const ENCRYPTION_LABEL: &[u8] = b"ENCRYPTION\x00";
const AUTHENTICATION_LABEL: &[u8] = b"AUTHENTICATION\x00";
/// Output sizes in bits, big endian: 128 for the encryption key, 512 for the
/// two authentication keys.
const ENCRYPTION_SUFFIX: [u8; 4] = [0, 0, 0, 0x80];
const AUTHENTICATION_SUFFIX: [u8; 4] = [0, 0, 2, 0];

/// Working keys derived from the license session key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DerivedKeys {
    /// Decrypts key containers.
    pub enc: [u8; 16],
    /// Verifies license signatures.
    pub auth_1: [u8; 32],
    /// Signs renewal requests.
    pub auth_2: [u8; 32],
}

impl DerivedKeys {
    /// AES-CMAC key derivation over the serialized license request.
    pub fn derive(session_key: &[u8], request: &[u8]) -> Result<Self> {
        let enc_context = [ENCRYPTION_LABEL, request, &ENCRYPTION_SUFFIX[..]].concat();
        let mac_context = [AUTHENTICATION_LABEL, request, &AUTHENTICATION_SUFFIX[..]].concat();

        let enc = cmac(session_key, 1, &enc_context)?;
        let mut auth_1 = [0; 32];
        let mut auth_2 = [0; 32];

        auth_1[..16].copy_from_slice(&cmac(session_key, 1, &mac_context)?);
        auth_1[16..].copy_from_slice(&cmac(session_key, 2, &mac_context)?);
        auth_2[..16].copy_from_slice(&cmac(session_key, 3, &mac_context)?);
        auth_2[16..].copy_from_slice(&cmac(session_key, 4, &mac_context)?);

        Ok(Self {
            enc,
            auth_1,
            auth_2,
        })
    }

    /// HMAC-SHA256 of the signed license payload under `auth_1`.
    pub fn license_signature(&self, core_message: &[u8], msg: &[u8]) -> Result<Vec<u8>> {
        let mut mac = license_mac(&self.auth_1)?;
        mac.update(core_message);
        mac.update(msg);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    pub fn verify_license(
        &self,
        core_message: &[u8],
        msg: &[u8],
        signature: &[u8],
    ) -> Result<bool> {
        let mut mac = license_mac(&self.auth_1)?;
        mac.update(core_message);
        mac.update(msg);
        Ok(mac.verify_slice(signature).is_ok())
    }

    pub(crate) fn decrypt_key(&self, container: &KeyContainer) -> Result<Vec<u8>> {
        let iv = container.iv.as_deref().unwrap_or_default();
        let key = container.key.as_deref().unwrap_or_default();

        if key.is_empty() {
            return Err(Error::LicenseParse("key container has no key".to_owned()));
        }

        cbc::Decryptor::<Aes128>::new_from_slices(&self.enc, iv)
            .map_err(|_| {
                Error::LicenseParse(format!(
                    "key container iv is {} bytes long (expected 16)",
                    iv.len()
                ))
            })?
            .decrypt_padded_vec_mut::<Pkcs7>(key)
            .map_err(|_| Error::LicenseParse("key container has invalid padding".to_owned()))
    }
}

fn cmac(key: &[u8], counter: u8, context: &[u8]) -> Result<[u8; 16]> {
    let mut mac = <Cmac<Aes128> as Mac>::new_from_slice(key).map_err(|_| {
        Error::Crypto(format!("session key is {} bytes long (expected 16)", key.len()))
    })?;
    mac.update(&[counter]);
    mac.update(context);

    let mut out = [0; 16];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

fn license_mac(key: &[u8; 32]) -> Result<Hmac<Sha256>> {
    <Hmac<Sha256> as Mac>::new_from_slice(key).map_err(|x| Error::Crypto(x.to_string()))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyType {
    Signing,
    Content,
    KeyControl,
    OperatorSession,
    Entitlement,
    OemContent,
}

impl KeyType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Signing => "SIGNING",
            Self::Content => "CONTENT",
            Self::KeyControl => "KEY_CONTROL",
            Self::OperatorSession => "OPERATOR_SESSION",
            Self::Entitlement => "ENTITLEMENT",
            Self::OemContent => "OEM_CONTENT",
        }
    }
}

impl From<key_container::KeyType> for KeyType {
    fn from(value: key_container::KeyType) -> Self {
        match value {
            key_container::KeyType::Signing => Self::Signing,
            key_container::KeyType::Content => Self::Content,
            key_container::KeyType::KeyControl => Self::KeyControl,
            key_container::KeyType::OperatorSession => Self::OperatorSession,
            key_container::KeyType::Entitlement => Self::Entitlement,
            key_container::KeyType::OemContent => Self::OemContent,
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Operator session key permissions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Permission {
    Encrypt,
    Decrypt,
    Sign,
    SignatureVerify,
}

#[derive(Clone, PartialEq, Eq)]
pub struct ContentKey {
    pub kid: Vec<u8>,
    pub key: Vec<u8>,
    pub key_type: KeyType,
    pub permissions: Vec<Permission>,
}

impl ContentKey {
    pub(crate) fn from_container(container: &KeyContainer, key: Vec<u8>) -> Result<Self> {
        let key_type = container
            .r#type
            .map(|x| {
                key_container::KeyType::try_from(x)
                    .map(KeyType::from)
                    .map_err(|_| Error::LicenseParse(format!("unknown key type {}", x)))
            })
            .transpose()?
            .unwrap_or(KeyType::Content);

        let kid = match container.id.as_deref() {
            Some(id) if !id.is_empty() => id.to_vec(),
            _ => synthesize_kid(key_type),
        };

        let permissions = container
            .operator_session_key_permissions
            .as_ref()
            .map(|x| {
                [
                    (x.allow_encrypt, Permission::Encrypt),
                    (x.allow_decrypt, Permission::Decrypt),
                    (x.allow_sign, Permission::Sign),
                    (x.allow_signature_verify, Permission::SignatureVerify),
                ]
                .into_iter()
                .filter(|(allowed, _)| allowed.unwrap_or(false))
                .map(|(_, permission)| permission)
                .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            kid,
            key,
            key_type,
            permissions,
        })
    }

    pub fn kid_hex(&self) -> String {
        hex::encode(&self.kid)
    }

    pub fn key_hex(&self) -> String {
        hex::encode(&self.key)
    }

    /// Key id and key as 16 byte arrays, if both have that size.
    pub fn pair_16(&self) -> Option<([u8; 16], [u8; 16])> {
        Some((
            self.kid.as_slice().try_into().ok()?,
            self.key.as_slice().try_into().ok()?,
        ))
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentKey")
            .field("kid", &self.kid_hex())
            .field("key_type", &self.key_type)
            .field("permissions", &self.permissions)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kid_hex(), self.key_hex())
    }
}

/// Key type name, zero padded to 16 bytes.
fn synthesize_kid(key_type: KeyType) -> Vec<u8> {
    let mut kid = key_type.name().as_bytes().to_vec();
    kid.resize(16.max(kid.len()), 0);
    kid
}

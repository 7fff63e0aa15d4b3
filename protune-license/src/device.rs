use crate::{Error, Result, license_protocol::ClientIdentification};
use log::debug;
use prost::Message;
use rsa::{
    RsaPrivateKey,
    pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey},
    pkcs8::DecodePrivateKey,
};
use std::{fmt, path::Path};

const WVD_MAGIC: &[u8; 3] = b"WVD";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeviceType {
    #[default]
    Chrome,
    Android,
}

impl DeviceType {
    fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::Chrome),
            2 => Ok(Self::Android),
            x => Err(Error::DeviceIdentity(format!("unknown device type {}", x))),
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            Self::Chrome => 1,
            Self::Android => 2,
        }
    }
}

/// Credentials the client signs license requests with.
///
/// A device loaded without a private key can still open sessions, but building
/// a request fails with [`Error::NoPrivateKey`].
#[derive(Clone)]
pub struct Device {
    pub device_type: DeviceType,
    pub security_level: u8,
    private_key: Option<RsaPrivateKey>,
    client_id: Vec<u8>,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("device_type", &self.device_type)
            .field("security_level", &self.security_level)
            .field("private_key", &self.private_key.is_some())
            .field("client_id", &format!("{} bytes", self.client_id.len()))
            .finish()
    }
}

impl Device {
    /// Assemble a device from a PEM or DER (PKCS#1 or PKCS#8) private key and
    /// a serialized client identification blob.
    pub fn from_parts(private_key: Option<&[u8]>, client_id: Vec<u8>) -> Result<Self> {
        let private_key = private_key.map(parse_private_key).transpose()?;
        Self::new(DeviceType::default(), 3, private_key, client_id)
    }

    fn new(
        device_type: DeviceType,
        security_level: u8,
        private_key: Option<RsaPrivateKey>,
        client_id: Vec<u8>,
    ) -> Result<Self> {
        ClientIdentification::decode(client_id.as_slice()).map_err(|x| {
            Error::DeviceIdentity(format!("cannot decode client identification ({})", x))
        })?;

        Ok(Self {
            device_type,
            security_level,
            private_key,
            client_id,
        })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_wvd(&std::fs::read(path)?)
    }

    /// Parse a version 2 `.wvd` file.
    ///
    /// Layout: `WVD`, version, type, security level, flags, then a u16 length
    /// prefixed PKCS#1 private key and a u16 length prefixed client id blob.
    pub fn from_wvd(data: &[u8]) -> Result<Self> {
        if data.len() < 8 || &data[..3] != WVD_MAGIC {
            return Err(Error::DeviceIdentity("not a wvd file".to_owned()));
        }

        if data[3] != 2 {
            return Err(Error::DeviceIdentity(format!(
                "unsupported wvd version {} (supported: 2)",
                data[3]
            )));
        }

        let device_type = DeviceType::from_u8(data[4])?;
        let security_level = data[5];
        let mut position = 7;

        let private_key = read_prefixed(data, &mut position)?;
        let client_id = read_prefixed(data, &mut position)?.to_vec();
        let private_key = if private_key.is_empty() {
            None
        } else {
            Some(parse_private_key(private_key)?)
        };

        debug!(
            "loaded {:?} device (security level {}, private key: {})",
            device_type,
            security_level,
            private_key.is_some()
        );
        Self::new(device_type, security_level, private_key, client_id)
    }

    pub fn to_wvd(&self) -> Result<Vec<u8>> {
        let private_key = match &self.private_key {
            Some(x) => x
                .to_pkcs1_der()
                .map_err(|x| Error::DeviceIdentity(x.to_string()))?
                .as_bytes()
                .to_vec(),
            None => Vec::new(),
        };

        let mut data = WVD_MAGIC.to_vec();
        data.extend_from_slice(&[2, self.device_type.to_u8(), self.security_level, 0]);

        for part in [&private_key, &self.client_id] {
            let len = u16::try_from(part.len()).map_err(|_| {
                Error::DeviceIdentity(format!("{} bytes do not fit a wvd field", part.len()))
            })?;
            data.extend_from_slice(&len.to_be_bytes());
            data.extend_from_slice(part);
        }

        Ok(data)
    }

    pub fn private_key(&self) -> Result<&RsaPrivateKey> {
        self.private_key.as_ref().ok_or(Error::NoPrivateKey)
    }

    pub fn has_private_key(&self) -> bool {
        self.private_key.is_some()
    }

    /// Serialized client identification.
    pub fn client_id_blob(&self) -> &[u8] {
        &self.client_id
    }

    pub fn client_id(&self) -> Result<ClientIdentification> {
        ClientIdentification::decode(self.client_id.as_slice())
            .map_err(|x| Error::DeviceIdentity(x.to_string()))
    }
}

fn read_prefixed<'a>(data: &'a [u8], position: &mut usize) -> Result<&'a [u8]> {
    let truncated = || Error::DeviceIdentity("wvd file is truncated".to_owned());
    let len = data
        .get(*position..*position + 2)
        .map(|x| u16::from_be_bytes([x[0], x[1]]) as usize)
        .ok_or_else(truncated)?;
    let value = data
        .get(*position + 2..*position + 2 + len)
        .ok_or_else(truncated)?;
    *position += 2 + len;
    Ok(value)
}

fn parse_private_key(data: &[u8]) -> Result<RsaPrivateKey> {
    let invalid = |x: String| Error::DeviceIdentity(format!("cannot parse private key ({})", x));

    if data.starts_with(b"-----BEGIN") {
        let pem = std::str::from_utf8(data).map_err(|x| invalid(x.to_string()))?;

        return if pem.contains("BEGIN RSA PRIVATE KEY") {
            RsaPrivateKey::from_pkcs1_pem(pem).map_err(|x| invalid(x.to_string()))
        } else {
            RsaPrivateKey::from_pkcs8_pem(pem).map_err(|x| invalid(x.to_string()))
        };
    }

    RsaPrivateKey::from_pkcs1_der(data)
        .or_else(|_| RsaPrivateKey::from_pkcs8_der(data))
        .map_err(|x| invalid(x.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1::LineEnding;
    use std::sync::LazyLock;

    static KEY: LazyLock<RsaPrivateKey> = LazyLock::new(|| {
        RsaPrivateKey::new(&mut rand::thread_rng(), 1024).expect("generate rsa key")
    });

    fn client_id() -> Vec<u8> {
        ClientIdentification {
            r#type: Some(1),
            token: Some(b"device certificate".to_vec()),
            ..Default::default()
        }
        .encode_to_vec()
    }

    #[test]
    fn wvd_round_trip() {
        let device = Device::from_parts(
            Some(KEY.to_pkcs1_der().unwrap().as_bytes()),
            client_id(),
        )
        .unwrap();
        let parsed = Device::from_wvd(&device.to_wvd().unwrap()).unwrap();

        assert_eq!(parsed.private_key().unwrap(), &*KEY);
        assert_eq!(parsed.client_id_blob(), client_id());
        assert_eq!(parsed.security_level, 3);
    }

    #[test]
    fn pem_private_key() {
        let pem = KEY.to_pkcs1_pem(LineEnding::LF).unwrap();
        let device = Device::from_parts(Some(pem.as_bytes()), client_id()).unwrap();
        assert!(device.has_private_key());
    }

    #[test]
    fn missing_private_key() {
        let device = Device::from_parts(None, client_id()).unwrap();
        assert!(matches!(device.private_key(), Err(Error::NoPrivateKey)));
    }

    #[test]
    fn rejects_bad_files() {
        assert!(matches!(Device::from_wvd(b"WVX\x02"), Err(Error::DeviceIdentity(_))));
        assert!(matches!(
            Device::from_wvd(b"WVD\x01\x01\x03\x00\x00\x00"),
            Err(Error::DeviceIdentity(_))
        ));
        assert!(matches!(
            Device::from_wvd(b"WVD\x02\x01\x03\x00\x00\x05ab"),
            Err(Error::DeviceIdentity(_))
        ));
    }
}

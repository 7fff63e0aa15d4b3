#![allow(dead_code)]

use aes::{
    Aes128,
    cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7},
};
use prost::Message;
use protune_license::{
    DerivedKeys, Device,
    license_protocol::{
        ClientIdentification, DrmCertificate, EncryptedClientIdentification, KeyContainer,
        License, LicenseRequest, MessageType, SignedDrmCertificate, SignedMessage, key_container,
    },
};
use rand::Rng;
use rsa::{
    Oaep, RsaPrivateKey, RsaPublicKey,
    pkcs1::{EncodeRsaPrivateKey, EncodeRsaPublicKey},
    pss::{Signature, VerifyingKey},
    signature::Verifier,
};
use sha1::Sha1;
use std::sync::{Arc, LazyLock};

pub static DEVICE_KEY: LazyLock<RsaPrivateKey> = LazyLock::new(|| {
    RsaPrivateKey::new(&mut rand::thread_rng(), 1024).expect("generate device key")
});

pub static SERVICE_KEY: LazyLock<RsaPrivateKey> = LazyLock::new(|| {
    RsaPrivateKey::new(&mut rand::thread_rng(), 1024).expect("generate service key")
});

pub const KID: [u8; 16] = [0x11; 16];
pub const CONTENT_KEY: [u8; 16] = [0x22; 16];
pub const INIT_DATA: &str = "AAAAW3Bzc2gAAAAA7e+LqXnWSs6jyCfc1R0h7QAAADsIARIQ62dqu8s0Xpa7z2FmMPGj2hoNd2lkZXZpbmVfdGVzdCIQZmtqM2xqYVNkZmFsa3IzaioCSEQyAA==";

pub fn client_id() -> ClientIdentification {
    ClientIdentification {
        r#type: Some(1),
        token: Some(b"device certificate chain".to_vec()),
        ..Default::default()
    }
}

pub fn device() -> Arc<Device> {
    let private_key = DEVICE_KEY.to_pkcs1_der().expect("encode device key");
    Arc::new(
        Device::from_parts(Some(private_key.as_bytes()), client_id().encode_to_vec())
            .expect("device from parts"),
    )
}

pub fn service_certificate() -> Vec<u8> {
    let public_key = RsaPublicKey::from(&*SERVICE_KEY)
        .to_pkcs1_der()
        .expect("encode service key");
    let certificate = DrmCertificate {
        r#type: Some(2),
        serial_number: Some(vec![9; 16]),
        public_key: Some(public_key.as_bytes().to_vec()),
        provider_id: Some("license.example".to_owned()),
        ..Default::default()
    };

    SignedDrmCertificate {
        drm_certificate: Some(certificate.encode_to_vec()),
        signature: Some(vec![0; 256]),
        signer: None,
    }
    .encode_to_vec()
}

/// What the fake license service saw in a request.
pub struct Received {
    pub request: LicenseRequest,
    pub client_id: ClientIdentification,
}

/// Check the request signature and recover the client identification.
pub fn receive(challenge: &[u8]) -> (Received, Vec<u8>) {
    let signed = SignedMessage::decode(challenge).expect("signed message");
    assert_eq!(signed.r#type, Some(MessageType::LicenseRequest as i32));

    let msg = signed.msg.expect("request payload");
    let signature = Signature::try_from(signed.signature.expect("signature").as_slice())
        .expect("pss signature");
    VerifyingKey::<Sha1>::new(RsaPublicKey::from(&*DEVICE_KEY))
        .verify(&msg, &signature)
        .expect("request signature verifies");

    let request = LicenseRequest::decode(msg.as_slice()).expect("license request");
    let client_id = match (&request.client_id, &request.encrypted_client_id) {
        (Some(client_id), None) => client_id.clone(),
        (None, Some(encrypted)) => decrypt_client_id(encrypted),
        x => panic!("unexpected client identification {:?}", x),
    };

    (Received { request, client_id }, msg)
}

fn decrypt_client_id(encrypted: &EncryptedClientIdentification) -> ClientIdentification {
    let key = SERVICE_KEY
        .decrypt(
            Oaep::new::<Sha1>(),
            encrypted.encrypted_privacy_key.as_deref().expect("privacy key"),
        )
        .expect("unwrap privacy key");
    let plain = cbc::Decryptor::<Aes128>::new_from_slices(
        &key,
        encrypted.encrypted_client_id_iv.as_deref().expect("iv"),
    )
    .expect("aes key")
    .decrypt_padded_vec_mut::<Pkcs7>(encrypted.encrypted_client_id.as_deref().expect("client id"))
    .expect("client id padding");
    ClientIdentification::decode(plain.as_slice()).expect("client identification")
}

pub struct Grant {
    pub kid: Option<Vec<u8>>,
    pub key: Vec<u8>,
    pub key_type: key_container::KeyType,
}

impl Grant {
    pub fn content() -> Self {
        Self {
            kid: Some(KID.to_vec()),
            key: CONTENT_KEY.to_vec(),
            key_type: key_container::KeyType::Content,
        }
    }

    pub fn signing() -> Self {
        Self {
            kid: None,
            key: vec![0x33; 32],
            key_type: key_container::KeyType::Signing,
        }
    }
}

/// Build the signed license a service would answer `challenge` with.
pub fn license(challenge: &[u8], grants: &[Grant]) -> Vec<u8> {
    let (_, request) = receive(challenge);
    let mut rng = rand::thread_rng();
    let session_key = rng.r#gen::<[u8; 16]>();
    let derived = DerivedKeys::derive(&session_key, &request).expect("derive keys");

    let license = License {
        key: grants
            .iter()
            .map(|grant| {
                let iv = rng.r#gen::<[u8; 16]>();
                KeyContainer {
                    id: grant.kid.clone(),
                    iv: Some(iv.to_vec()),
                    key: Some(
                        cbc::Encryptor::<Aes128>::new(&derived.enc.into(), &iv.into())
                            .encrypt_padded_vec_mut::<Pkcs7>(&grant.key),
                    ),
                    r#type: Some(grant.key_type as i32),
                    operator_session_key_permissions: None,
                }
            })
            .collect(),
        ..Default::default()
    };
    let msg = license.encode_to_vec();

    SignedMessage {
        r#type: Some(MessageType::License as i32),
        signature: Some(derived.license_signature(&[], &msg).expect("sign license")),
        session_key: Some(
            RsaPublicKey::from(&*DEVICE_KEY)
                .encrypt(&mut rng, Oaep::new::<Sha1>(), &session_key)
                .expect("wrap session key"),
        ),
        msg: Some(msg),
        ..Default::default()
    }
    .encode_to_vec()
}

/// Flip one byte of the wrapped session key.
pub fn corrupt_session_key(response: &[u8]) -> Vec<u8> {
    let mut signed = SignedMessage::decode(response).expect("signed message");
    if let Some(session_key) = signed.session_key.as_mut() {
        session_key[5] ^= 0xff;
    }
    signed.encode_to_vec()
}

/// Flip one byte of the license signature.
pub fn corrupt_signature(response: &[u8]) -> Vec<u8> {
    let mut signed = SignedMessage::decode(response).expect("signed message");
    if let Some(signature) = signed.signature.as_mut() {
        signature[0] ^= 0xff;
    }
    signed.encode_to_vec()
}

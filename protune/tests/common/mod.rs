#![allow(dead_code)]

use aes::{
    Aes128,
    cipher::{BlockEncryptMut, KeyIvInit, StreamCipher, block_padding::Pkcs7},
};
use prost::Message;
use protune::{LicenseTransport, StatusError};
use protune_license::{
    DerivedKeys, Device,
    license_protocol::{
        ClientIdentification, KeyContainer, License, MessageType, SignedMessage,
        WidevinePsshData, key_container,
    },
};
use protune_mp4::{BoxWriter, pssh::WIDEVINE_SYSTEM_ID};
use rand::Rng;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey, pkcs1::EncodeRsaPrivateKey};
use sha1::Sha1;
use std::{
    sync::{
        Arc, LazyLock,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

pub const KID: [u8; 16] = [0x5a; 16];
pub const KEY: [u8; 16] = [0x3c; 16];
pub const SAMPLE_DURATION: u32 = 1024;

static DEVICE_KEY: LazyLock<RsaPrivateKey> = LazyLock::new(|| {
    RsaPrivateKey::new(&mut rand::thread_rng(), 1024).expect("generate device key")
});

pub fn device() -> Arc<Device> {
    let client_id = ClientIdentification {
        r#type: Some(1),
        token: Some(b"device certificate chain".to_vec()),
        ..Default::default()
    };
    let private_key = DEVICE_KEY.to_pkcs1_der().expect("encode device key");

    Arc::new(
        Device::from_parts(Some(private_key.as_bytes()), client_id.encode_to_vec())
            .expect("device from parts"),
    )
}

#[derive(Default)]
struct ServiceState {
    failures: AtomicUsize,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Duration,
}

/// Answers every challenge with a license for [`KID`], after failing a set
/// number of times with a 503. Clones share their counters.
#[derive(Clone, Default)]
pub struct LicenseService(Arc<ServiceState>);

impl LicenseService {
    pub fn failing(failures: usize) -> Self {
        Self(Arc::new(ServiceState {
            failures: AtomicUsize::new(failures),
            ..Default::default()
        }))
    }

    pub fn slow(delay: Duration) -> Self {
        Self(Arc::new(ServiceState {
            delay,
            ..Default::default()
        }))
    }

    pub fn calls(&self) -> usize {
        self.0.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.0.max_in_flight.load(Ordering::SeqCst)
    }
}

impl LicenseTransport for LicenseService {
    async fn exchange(&self, challenge: Vec<u8>) -> anyhow::Result<Vec<u8>> {
        let state = &self.0;
        state.calls.fetch_add(1, Ordering::SeqCst);
        let in_flight = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        state.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        tokio::time::sleep(state.delay).await;
        state.in_flight.fetch_sub(1, Ordering::SeqCst);

        let failed = state
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |x| x.checked_sub(1))
            .is_ok();

        if failed {
            return Err(StatusError {
                status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                body: "try again".to_owned(),
            }
            .into());
        }

        Ok(license(&challenge))
    }
}

fn license(challenge: &[u8]) -> Vec<u8> {
    let signed = SignedMessage::decode(challenge).expect("signed message");
    let request = signed.msg.expect("request payload");
    let mut rng = rand::thread_rng();
    let session_key = rng.r#gen::<[u8; 16]>();
    let derived = DerivedKeys::derive(&session_key, &request).expect("derive keys");
    let iv = rng.r#gen::<[u8; 16]>();

    let msg = License {
        key: vec![KeyContainer {
            id: Some(KID.to_vec()),
            iv: Some(iv.to_vec()),
            key: Some(
                cbc::Encryptor::<Aes128>::new(&derived.enc.into(), &iv.into())
                    .encrypt_padded_vec_mut::<Pkcs7>(&KEY),
            ),
            r#type: Some(key_container::KeyType::Content as i32),
            operator_session_key_permissions: None,
        }],
        ..Default::default()
    }
    .encode_to_vec();

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

pub fn samples(count: usize, size: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| (0..size).map(|j| (i * 13 + j * 5) as u8).collect())
        .collect()
}

fn iv(index: usize) -> [u8; 8] {
    (index as u64 + 1).to_be_bytes()
}

/// A fragmented container with one `cenc` protected audio track (full sample
/// encryption, 8 byte ivs) and a widevine `pssh` box in `moov`, or a clear one.
pub fn container(plain: &[Vec<u8>], protected: bool) -> Vec<u8> {
    let mut w = BoxWriter::new();
    w.start_box(b"ftyp").bytes(b"iso6").u32(0).bytes(b"iso6");
    w.end_box().unwrap();

    w.start_box(b"moov");
    w.start_full_box(b"mvhd", 0, 0)
        .u32(0)
        .u32(0)
        .u32(1000)
        .u32(0)
        .zeros(80);
    w.end_box().unwrap();

    if protected {
        let data = WidevinePsshData {
            key_ids: vec![KID.to_vec()],
            ..Default::default()
        }
        .encode_to_vec();
        w.start_full_box(b"pssh", 0, 0)
            .bytes(&WIDEVINE_SYSTEM_ID)
            .u32(data.len() as u32)
            .bytes(&data);
        w.end_box().unwrap();
    }

    w.start_box(b"trak");
    w.start_full_box(b"tkhd", 0, 3)
        .u32(0)
        .u32(0)
        .u32(1)
        .u32(0)
        .u32(0)
        .zeros(60);
    w.end_box().unwrap();
    w.start_box(b"mdia");
    w.start_full_box(b"mdhd", 0, 0)
        .u32(0)
        .u32(0)
        .u32(44100)
        .u32(0)
        .u16(0x15C7)
        .u16(0);
    w.end_box().unwrap();
    w.start_full_box(b"hdlr", 0, 0)
        .u32(0)
        .bytes(b"soun")
        .zeros(12)
        .u8(0);
    w.end_box().unwrap();
    w.start_box(b"minf");
    w.start_box(b"stbl");
    w.start_full_box(b"stsd", 0, 0).u32(1);
    w.start_box(if protected { b"enca" } else { b"mp4a" })
        .zeros(6)
        .u16(1)
        .zeros(8)
        .u16(2)
        .u16(16)
        .u32(0)
        .u32(44100 << 16);
    if protected {
        w.start_box(b"sinf");
        w.write_box(b"frma", b"mp4a").unwrap();
        w.start_full_box(b"schm", 0, 0).bytes(b"cenc").u32(0x00010000);
        w.end_box().unwrap();
        w.start_box(b"schi");
        w.start_full_box(b"tenc", 0, 0)
            .u8(0)
            .u8(0)
            .u8(1)
            .u8(8)
            .bytes(&KID);
        w.end_box().unwrap(); // tenc
        w.end_box().unwrap(); // schi
        w.end_box().unwrap(); // sinf
    }
    w.end_box().unwrap(); // sample entry
    w.end_box().unwrap(); // stsd
    w.end_box().unwrap(); // stbl
    w.end_box().unwrap(); // minf
    w.end_box().unwrap(); // mdia
    w.end_box().unwrap(); // trak
    w.start_box(b"mvex");
    w.start_full_box(b"trex", 0, 0)
        .u32(1)
        .u32(1)
        .u32(SAMPLE_DURATION)
        .u32(0)
        .u32(0);
    w.end_box().unwrap();
    w.end_box().unwrap(); // mvex
    w.end_box().unwrap(); // moov

    let payload = plain
        .iter()
        .enumerate()
        .map(|(i, sample)| {
            let mut sample = sample.clone();
            if protected {
                let mut counter = [0; 16];
                counter[..8].copy_from_slice(&iv(i));
                ctr::Ctr128BE::<Aes128>::new(&KEY.into(), &counter.into())
                    .apply_keystream(&mut sample);
            }
            sample
        })
        .collect::<Vec<_>>()
        .concat();

    let mut data = w.into_inner().unwrap();

    let mut w = BoxWriter::new();
    w.start_box(b"moof");
    w.start_full_box(b"mfhd", 0, 0).u32(1);
    w.end_box().unwrap();
    w.start_box(b"traf");
    w.start_full_box(b"tfhd", 0, 0x020000 | 0x000008)
        .u32(1)
        .u32(SAMPLE_DURATION);
    w.end_box().unwrap();
    w.start_full_box(b"trun", 0, 0x000001 | 0x000200)
        .u32(plain.len() as u32);
    let data_offset = w.position() as usize;
    w.i32(0);
    for sample in plain {
        w.u32(sample.len() as u32);
    }
    w.end_box().unwrap();
    if protected {
        w.start_full_box(b"senc", 0, 0).u32(plain.len() as u32);
        for i in 0..plain.len() {
            w.bytes(&iv(i));
        }
        w.end_box().unwrap();
    }
    w.end_box().unwrap(); // traf
    w.end_box().unwrap(); // moof

    let mut moof = w.into_inner().unwrap();
    let offset = (moof.len() + 8) as i32;
    moof[data_offset..data_offset + 4].copy_from_slice(&offset.to_be_bytes());
    data.extend_from_slice(&moof);

    data.extend_from_slice(&((payload.len() + 8) as u32).to_be_bytes());
    data.extend_from_slice(b"mdat");
    data.extend_from_slice(&payload);
    data
}

#![allow(dead_code)]

use protune_mp4::{BoxWriter, Subsample};

pub const AUDIO_TRACK: u32 = 1;
pub const TEXT_TRACK: u32 = 2;
pub const DEFAULT_DURATION: u32 = 1024;
/// Duration in `trex`, used by fragments that leave it out of `tfhd`.
pub const TREX_DURATION: u32 = 2048;

pub struct Protected {
    pub scheme: &'static [u8; 4],
    pub iv_size: u8,
    pub constant_iv: Vec<u8>,
    pub kid: [u8; 16],
}

#[derive(Default)]
pub struct Fragment {
    pub track_id: u32,
    pub samples: Vec<Vec<u8>>,
    /// Falls back to the fragment default when empty.
    pub durations: Vec<u32>,
    pub description_index: Option<u32>,
    pub ivs: Vec<Vec<u8>>,
    pub subsamples: Vec<Vec<Subsample>>,
    /// Leave the default duration out of `tfhd`.
    pub trex_duration: bool,
    /// Write an explicit `tfhd` base data offset instead of default-base-is-moof.
    /// `Some(0)` points it at the fragment's `mdat` payload.
    pub base_data_offset: Option<u64>,
}

impl Fragment {
    pub fn audio(samples: Vec<Vec<u8>>) -> Self {
        Self {
            track_id: AUDIO_TRACK,
            samples,
            ..Default::default()
        }
    }
}

fn audio_entry(w: &mut BoxWriter, protected: Option<&Protected>) {
    w.start_box(if protected.is_some() { b"enca" } else { b"mp4a" })
        .zeros(6)
        .u16(1)
        .zeros(8)
        .u16(2)
        .u16(16)
        .u32(0)
        .u32(44100 << 16);

    w.start_full_box(b"esds", 0, 0).bytes(&[0x03, 0x00]);
    w.end_box().unwrap();

    if let Some(protected) = protected {
        w.start_box(b"sinf");
        w.write_box(b"frma", b"mp4a").unwrap();
        w.start_full_box(b"schm", 0, 0)
            .bytes(protected.scheme)
            .u32(0x00010000);
        w.end_box().unwrap();
        w.start_box(b"schi");
        w.start_full_box(b"tenc", 1, 0)
            .u8(0)
            .u8(0)
            .u8(1)
            .u8(protected.iv_size)
            .bytes(&protected.kid);
        if protected.iv_size == 0 {
            w.u8(protected.constant_iv.len() as u8)
                .bytes(&protected.constant_iv);
        }
        w.end_box().unwrap(); // tenc
        w.end_box().unwrap(); // schi
        w.end_box().unwrap(); // sinf
    }

    w.end_box().unwrap();
}

fn track(
    w: &mut BoxWriter,
    track_id: u32,
    handler: &[u8; 4],
    entries: &[Option<&Protected>],
) {
    w.start_box(b"trak");
    w.start_full_box(b"tkhd", 0, 3)
        .u32(0)
        .u32(0)
        .u32(track_id)
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
        .u16(0x15C7) // eng
        .u16(0);
    w.end_box().unwrap();
    w.start_full_box(b"hdlr", 0, 0)
        .u32(0)
        .bytes(handler)
        .zeros(12)
        .u8(0);
    w.end_box().unwrap();

    w.start_box(b"minf");
    w.start_full_box(b"smhd", 0, 0).u32(0);
    w.end_box().unwrap();
    w.start_box(b"dinf");
    w.start_full_box(b"dref", 0, 0).u32(1);
    w.start_full_box(b"url ", 0, 1).end_box().unwrap();
    w.end_box().unwrap(); // dref
    w.end_box().unwrap(); // dinf

    w.start_box(b"stbl");
    if handler == b"soun" {
        w.start_full_box(b"stsd", 0, 0).u32(entries.len() as u32);
        for protected in entries {
            audio_entry(w, *protected);
        }
    } else {
        w.start_full_box(b"stsd", 0, 0).u32(1);
        w.write_box(b"tx3g", &[0; 8]).unwrap();
    }
    w.end_box().unwrap(); // stsd
    for name in [b"stts", b"stsc", b"stco"] {
        w.start_full_box(name, 0, 0).u32(0).end_box().unwrap();
    }
    w.start_full_box(b"stsz", 0, 0).u32(0).u32(0).end_box().unwrap();
    w.end_box().unwrap(); // stbl
    w.end_box().unwrap(); // minf
    w.end_box().unwrap(); // mdia
    w.end_box().unwrap(); // trak
}

/// The `moof` bytes with the positions of its data offset and base data offset.
fn moof(fragment: &Fragment, iv_size: u8) -> (Vec<u8>, u64, Option<u64>) {
    let mut w = BoxWriter::new();
    w.start_box(b"moof");
    w.start_full_box(b"mfhd", 0, 0).u32(1).end_box().unwrap();
    w.start_box(b"traf");

    let mut flags = if fragment.base_data_offset.is_some() {
        0x000001
    } else {
        0x020000
    };
    if fragment.description_index.is_some() {
        flags |= 0x000002;
    }
    if !fragment.trex_duration {
        flags |= 0x000008;
    }
    w.start_full_box(b"tfhd", 0, flags).u32(fragment.track_id);
    let base_offset = fragment.base_data_offset.map(|_| w.position());
    if base_offset.is_some() {
        w.u64(0);
    }
    if let Some(index) = fragment.description_index {
        w.u32(index);
    }
    if !fragment.trex_duration {
        w.u32(DEFAULT_DURATION);
    }
    w.end_box().unwrap();

    let mut flags = 0x000001 | 0x000200;
    if !fragment.durations.is_empty() {
        flags |= 0x000100;
    }
    w.start_full_box(b"trun", 0, flags)
        .u32(fragment.samples.len() as u32);
    let data_offset = w.position();
    w.i32(0);
    for (i, sample) in fragment.samples.iter().enumerate() {
        if let Some(duration) = fragment.durations.get(i) {
            w.u32(*duration);
        }
        w.u32(sample.len() as u32);
    }
    w.end_box().unwrap();

    if !fragment.ivs.is_empty() || !fragment.subsamples.is_empty() {
        let flags = if fragment.subsamples.is_empty() { 0 } else { 2 };
        w.start_full_box(b"senc", 0, flags)
            .u32(fragment.samples.len() as u32);
        for i in 0..fragment.samples.len() {
            if iv_size > 0 {
                w.bytes(&fragment.ivs[i]);
            }
            if let Some(subsamples) = fragment.subsamples.get(i) {
                w.u16(subsamples.len() as u16);
                for x in subsamples {
                    w.u16(x.clear as u16).u32(x.cipher);
                }
            }
        }
        w.end_box().unwrap();
    }

    w.end_box().unwrap(); // traf
    w.end_box().unwrap(); // moof
    (w.into_inner().unwrap(), data_offset, base_offset)
}

/// A fragmented container with an audio track (id 1) and a text track (id 2).
pub fn container(protected: Option<&Protected>, fragments: &[Fragment]) -> Vec<u8> {
    container_with(&[protected], 1, fragments)
}

/// Like [`container`], with one audio sample description per entry and the
/// `trex` default description index of the audio track.
pub fn container_with(
    entries: &[Option<&Protected>],
    trex_description_index: u32,
    fragments: &[Fragment],
) -> Vec<u8> {
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
    track(&mut w, AUDIO_TRACK, b"soun", entries);
    track(&mut w, TEXT_TRACK, b"text", &[]);
    w.start_box(b"mvex");
    let defaults = [(AUDIO_TRACK, trex_description_index), (TEXT_TRACK, 1)];
    for (track_id, description_index) in defaults {
        w.start_full_box(b"trex", 0, 0)
            .u32(track_id)
            .u32(description_index)
            .u32(TREX_DURATION)
            .u32(0)
            .u32(0);
        w.end_box().unwrap();
    }
    w.end_box().unwrap(); // mvex
    w.end_box().unwrap(); // moov

    let mut data = w.into_inner().unwrap();

    for fragment in fragments {
        let description_index = fragment
            .description_index
            .unwrap_or(trex_description_index);
        let iv_size = entries
            .get((description_index as usize).saturating_sub(1))
            .copied()
            .flatten()
            .map(|x| x.iv_size)
            .unwrap_or(0);
        let (mut moof, data_offset, base_offset) = moof(fragment, iv_size);
        let at = data_offset as usize;

        match (base_offset, fragment.base_data_offset) {
            (Some(base_at), Some(base)) => {
                // 8 bytes before the mdat payload, the data offset makes up the rest
                let base = match base {
                    0 => (data.len() + moof.len()) as u64,
                    base => base,
                };
                let base_at = base_at as usize;
                moof[base_at..base_at + 8].copy_from_slice(&base.to_be_bytes());
                moof[at..at + 4].copy_from_slice(&8i32.to_be_bytes());
            }
            _ => {
                let offset = (moof.len() + 8) as i32;
                moof[at..at + 4].copy_from_slice(&offset.to_be_bytes());
            }
        }
        data.extend_from_slice(&moof);

        let payload = fragment.samples.concat();
        data.extend_from_slice(&((payload.len() + 8) as u32).to_be_bytes());
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&payload);
    }

    data
}

pub fn samples(count: usize, size: usize, seed: u8) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| {
            (0..size)
                .map(|j| seed.wrapping_add((i * 31 + j * 7) as u8))
                .collect()
        })
        .collect()
}

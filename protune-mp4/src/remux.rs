//! Non-fragmented container writer.
//!
//! Output layout: `ftyp`, `moov` (one audio track plus an empty `udta` tag
//! container) and a single `mdat` holding every decrypted sample.

use crate::{
    Error, Result,
    boxes::encode_language,
    decrypt::DecryptedTrack,
    extract::SampleInfo,
    parser::{audio_sample_entry_fields_len, scan_boxes},
    skeleton::ContainerSkeleton,
    writer::BoxWriter,
};
use log::{debug, warn};

const MATRIX: [u32; 9] = [0x00010000, 0, 0, 0, 0x00010000, 0, 0, 0, 0x40000000];
const SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// Writes decrypted samples into a new non-fragmented container.
pub struct Reassembler<'a> {
    skeleton: &'a ContainerSkeleton,
}

impl<'a> Reassembler<'a> {
    pub fn new(skeleton: &'a ContainerSkeleton) -> Self {
        Self { skeleton }
    }

    pub fn write(&self, track: &DecryptedTrack) -> Result<Vec<u8>> {
        let declared = track.samples.iter().map(|x| x.size as u64).sum::<u64>();

        if declared != track.data.len() as u64 {
            return Err(Error::format(format!(
                "sample sizes add up to {} bytes but {} bytes of sample data were given",
                declared,
                track.data.len()
            )));
        }

        match self.write_with(track, false)? {
            Some(data) => Ok(data),
            None => {
                debug!("chunk offsets exceed 32 bits, writing co64");
                self.write_with(track, true)?
                    .ok_or_else(|| Error::format("chunk offsets exceed 64 bits"))
            }
        }
    }

    /// `None` when 32-bit chunk offsets cannot hold the layout.
    fn write_with(&self, track: &DecryptedTrack, large_offsets: bool) -> Result<Option<Vec<u8>>> {
        let skeleton = self.skeleton;
        let duration = track.total_duration();
        let chunks = chunks(&track.samples);
        let mut w = BoxWriter::new();

        w.start_box(b"ftyp")
            .bytes(b"M4A ")
            .u32(0)
            .bytes(b"M4A ")
            .bytes(b"mp42")
            .bytes(b"isom");
        w.end_box()?;

        w.start_box(b"moov");
        write_mvhd(&mut w, skeleton.timescale, duration, skeleton.track_id + 1)?;

        w.start_box(b"trak");
        self.write_tkhd(&mut w, duration)?;

        w.start_box(b"mdia");
        self.write_mdhd(&mut w, duration)?;

        match &skeleton.hdlr {
            Some(hdlr) => {
                w.bytes(hdlr);
            }
            None => write_hdlr(&mut w, b"soun", b"SoundHandler\0")?,
        }

        w.start_box(b"minf");

        match &skeleton.smhd {
            Some(smhd) => w.bytes(smhd),
            None => w.start_full_box(b"smhd", 0, 0).u16(0).u16(0).end_box()?,
        };

        w.start_box(b"dinf");
        match &skeleton.dref {
            Some(dref) => w.bytes(dref),
            None => {
                w.start_full_box(b"dref", 0, 0).u32(1);
                w.start_full_box(b"url ", 0, 1).end_box()?;
                w.end_box()?
            }
        };
        w.end_box()?;

        w.start_box(b"stbl");
        self.write_stsd(&mut w, &track.samples)?;
        write_stts(&mut w, &track.samples)?;

        w.start_full_box(b"stsc", 0, 0).u32(chunks.len() as u32);
        for (i, chunk) in chunks.iter().enumerate() {
            w.u32(i as u32 + 1)
                .u32(chunk.samples)
                .u32(chunk.description_index);
        }
        w.end_box()?;

        w.start_full_box(b"stsz", 0, 0).u32(0).u32(track.samples.len() as u32);
        for sample in &track.samples {
            w.u32(sample.size);
        }
        w.end_box()?;

        let mut patch_points = Vec::with_capacity(chunks.len());
        w.start_full_box(if large_offsets { b"co64" } else { b"stco" }, 0, 0)
            .u32(chunks.len() as u32);
        for _ in &chunks {
            patch_points.push(w.position());
            if large_offsets {
                w.u64(0);
            } else {
                w.u32(0);
            }
        }
        w.end_box()?; // stco

        w.end_box()?; // stbl
        w.end_box()?; // minf
        w.end_box()?; // mdia
        w.end_box()?; // trak

        write_udta(&mut w)?;
        w.end_box()?; // moov

        w.mdat_header(track.data.len() as u64);
        let mut offset = w.position();

        for (at, chunk) in patch_points.into_iter().zip(&chunks) {
            if large_offsets {
                w.patch_u64(at, offset)?;
            } else {
                let Ok(offset) = u32::try_from(offset) else {
                    return Ok(None);
                };
                w.patch_u32(at, offset)?;
            }
            offset += chunk.size;
        }

        w.bytes(&track.data);
        w.into_inner().map(Some)
    }

    fn write_tkhd(&self, w: &mut BoxWriter, duration: u64) -> Result<()> {
        if let Some(mut tkhd) = self.skeleton.tkhd.clone() {
            let patched = match tkhd.get(8) {
                Some(0) if duration <= u32::MAX as u64 => {
                    patch(&mut tkhd, 28, &(duration as u32).to_be_bytes())
                }
                Some(1) => patch(&mut tkhd, 36, &duration.to_be_bytes()),
                _ => false,
            };

            if patched {
                w.bytes(&tkhd);
                return Ok(());
            }

            warn!("cannot patch the source tkhd box, writing a new one");
        }

        let version = if duration > u32::MAX as u64 { 1 } else { 0 };
        w.start_full_box(b"tkhd", version, 0x000003);
        time_fields(w, version);
        w.u32(self.skeleton.track_id).u32(0);
        duration_field(w, version, duration);
        w.zeros(8) // reserved
            .u16(0) // layer
            .u16(1) // alternate group
            .u16(0x0100) // volume
            .u16(0);
        for x in MATRIX {
            w.u32(x);
        }
        w.u32(0).u32(0); // width, height
        w.end_box()?;
        Ok(())
    }

    fn write_mdhd(&self, w: &mut BoxWriter, duration: u64) -> Result<()> {
        if let Some(mut mdhd) = self.skeleton.mdhd.clone() {
            let patched = match mdhd.get(8) {
                Some(0) if duration <= u32::MAX as u64 => {
                    patch(&mut mdhd, 24, &(duration as u32).to_be_bytes())
                }
                Some(1) => patch(&mut mdhd, 32, &duration.to_be_bytes()),
                _ => false,
            };

            if patched {
                w.bytes(&mdhd);
                return Ok(());
            }

            warn!("cannot patch the source mdhd box, writing a new one");
        }

        let version = if duration > u32::MAX as u64 { 1 } else { 0 };
        w.start_full_box(b"mdhd", version, 0);
        time_fields(w, version);
        w.u32(self.skeleton.timescale);
        duration_field(w, version, duration);
        w.u16(encode_language(&self.skeleton.language)).u16(0);
        w.end_box()?;
        Ok(())
    }

    /// The source sample descriptions without their protection wrapper, or a
    /// default AAC description when there is no usable source.
    fn write_stsd(&self, w: &mut BoxWriter, samples: &[SampleInfo]) -> Result<()> {
        let needed = samples
            .iter()
            .map(|x| x.description_index)
            .max()
            .unwrap_or(1)
            .max(1);

        if let Some(stsd) = &self.skeleton.stsd {
            match strip_protection(stsd) {
                Ok(entries) if entries.len() as u32 >= needed => {
                    w.start_full_box(b"stsd", 0, 0).u32(entries.len() as u32);
                    for entry in entries {
                        w.bytes(&entry);
                    }
                    w.end_box()?;
                    return Ok(());
                }
                Ok(entries) => warn!(
                    "source stsd has {} entries but samples reference index {}, writing defaults",
                    entries.len(),
                    needed
                ),
                Err(e) => warn!("cannot reuse the source stsd box ({}), writing defaults", e),
            }
        }

        w.start_full_box(b"stsd", 0, 0).u32(needed);
        for _ in 0..needed {
            self.write_default_entry(w)?;
        }
        w.end_box()?;
        Ok(())
    }

    /// `mp4a` entry with an AAC-LC `esds`.
    fn write_default_entry(&self, w: &mut BoxWriter) -> Result<()> {
        let skeleton = self.skeleton;
        let channels = skeleton.channel_count.clamp(1, 7);
        let frequency_index = SAMPLE_RATES
            .iter()
            .position(|x| *x == skeleton.sample_rate)
            .unwrap_or(4) as u8;

        w.start_box(b"mp4a")
            .zeros(6)
            .u16(1) // data reference index
            .zeros(8) // version, revision, vendor
            .u16(channels)
            .u16(16) // sample size
            .u16(0) // compression id
            .u16(0) // packet size
            .u32(skeleton.sample_rate.min(u16::MAX as u32) << 16);

        w.start_full_box(b"esds", 0, 0)
            // ES_Descriptor
            .u8(0x03)
            .u8(25)
            .u16(skeleton.track_id as u16)
            .u8(0)
            // DecoderConfigDescriptor: audio ISO/IEC 14496-3
            .u8(0x04)
            .u8(17)
            .u8(0x40)
            .u8(0x15)
            .zeros(3) // buffer size
            .u32(0) // max bitrate
            .u32(0) // average bitrate
            // DecoderSpecificInfo: AudioSpecificConfig, AAC LC
            .u8(0x05)
            .u8(2)
            .u8((2 << 3) | (frequency_index >> 1))
            .u8(((frequency_index & 1) << 7) | ((channels as u8) << 3))
            // SLConfigDescriptor
            .u8(0x06)
            .u8(1)
            .u8(0x02);
        w.end_box()?;

        w.end_box()?;
        Ok(())
    }
}

/// Samples sharing a description index are written as one chunk.
struct Chunk {
    samples: u32,
    description_index: u32,
    size: u64,
}

fn chunks(samples: &[SampleInfo]) -> Vec<Chunk> {
    let mut chunks: Vec<Chunk> = Vec::new();

    for sample in samples {
        match chunks.last_mut() {
            Some(chunk) if chunk.description_index == sample.description_index => {
                chunk.samples += 1;
                chunk.size += sample.size as u64;
            }
            _ => chunks.push(Chunk {
                samples: 1,
                description_index: sample.description_index,
                size: sample.size as u64,
            }),
        }
    }

    chunks
}

fn patch(data: &mut [u8], at: usize, bytes: &[u8]) -> bool {
    match data.get_mut(at..at + bytes.len()) {
        Some(target) => {
            target.copy_from_slice(bytes);
            true
        }
        None => false,
    }
}

fn time_fields(w: &mut BoxWriter, version: u8) {
    // creation and modification times
    if version == 1 {
        w.u64(0).u64(0);
    } else {
        w.u32(0).u32(0);
    }
}

fn duration_field(w: &mut BoxWriter, version: u8, duration: u64) {
    if version == 1 {
        w.u64(duration);
    } else {
        w.u32(duration as u32);
    }
}

fn write_mvhd(w: &mut BoxWriter, timescale: u32, duration: u64, next_track_id: u32) -> Result<()> {
    let version = if duration > u32::MAX as u64 { 1 } else { 0 };

    w.start_full_box(b"mvhd", version, 0);
    time_fields(w, version);
    w.u32(timescale);
    duration_field(w, version, duration);
    w.u32(0x00010000) // rate
        .u16(0x0100) // volume
        .zeros(10);
    for x in MATRIX {
        w.u32(x);
    }
    w.zeros(24).u32(next_track_id);
    w.end_box()?;
    Ok(())
}

fn write_hdlr(w: &mut BoxWriter, handler_type: &[u8; 4], name: &[u8]) -> Result<()> {
    w.start_full_box(b"hdlr", 0, 0)
        .u32(0)
        .bytes(handler_type)
        .zeros(12)
        .bytes(name)
        .end_box()?;
    Ok(())
}

fn write_stts(w: &mut BoxWriter, samples: &[SampleInfo]) -> Result<()> {
    let mut runs: Vec<(u32, u32)> = Vec::new();

    for sample in samples {
        match runs.last_mut() {
            Some((count, delta)) if *delta == sample.duration => *count += 1,
            _ => runs.push((1, sample.duration)),
        }
    }

    w.start_full_box(b"stts", 0, 0).u32(runs.len() as u32);
    for (count, delta) in runs {
        w.u32(count).u32(delta);
    }
    w.end_box()?;
    Ok(())
}

/// Empty iTunes style tag container for downstream taggers.
fn write_udta(w: &mut BoxWriter) -> Result<()> {
    w.start_box(b"udta");
    w.start_full_box(b"meta", 0, 0);
    w.start_full_box(b"hdlr", 0, 0)
        .u32(0)
        .bytes(b"mdir")
        .bytes(b"appl")
        .zeros(8)
        .u8(0)
        .end_box()?;
    w.write_box(b"ilst", &[])?;
    w.end_box()?; // meta
    w.end_box()?; // udta
    Ok(())
}

/// Rebuild every entry of a serialized `stsd` box without `sinf`, renaming
/// protected entries back to their original format.
fn strip_protection(stsd: &[u8]) -> Result<Vec<Vec<u8>>> {
    // header, version and flags, entry count
    let entries = stsd
        .get(16..)
        .ok_or_else(|| Error::format("stsd box is too short"))?;
    let mut stripped = Vec::new();

    for entry in scan_boxes(entries)? {
        if entry.is_truncated() {
            return Err(Error::format(format!("{} entry is truncated", entry.name())));
        }

        let payload = entry.payload(entries);
        let fields = audio_sample_entry_fields_len(payload)?;
        let mut format = entry.name;
        let mut w = BoxWriter::new();
        let mut children = Vec::new();

        let region = &payload[fields..];

        for child in scan_boxes(region)? {
            if child.is(b"sinf") {
                let sinf = child.payload(region);
                if let Some(frma) = scan_boxes(sinf)?.into_iter().find(|x| x.is(b"frma")) {
                    let original = frma.payload(sinf);
                    if original.len() >= 4 {
                        format.copy_from_slice(&original[..4]);
                    }
                }
                continue;
            }

            children.push(child.bytes(region).to_vec());
        }

        if &format == b"enca" {
            format = *b"mp4a";
        }

        w.start_box(&format).bytes(&payload[..fields]);
        for child in children {
            w.bytes(&child);
        }
        w.end_box()?;
        stripped.push(w.into_inner()?);
    }

    Ok(stripped)
}

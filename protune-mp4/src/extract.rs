//! Sample extraction from fragmented containers.
//!
//! The container is scanned once at the top level. Each `moof` is paired with
//! the `mdat` that follows it and only fragments of the audio track are read.

use crate::{
    Error, ParseMode, Reader, Result,
    boxes::{SencBox, TfhdBox, TrunBox},
    data,
    movie::{MovieInfo, TrackInfo},
    parser::{self, BoxHeader, Mp4Parser, scan_boxes},
    scheme::{self, SchemeMap},
    skeleton::ContainerSkeleton,
};
use log::{debug, warn};

/// One clear run followed by one encrypted run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Subsample {
    pub clear: u32,
    pub cipher: u32,
}

/// A raw, possibly still encrypted, sample in decode order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Sample {
    pub data: Vec<u8>,
    /// In media timescale units.
    pub duration: u32,
    /// 1-based sample description index.
    pub description_index: u32,
    /// Empty when the scheme uses a constant iv.
    pub iv: Vec<u8>,
    /// Empty for full sample encryption.
    pub subsamples: Vec<Subsample>,
}

/// What the reassembler needs to know about a sample once its bytes are gone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampleInfo {
    pub size: u32,
    pub duration: u32,
    pub description_index: u32,
}

impl Sample {
    pub fn info(&self) -> SampleInfo {
        SampleInfo {
            size: self.data.len() as u32,
            duration: self.duration,
            description_index: self.description_index,
        }
    }
}

/// Everything read from an encrypted container.
#[derive(Clone, Debug)]
pub struct ExtractedTrack {
    pub track_id: u32,
    pub timescale: u32,
    /// Number of entries in the sample description box.
    pub description_count: u32,
    pub samples: Vec<Sample>,
    pub schemes: Option<SchemeMap>,
    pub skeleton: ContainerSkeleton,
    /// Set when a fragment's samples ran past its data and were dropped.
    pub truncated: bool,
}

impl ExtractedTrack {
    pub fn total_duration(&self) -> u64 {
        self.samples.iter().map(|x| x.duration as u64).sum()
    }
}

#[derive(Default)]
struct Traf {
    tfhd: Option<TfhdBox>,
    truns: Vec<TrunBox>,
    senc: Option<(u32, Vec<u8>)>,
}

/// Extract every sample of the audio track in decode order.
///
/// In lenient mode a fragment whose samples run past its data stops at the last
/// complete sample, extraction goes on with the next fragment and
/// [`ExtractedTrack::truncated`] is set. A truncated `moof` ends the scan, since
/// the stream itself ended there. Strict mode reports both as [`Error::Format`].
pub fn extract_samples(data: &[u8], mode: ParseMode) -> Result<ExtractedTrack> {
    let boxes = scan_boxes(data)?;
    let moov = boxes
        .iter()
        .find(|x| x.is(b"moov"))
        .ok_or_else(|| Error::format("no moov box found"))?;

    if moov.is_truncated() {
        return Err(Error::format(format!(
            "moov box is truncated ({} of {} bytes)",
            moov.size, moov.declared_size
        )));
    }

    let movie = MovieInfo::parse(moov.bytes(data), mode)?;
    let track = movie
        .audio_track()
        .ok_or_else(|| Error::format("no audio track found"))?;
    let schemes = scheme::schemes_of_track(track, mode)?;

    debug!(
        "audio track {} (timescale {}, {} sample description(s), {})",
        track.track_id,
        track.timescale,
        track.entries.len(),
        if schemes.is_some() { "protected" } else { "clear" }
    );

    let mut samples = Vec::new();
    let mut truncated = false;

    for (i, moof) in boxes.iter().enumerate() {
        if !moof.is(b"moof") {
            continue;
        }

        if moof.is_truncated() {
            truncated = true;
            stop_or_fail(mode, format!("moof box at offset {} is truncated", moof.offset))?;
            warn!("dropping the rest of the stream");
            break;
        }

        let mdat = boxes[i + 1..]
            .iter()
            .take_while(|x| !x.is(b"moof"))
            .find(|x| x.is(b"mdat"));

        let trafs = match parse_moof(moof.bytes(data)) {
            Ok(trafs) => trafs,
            Err(e) if !mode.is_strict() => {
                warn!("skipping malformed moof box at offset {}: {}", moof.offset, e);
                continue;
            }
            Err(e) => return Err(e),
        };

        let reader = FragmentReader {
            data,
            moof,
            mdat,
            track,
            schemes: schemes.as_ref(),
            mode,
        };

        for traf in &trafs {
            if !reader.read_traf(traf, &mut samples)? {
                truncated = true;
                warn!("dropping the rest of moof at offset {}", moof.offset);
                break;
            }
        }
    }

    debug!("extracted {} sample(s)", samples.len());

    Ok(ExtractedTrack {
        track_id: track.track_id,
        timescale: track.timescale,
        description_count: track.entries.len() as u32,
        samples,
        schemes,
        skeleton: ContainerSkeleton::from_track(track),
        truncated,
    })
}

fn stop_or_fail(mode: ParseMode, reason: String) -> Result<()> {
    if mode.is_strict() {
        return Err(Error::Format(reason));
    }

    warn!("{}", reason);
    Ok(())
}

fn parse_moof(moof: &[u8]) -> Result<Vec<Traf>> {
    let trafs = data!(Vec::<Traf>::new());

    Mp4Parser::new()
        .base_box("moof", parser::children)
        .base_box("traf", {
            let trafs = trafs.clone();
            move |box_| {
                trafs.borrow_mut().push(Traf::default());
                parser::children(box_)
            }
        })
        .full_box("tfhd", {
            let trafs = trafs.clone();
            move |mut box_| {
                let tfhd = TfhdBox::new(&mut box_)?;
                if let Some(traf) = trafs.borrow_mut().last_mut() {
                    traf.tfhd = Some(tfhd);
                }
                Ok(())
            }
        })
        .full_box("trun", {
            let trafs = trafs.clone();
            move |mut box_| {
                let trun = TrunBox::new(&mut box_)?;
                if let Some(traf) = trafs.borrow_mut().last_mut() {
                    traf.truns.push(trun);
                }
                Ok(())
            }
        })
        .full_box("senc", {
            let trafs = trafs.clone();
            move |mut box_| {
                let flags = box_.flags.unwrap_or(0);
                let payload = box_.reader.read_remaining();
                if let Some(traf) = trafs.borrow_mut().last_mut() {
                    traf.senc = Some((flags, payload));
                }
                Ok(())
            }
        })
        .parse(moof, false, false)?;

    Ok(trafs.take())
}

struct FragmentReader<'a> {
    data: &'a [u8],
    moof: &'a BoxHeader,
    mdat: Option<&'a BoxHeader>,
    track: &'a TrackInfo,
    schemes: Option<&'a SchemeMap>,
    mode: ParseMode,
}

impl FragmentReader<'_> {
    /// Append the samples of one track fragment. Returns false when the
    /// fragment data ran out before its last sample.
    fn read_traf(&self, traf: &Traf, samples: &mut Vec<Sample>) -> Result<bool> {
        let Some(tfhd) = &traf.tfhd else {
            if self.mode.is_strict() {
                return Err(Error::format("traf box without tfhd"));
            }
            warn!("skipping traf box without tfhd in moof at offset {}", self.moof.offset);
            return Ok(true);
        };

        if tfhd.track_id != self.track.track_id {
            return Ok(true);
        }

        let trex = self.track.trex.as_ref();
        let description_index = tfhd
            .sample_description_index
            .or(trex.map(|x| x.default_sample_description_index))
            .filter(|x| *x > 0)
            .unwrap_or(1);
        let default_duration = tfhd
            .default_sample_duration
            .or(trex.map(|x| x.default_sample_duration))
            .unwrap_or(0);
        let default_size = tfhd
            .default_sample_size
            .or(trex.map(|x| x.default_sample_size))
            .unwrap_or(0);

        let senc = self.read_senc(traf, description_index)?;
        let base = tfhd.base_data_offset.unwrap_or(self.moof.offset);
        let (payload_start, payload_end) = match self.mdat {
            Some(mdat) => (mdat.payload_offset(), mdat.end()),
            None => (self.moof.end(), self.moof.end()),
        };

        let mut cursor = None;
        let mut number = 0;

        for trun in &traf.truns {
            let mut offset = match trun.data_offset {
                Some(data_offset) => match base.checked_add_signed(data_offset as i64) {
                    Some(offset) => offset,
                    None => {
                        stop_or_fail(
                            self.mode,
                            format!(
                                "data offset {} of moof at offset {} is out of range",
                                data_offset, self.moof.offset
                            ),
                        )?;
                        return Ok(false);
                    }
                },
                None => cursor
                    .or(tfhd.base_data_offset)
                    .unwrap_or(payload_start),
            };

            for entry in &trun.sample_data {
                let size = entry.sample_size.unwrap_or(default_size) as u64;
                let duration = entry.sample_duration.unwrap_or(default_duration);
                let encryption = senc.as_ref().and_then(|x| x.samples.get(number));
                number += 1;

                if size == 0 {
                    debug!(
                        "dropping empty sample {} of moof at offset {}",
                        number, self.moof.offset
                    );
                    continue;
                }

                let end = offset.saturating_add(size);

                if offset < payload_start || end > payload_end {
                    stop_or_fail(
                        self.mode,
                        format!(
                            "sample {} of moof at offset {} needs bytes {}..{} \
                             but fragment data covers {}..{}",
                            number,
                            self.moof.offset,
                            offset,
                            end,
                            payload_start,
                            payload_end
                        ),
                    )?;
                    return Ok(false);
                }

                samples.push(Sample {
                    data: self.data[offset as usize..end as usize].to_vec(),
                    duration,
                    description_index,
                    iv: encryption.map(|x| x.iv.clone()).unwrap_or_default(),
                    subsamples: encryption.map(|x| x.subsamples.clone()).unwrap_or_default(),
                });

                offset = end;
            }

            cursor = Some(offset);
        }

        if let Some(senc) = &senc {
            if senc.samples.len() < number {
                let reason = format!(
                    "senc box of moof at offset {} describes {} of {} samples",
                    self.moof.offset,
                    senc.samples.len(),
                    number
                );

                if self.mode.is_strict() {
                    return Err(Error::Format(reason));
                }
                warn!("{}", reason);
            }
        }

        Ok(true)
    }

    fn read_senc(&self, traf: &Traf, description_index: u32) -> Result<Option<SencBox>> {
        let (Some((flags, payload)), Some(scheme)) = (
            &traf.senc,
            self.schemes.and_then(|x| x.get(description_index)),
        ) else {
            return Ok(None);
        };

        match SencBox::parse(&mut Reader::new(payload.clone()), *flags, scheme.per_sample_iv_size) {
            Ok(senc) => Ok(Some(senc)),
            Err(e) if !self.mode.is_strict() => {
                warn!(
                    "ignoring malformed senc box of moof at offset {}: {}",
                    self.moof.offset, e
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

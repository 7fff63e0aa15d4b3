use crate::{
    Error, ParseMode, Result,
    movie::{MovieInfo, TrackInfo},
};

/// Structural boxes of the audio track, copied forward into the reassembled
/// container with only their duration fields patched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerSkeleton {
    pub track_id: u32,
    /// Media timescale from `mdhd`.
    pub timescale: u32,
    pub language: String,
    pub channel_count: u16,
    pub sample_rate: u32,
    pub tkhd: Option<Vec<u8>>,
    pub mdhd: Option<Vec<u8>>,
    pub hdlr: Option<Vec<u8>>,
    pub smhd: Option<Vec<u8>>,
    pub dref: Option<Vec<u8>>,
    pub stsd: Option<Vec<u8>>,
}

impl ContainerSkeleton {
    /// Capture the audio track of a container (or of a bare `moov` box).
    pub fn from_moov(data: &[u8], mode: ParseMode) -> Result<Self> {
        let movie = MovieInfo::from_container(data, mode)?;
        let track = movie
            .audio_track()
            .ok_or_else(|| Error::format("no audio track found"))?;
        Ok(Self::from_track(track))
    }

    pub fn from_track(track: &TrackInfo) -> Self {
        let first = track.entries.first();
        let timescale = if track.timescale == 0 {
            44100
        } else {
            track.timescale
        };

        Self {
            track_id: track.track_id.max(1),
            timescale,
            language: track.language.clone(),
            channel_count: first.map(|x| x.channel_count).filter(|x| *x > 0).unwrap_or(2),
            sample_rate: first
                .map(|x| x.sample_rate)
                .filter(|x| *x > 0)
                .unwrap_or(timescale),
            tkhd: track.tkhd.clone(),
            mdhd: track.mdhd.clone(),
            hdlr: track.hdlr.clone(),
            smhd: track.smhd.clone(),
            dref: track.dref.clone(),
            stsd: track.stsd.clone(),
        }
    }

    /// Nothing copied from a source: every box gets synthesized.
    pub fn synthetic(timescale: u32, channel_count: u16) -> Self {
        Self {
            track_id: 1,
            timescale,
            language: "und".to_owned(),
            channel_count,
            sample_rate: timescale,
            tkhd: None,
            mdhd: None,
            hdlr: None,
            smhd: None,
            dref: None,
            stsd: None,
        }
    }
}

//! Structural (`moov`) metadata of a fragmented container.

use crate::{
    Error, ParseMode, Result,
    boxes::{HdlrBox, MdhdBox, SchmBox, TencBox, TkhdBox, TrexBox},
    data,
    parser::{self, Mp4Parser, scan_boxes},
};
use log::warn;

/// Protection metadata (`sinf`) of a sample entry.
#[derive(Clone, Debug, Default)]
pub struct Protection {
    /// Unprotected entry code from `frma`.
    pub original_format: Option<[u8; 4]>,
    /// Four character code from `schm`.
    pub scheme_type: Option<[u8; 4]>,
    pub tenc: Option<TencBox>,
}

/// One entry of a sample description (`stsd`) box.
#[derive(Clone, Debug)]
pub struct SampleEntry {
    /// 1-based, as referenced by `tfhd`/`trex`.
    pub index: u32,
    pub format: [u8; 4],
    pub channel_count: u16,
    pub sample_rate: u32,
    pub protection: Option<Protection>,
    /// The whole entry box.
    pub raw: Vec<u8>,
}

impl SampleEntry {
    fn parse(
        index: u32,
        format: [u8; 4],
        raw: Vec<u8>,
        header_size: usize,
        handler: &[u8; 4],
        mode: ParseMode,
    ) -> Result<Self> {
        let payload = &raw[header_size.min(raw.len())..];
        let mut channel_count = 0;
        let mut sample_rate = 0;

        let fields = match handler {
            b"soun" => {
                let fields = parser::audio_sample_entry_fields_len(payload)?;
                channel_count = u16::from_be_bytes([payload[16], payload[17]]);
                sample_rate = u16::from_be_bytes([payload[24], payload[25]]) as u32;
                Some(fields)
            }
            b"vide" => Some(78),
            _ => None,
        };

        let protection = fields.map(|x| Protection::parse(payload.get(x..).unwrap_or_default()));
        let protection = match protection {
            Some(Ok(protection)) => protection,
            Some(Err(e)) if !mode.is_strict() => {
                warn!(
                    "ignoring malformed protection info of sample entry {} ({}): {}",
                    index,
                    String::from_utf8_lossy(&format),
                    e
                );
                None
            }
            Some(Err(e)) => return Err(e),
            None => None,
        };

        Ok(Self {
            index,
            format,
            channel_count,
            sample_rate,
            protection,
            raw,
        })
    }

    /// Entry code with the protection wrapper removed.
    pub fn unprotected_format(&self) -> [u8; 4] {
        match &self.protection {
            Some(Protection {
                original_format: Some(format),
                ..
            }) => *format,
            _ => match &self.format {
                b"enca" => *b"mp4a",
                b"encv" => *b"avc1",
                format => *format,
            },
        }
    }
}

impl Protection {
    /// Parse the child boxes of a sample entry. `None` when there is no `sinf`.
    fn parse(children: &[u8]) -> Result<Option<Self>> {
        let protection = data!();

        Mp4Parser::new()
            .base_box("sinf", {
                let protection = protection.clone();
                move |box_| {
                    *protection.borrow_mut() = Some(Self::default());
                    parser::children(box_)
                }
            })
            .base_box("frma", {
                let protection = protection.clone();
                move |mut box_| {
                    let format = box_.reader.read_fourcc()?;
                    if let Some(protection) = protection.borrow_mut().as_mut() {
                        protection.original_format = Some(format);
                    }
                    Ok(())
                }
            })
            .full_box("schm", {
                let protection = protection.clone();
                move |mut box_| {
                    let schm = SchmBox::new(&mut box_)?;
                    if let Some(protection) = protection.borrow_mut().as_mut() {
                        protection.scheme_type = Some(schm.scheme_type);
                    }
                    Ok(())
                }
            })
            .base_box("schi", parser::children)
            .full_box("tenc", {
                let protection = protection.clone();
                move |mut box_| {
                    let tenc = TencBox::new(&mut box_)?;
                    if let Some(protection) = protection.borrow_mut().as_mut() {
                        protection.tenc = Some(tenc);
                    }
                    Ok(())
                }
            })
            .parse(children, false, false)?;

        Ok(protection.take())
    }
}

#[derive(Clone, Debug, Default)]
pub struct TrackInfo {
    pub track_id: u32,
    pub handler_type: [u8; 4],
    pub timescale: u32,
    pub duration: u64,
    pub language: String,
    pub entries: Vec<SampleEntry>,
    pub trex: Option<TrexBox>,
    pub tkhd: Option<Vec<u8>>,
    pub mdhd: Option<Vec<u8>>,
    pub hdlr: Option<Vec<u8>>,
    pub smhd: Option<Vec<u8>>,
    pub dref: Option<Vec<u8>>,
    pub stsd: Option<Vec<u8>>,
}

impl TrackInfo {
    pub fn is_audio(&self) -> bool {
        &self.handler_type == b"soun"
    }

    pub fn entry(&self, description_index: u32) -> Option<&SampleEntry> {
        self.entries.iter().find(|x| x.index == description_index)
    }
}

#[derive(Clone, Debug, Default)]
pub struct MovieInfo {
    pub timescale: u32,
    pub tracks: Vec<TrackInfo>,
}

impl MovieInfo {
    /// Locate the `moov` box among the top-level boxes of `data` and parse it.
    pub fn from_container(data: &[u8], mode: ParseMode) -> Result<Self> {
        let moov = scan_boxes(data)?
            .into_iter()
            .find(|x| x.is(b"moov"))
            .ok_or_else(|| Error::format("no moov box found"))?;

        if moov.is_truncated() && mode.is_strict() {
            return Err(Error::format(format!(
                "moov box is truncated ({} of {} bytes)",
                moov.size, moov.declared_size
            )));
        }

        Self::parse(moov.bytes(data), mode)
    }

    /// Parse a buffer holding a `moov` box.
    pub fn parse(data: &[u8], mode: ParseMode) -> Result<Self> {
        let movie = data!(Self::default());
        let trexs = data!(Vec::new());

        Mp4Parser::new()
            .base_box("moov", parser::children)
            .full_box("mvhd", {
                let movie = movie.clone();
                move |mut box_| {
                    let skip = if box_.version == Some(1) { 16 } else { 8 };
                    box_.reader.skip(skip)?;
                    movie.borrow_mut().timescale = box_.reader.read_u32()?;
                    Ok(())
                }
            })
            .base_box("trak", {
                let movie = movie.clone();
                move |box_| {
                    movie.borrow_mut().tracks.push(TrackInfo {
                        language: "und".to_owned(),
                        ..Default::default()
                    });
                    parser::children(box_)
                }
            })
            .full_box("tkhd", {
                let movie = movie.clone();
                move |mut box_| {
                    let raw = box_.full_data();
                    let tkhd = TkhdBox::new(&mut box_)?;
                    if let Some(track) = movie.borrow_mut().tracks.last_mut() {
                        track.track_id = tkhd.track_id;
                        track.tkhd = Some(raw);
                    }
                    Ok(())
                }
            })
            .base_box("mdia", parser::children)
            .full_box("mdhd", {
                let movie = movie.clone();
                move |mut box_| {
                    let raw = box_.full_data();
                    let mdhd = MdhdBox::new(&mut box_)?;
                    if let Some(track) = movie.borrow_mut().tracks.last_mut() {
                        track.timescale = mdhd.timescale;
                        track.duration = mdhd.duration;
                        track.language = mdhd.language;
                        track.mdhd = Some(raw);
                    }
                    Ok(())
                }
            })
            .full_box("hdlr", {
                let movie = movie.clone();
                move |mut box_| {
                    let raw = box_.full_data();
                    let hdlr = HdlrBox::new(&mut box_)?;
                    if let Some(track) = movie.borrow_mut().tracks.last_mut() {
                        track.handler_type = hdlr.handler_type;
                        track.hdlr = Some(raw);
                    }
                    Ok(())
                }
            })
            .base_box("minf", parser::children)
            .full_box("smhd", {
                let movie = movie.clone();
                move |box_| {
                    if let Some(track) = movie.borrow_mut().tracks.last_mut() {
                        track.smhd = Some(box_.full_data());
                    }
                    Ok(())
                }
            })
            .base_box("dinf", parser::children)
            .full_box("dref", {
                let movie = movie.clone();
                move |box_| {
                    if let Some(track) = movie.borrow_mut().tracks.last_mut() {
                        track.dref = Some(box_.full_data());
                    }
                    Ok(())
                }
            })
            .base_box("stbl", parser::children)
            .full_box("stsd", {
                let movie = movie.clone();
                move |mut box_| {
                    let raw = box_.full_data();
                    let count = box_.reader.read_u32()?;
                    let payload = box_.reader.read_remaining();
                    let handler = match movie.borrow().tracks.last() {
                        Some(track) => track.handler_type,
                        None => return Ok(()),
                    };

                    let mut entries = Vec::new();

                    for (i, header) in scan_boxes(&payload)?
                        .into_iter()
                        .take(count as usize)
                        .enumerate()
                    {
                        entries.push(SampleEntry::parse(
                            i as u32 + 1,
                            header.name,
                            header.bytes(&payload).to_vec(),
                            header.header_size as usize,
                            &handler,
                            mode,
                        )?);
                    }

                    if let Some(track) = movie.borrow_mut().tracks.last_mut() {
                        track.entries = entries;
                        track.stsd = Some(raw);
                    }
                    Ok(())
                }
            })
            .base_box("mvex", parser::children)
            .full_box("trex", {
                let trexs = trexs.clone();
                move |mut box_| {
                    trexs.borrow_mut().push(TrexBox::new(&mut box_)?);
                    Ok(())
                }
            })
            .parse(data, !mode.is_strict(), false)?;

        let mut movie = movie.take();

        for trex in trexs.take() {
            if let Some(track) = movie.tracks.iter_mut().find(|x| x.track_id == trex.track_id) {
                track.trex = Some(trex);
            }
        }

        Ok(movie)
    }

    /// The first track with a sound handler.
    pub fn audio_track(&self) -> Option<&TrackInfo> {
        self.tracks.iter().find(|x| x.is_audio())
    }
}

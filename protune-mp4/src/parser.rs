/*
    REFERENCES
    ----------

    1. https://github.com/shaka-project/shaka-player/blob/7098f43f70119226bca2e5583833aaf27b498e33/lib/util/mp4_parser.js
    2. https://github.com/shaka-project/shaka-player/blob/7098f43f70119226bca2e5583833aaf27b498e33/externs/shaka/mp4_parser.js

*/

use crate::{Error, Reader, Result};
use std::{cell::Cell, collections::HashMap, rc::Rc};

/// Callback type for parsing an mp4 box.
pub type CallbackType = Rc<dyn Fn(ParsedBox) -> Result<()>>;

/// How malformed container data is treated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ParseMode {
    /// Degrade to "no scheme" or a partial sample list and log what was dropped.
    #[default]
    Lenient,
    /// Surface every malformed or truncated box as [`Error::Format`].
    Strict,
}

impl ParseMode {
    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Strict)
    }
}

/// Mp4 file parser.
#[derive(Clone, Default)]
pub struct Mp4Parser {
    headers: HashMap<u32, BoxType>,
    box_definitions: HashMap<u32, CallbackType>,
    done: Rc<Cell<bool>>,
}

impl Mp4Parser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a box type as a Basic Box.
    pub fn base_box<F>(mut self, type_: &str, definition: F) -> Self
    where
        F: Fn(ParsedBox) -> Result<()> + 'static,
    {
        let type_code = type_from_string(type_);
        self.headers.insert(type_code, BoxType::BasicBox);
        self.box_definitions.insert(type_code, Rc::new(definition));
        self
    }

    /// Declare a box type as a Full Box.
    pub fn full_box<F>(mut self, type_: &str, definition: F) -> Self
    where
        F: Fn(ParsedBox) -> Result<()> + 'static,
    {
        let type_code = type_from_string(type_);
        self.headers.insert(type_code, BoxType::FullBox);
        self.box_definitions.insert(type_code, Rc::new(definition));
        self
    }

    /// Stop parsing. Useful for extracting information from partial segments and
    /// avoiding an out-of-bounds error once you find what you are looking for.
    pub fn stop(&self) {
        self.done.set(true);
    }

    pub fn is_done(&self) -> bool {
        self.done.get()
    }

    /// Parse the given data using the added callbacks.
    ///
    /// # Arguments
    ///
    /// - `partial_okay` - If true, allow reading partial payloads
    ///   from some boxes. If the goal is a child box, we can sometimes find it
    ///   without enough data to find all child boxes.
    /// - `stop_on_partial` - If true, stop reading if an incomplete
    ///   box is detected.
    pub fn parse(&self, data: &[u8], partial_okay: bool, stop_on_partial: bool) -> Result<()> {
        let mut reader = Reader::new(data.to_vec());

        self.done.set(false);

        while reader.has_more_data() && !self.is_done() {
            self.parse_next(0, &mut reader, partial_okay, stop_on_partial)?;
        }

        Ok(())
    }

    /// Parse the next box on the current level.
    fn parse_next(
        &self,
        abs_start: u64,
        reader: &mut Reader,
        partial_okay: bool,
        stop_on_partial: bool,
    ) -> Result<()> {
        let start = reader.get_position();

        // size(4 bytes) + type(4 bytes) = 8 bytes
        if stop_on_partial && start + 8 > reader.get_length() {
            self.stop();
            return Ok(());
        }

        let mut size = reader.read_u32()? as u64;
        let type_ = reader.read_u32()?;
        let name = type_to_string(type_);
        let mut has_64_bit_size = false;

        match size {
            0 => size = reader.get_length() - start,
            1 => {
                if stop_on_partial && reader.get_position() + 8 > reader.get_length() {
                    self.stop();
                    return Ok(());
                }
                size = reader.read_u64()?;
                has_64_bit_size = true;
            }
            _ => (),
        }

        if size < reader.get_position() - start {
            return Err(Error::format(format!(
                "{} box declares size {} which is smaller than its header",
                name, size
            )));
        }

        let end = start.checked_add(size).ok_or_else(|| {
            Error::format(format!("{} box declares size {} which overflows", name, size))
        })?;

        if let Some(box_definition) = self.box_definitions.get(&type_) {
            let mut version = None;
            let mut flags = None;

            if self.headers.get(&type_) == Some(&BoxType::FullBox) {
                if stop_on_partial && reader.get_position() + 4 > reader.get_length() {
                    self.stop();
                    return Ok(());
                }

                let version_and_flags = reader.read_u32()?;
                version = Some(version_and_flags >> 24);
                flags = Some(version_and_flags & 0xFFFFFF);
            }

            // Read the whole payload so that the current level can be safely read
            // regardless of how the payload is parsed.
            let mut end = end;

            if partial_okay && end > reader.get_length() {
                // For partial reads, truncate the payload if we must.
                end = reader.get_length();
            }

            if stop_on_partial && end > reader.get_length() {
                self.stop();
                return Ok(());
            }

            let payload_size = end.saturating_sub(reader.get_position());
            let payload = reader.read_bytes_u8(payload_size as usize)?;

            let box_ = ParsedBox {
                name,
                parser: self.clone(),
                partial_okay,
                stop_on_partial,
                version,
                flags,
                reader: Reader::new(payload),
                size: size as usize,
                start: start + abs_start,
                has_64_bit_size,
            };

            box_definition(box_)?;
        } else {
            // Move the read head to be at the end of the box.
            // If the box is longer than the remaining parts of the file, e.g. the
            // mp4 is improperly formatted, or this was a partial range request that
            // ended in the middle of a box, just skip to the end.
            let skip_length = (end - reader.get_position())
                .min(reader.get_length() - reader.get_position());
            reader.skip(skip_length)?;
        }

        Ok(())
    }
}

// CALLBACKS

/// A callback that tells the Mp4 parser to treat the body of a box as a series
/// of boxes. The number of boxes is limited by the size of the parent box.
pub fn children(mut box_: ParsedBox) -> Result<()> {
    // The "reader" starts at the payload, so we need to add the header to the
    // start position.  The header size varies.
    let header_size = box_.header_size();

    while box_.reader.has_more_data() && !box_.parser.is_done() {
        box_.parser.parse_next(
            box_.start + header_size,
            &mut box_.reader,
            box_.partial_okay,
            box_.stop_on_partial,
        )?;
    }

    Ok(())
}

/// A callback that tells the Mp4 parser to treat the body of a box as a sample
/// description. A sample description box has a fixed number of children. The
/// number of children is represented by a 4 byte unsigned integer. Each child
/// is a box.
pub fn sample_description(mut box_: ParsedBox) -> Result<()> {
    let header_size = box_.header_size();
    let count = box_.reader.read_u32()?;

    for _ in 0..count {
        box_.parser.parse_next(
            box_.start + header_size,
            &mut box_.reader,
            box_.partial_okay,
            box_.stop_on_partial,
        )?;

        if box_.parser.is_done() {
            break;
        }
    }

    Ok(())
}

/// A callback that tells the Mp4 parser to treat the body of a box as a audio
/// sample entry.  A audio sample entry has some fixed-sized fields
/// describing the audio codec parameters, followed by an arbitrary number of
/// appended children.  Each child is a box.
pub fn audio_sample_entry(mut box_: ParsedBox) -> Result<()> {
    let header_size = box_.header_size();
    let fields = audio_sample_entry_fields_len(box_.reader.data())?;
    box_.reader.skip(fields as u64)?;

    while box_.reader.has_more_data() && !box_.parser.is_done() {
        box_.parser.parse_next(
            box_.start + header_size,
            &mut box_.reader,
            box_.partial_okay,
            box_.stop_on_partial,
        )?;
    }

    Ok(())
}

/// A callback that tells the Mp4 parser to treat the body of a box as a visual
/// sample entry. Same layout as [`audio_sample_entry`] with 78 bytes of fixed fields.
pub fn visual_sample_entry(mut box_: ParsedBox) -> Result<()> {
    let header_size = box_.header_size();

    // reserved, data reference index, pre-defined, dimensions, resolution,
    // frame count, compressor name, depth and pre-defined.
    box_.reader.skip(78)?;

    while box_.reader.has_more_data() && !box_.parser.is_done() {
        box_.parser.parse_next(
            box_.start + header_size,
            &mut box_.reader,
            box_.partial_okay,
            box_.stop_on_partial,
        )?;
    }

    Ok(())
}

/// Length of the fixed fields of an audio sample entry payload, i.e. the offset
/// at which its child boxes begin.
pub fn audio_sample_entry_fields_len(payload: &[u8]) -> Result<usize> {
    // 6 bytes reserved
    // 2 bytes data reference index
    // 2 bytes version
    let version = payload
        .get(8..10)
        .map(|x| u16::from_be_bytes([x[0], x[1]]))
        .ok_or_else(|| Error::Read("audio sample entry version (u16)".to_owned()))?;

    // 2 bytes revision, 4 bytes vendor
    // v0: 2 channel count, 2 sample size, 2 compression id, 2 packet size, 4 sample rate
    // v1: + 4 samples per packet, 4 bytes per packet, 4 bytes per frame, 4 bytes per sample
    // v2: 36 bytes of extended sound description
    let len = match version {
        1 => 44,
        2 => 64,
        _ => 28,
    };

    if len > payload.len() {
        return Err(Error::Read(format!(
            "audio sample entry fields ({} bytes, only {} available)",
            len,
            payload.len()
        )));
    }

    Ok(len)
}

// TOP-LEVEL SCAN

/// Location of one box inside a byte buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoxHeader {
    pub name: [u8; 4],
    /// Absolute offset of the first header byte.
    pub offset: u64,
    /// Header length (8 or 16).
    pub header_size: u64,
    /// Size declared by the header, after resolving the size escapes.
    pub declared_size: u64,
    /// Size actually available in the buffer.
    pub size: u64,
}

impl BoxHeader {
    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }

    pub fn is(&self, name: &[u8; 4]) -> bool {
        &self.name == name
    }

    /// True when the buffer ends before the box does.
    pub fn is_truncated(&self) -> bool {
        self.size < self.declared_size
    }

    pub fn payload_offset(&self) -> u64 {
        self.offset + self.header_size
    }

    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    /// Full box bytes (header included) that are available in `data`.
    pub fn bytes<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        &data[self.offset as usize..self.end() as usize]
    }

    pub fn payload<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        &data[self.payload_offset() as usize..self.end() as usize]
    }
}

/// Single linear scan over sibling boxes, recording offsets and sizes.
///
/// A box running past the end of `data` is recorded with its available size and
/// ends the scan. Trailing bytes too short to hold a header are ignored.
pub fn scan_boxes(data: &[u8]) -> Result<Vec<BoxHeader>> {
    let mut boxes = Vec::new();
    let length = data.len() as u64;
    let mut offset = 0u64;

    while offset + 8 <= length {
        let at = offset as usize;
        let mut declared_size =
            u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]) as u64;
        let name = [data[at + 4], data[at + 5], data[at + 6], data[at + 7]];
        let mut header_size = 8;

        match declared_size {
            0 => declared_size = length - offset,
            1 => {
                let Some(extended) = data.get(at + 8..at + 16) else {
                    break;
                };
                let mut buf = [0; 8];
                buf.copy_from_slice(extended);
                declared_size = u64::from_be_bytes(buf);
                header_size = 16;
            }
            _ => (),
        }

        if declared_size < header_size {
            return Err(Error::format(format!(
                "{} box at offset {} declares size {} which is smaller than its header",
                String::from_utf8_lossy(&name),
                offset,
                declared_size
            )));
        }

        let size = declared_size.min(length - offset);
        boxes.push(BoxHeader {
            name,
            offset,
            header_size,
            declared_size,
            size,
        });

        if size < declared_size {
            break;
        }

        offset += size;
    }

    Ok(boxes)
}

// UTILS

/// Convert an ascii string name to the integer type for a box.
/// The name must be four characters long.
pub fn type_from_string(name: &str) -> u32 {
    assert!(name.len() == 4, "MP4 box names must be 4 characters long");

    name.bytes().fold(0, |code, chr| (code << 8) | chr as u32)
}

/// Convert an integer type from a box into an ascii string name.
/// Useful for debugging.
pub fn type_to_string(type_: u32) -> String {
    String::from_utf8_lossy(&type_.to_be_bytes()).into_owned()
}

/// An enum used to track the type of box so that the correct values can be
/// read from the header.
#[derive(Clone, PartialEq)]
pub enum BoxType {
    BasicBox,
    FullBox,
}

/// Parsed mp4 box.
pub struct ParsedBox {
    /// The box name, a 4-character string (fourcc).
    pub name: String,
    /// The parser that parsed this box. The parser can be used to parse child
    /// boxes where the configuration of the current parser is needed to parsed
    /// other boxes.
    pub parser: Mp4Parser,
    /// If true, allows reading partial payloads from some boxes. If the goal is a
    /// child box, we can sometimes find it without enough data to find all child
    /// boxes. This property allows the partialOkay flag from parse() to be
    /// propagated through methods like children().
    pub partial_okay: bool,
    /// If true, stop reading if an incomplete box is detected.
    pub stop_on_partial: bool,
    /// The start of this box (before the header) in the original buffer. This
    /// start position is the absolute position.
    pub start: u64,
    /// The size of this box (including the header).
    pub size: usize,
    /// The version for a full box, null for basic boxes.
    pub version: Option<u32>,
    /// The flags for a full box, null for basic boxes.
    pub flags: Option<u32>,
    /// The reader for this box is only for this box. Reading or not reading to
    /// the end will have no affect on the parser reading other sibling boxes.
    pub reader: Reader,
    /// If true, the box header had a 64-bit size field.  This affects the offsets
    /// of other fields.
    pub has_64_bit_size: bool,
}

impl ParsedBox {
    /// Find the header size of the box.
    /// Useful for modifying boxes in place or finding the exact offset of a field.
    pub fn header_size(&self) -> u64 {
        let basic_header_size = 8;
        let _64_bit_field_size = if self.has_64_bit_size { 8 } else { 0 };
        let version_and_flags_size = if self.flags.is_some() { 4 } else { 0 };
        basic_header_size + _64_bit_field_size + version_and_flags_size
    }

    /// Rebuild the complete box (compact header, version/flags and the whole
    /// payload) regardless of how much of the payload was already read.
    pub fn full_data(&self) -> Vec<u8> {
        let payload = self.payload();
        let version_and_flags = match (self.version, self.flags) {
            (Some(version), Some(flags)) => Some((version << 24) | flags),
            _ => None,
        };
        let header_size = 8 + if version_and_flags.is_some() { 4 } else { 0 };
        let mut data = Vec::with_capacity(header_size + payload.len());
        data.extend_from_slice(&((header_size + payload.len()) as u32).to_be_bytes());
        data.extend_from_slice(self.name.as_bytes());

        if let Some(version_and_flags) = version_and_flags {
            data.extend_from_slice(&version_and_flags.to_be_bytes());
        }

        data.extend_from_slice(payload);
        data
    }

    /// The whole payload of the box, independent of the reader position.
    pub fn payload(&self) -> &[u8] {
        self.reader.data()
    }
}

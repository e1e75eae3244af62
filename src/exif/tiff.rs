//! Append-only editor for TIFF-structured EXIF blocks.
//!
//! The original bytes are never rewritten in place. Edited directories are
//! rebuilt at the end of the block with their untouched 12-byte entries copied
//! verbatim, so every value the caller did not set keeps its exact bytes and
//! its original offset stays valid.

use crate::error::{CodecError, CodecResult};

/// Well-known tag IDs used by this crate.
pub mod tag {
    pub const IMAGE_DESCRIPTION: u16 = 0x010E;
    pub const DATE_TIME: u16 = 0x0132;
    pub const ARTIST: u16 = 0x013B;
    pub const EXIF_IFD_POINTER: u16 = 0x8769;
    pub const GPS_IFD_POINTER: u16 = 0x8825;
    pub const DATE_TIME_ORIGINAL: u16 = 0x9003;
    pub const GPS_VERSION_ID: u16 = 0x0000;
    pub const GPS_LATITUDE_REF: u16 = 0x0001;
    pub const GPS_LATITUDE: u16 = 0x0002;
    pub const GPS_LONGITUDE_REF: u16 = 0x0003;
    pub const GPS_LONGITUDE: u16 = 0x0004;
}

// TIFF field types
const TYPE_BYTE: u16 = 1;
const TYPE_ASCII: u16 = 2;
const TYPE_LONG: u16 = 4;
const TYPE_RATIONAL: u16 = 5;

const ENTRY_LEN: usize = 12;

// Offset-valued tags whose target length the entry does not describe
const OPAQUE_POINTERS: &[u16] = &[0x0111, 0x0144, 0x014A];
const INTEROP_IFD_POINTER: u16 = 0xA005;
const THUMBNAIL_OFFSET: u16 = 0x0201;
const THUMBNAIL_LENGTH: u16 = 0x0202;
// Pointer chains deeper than this are not followed
const MAX_DEPTH: usize = 4;

/// Byte order declared by the block header (`II` or `MM`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    fn u16_at(self, data: &[u8], offset: usize) -> u16 {
        let bytes = [data[offset], data[offset + 1]];
        match self {
            Self::Little => u16::from_le_bytes(bytes),
            Self::Big => u16::from_be_bytes(bytes),
        }
    }

    fn u32_at(self, data: &[u8], offset: usize) -> u32 {
        let bytes = [
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ];
        match self {
            Self::Little => u32::from_le_bytes(bytes),
            Self::Big => u32::from_be_bytes(bytes),
        }
    }

    fn encode_u16(self, value: u16) -> [u8; 2] {
        match self {
            Self::Little => value.to_le_bytes(),
            Self::Big => value.to_be_bytes(),
        }
    }

    fn encode_u32(self, value: u32) -> [u8; 4] {
        match self {
            Self::Little => value.to_le_bytes(),
            Self::Big => value.to_be_bytes(),
        }
    }
}

/// The directory a tag belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Ifd {
    /// IFD0, the primary image directory.
    Primary,
    /// Exif sub-IFD, reached through tag 0x8769.
    Exif,
    /// GPS sub-IFD, reached through tag 0x8825.
    Gps,
}

impl Ifd {
    fn pointer_tag(self) -> Option<u16> {
        match self {
            Self::Primary => None,
            Self::Exif => Some(tag::EXIF_IFD_POINTER),
            Self::Gps => Some(tag::GPS_IFD_POINTER),
        }
    }
}

/// A value to be written into a directory.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    /// NUL-terminated 7-bit text. Callers escape anything outside ASCII first.
    Ascii(String),
    Bytes(Vec<u8>),
    Long(u32),
    Rationals(Vec<(u32, u32)>),
}

impl TagValue {
    fn format(&self) -> u16 {
        match self {
            Self::Ascii(_) => TYPE_ASCII,
            Self::Bytes(_) => TYPE_BYTE,
            Self::Long(_) => TYPE_LONG,
            Self::Rationals(_) => TYPE_RATIONAL,
        }
    }

    fn count(&self) -> usize {
        match self {
            Self::Ascii(s) => s.len() + 1,
            Self::Bytes(b) => b.len(),
            Self::Long(_) => 1,
            Self::Rationals(r) => r.len(),
        }
    }

    fn encode(&self, order: ByteOrder) -> Vec<u8> {
        match self {
            Self::Ascii(s) => {
                let mut data = s.as_bytes().to_vec();
                data.push(0);
                data
            }
            Self::Bytes(b) => b.clone(),
            Self::Long(v) => order.encode_u32(*v).to_vec(),
            Self::Rationals(values) => values
                .iter()
                .flat_map(|(num, den)| {
                    let mut pair = order.encode_u32(*num).to_vec();
                    pair.extend_from_slice(&order.encode_u32(*den));
                    pair
                })
                .collect(),
        }
    }
}

/// A directory entry as stored in a block, with its value bytes resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub tag: u16,
    pub format: u16,
    pub count: u32,
    pub value: Vec<u8>,
}

/// A set of tags to write, keyed by directory and tag ID.
#[derive(Debug, Clone, Default)]
pub struct TagEdits {
    edits: Vec<(Ifd, u16, TagValue)>,
}

impl TagEdits {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a tag, replacing any earlier edit of the same tag.
    pub fn set(&mut self, ifd: Ifd, tag: u16, value: TagValue) -> &mut Self {
        self.edits.retain(|(i, t, _)| !(*i == ifd && *t == tag));
        self.edits.push((ifd, tag, value));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    pub fn get(&self, ifd: Ifd, tag: u16) -> Option<&TagValue> {
        self.edits
            .iter()
            .find(|(i, t, _)| *i == ifd && *t == tag)
            .map(|(_, _, v)| v)
    }

    fn for_ifd(&self, ifd: Ifd) -> impl Iterator<Item = (u16, &TagValue)> {
        self.edits
            .iter()
            .filter(move |(i, _, _)| *i == ifd)
            .map(|(_, t, v)| (*t, v))
    }
}

/// A minimal little-endian block with an empty IFD0.
pub fn empty_block() -> Vec<u8> {
    let mut block = b"II*\0".to_vec();
    block.extend_from_slice(&8u32.to_le_bytes());
    block.extend_from_slice(&0u16.to_le_bytes());
    block.extend_from_slice(&0u32.to_le_bytes());
    block
}

struct Directory {
    entries: Vec<[u8; ENTRY_LEN]>,
    next: u32,
}

/// Read-only view of a TIFF-structured block.
pub struct TiffBlock<'a> {
    data: &'a [u8],
    order: ByteOrder,
    ifd0_offset: usize,
}

impl<'a> TiffBlock<'a> {
    pub fn parse(data: &'a [u8]) -> CodecResult<Self> {
        if data.len() < 8 {
            return Err(CodecError::InvalidTiff("block shorter than header".into()));
        }
        let order = match &data[0..2] {
            b"II" => ByteOrder::Little,
            b"MM" => ByteOrder::Big,
            _ => return Err(CodecError::InvalidTiff("unknown byte order".into())),
        };
        if order.u16_at(data, 2) != 42 {
            return Err(CodecError::InvalidTiff("bad magic number".into()));
        }
        let ifd0_offset = order.u32_at(data, 4) as usize;
        let block = Self {
            data,
            order,
            ifd0_offset,
        };
        block.directory(ifd0_offset)?;
        Ok(block)
    }

    fn directory(&self, offset: usize) -> CodecResult<Directory> {
        if offset + 2 > self.data.len() {
            return Err(CodecError::InvalidTiff(format!(
                "directory offset {offset} out of bounds"
            )));
        }
        let count = self.order.u16_at(self.data, offset) as usize;
        let start = offset + 2;
        let end = start + count * ENTRY_LEN;
        if end > self.data.len() {
            return Err(CodecError::InvalidTiff(format!(
                "directory at {offset} extends beyond block"
            )));
        }
        let entries = (0..count)
            .map(|i| {
                let mut entry = [0u8; ENTRY_LEN];
                entry.copy_from_slice(&self.data[start + i * ENTRY_LEN..start + (i + 1) * ENTRY_LEN]);
                entry
            })
            .collect();
        // Some writers omit the trailing next-IFD pointer
        let next = if end + 4 <= self.data.len() {
            self.order.u32_at(self.data, end)
        } else {
            0
        };
        Ok(Directory { entries, next })
    }

    fn entry_tag(&self, entry: &[u8; ENTRY_LEN]) -> u16 {
        self.order.u16_at(entry, 0)
    }

    fn directory_offset(&self, ifd: Ifd) -> CodecResult<Option<usize>> {
        let Some(pointer) = ifd.pointer_tag() else {
            return Ok(Some(self.ifd0_offset));
        };
        let ifd0 = self.directory(self.ifd0_offset)?;
        Ok(ifd0
            .entries
            .iter()
            .find(|e| self.entry_tag(e) == pointer)
            .map(|e| self.order.u32_at(e, 8) as usize))
    }

    fn locate(&self, ifd: Ifd) -> CodecResult<Option<Directory>> {
        match self.directory_offset(ifd)? {
            Some(offset) => self.directory(offset).map(Some),
            None => Ok(None),
        }
    }

    /// End of an entry's out-of-line value, or 0 when it is stored inline.
    fn value_end(&self, entry: &[u8; ENTRY_LEN]) -> usize {
        let format = self.order.u16_at(entry, 2);
        let size = type_size(format) * self.order.u32_at(entry, 4) as usize;
        if size <= 4 {
            0
        } else {
            self.order.u32_at(entry, 8) as usize + size
        }
    }

    /// Highest byte referenced by `entries`, following sub-directory pointers.
    ///
    /// `None` when a pointer's target extent cannot be determined.
    fn referenced_end(&self, entries: &[[u8; ENTRY_LEN]], depth: usize) -> Option<usize> {
        if depth > MAX_DEPTH {
            return None;
        }
        let mut end = 0;
        for entry in entries {
            end = end.max(self.value_end(entry));
            match self.entry_tag(entry) {
                t if OPAQUE_POINTERS.contains(&t) => return None,
                tag::EXIF_IFD_POINTER | tag::GPS_IFD_POINTER | INTEROP_IFD_POINTER => {
                    let offset = self.order.u32_at(entry, 8) as usize;
                    end = end.max(self.directory_end(offset, depth + 1)?);
                }
                THUMBNAIL_OFFSET => {
                    let offset = self.order.u32_at(entry, 8) as usize;
                    let length = entries
                        .iter()
                        .find(|e| self.entry_tag(e) == THUMBNAIL_LENGTH)
                        .map(|e| self.order.u32_at(e, 8) as usize)?;
                    end = end.max(offset + length);
                }
                _ => {}
            }
        }
        Some(end)
    }

    /// Highest byte used by the directory at `offset` and everything it reaches.
    fn directory_end(&self, offset: usize, depth: usize) -> Option<usize> {
        if depth > MAX_DEPTH {
            return None;
        }
        let dir = self.directory(offset).ok()?;
        let table_end = offset + 2 + dir.entries.len() * ENTRY_LEN + 4;
        let mut end = table_end.max(self.referenced_end(&dir.entries, depth)?);
        if dir.next != 0 {
            end = end.max(self.directory_end(dir.next as usize, depth + 1)?);
        }
        Some(end)
    }

    fn resolve(&self, entry: &[u8; ENTRY_LEN]) -> CodecResult<RawEntry> {
        let tag = self.entry_tag(entry);
        let format = self.order.u16_at(entry, 2);
        let count = self.order.u32_at(entry, 4);
        let size = type_size(format) * count as usize;
        let value = if size <= 4 {
            entry[8..8 + size].to_vec()
        } else {
            let offset = self.order.u32_at(entry, 8) as usize;
            self.data
                .get(offset..offset + size)
                .ok_or_else(|| {
                    CodecError::InvalidTiff(format!("value of tag {tag:#06x} out of bounds"))
                })?
                .to_vec()
        };
        Ok(RawEntry {
            tag,
            format,
            count,
            value,
        })
    }

    /// All entries of a directory, in stored order. A missing sub-IFD yields none.
    pub fn entries(&self, ifd: Ifd) -> CodecResult<Vec<RawEntry>> {
        match self.locate(ifd)? {
            Some(dir) => dir.entries.iter().map(|e| self.resolve(e)).collect(),
            None => Ok(Vec::new()),
        }
    }

    pub fn entry(&self, ifd: Ifd, tag: u16) -> CodecResult<Option<RawEntry>> {
        Ok(self.entries(ifd)?.into_iter().find(|e| e.tag == tag))
    }

    pub fn read_ascii(&self, ifd: Ifd, tag: u16) -> CodecResult<Option<String>> {
        Ok(self
            .entry(ifd, tag)?
            .filter(|e| e.format == TYPE_ASCII)
            .map(|e| {
                let text = String::from_utf8_lossy(&e.value);
                text.trim_end_matches('\0').to_string()
            }))
    }

    pub fn read_rationals(&self, ifd: Ifd, tag: u16) -> CodecResult<Option<Vec<(u32, u32)>>> {
        Ok(self
            .entry(ifd, tag)?
            .filter(|e| e.format == TYPE_RATIONAL)
            .map(|e| {
                e.value
                    .chunks_exact(8)
                    .map(|pair| (self.order.u32_at(pair, 0), self.order.u32_at(pair, 4)))
                    .collect()
            }))
    }
}

fn type_size(format: u16) -> usize {
    match format {
        3 | 8 => 2,
        4 | 9 | 11 | 13 => 4,
        5 | 10 | 12 => 8,
        _ => 1,
    }
}

struct NewEntry {
    tag: u16,
    format: u16,
    count: u32,
    payload: Vec<u8>,
}

impl NewEntry {
    fn new(tag: u16, value: &TagValue, order: ByteOrder) -> Self {
        Self {
            tag,
            format: value.format(),
            count: value.count() as u32,
            payload: value.encode(order),
        }
    }
}

fn pad_to_even(out: &mut Vec<u8>) {
    if out.len() % 2 != 0 {
        out.push(0);
    }
}

fn checked_offset(offset: usize) -> CodecResult<u32> {
    u32::try_from(offset).map_err(|_| CodecError::InvalidTiff("block exceeds 4 GiB".into()))
}

/// Append a rebuilt directory to `out` and return its offset.
///
/// Entries of `existing` whose tag is not in `replacements` are copied
/// verbatim. The result is sorted by tag.
fn write_directory(
    out: &mut Vec<u8>,
    order: ByteOrder,
    existing: &[[u8; ENTRY_LEN]],
    replacements: &[NewEntry],
    next: u32,
) -> CodecResult<u32> {
    enum Slot<'e> {
        Kept([u8; ENTRY_LEN]),
        New(&'e NewEntry),
    }

    let mut slots: Vec<(u16, Slot)> = existing
        .iter()
        .map(|e| (order.u16_at(e, 0), *e))
        .filter(|(tag, _)| !replacements.iter().any(|r| r.tag == *tag))
        .map(|(tag, e)| (tag, Slot::Kept(e)))
        .collect();
    slots.extend(replacements.iter().map(|r| (r.tag, Slot::New(r))));
    slots.sort_by_key(|(tag, _)| *tag);

    let count = u16::try_from(slots.len())
        .map_err(|_| CodecError::InvalidTiff("too many directory entries".into()))?;

    pad_to_even(out);
    let start = checked_offset(out.len())?;
    out.extend_from_slice(&order.encode_u16(count));
    let entries_base = out.len();
    out.resize(entries_base + slots.len() * ENTRY_LEN, 0);
    out.extend_from_slice(&order.encode_u32(next));

    for (i, (_, slot)) in slots.iter().enumerate() {
        let entry = match slot {
            Slot::Kept(raw) => *raw,
            Slot::New(new) => {
                let mut raw = [0u8; ENTRY_LEN];
                raw[0..2].copy_from_slice(&order.encode_u16(new.tag));
                raw[2..4].copy_from_slice(&order.encode_u16(new.format));
                raw[4..8].copy_from_slice(&order.encode_u32(new.count));
                if new.payload.len() <= 4 {
                    raw[8..8 + new.payload.len()].copy_from_slice(&new.payload);
                } else {
                    pad_to_even(out);
                    let offset = checked_offset(out.len())?;
                    out.extend_from_slice(&new.payload);
                    raw[8..12].copy_from_slice(&order.encode_u32(offset));
                }
                raw
            }
        };
        let at = entries_base + i * ENTRY_LEN;
        out[at..at + ENTRY_LEN].copy_from_slice(&entry);
    }

    Ok(start)
}

/// Where the rebuilt directories start being appended.
///
/// Directories about to be replaced that form a tail nothing else references
/// (typically the IFD0 appended by a previous edit) are cut off first, so
/// editing the same block repeatedly does not grow it. Anything that cannot
/// be proven dead keeps the whole block.
fn rebuild_start(tiff: &TiffBlock, edits: &TagEdits) -> CodecResult<usize> {
    let len = tiff.data.len();
    let mut cut = tiff.ifd0_offset;
    let mut live: Vec<[u8; ENTRY_LEN]> = Vec::new();
    let mut replaced_pointers = Vec::new();

    for ifd in [Ifd::Exif, Ifd::Gps] {
        if edits.for_ifd(ifd).next().is_none() {
            continue;
        }
        let Some(offset) = tiff.directory_offset(ifd)? else {
            continue;
        };
        let dir = tiff.directory(offset)?;
        if dir.next != 0 {
            return Ok(len);
        }
        cut = cut.min(offset);
        live.extend(
            dir.entries
                .into_iter()
                .filter(|e| edits.get(ifd, tiff.entry_tag(e)).is_none()),
        );
        replaced_pointers.extend(ifd.pointer_tag());
    }

    let ifd0 = tiff.directory(tiff.ifd0_offset)?;
    live.extend(ifd0.entries.iter().copied().filter(|e| {
        let t = tiff.entry_tag(e);
        edits.get(Ifd::Primary, t).is_none() && !replaced_pointers.contains(&t)
    }));

    let Some(mut end) = tiff.referenced_end(&live, 0) else {
        return Ok(len);
    };
    if ifd0.next != 0 {
        match tiff.directory_end(ifd0.next as usize, 1) {
            Some(next_end) => end = end.max(next_end),
            None => return Ok(len),
        }
    }

    Ok(if cut >= 8 && end <= cut { cut } else { len })
}

/// Apply `edits` to a block and return the new block.
///
/// Sub-IFDs that receive edits are rebuilt (or created when absent), then
/// IFD0 is rebuilt with updated pointers and the header is pointed at it.
pub fn apply_edits(block: &[u8], edits: &TagEdits) -> CodecResult<Vec<u8>> {
    let tiff = TiffBlock::parse(block)?;
    if edits.is_empty() {
        return Ok(block.to_vec());
    }
    let order = tiff.order;
    let ifd0 = tiff.directory(tiff.ifd0_offset)?;

    let mut out = block[..rebuild_start(&tiff, edits)?].to_vec();
    let mut ifd0_replacements: Vec<NewEntry> = edits
        .for_ifd(Ifd::Primary)
        .map(|(tag, value)| NewEntry::new(tag, value, order))
        .collect();

    for ifd in [Ifd::Exif, Ifd::Gps] {
        let replacements: Vec<NewEntry> = edits
            .for_ifd(ifd)
            .map(|(tag, value)| NewEntry::new(tag, value, order))
            .collect();
        if replacements.is_empty() {
            continue;
        }
        let (entries, next) = match tiff.locate(ifd)? {
            Some(dir) => (dir.entries, dir.next),
            None => (Vec::new(), 0),
        };
        let offset = write_directory(&mut out, order, &entries, &replacements, next)?;
        if let Some(pointer) = ifd.pointer_tag() {
            ifd0_replacements.push(NewEntry::new(pointer, &TagValue::Long(offset), order));
        }
    }

    let ifd0_start = write_directory(&mut out, order, &ifd0.entries, &ifd0_replacements, ifd0.next)?;
    out[4..8].copy_from_slice(&order.encode_u32(ifd0_start));

    Ok(out)
}

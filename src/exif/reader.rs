use nom_exif::*;
use std::io::Write;
use std::path::Path;

use super::container::{self, ImageKind};
use super::tiff::{Ifd, TiffBlock, tag};
use crate::error::{CodecError, CodecResult};

/// Descriptive, temporal and location fields read from an image.
#[derive(Debug, Clone, Default)]
pub struct ExifData {
    pub description: Option<String>,
    pub artist: Option<String>,
    pub taken_at: Option<String>,
    pub has_gps: bool,
    pub gps_latitude: Option<f64>,
    pub gps_longitude: Option<f64>,
}

impl ExifData {
    pub fn is_empty(&self) -> bool {
        self.description.is_none() && self.artist.is_none() && self.taken_at.is_none() && !self.has_gps
    }

    /// Print the fields as an aligned table.
    pub fn write_table(&self, path: &Path, out: &mut dyn Write) -> std::io::Result<()> {
        writeln!(out)?;
        writeln!(out, "File: {}", path.display())?;
        writeln!(out, "{}", "─".repeat(72))?;
        if self.is_empty() {
            writeln!(out, "  (no EXIF metadata found)")?;
            return Ok(());
        }
        let rows = [
            ("ImageDescription", self.description.clone()),
            ("Artist", self.artist.clone()),
            ("DateTimeOriginal", self.taken_at.clone()),
            ("GPSLatitude", self.gps_latitude.map(|v| format!("{v:.6}"))),
            ("GPSLongitude", self.gps_longitude.map(|v| format!("{v:.6}"))),
        ];
        for (tag, value) in rows {
            if let Some(value) = value {
                write_row(out, tag, &value)?;
            }
        }
        Ok(())
    }
}

/// Max width for the value column before wrapping.
const VAL_WIDTH: usize = 46;
/// Indent for continuation lines (tag column width + " : ").
const INDENT: &str = "                           ";

fn write_row(out: &mut dyn Write, tag: &str, val: &str) -> std::io::Result<()> {
    let tag_col = format!("{:<22}", tag);
    for (i, line) in wrap_text(val, VAL_WIDTH).iter().enumerate() {
        if i == 0 {
            writeln!(out, "  {tag_col} : {line}")?;
        } else {
            writeln!(out, "  {INDENT}{line}")?;
        }
    }
    Ok(())
}

/// Wrap text at word boundaries to fit within max_width.
fn wrap_text(s: &str, max_width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in s.split_whitespace() {
        if current.is_empty() {
            current = word.to_string();
        } else if current.len() + 1 + word.len() <= max_width {
            current.push(' ');
            current.push_str(word);
        } else {
            lines.push(std::mem::take(&mut current));
            current = word.to_string();
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    if lines.is_empty() {
        lines.push(s.to_string());
    }
    lines
}

/// Read descriptive and location fields from an image file.
///
/// A file that parses as media but carries no EXIF yields an empty
/// [`ExifData`]; a file that cannot be opened is an error.
pub fn read_exif(path: &Path) -> CodecResult<ExifData> {
    let mut data = read_media(path)?;
    if let Some(kind) = ImageKind::from_path(path).filter(|k| *k != ImageKind::Bmp) {
        supplement_from_block(path, kind, &mut data);
    }
    Ok(data)
}

fn read_media(path: &Path) -> CodecResult<ExifData> {
    let mut parser = MediaParser::new();
    let ms = MediaSource::file_path(path).map_err(|e| CodecError::Container {
        format: "EXIF",
        message: e.to_string(),
    })?;

    let iter: ExifIter = match parser.parse(ms) {
        Ok(iter) => iter,
        Err(_) => {
            log::debug!("No EXIF data found in {}", path.display());
            return Ok(ExifData::default());
        }
    };

    // GPS must be parsed before the iterator is consumed
    let gps_info = iter.parse_gps_info().ok().flatten();
    let exif: Exif = iter.into();

    let mut data = ExifData {
        description: exif.get(ExifTag::ImageDescription).and_then(entry_to_string),
        artist: exif.get_by_ifd_tag_code(0, tag::ARTIST).and_then(entry_to_string),
        taken_at: exif.get(ExifTag::DateTimeOriginal).and_then(entry_to_string),
        ..Default::default()
    };

    if let Some(gps) = gps_info {
        data.has_gps = true;
        data.gps_latitude = Some(latlng_to_decimal(&gps.latitude, gps.latitude_ref));
        data.gps_longitude = Some(latlng_to_decimal(&gps.longitude, gps.longitude_ref));
    }

    Ok(data)
}

/// Fill in from the crate's own IFD parser.
///
/// GPS always comes from here when the block has it: nom-exif reports no GPS
/// for directories that start with a GPSVersionID entry. Text fields are only
/// taken when nom-exif found none.
fn supplement_from_block(path: &Path, kind: ImageKind, data: &mut ExifData) {
    let block = match std::fs::read(path) {
        Ok(bytes) => match container::extract_exif(&bytes, kind) {
            Ok(Some(block)) => block,
            Ok(None) => return,
            Err(e) => {
                log::debug!("Cannot extract EXIF from {}: {e}", path.display());
                return;
            }
        },
        Err(e) => {
            log::debug!("Cannot read {}: {e}", path.display());
            return;
        }
    };
    let tiff = match TiffBlock::parse(&block) {
        Ok(tiff) => tiff,
        Err(e) => {
            log::debug!("Unparseable EXIF block in {}: {e}", path.display());
            return;
        }
    };

    let ascii = |ifd, code| {
        tiff.read_ascii(ifd, code)
            .ok()
            .flatten()
            .filter(|s| !s.trim().is_empty())
    };
    if data.description.is_none() {
        data.description = ascii(Ifd::Primary, tag::IMAGE_DESCRIPTION);
    }
    if data.artist.is_none() {
        data.artist = ascii(Ifd::Primary, tag::ARTIST);
    }
    if data.taken_at.is_none() {
        data.taken_at = ascii(Ifd::Exif, tag::DATE_TIME_ORIGINAL);
    }

    let coordinate = |value_tag, ref_tag| -> Option<f64> {
        let parts = tiff.read_rationals(Ifd::Gps, value_tag).ok()??;
        let reference = ascii(Ifd::Gps, ref_tag)?.chars().next()?;
        (parts.len() == 3).then(|| dms_to_decimal(&parts, reference))
    };
    if let (Some(lat), Some(lon)) = (
        coordinate(tag::GPS_LATITUDE, tag::GPS_LATITUDE_REF),
        coordinate(tag::GPS_LONGITUDE, tag::GPS_LONGITUDE_REF),
    ) {
        data.has_gps = true;
        data.gps_latitude = Some(lat);
        data.gps_longitude = Some(lon);
    }
}

fn entry_to_string(val: &EntryValue) -> Option<String> {
    let s = val.to_string();
    let s = s.trim().trim_matches('"').to_string();
    if s.is_empty() { None } else { Some(s) }
}

/// Convert a nom-exif LatLng (3 URationals: deg, min, sec) to decimal degrees.
fn latlng_to_decimal(latlng: &LatLng, reference: char) -> f64 {
    let parts = [
        (latlng.0.0, latlng.0.1),
        (latlng.1.0, latlng.1.1),
        (latlng.2.0, latlng.2.1),
    ];
    dms_to_decimal(&parts, reference)
}

/// Degrees, minutes and seconds to signed decimal degrees.
fn dms_to_decimal(parts: &[(u32, u32)], reference: char) -> f64 {
    let part = |(num, den): (u32, u32)| if den == 0 { 0.0 } else { num as f64 / den as f64 };
    let coord = part(parts[0]) + part(parts[1]) / 60.0 + part(parts[2]) / 3600.0;
    if reference == 'S' || reference == 'W' { -coord } else { coord }
}

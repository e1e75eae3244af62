use chrono::NaiveDateTime;

use super::container::{self, ImageKind};
use super::tiff::{self, Ifd, TagEdits, TagValue, tag};
use crate::error::{CodecResult, PipelineError, PipelineResult};

const EXIF_TIME_FORMAT: &str = "%Y:%m:%d %H:%M:%S";
const ACCEPTED_TIME_FORMATS: &[&str] = &[EXIF_TIME_FORMAT, "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Decimal-degree coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsCoords {
    pub latitude: f64,
    pub longitude: f64,
}

/// Geolocation, capture time and authorship to write without a model call.
#[derive(Debug, Clone, Default)]
pub struct MetadataTags {
    pub gps: Option<GpsCoords>,
    pub taken_at: Option<NaiveDateTime>,
    pub artist: Option<String>,
}

impl MetadataTags {
    pub fn is_empty(&self) -> bool {
        self.gps.is_none() && self.taken_at.is_none() && self.artist.is_none()
    }

    /// Reject requests that would write nothing or out-of-range coordinates.
    pub fn validate(&self) -> PipelineResult<()> {
        if self.is_empty() {
            return Err(PipelineError::InvalidTag(
                "nothing to write: pass GPS coordinates, a date or an artist".into(),
            ));
        }
        if let Some(gps) = self.gps {
            if !(-90.0..=90.0).contains(&gps.latitude) {
                return Err(PipelineError::InvalidTag(format!(
                    "latitude {} outside [-90, 90]",
                    gps.latitude
                )));
            }
            if !(-180.0..=180.0).contains(&gps.longitude) {
                return Err(PipelineError::InvalidTag(format!(
                    "longitude {} outside [-180, 180]",
                    gps.longitude
                )));
            }
        }
        Ok(())
    }

    pub fn to_edits(&self) -> TagEdits {
        let mut edits = TagEdits::new();
        if let Some(gps) = self.gps {
            push_gps(&mut edits, gps);
        }
        if let Some(taken_at) = self.taken_at {
            let stamp = taken_at.format(EXIF_TIME_FORMAT).to_string();
            edits.set(Ifd::Exif, tag::DATE_TIME_ORIGINAL, TagValue::Ascii(stamp.clone()));
            edits.set(Ifd::Primary, tag::DATE_TIME, TagValue::Ascii(stamp));
        }
        if let Some(ref artist) = self.artist {
            edits.set(Ifd::Primary, tag::ARTIST, TagValue::Ascii(escape_non_ascii(artist)));
        }
        edits
    }
}

/// Parse a capture timestamp in EXIF or ISO-like notation.
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    ACCEPTED_TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
}

/// Escape every character outside 7-bit ASCII as `\xNN`, `\uNNNN` or `\UNNNNNNNN`.
///
/// EXIF ASCII fields cannot hold anything else.
pub fn escape_non_ascii(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        let code = c as u32;
        match code {
            0..=0x7F => out.push(c),
            0x80..=0xFF => out.push_str(&format!("\\x{code:02x}")),
            0x100..=0xFFFF => out.push_str(&format!("\\u{code:04x}")),
            _ => out.push_str(&format!("\\U{code:08x}")),
        }
    }
    out
}

/// Edits that set only `ImageDescription`.
pub fn description_edits(description: &str) -> TagEdits {
    let mut edits = TagEdits::new();
    edits.set(
        Ifd::Primary,
        tag::IMAGE_DESCRIPTION,
        TagValue::Ascii(escape_non_ascii(description)),
    );
    edits
}

/// Apply `edits` to a complete image and return the new byte stream.
///
/// Images without an EXIF block get a fresh one.
pub fn apply_tags(bytes: Vec<u8>, kind: ImageKind, edits: &TagEdits) -> CodecResult<Vec<u8>> {
    let block = container::extract_exif(&bytes, kind)?.unwrap_or_else(tiff::empty_block);
    let merged = tiff::apply_edits(&block, edits)?;
    container::embed_exif(bytes, kind, merged)
}

// Seconds are stored in ten-thousandths
const SECONDS_DENOMINATOR: u64 = 10_000;

/// Degrees, minutes and seconds as rationals; seconds keep four decimals.
///
/// Rounding happens once on the whole value, so 59.99995 s carries into the
/// next minute instead of producing 60 s.
fn to_dms(value: f64) -> Vec<(u32, u32)> {
    let per_minute = 60 * SECONDS_DENOMINATOR;
    let per_degree = 60 * per_minute;
    let total = (value.abs() * per_degree as f64).round() as u64;
    vec![
        ((total / per_degree) as u32, 1),
        ((total % per_degree / per_minute) as u32, 1),
        ((total % per_minute) as u32, SECONDS_DENOMINATOR as u32),
    ]
}

fn push_gps(edits: &mut TagEdits, gps: GpsCoords) {
    let lat_ref = if gps.latitude >= 0.0 { "N" } else { "S" };
    let lon_ref = if gps.longitude >= 0.0 { "E" } else { "W" };
    edits
        .set(Ifd::Gps, tag::GPS_VERSION_ID, TagValue::Bytes(vec![2, 3, 0, 0]))
        .set(Ifd::Gps, tag::GPS_LATITUDE_REF, TagValue::Ascii(lat_ref.into()))
        .set(Ifd::Gps, tag::GPS_LATITUDE, TagValue::Rationals(to_dms(gps.latitude)))
        .set(Ifd::Gps, tag::GPS_LONGITUDE_REF, TagValue::Ascii(lon_ref.into()))
        .set(Ifd::Gps, tag::GPS_LONGITUDE, TagValue::Rationals(to_dms(gps.longitude)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exif::tiff::TiffBlock;
    use std::io::Cursor;

    fn sample_jpeg() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(4, 4, image::Rgb([10, 20, 30]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Jpeg).unwrap();
        buf.into_inner()
    }

    fn block_of(jpeg: &[u8]) -> Vec<u8> {
        container::extract_exif(jpeg, ImageKind::Jpeg).unwrap().unwrap()
    }

    #[test]
    fn escape_matches_backslash_replace() {
        assert_eq!(escape_non_ascii("plain text"), "plain text");
        assert_eq!(escape_non_ascii("café"), "caf\\xe9");
        assert_eq!(escape_non_ascii("東京"), "\\u6771\\u4eac");
        assert_eq!(escape_non_ascii("🐈"), "\\U0001f408");
    }

    #[test]
    fn description_is_escaped() {
        let edits = description_edits("Crème brûlée (dessert)");
        assert_eq!(
            edits.get(Ifd::Primary, tag::IMAGE_DESCRIPTION),
            Some(&TagValue::Ascii("Cr\\xe8me br\\xfbl\\xe9e (dessert)".into()))
        );
    }

    #[test]
    fn apply_description_to_bare_jpeg() {
        let out = apply_tags(sample_jpeg(), ImageKind::Jpeg, &description_edits("a cat (orange, sleeping)")).unwrap();
        let block = block_of(&out);
        let tiff = TiffBlock::parse(&block).unwrap();
        assert_eq!(
            tiff.read_ascii(Ifd::Primary, tag::IMAGE_DESCRIPTION).unwrap().as_deref(),
            Some("a cat (orange, sleeping)")
        );
    }

    #[test]
    fn description_merge_preserves_existing_fields() {
        // Seed a JPEG with authorship and capture time
        let seed = MetadataTags {
            gps: Some(GpsCoords { latitude: 48.8584, longitude: 2.2945 }),
            taken_at: parse_timestamp("2023:07:14 21:00:00"),
            artist: Some("Jane Doe".into()),
        };
        let seeded = apply_tags(sample_jpeg(), ImageKind::Jpeg, &seed.to_edits()).unwrap();
        let before_block = block_of(&seeded);
        let before = TiffBlock::parse(&before_block).unwrap();

        let updated = apply_tags(seeded.clone(), ImageKind::Jpeg, &description_edits("Tower at night")).unwrap();
        let after_block = block_of(&updated);
        let after = TiffBlock::parse(&after_block).unwrap();

        let strip = |entries: Vec<tiff::RawEntry>| -> Vec<tiff::RawEntry> {
            entries.into_iter().filter(|e| e.tag != tag::IMAGE_DESCRIPTION).collect()
        };
        assert_eq!(strip(after.entries(Ifd::Primary).unwrap()), strip(before.entries(Ifd::Primary).unwrap()));
        assert_eq!(after.entries(Ifd::Exif).unwrap(), before.entries(Ifd::Exif).unwrap());
        assert_eq!(after.entries(Ifd::Gps).unwrap(), before.entries(Ifd::Gps).unwrap());
        assert_eq!(
            after.read_ascii(Ifd::Primary, tag::IMAGE_DESCRIPTION).unwrap().as_deref(),
            Some("Tower at night")
        );
    }

    #[test]
    fn metadata_tags_round_trip_through_ifds() {
        let tags = MetadataTags {
            gps: Some(GpsCoords { latitude: -33.8568, longitude: 151.2153 }),
            taken_at: parse_timestamp("2024-01-26T09:15:00"),
            artist: Some("Zoë".into()),
        };
        let out = apply_tags(sample_jpeg(), ImageKind::Jpeg, &tags.to_edits()).unwrap();
        let block = block_of(&out);
        let tiff = TiffBlock::parse(&block).unwrap();

        assert_eq!(tiff.read_ascii(Ifd::Gps, tag::GPS_LATITUDE_REF).unwrap().as_deref(), Some("S"));
        assert_eq!(tiff.read_ascii(Ifd::Gps, tag::GPS_LONGITUDE_REF).unwrap().as_deref(), Some("E"));
        let lat = tiff.read_rationals(Ifd::Gps, tag::GPS_LATITUDE).unwrap().unwrap();
        assert_eq!(lat[0], (33, 1));
        assert_eq!(lat[1], (51, 1));
        assert_eq!(
            tiff.read_ascii(Ifd::Exif, tag::DATE_TIME_ORIGINAL).unwrap().as_deref(),
            Some("2024:01:26 09:15:00")
        );
        assert_eq!(tiff.read_ascii(Ifd::Primary, tag::ARTIST).unwrap().as_deref(), Some("Zo\\xeb"));
    }

    #[test]
    fn dms_conversion() {
        let dms = to_dms(48.8584);
        assert_eq!(dms[0], (48, 1));
        assert_eq!(dms[1], (51, 1));
        // 0.0084 deg = 30.24 s
        assert_eq!(dms[2], (302400, 10000));
    }

    #[test]
    fn dms_rounding_carries_into_minutes_and_degrees() {
        assert_eq!(to_dms(10.99999999), vec![(11, 1), (0, 1), (0, 10000)]);
        assert_eq!(to_dms(-45.5166666666), vec![(45, 1), (31, 1), (0, 10000)]);
        for value in [0.0, 12.3456789, 89.9999999, 179.99999999] {
            let dms = to_dms(value);
            assert!(dms[1].0 < 60, "{value}: {dms:?}");
            assert!(dms[2].0 < 60 * 10000, "{value}: {dms:?}");
        }
    }

    #[test]
    fn tiff_file_is_its_own_block() {
        let img = image::RgbImage::from_pixel(5, 3, image::Rgb([1, 2, 3]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Tiff).unwrap();
        let original = buf.into_inner();

        let tagged = apply_tags(original.clone(), ImageKind::Tiff, &description_edits("Scan (archive)")).unwrap();
        // Only the header's IFD0 offset changes; everything else is appended
        assert_eq!(&tagged[..4], &original[..4]);
        assert_eq!(&tagged[8..original.len()], &original[8..]);

        let tiff = TiffBlock::parse(&tagged).unwrap();
        assert_eq!(
            tiff.read_ascii(Ifd::Primary, tag::IMAGE_DESCRIPTION).unwrap().as_deref(),
            Some("Scan (archive)")
        );

        // Strip data is still reachable: the file decodes to the same pixels
        let decoded = image::load_from_memory_with_format(&tagged, image::ImageFormat::Tiff)
            .unwrap()
            .to_rgb8();
        assert_eq!(decoded, img);

        let again = apply_tags(tagged, ImageKind::Tiff, &description_edits("Scan (retouched)")).unwrap();
        assert_eq!(&again[8..original.len()], &original[8..]);
        assert_eq!(
            TiffBlock::parse(&again).unwrap().read_ascii(Ifd::Primary, tag::IMAGE_DESCRIPTION).unwrap().as_deref(),
            Some("Scan (retouched)")
        );
    }

    #[test]
    fn timestamp_formats() {
        let expected = parse_timestamp("2024:01:26 09:15:00").unwrap();
        assert_eq!(parse_timestamp("2024-01-26 09:15:00"), Some(expected));
        assert_eq!(parse_timestamp(" 2024-01-26T09:15:00 "), Some(expected));
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("2024-13-40 00:00:00").is_none());
    }

    #[test]
    fn validate_rejects_bad_input() {
        assert!(MetadataTags::default().validate().is_err());
        let off_globe = MetadataTags {
            gps: Some(GpsCoords { latitude: 91.0, longitude: 0.0 }),
            ..Default::default()
        };
        assert!(off_globe.validate().is_err());
        let bad_lon = MetadataTags {
            gps: Some(GpsCoords { latitude: 0.0, longitude: -180.5 }),
            ..Default::default()
        };
        assert!(bad_lon.validate().is_err());
        let artist_only = MetadataTags {
            artist: Some("Someone".into()),
            ..Default::default()
        };
        assert!(artist_only.validate().is_ok());
    }

    #[test]
    fn bmp_cannot_be_tagged() {
        assert!(apply_tags(b"BM....".to_vec(), ImageKind::Bmp, &description_edits("x")).is_err());
    }
}

use img_parts::jpeg::Jpeg;
use img_parts::png::Png;
use img_parts::{Bytes, ImageEXIF};
use std::path::Path;

use crate::error::{CodecError, CodecResult};

// APP1 payload limit minus the 2-byte length field and the Exif\0\0 prefix
const JPEG_MAX_EXIF_LEN: usize = 65535 - 2 - 6;

/// The metadata container of an image file, determined by its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// EXIF in an APP1 segment.
    Jpeg,
    /// EXIF in an `eXIf` chunk.
    Png,
    /// The whole file is the TIFF structure.
    Tiff,
    /// No metadata container at all.
    Bmp,
}

impl ImageKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "tif" | "tiff" => Some(Self::Tiff),
            "bmp" => Some(Self::Bmp),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Jpeg => "JPEG",
            Self::Png => "PNG",
            Self::Tiff => "TIFF",
            Self::Bmp => "BMP",
        }
    }
}

fn container_error(kind: ImageKind, err: impl std::fmt::Display) -> CodecError {
    CodecError::Container {
        format: kind.name(),
        message: err.to_string(),
    }
}

/// Extract the raw TIFF block from an image, if it carries one.
pub fn extract_exif(bytes: &[u8], kind: ImageKind) -> CodecResult<Option<Vec<u8>>> {
    let owned = || Bytes::copy_from_slice(bytes);
    match kind {
        ImageKind::Jpeg => {
            let jpeg = Jpeg::from_bytes(owned()).map_err(|e| container_error(kind, e))?;
            Ok(jpeg.exif().map(|b| b.to_vec()))
        }
        ImageKind::Png => {
            let png = Png::from_bytes(owned()).map_err(|e| container_error(kind, e))?;
            Ok(png.exif().map(|b| b.to_vec()))
        }
        ImageKind::Tiff => Ok(Some(bytes.to_vec())),
        ImageKind::Bmp => Err(CodecError::Unsupported(kind.name())),
    }
}

/// Re-embed a TIFF block and return the complete image byte stream.
///
/// Nothing is written to disk here; callers write the returned buffer only
/// once encoding has fully succeeded.
pub fn embed_exif(bytes: Vec<u8>, kind: ImageKind, exif: Vec<u8>) -> CodecResult<Vec<u8>> {
    match kind {
        ImageKind::Jpeg => {
            if exif.len() > JPEG_MAX_EXIF_LEN {
                return Err(CodecError::SegmentTooLarge(exif.len()));
            }
            let mut jpeg =
                Jpeg::from_bytes(Bytes::from(bytes)).map_err(|e| container_error(kind, e))?;
            let orig_pos = find_exif_segment_pos(&jpeg);
            jpeg.set_exif(Some(Bytes::from(exif)));

            // set_exif() reinserts at a fixed position, which may land after XMP.
            // Move it back to where the original block was.
            if let Some(new_pos) = find_exif_segment_pos(&jpeg) {
                let target = orig_pos.unwrap_or(1);
                if target < new_pos {
                    let segments = jpeg.segments_mut();
                    let seg = segments.remove(new_pos);
                    segments.insert(target, seg);
                }
            }
            Ok(jpeg.encoder().bytes().to_vec())
        }
        ImageKind::Png => {
            let mut png =
                Png::from_bytes(Bytes::from(bytes)).map_err(|e| container_error(kind, e))?;
            png.set_exif(Some(Bytes::from(exif)));
            Ok(png.encoder().bytes().to_vec())
        }
        ImageKind::Tiff => Ok(exif),
        ImageKind::Bmp => Err(CodecError::Unsupported(kind.name())),
    }
}

/// EXIF segments have marker 0xE1 (APP1) and contents starting with "Exif\0\0".
fn find_exif_segment_pos(jpeg: &Jpeg) -> Option<usize> {
    const EXIF_PREFIX: &[u8] = b"Exif\0\0";
    jpeg.segments()
        .iter()
        .position(|s| s.marker() == 0xE1 && s.contents().starts_with(EXIF_PREFIX))
}

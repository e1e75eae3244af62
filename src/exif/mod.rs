//! EXIF metadata reading and writing.
//!
//! - [`read_exif`]: read description, authorship, capture time and GPS for display
//! - [`apply_tags`]: merge a set of [`TagEdits`] into a complete image byte stream
//!
//! Writing goes through [`tiff`], an append-only IFD editor that leaves every
//! untouched entry byte-identical, and [`container`], which moves the TIFF
//! block in and out of JPEG, PNG and TIFF files.

pub mod container;
mod reader;
pub mod tiff;
mod writer;

pub use container::ImageKind;
pub use reader::{ExifData, read_exif};
pub use tiff::{Ifd, TagEdits, TagValue};
pub use writer::{
    GpsCoords, MetadataTags, apply_tags, description_edits, escape_non_ascii, parse_timestamp,
};

//! # exif-describe
//!
//! Describe photos with a locally hosted vision model and store the result in
//! the image's own EXIF `ImageDescription` field, leaving every other tag as
//! it was.
//!
//! ## Quick Start
//!
//! The pipeline module runs the whole read → infer → parse → write flow over a
//! file or a directory:
//!
//! ```rust,no_run
//! use exif_describe::ai::OllamaClient;
//! use exif_describe::config::Config;
//! use exif_describe::pipeline::{Mode, Settings, describe_images};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Missing file falls back to defaults (localhost:11434, gemma3:latest)
//!     let config = Config::load(Some("config.json".as_ref()))?;
//!     let client = OllamaClient::new(&config.inference.endpoint);
//!     let settings = Settings::from_config(&config);
//!
//!     // Writes photo_edited.jpg next to every photo.jpg
//!     let stats = describe_images(
//!         "./photos".as_ref(),
//!         &Mode::Update { output: None },
//!         &client,
//!         &settings,
//!         &mut std::io::stdout(),
//!     )
//!     .await?;
//!
//!     for path in &stats.failed {
//!         eprintln!("Failed: {}", path.display());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Lower-Level Usage
//!
//! The codec can be used on its own to set arbitrary tags:
//!
//! ```rust,no_run
//! use exif_describe::exif::{self, GpsCoords, ImageKind, MetadataTags};
//!
//! fn main() -> anyhow::Result<()> {
//!     let bytes = std::fs::read("photo.jpg")?;
//!     let tags = MetadataTags {
//!         gps: Some(GpsCoords { latitude: 48.8584, longitude: 2.2945 }),
//!         artist: Some("Jane Doe".into()),
//!         ..Default::default()
//!     };
//!     tags.validate()?;
//!     let tagged = exif::apply_tags(bytes, ImageKind::Jpeg, &tags.to_edits())?;
//!     std::fs::write("photo_exif.jpg", tagged)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Supported Formats
//!
//! | Format | Describe (`ask`) | Write (`update`, `tag`) |
//! |--------|------------------|-------------------------|
//! | JPEG (`.jpg`) | yes | EXIF in APP1 segment |
//! | PNG (`.png`) | yes | EXIF in `eXIf` chunk |
//! | TIFF (`.tif`) | yes | EXIF is the file's own IFD chain |
//! | BMP (`.bmp`) | yes | not supported (no metadata container) |
//!
//! ## Modules
//!
//! - [`ai`]: inference client trait, the Ollama client and response parsing
//! - [`config`]: configuration types and loading/saving
//! - [`error`]: pipeline and codec error types
//! - [`exif`]: EXIF reading, IFD editing and container embedding
//! - [`output`]: destination path resolution
//! - [`pipeline`]: image enumeration, per-file processing and run statistics

pub mod ai;
pub mod config;
pub mod error;
pub mod exif;
pub mod output;
pub mod pipeline;

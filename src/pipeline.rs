use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use walkdir::WalkDir;

use crate::ai::{self, DescriptionRequest, InferenceClient};
use crate::config::Config;
use crate::error::{CodecError, PipelineError, PipelineResult};
use crate::exif::{self, ImageKind, MetadataTags, TagEdits};
use crate::output::resolve_output_path;

/// Extensions picked up when the root is a directory (case-insensitive).
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "png", "tif", "bmp"];

/// What a description run does with each parsed result.
#[derive(Debug, Clone, PartialEq)]
pub enum Mode {
    /// Dry run: print the response, never touch files.
    Ask,
    /// Write the description into a copy (or the original) of each file.
    Update { output: Option<PathBuf> },
}

/// Per-run knobs, usually built from [`Config`] plus CLI overrides.
#[derive(Debug, Clone)]
pub struct Settings {
    pub model: String,
    pub timeout: Duration,
    pub temperature: Option<f32>,
    pub edited_suffix: String,
    pub tag_suffix: String,
}

impl Settings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.inference.model.clone(),
            timeout: config.inference.timeout(),
            temperature: Some(config.inference.temperature),
            edited_suffix: config.output.edited_suffix.clone(),
            tag_suffix: config.output.tag_suffix.clone(),
        }
    }
}

/// Counts and failures of one run, in enumeration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStatistics {
    pub attempted: usize,
    pub failed: Vec<PathBuf>,
    pub elapsed: Duration,
}

impl RunStatistics {
    /// Record the outcome of one file. Errors are logged with the path.
    pub fn record<T>(&mut self, path: &Path, result: &PipelineResult<T>) {
        self.attempted += 1;
        if let Err(e) = result {
            log::error!("Error processing file {}: {e}", path.display());
            self.failed.push(path.to_path_buf());
        }
    }

    pub fn succeeded(&self) -> usize {
        self.attempted - self.failed.len()
    }

    pub fn write_summary(&self, out: &mut dyn Write) -> std::io::Result<()> {
        log::info!(
            "Done: {} succeeded, {} failed out of {} images",
            self.succeeded(),
            self.failed.len(),
            self.attempted
        );
        writeln!(out, "Total images processed: {}", self.attempted)?;
        if !self.failed.is_empty() {
            let failed: Vec<String> = self.failed.iter().map(|p| p.display().to_string()).collect();
            writeln!(out, "Failed to process {} images: {failed:?}", failed.len())?;
        }
        writeln!(out, "Total run time: {:.2} seconds", self.elapsed.as_secs_f64())
    }
}

fn output_error(e: std::io::Error) -> PipelineError {
    PipelineError::io("<stdout>", e)
}

/// Collect candidate images under `root`.
///
/// A file is returned as-is, whatever its extension. A directory yields its
/// direct children with a supported extension, sorted by file name.
pub fn collect_images(root: &Path) -> PipelineResult<Vec<PathBuf>> {
    if root.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }
    if !root.is_dir() {
        return Err(PipelineError::NotFound(root.to_path_buf()));
    }

    let mut images = Vec::new();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Skipping unreadable entry: {e}");
                continue;
            }
        };
        if entry.file_type().is_file() && is_supported_image(entry.path()) {
            images.push(entry.into_path());
        }
    }
    Ok(images)
}

fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Describe every image under `root`, one at a time.
///
/// Per-file failures are recorded and the run continues; only a missing
/// root aborts. The summary is written to `out` before returning.
///
/// ```rust,no_run
/// use exif_describe::ai::OllamaClient;
/// use exif_describe::config::Config;
/// use exif_describe::pipeline::{Mode, Settings, describe_images};
///
/// # async fn example() -> exif_describe::error::PipelineResult<()> {
/// let config = Config::default();
/// let client = OllamaClient::new(&config.inference.endpoint);
/// let settings = Settings::from_config(&config);
/// let stats = describe_images(
///     "./photos".as_ref(),
///     &Mode::Update { output: None },
///     &client,
///     &settings,
///     &mut std::io::stdout(),
/// )
/// .await?;
/// println!("{} failed", stats.failed.len());
/// # Ok(())
/// # }
/// ```
pub async fn describe_images(
    root: &Path,
    mode: &Mode,
    client: &dyn InferenceClient,
    settings: &Settings,
    out: &mut dyn Write,
) -> PipelineResult<RunStatistics> {
    let images = collect_images(root)?;
    let started = Instant::now();
    let mut stats = RunStatistics::default();
    let total = images.len();

    for (i, path) in images.iter().enumerate() {
        log::info!(
            "[{}/{}] Processing file {} using {} ({})",
            i + 1,
            total,
            path.display(),
            settings.model,
            client.name()
        );
        let result = describe_image(path, mode, client, settings, out).await;
        stats.record(path, &result);
    }

    stats.elapsed = started.elapsed();
    stats.write_summary(out).map_err(output_error)?;
    Ok(stats)
}

/// Run the read → encode → infer → parse → merge → write flow for one file.
pub async fn describe_image(
    path: &Path,
    mode: &Mode,
    client: &dyn InferenceClient,
    settings: &Settings,
    out: &mut dyn Write,
) -> PipelineResult<()> {
    let image_bytes = std::fs::read(path).map_err(|e| PipelineError::io(path, e))?;
    let request = DescriptionRequest::new(&image_bytes, settings.model.as_str(), settings.temperature);

    // Dropping the future on timeout cancels the in-flight request
    let response = match tokio::time::timeout(settings.timeout, client.complete(&request)).await {
        Ok(response) => response?,
        Err(_) => {
            log::warn!("Timeout while generating response for {}", path.display());
            return Err(PipelineError::InferenceTimeout(settings.timeout));
        }
    };

    let description = ai::parse_description(&response)?;

    match mode {
        Mode::Ask => {
            writeln!(out, "{}", response.trim()).map_err(output_error)?;
        }
        Mode::Update { output } => {
            let text = description.render();
            log::info!("Setting description: {text}");
            write_modified(
                path,
                image_bytes,
                &exif::description_edits(&text),
                output.as_deref(),
                &settings.edited_suffix,
            )?;
        }
    }
    Ok(())
}

/// Encode the full image with `edits` applied, then write it in one call.
///
/// The destination is only resolved (and its directory created) once encoding
/// has succeeded, so a codec failure leaves the filesystem untouched.
fn write_modified(
    source: &Path,
    bytes: Vec<u8>,
    edits: &TagEdits,
    output: Option<&Path>,
    suffix: &str,
) -> PipelineResult<PathBuf> {
    let kind = ImageKind::from_path(source)
        .ok_or_else(|| CodecError::UnknownFormat(source.display().to_string()))?;
    let encoded = exif::apply_tags(bytes, kind, edits)?;
    let dest = resolve_output_path(source, output, suffix)?;
    log::info!("Updating file: {}", dest.display());
    std::fs::write(&dest, encoded).map_err(|e| PipelineError::io(&dest, e))?;
    Ok(dest)
}

fn run_each(
    root: &Path,
    out: &mut dyn Write,
    mut process: impl FnMut(&Path, &mut dyn Write) -> PipelineResult<()>,
) -> PipelineResult<RunStatistics> {
    let images = collect_images(root)?;
    let started = Instant::now();
    let mut stats = RunStatistics::default();
    let total = images.len();

    for (i, path) in images.iter().enumerate() {
        log::info!("[{}/{}] Processing file {}", i + 1, total, path.display());
        let result = process(path, &mut *out);
        stats.record(path, &result);
    }

    stats.elapsed = started.elapsed();
    stats.write_summary(out).map_err(output_error)?;
    Ok(stats)
}

/// Print description, authorship, capture time and GPS of every image.
pub fn show_images(root: &Path, out: &mut dyn Write) -> PipelineResult<RunStatistics> {
    run_each(root, out, |path, out| {
        let data = exif::read_exif(path)?;
        data.write_table(path, out).map_err(output_error)
    })
}

/// Write GPS, capture time and/or artist into every image, without a model.
///
/// Invalid values abort before any file is touched.
pub fn tag_images(
    root: &Path,
    tags: &MetadataTags,
    output: Option<&Path>,
    settings: &Settings,
    out: &mut dyn Write,
) -> PipelineResult<RunStatistics> {
    tags.validate()?;
    let edits = tags.to_edits();
    run_each(root, out, |path, _| {
        tag_image(path, &edits, output, &settings.tag_suffix).map(|_| ())
    })
}

/// Apply metadata edits to one file and return the written path.
pub fn tag_image(
    path: &Path,
    edits: &TagEdits,
    output: Option<&Path>,
    suffix: &str,
) -> PipelineResult<PathBuf> {
    let bytes = std::fs::read(path).map_err(|e| PipelineError::io(path, e))?;
    write_modified(path, bytes, edits, output, suffix)
}

//! Destination paths for modified images.

use std::path::{Component, Path, PathBuf};

use crate::error::{PipelineError, PipelineResult};

/// Derive where a modified copy of `source` is written.
///
/// - `output` unset: `<stem><suffix>.<ext>` next to the source.
/// - `output` absolute: a directory (created if missing) receiving the
///   source's file name.
/// - `output` relative: resolved against the source's directory first.
///
/// The result is lexically normalized. Directory creation is idempotent, so
/// resolving the same pair twice yields the same path without error.
pub fn resolve_output_path(
    source: &Path,
    output: Option<&Path>,
    suffix: &str,
) -> PipelineResult<PathBuf> {
    let Some(output) = output else {
        return Ok(normalize_path(&suffixed(source, suffix)));
    };

    let dir = if output.is_absolute() {
        output.to_path_buf()
    } else {
        source_dir(source).join(output)
    };
    let dir = normalize_path(&dir);

    std::fs::create_dir_all(&dir).map_err(|e| PipelineError::io(&dir, e))?;

    let file_name = source
        .file_name()
        .ok_or_else(|| PipelineError::NotFound(source.to_path_buf()))?;
    Ok(dir.join(file_name))
}

fn source_dir(source: &Path) -> &Path {
    source.parent().unwrap_or_else(|| Path::new(""))
}

/// `photo.jpg` + `_edited` → `photo_edited.jpg`.
fn suffixed(source: &Path, suffix: &str) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match source.extension() {
        Some(ext) => format!("{stem}{suffix}.{}", ext.to_string_lossy()),
        None => format!("{stem}{suffix}"),
    };
    source_dir(source).join(name)
}

/// Fold `.` and `..` segments without touching the filesystem.
///
/// A `..` that would climb above the root is dropped; leading `..` segments
/// of a relative path are kept.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut parts: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        return PathBuf::from(".");
    }
    parts.iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_suffix_keeps_extension() {
        let dest = resolve_output_path(Path::new("/photos/cat.JPG"), None, "_edited").unwrap();
        assert_eq!(dest, PathBuf::from("/photos/cat_edited.JPG"));
    }

    #[test]
    fn default_suffix_without_extension() {
        let dest = resolve_output_path(Path::new("/photos/scan"), None, "_exif").unwrap();
        assert_eq!(dest, PathBuf::from("/photos/scan_exif"));
    }

    #[test]
    fn default_suffix_for_bare_file_name() {
        let dest = resolve_output_path(Path::new("cat.png"), None, "_edited").unwrap();
        assert_eq!(dest, PathBuf::from("cat_edited.png"));
    }

    #[test]
    fn absolute_output_is_a_directory() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("described/nested");
        let dest = resolve_output_path(Path::new("/somewhere/cat.jpg"), Some(&out), "_edited").unwrap();
        assert_eq!(dest, normalize_path(&out).join("cat.jpg"));
        assert!(out.is_dir());
    }

    #[test]
    fn relative_output_resolves_against_source_dir() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("album/cat.jpg");
        let dest = resolve_output_path(&source, Some(Path::new("../out/./edited")), "_edited").unwrap();
        assert_eq!(dest, tmp.path().join("out/edited/cat.jpg"));
        assert!(tmp.path().join("out/edited").is_dir());
    }

    #[test]
    fn resolution_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("cat.jpg");
        let first = resolve_output_path(&source, Some(Path::new("done")), "_edited").unwrap();
        let second = resolve_output_path(&source, Some(Path::new("done")), "_edited").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn output_equal_to_source_dir_overwrites() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("cat.jpg");
        let dest = resolve_output_path(&source, Some(Path::new(".")), "_edited").unwrap();
        assert_eq!(dest, source);
    }

    #[test]
    fn normalize_folds_segments() {
        assert_eq!(normalize_path(Path::new("/a/./b/../c//d")), PathBuf::from("/a/c/d"));
        assert_eq!(normalize_path(Path::new("/../x")), PathBuf::from("/x"));
        assert_eq!(normalize_path(Path::new("../x/./y")), PathBuf::from("../x/y"));
        assert_eq!(normalize_path(Path::new("a/..")), PathBuf::from("."));
    }
}

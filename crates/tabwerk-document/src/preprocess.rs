// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image preprocessor — turns one scanned table into an upload-ready JPEG:
// decode, denoise, normalize pixel bounds, binarize, size-constrained encode,
// then back up the original and write the result next to it.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use tabwerk_core::config::{CompressionConstraint, TabwerkConfig};
use tabwerk_core::error::{ImageStage, Result, TabwerkError};
use tabwerk_core::types::PreprocessOutcome;
use tracing::{debug, info, instrument, warn};

use crate::compress::{PixelBoundsNormalizer, SizeConstrainedEncoder};
use crate::image::processor::ImageProcessor;
use crate::scan::enhance::{FilterPreset, ScanEnhancer};

/// Extension appended to the original file when it is set aside.
pub const BACKUP_EXTENSION: &str = "bak";

/// Timestamp format used to disambiguate colliding file names.
const STAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Per-image preprocessing for the recognition upload.
///
/// Nothing on disk changes until the encoded bytes are ready; a failure in any
/// earlier stage leaves the source untouched.
#[derive(Debug, Clone, Copy)]
pub struct ImagePreprocessor {
    constraint: CompressionConstraint,
    preset: FilterPreset,
}

impl ImagePreprocessor {
    pub fn new(constraint: CompressionConstraint, preset: FilterPreset) -> Self {
        Self { constraint, preset }
    }

    pub fn from_config(config: &TabwerkConfig) -> Self {
        Self::new(
            config.constraint,
            FilterPreset::from_blueprint_flag(config.blueprint),
        )
    }

    /// Run every stage on the image at `path`.
    #[instrument(skip(self), fields(path = %path.display(), preset = ?self.preset))]
    pub fn process(&self, path: &Path) -> Result<PreprocessOutcome> {
        let decoded = ImageProcessor::open_grayscale(path)?;

        let denoised = ScanEnhancer::new(decoded.into_gray(), self.preset)
            .denoise()
            .map_err(|err| attach_path(err, path))?
            .into_gray();

        let (normalized, decision) = PixelBoundsNormalizer::new(&self.constraint)
            .apply(ImageProcessor::from_gray(denoised))
            .map_err(|err| attach_path(err, path))?;
        if !self
            .constraint
            .dims_within(normalized.width(), normalized.height())
        {
            debug!(
                width = normalized.width(),
                height = normalized.height(),
                "Aspect ratio exceeds the pixel window; sides were clamped"
            );
        }
        debug!(scale = decision.scale(), "Pixel bounds normalized");

        let binary = ScanEnhancer::new(normalized.into_gray(), self.preset)
            .binarize()
            .map_err(|err| attach_path(err, path))?
            .into_gray();

        let encoded = SizeConstrainedEncoder::new(self.constraint)
            .encode_within(&binary)
            .map_err(|err| attach_path(err, path))?;

        let (backup, output) = write_with_backup(path, &encoded.bytes)?;

        info!(
            output = %output.display(),
            quality = encoded.quality,
            scale_percent = encoded.scale_percent,
            bytes = encoded.len(),
            "Image preprocessed"
        );

        Ok(PreprocessOutcome {
            backup,
            output,
            quality: encoded.quality,
            scale_percent: encoded.scale_percent,
            width: encoded.width,
            height: encoded.height,
            encoded_len: encoded.len(),
        })
    }
}

/// In-memory stages report a placeholder path; replace it with the source.
fn attach_path(err: TabwerkError, path: &Path) -> TabwerkError {
    match err {
        TabwerkError::Image { stage, message, .. } => TabwerkError::Image {
            stage,
            path: path.to_path_buf(),
            message,
        },
        TabwerkError::EncodingInfeasible(message) => {
            TabwerkError::EncodingInfeasible(format!("{}: {message}", path.display()))
        }
        other => other,
    }
}

fn stamp() -> String {
    Local::now().format(STAMP_FORMAT).to_string()
}

/// Upper bound on `-<n>` suffixes tried after a timestamped name is taken.
const MAX_COLLISION_SUFFIX: u32 = 10_000;

/// Collision tags in the order they are tried: none, `<stamp>`, then
/// `<stamp>-1`, `<stamp>-2`, ...
fn collision_tags() -> impl Iterator<Item = String> {
    let stamp = stamp();
    std::iter::once(String::new())
        .chain(std::iter::once(stamp.clone()))
        .chain((1..=MAX_COLLISION_SUFFIX).map(move |n| format!("{stamp}-{n}")))
}

fn file_name_lossy(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn exhausted(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free name left next to {}", path.display()),
    )
}

/// `<name>.bak`, or `<name>.<tag>.bak` for the first collision tag that is
/// still free.
pub fn backup_path_for(path: &Path) -> io::Result<PathBuf> {
    let name = file_name_lossy(path);
    collision_tags()
        .map(|tag| {
            if tag.is_empty() {
                path.with_file_name(format!("{name}.{BACKUP_EXTENSION}"))
            } else {
                path.with_file_name(format!("{name}.{tag}.{BACKUP_EXTENSION}"))
            }
        })
        .find(|candidate| !candidate.exists())
        .ok_or_else(|| exhausted(path))
}

/// Move the original aside, then write `bytes` as `<stem>.jpg`.
///
/// If the output cannot be written the backup is moved back.
fn write_with_backup(path: &Path, bytes: &[u8]) -> Result<(PathBuf, PathBuf)> {
    write_with_backup_via(path, bytes, write_and_sync)
}

fn write_with_backup_via(
    path: &Path,
    bytes: &[u8],
    write: impl FnOnce(&mut File, &[u8]) -> io::Result<()>,
) -> Result<(PathBuf, PathBuf)> {
    let write_error = |message: String| TabwerkError::image(ImageStage::Write, path, message);

    let backup = backup_path_for(path)
        .map_err(|err| write_error(format!("cannot choose a backup name: {err}")))?;
    fs::rename(path, &backup).map_err(|err| {
        write_error(format!("cannot back up original to {}: {err}", backup.display()))
    })?;

    match create_output(path, bytes, write) {
        Ok(output) => Ok((backup, output)),
        Err(err) => {
            if let Err(restore) = fs::rename(&backup, path) {
                warn!(
                    backup = %backup.display(),
                    error = %restore,
                    "Could not restore original after failed write"
                );
            }
            Err(write_error(format!("cannot write preprocessed image: {err}")))
        }
    }
}

/// Create `<stem>.jpg`, or `<stem><tag>.jpg` for the first collision tag
/// whose file does not exist yet, and write `bytes` into it.
fn create_output(
    path: &Path,
    bytes: &[u8],
    write: impl FnOnce(&mut File, &[u8]) -> io::Result<()>,
) -> io::Result<PathBuf> {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut opened = None;
    for tag in collision_tags() {
        let candidate = path.with_file_name(format!("{stem}{tag}.jpg"));
        match open_new(&candidate) {
            Ok(file) => {
                opened = Some((file, candidate));
                break;
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                debug!(taken = %candidate.display(), "Output name taken");
            }
            Err(err) => return Err(err),
        }
    }
    let (mut file, output) = opened.ok_or_else(|| exhausted(path))?;

    if let Err(err) = write(&mut file, bytes) {
        drop(file);
        let _ = fs::remove_file(&output);
        return Err(err);
    }
    Ok(output)
}

fn write_and_sync(file: &mut File, bytes: &[u8]) -> io::Result<()> {
    file.write_all(bytes)?;
    file.sync_all()
}

fn open_new(path: &Path) -> io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};
    use tempfile::TempDir;

    fn ruled_table(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            if x % 40 < 3 || y % 24 < 3 {
                Luma([35u8])
            } else {
                Luma([215u8])
            }
        })
    }

    fn preprocessor() -> ImagePreprocessor {
        ImagePreprocessor::new(CompressionConstraint::default(), FilterPreset::Table)
    }

    fn save(dir: &TempDir, name: &str, image: &GrayImage) -> PathBuf {
        let path = dir.path().join(name);
        image.save(&path).expect("save fixture");
        path
    }

    #[test]
    fn writes_jpeg_and_keeps_backup() {
        let dir = TempDir::new().unwrap();
        let source = save(&dir, "sheet.png", &ruled_table(320, 240));

        let outcome = preprocessor().process(&source).expect("process");

        assert_eq!(outcome.backup, dir.path().join("sheet.png.bak"));
        assert_eq!(outcome.output, dir.path().join("sheet.jpg"));
        assert!(!source.exists());
        assert!(outcome.backup.exists());
        let written = fs::read(&outcome.output).unwrap();
        assert_eq!(written.len(), outcome.encoded_len);
        assert!(written.len() as u64 <= CompressionConstraint::default().max_byte_size);
        assert_eq!((outcome.width, outcome.height), (320, 240));
        assert_eq!(outcome.quality, 100);
    }

    #[test]
    fn jpg_source_is_replaced_in_place() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("scan.jpg");
        ruled_table(200, 150).save(&source).unwrap();

        let outcome = preprocessor().process(&source).expect("process");

        assert_eq!(outcome.output, source);
        assert_eq!(outcome.backup, dir.path().join("scan.jpg.bak"));
        assert!(outcome.output.exists());
    }

    #[test]
    fn rerun_on_renamed_image_is_decode_error() {
        let dir = TempDir::new().unwrap();
        let source = save(&dir, "page.png", &ruled_table(120, 90));
        preprocessor().process(&source).expect("first run");

        let err = preprocessor().process(&source).unwrap_err();
        assert!(matches!(
            err,
            TabwerkError::Image {
                stage: ImageStage::Decode,
                ..
            }
        ));
    }

    #[test]
    fn taken_output_name_gets_timestamp() {
        let dir = TempDir::new().unwrap();
        let source = save(&dir, "form.png", &ruled_table(100, 80));
        let existing = dir.path().join("form.jpg");
        fs::write(&existing, b"unrelated").unwrap();

        let outcome = preprocessor().process(&source).expect("process");

        assert_ne!(outcome.output, existing);
        let name = outcome.output.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("form") && name.ends_with(".jpg"), "{name}");
        assert_eq!(name.len(), "form".len() + 14 + ".jpg".len());
        assert_eq!(fs::read(&existing).unwrap(), b"unrelated");
    }

    #[test]
    fn existing_backup_is_not_overwritten() {
        let dir = TempDir::new().unwrap();
        let source = save(&dir, "grid.png", &ruled_table(100, 80));
        let old_backup = dir.path().join("grid.png.bak");
        fs::write(&old_backup, b"older original").unwrap();

        let outcome = preprocessor().process(&source).expect("process");

        assert_ne!(outcome.backup, old_backup);
        assert_eq!(fs::read(&old_backup).unwrap(), b"older original");
        let name = outcome.backup.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("grid.png.") && name.ends_with(".bak"), "{name}");
    }

    #[test]
    fn infeasible_ceiling_leaves_disk_untouched() {
        let dir = TempDir::new().unwrap();
        let source = save(&dir, "tiny.png", &ruled_table(100, 80));
        let constraint = CompressionConstraint::new(64, 15, 4096).unwrap();

        let err = ImagePreprocessor::new(constraint, FilterPreset::Table)
            .process(&source)
            .unwrap_err();

        assert!(matches!(err, TabwerkError::EncodingInfeasible(_)));
        assert!(source.exists());
        assert!(!dir.path().join("tiny.png.bak").exists());
        assert!(!dir.path().join("tiny.jpg").exists());
    }

    #[test]
    fn oversize_scan_is_bounded() {
        let dir = TempDir::new().unwrap();
        let source = save(&dir, "wide.png", &ruled_table(300, 60));
        let constraint = CompressionConstraint::new(2_621_440, 15, 200).unwrap();

        let outcome = ImagePreprocessor::new(constraint, FilterPreset::Blueprint)
            .process(&source)
            .expect("process");

        assert_eq!((outcome.width, outcome.height), (200, 40));
    }

    #[test]
    fn unreadable_file_is_decode_error_without_side_effects() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("broken.png");
        fs::write(&source, b"not an image").unwrap();

        let err = preprocessor().process(&source).unwrap_err();

        assert!(matches!(
            err,
            TabwerkError::Image {
                stage: ImageStage::Decode,
                ..
            }
        ));
        assert!(source.exists());
        assert!(!dir.path().join("broken.png.bak").exists());
    }

    #[test]
    fn same_stem_sources_each_get_a_distinct_output() {
        let dir = TempDir::new().unwrap();
        let sources = [
            save(&dir, "a.png", &ruled_table(100, 80)),
            save(&dir, "a.bmp", &ruled_table(100, 80)),
            save(&dir, "a.jpeg", &ruled_table(100, 80)),
        ];
        // A fourth claimant takes a stamped name before the run starts.
        let tag = stamp();
        let squatter = dir.path().join(format!("a{tag}.jpg"));
        fs::write(&squatter, b"unrelated").unwrap();

        let outputs: Vec<PathBuf> = sources
            .iter()
            .map(|source| preprocessor().process(source).expect("process").output)
            .collect();

        assert_eq!(outputs[0], dir.path().join("a.jpg"));
        let mut unique = outputs.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 3);
        assert!(outputs.iter().all(|o| o.exists() && *o != squatter));
        assert_eq!(fs::read(&squatter).unwrap(), b"unrelated");
        for name in ["a.png.bak", "a.bmp.bak", "a.jpeg.bak"] {
            assert!(dir.path().join(name).exists(), "{name}");
        }
    }

    #[test]
    fn stamped_backup_names_are_not_reused() {
        let dir = TempDir::new().unwrap();
        let source = save(&dir, "grid.png", &ruled_table(60, 40));
        fs::write(dir.path().join("grid.png.bak"), b"first").unwrap();
        let stamped = dir.path().join(format!("grid.png.{}.bak", stamp()));
        fs::write(&stamped, b"second").unwrap();

        let backup = backup_path_for(&source).unwrap();

        assert_ne!(backup, stamped);
        assert!(!backup.exists());
        let name = backup.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("grid.png.") && name.ends_with(".bak"), "{name}");
    }

    #[test]
    fn failed_write_restores_original() {
        let dir = TempDir::new().unwrap();
        let source = save(&dir, "ledger.png", &ruled_table(80, 60));
        let original = fs::read(&source).unwrap();

        let err = write_with_backup_via(&source, b"jpeg bytes", |file, bytes| {
            file.write_all(&bytes[..4])?;
            Err(io::Error::other("disk full"))
        })
        .unwrap_err();

        assert!(matches!(
            err,
            TabwerkError::Image {
                stage: ImageStage::Write,
                ..
            }
        ));
        assert!(err.to_string().contains("disk full"));
        assert_eq!(fs::read(&source).unwrap(), original);
        let left: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(left, vec!["ledger.png".to_string()]);
    }
}

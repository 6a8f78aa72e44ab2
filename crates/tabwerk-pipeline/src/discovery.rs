// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image discovery — recursive walk for source scans and for the JPEGs the
// preprocessor left behind, grouped by owning directory.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tabwerk_core::error::{Result, TabwerkError};
use tabwerk_core::types::ImageGroups;
use tracing::{debug, info, instrument};
use walkdir::WalkDir;

/// Source image extensions, compared case-insensitively.
pub const SUPPORTED_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

const BACKUP_SUFFIX: &str = ".bak";
const STAMP_DIGITS: usize = 14;

fn lower_extension(path: &Path) -> Option<String> {
    path.extension().map(|e| e.to_string_lossy().to_lowercase())
}

/// Whether `path` names a supported source image.
pub fn is_supported_image(path: &Path) -> bool {
    lower_extension(path).is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
}

fn group_key(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_default()
}

fn walk_files(root: &Path, max_depth: usize) -> impl Iterator<Item = PathBuf> {
    WalkDir::new(root)
        .follow_links(true)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
}

fn check_root(root: &Path) -> Result<()> {
    if root.exists() {
        Ok(())
    } else {
        Err(TabwerkError::Discovery(format!(
            "{} does not exist",
            root.display()
        )))
    }
}

/// Find every supported image under `root`, grouped by parent directory.
///
/// A file root yields a single entry when it is a supported image and an
/// error otherwise. Backups (`*.bak`) never match.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn discover(root: &Path) -> Result<ImageGroups> {
    check_root(root)?;

    let mut groups = ImageGroups::new();
    if root.is_file() {
        if !is_supported_image(root) {
            return Err(TabwerkError::Discovery(format!(
                "{} is not a supported image ({})",
                root.display(),
                SUPPORTED_EXTENSIONS.join(", ")
            )));
        }
        groups.insert(group_key(root), vec![root.to_path_buf()]);
        return Ok(groups);
    }

    for path in walk_files(root, usize::MAX).filter(|p| is_supported_image(p)) {
        groups.entry(group_key(&path)).or_default().push(path);
    }

    let total: usize = groups.values().map(Vec::len).sum();
    info!(directories = groups.len(), images = total, "Discovery complete");
    Ok(groups)
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// `YYYYmmddHHMMSS`, optionally followed by `-<n>`.
fn is_collision_tag(tag: &str) -> bool {
    let stamp = match tag.split_once('-') {
        Some((stamp, counter)) if all_digits(counter) => stamp,
        Some(_) => return false,
        None => tag,
    };
    stamp.len() == STAMP_DIGITS && all_digits(stamp)
}

/// Stem of the source image a backup was made from.
///
/// Accepts `<stem>.<ext>.bak` and `<stem>.<ext>.<tag>.bak`, where the tag is
/// a timestamp with an optional `-<n>` counter.
pub fn backup_source_stem(file_name: &str) -> Option<&str> {
    let rest = file_name.strip_suffix(BACKUP_SUFFIX)?;
    let rest = match rest.rsplit_once('.') {
        Some((head, tag)) if is_collision_tag(tag) => head,
        _ => rest,
    };
    let (stem, ext) = rest.rsplit_once('.')?;
    let ext = ext.to_lowercase();
    (SUPPORTED_EXTENSIONS.contains(&ext.as_str()) && !stem.is_empty()).then_some(stem)
}

/// `<stem>` with a trailing collision timestamp removed, if it has one.
fn strip_stamp(stem: &str) -> Option<&str> {
    let split = stem.len().checked_sub(STAMP_DIGITS)?;
    let (head, tail) = stem.split_at_checked(split)?;
    (!head.is_empty() && all_digits(tail)).then_some(head)
}

/// `<stem>` with a trailing `<stamp>` or `<stamp>-<n>` removed.
fn strip_collision_tag(stem: &str) -> Option<&str> {
    strip_stamp(stem).or_else(|| match stem.rsplit_once('-') {
        Some((head, counter)) if all_digits(counter) => strip_stamp(head),
        _ => None,
    })
}

/// Find the JPEGs produced by preprocessing: `.jpg` files with a backup
/// sibling whose stem they carry (optionally with a collision tag).
///
/// Images whose preprocessing failed have no backup and are skipped.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn discover_preprocessed(root: &Path) -> Result<ImageGroups> {
    check_root(root)?;

    let (scan_root, depth, only) = if root.is_file() {
        (group_key(root), 1, Some(root.to_path_buf()))
    } else {
        (root.to_path_buf(), usize::MAX, None)
    };

    let files: Vec<PathBuf> = walk_files(&scan_root, depth).collect();

    let mut backups: HashSet<(PathBuf, String)> = HashSet::new();
    for path in &files {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
            continue;
        };
        if let Some(stem) = backup_source_stem(&name) {
            backups.insert((group_key(path), stem.to_string()));
        }
    }

    let mut groups = ImageGroups::new();
    for path in files {
        if only.as_ref().is_some_and(|o| *o != path) {
            continue;
        }
        if path.extension().is_none_or(|e| e != "jpg") {
            continue;
        }
        let dir = group_key(&path);
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let has_backup = backups.contains(&(dir.clone(), stem.clone()))
            || strip_collision_tag(&stem).is_some_and(|s| backups.contains(&(dir.clone(), s.to_string())));
        if has_backup {
            groups.entry(dir).or_default().push(path);
        } else {
            debug!(path = %path.display(), "No backup sibling; not a preprocessed image");
        }
    }

    let total: usize = groups.values().map(Vec::len).sum();
    info!(directories = groups.len(), images = total, "Preprocessed images discovered");
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn groups_images_by_directory_case_insensitively() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        touch(&root.join("a.JPG"));
        touch(&root.join("b.png"));
        touch(&root.join("notes.txt"));
        touch(&root.join("sub/c.bmp"));
        touch(&root.join("sub/d.jpeg"));
        touch(&root.join("sub/old.png.bak"));

        let groups = discover(root).unwrap();

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[root], vec![root.join("a.JPG"), root.join("b.png")]);
        assert_eq!(
            groups[&root.join("sub")],
            vec![root.join("sub/c.bmp"), root.join("sub/d.jpeg")]
        );
    }

    #[test]
    fn single_file_root_is_one_entry() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("scan.png");
        touch(&file);

        let groups = discover(&file).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[dir.path()], vec![file]);
    }

    #[test]
    fn unsupported_file_and_missing_path_are_errors() {
        let dir = TempDir::new().unwrap();
        let text = dir.path().join("readme.txt");
        touch(&text);

        assert!(matches!(discover(&text), Err(TabwerkError::Discovery(_))));
        assert!(matches!(
            discover(&dir.path().join("missing")),
            Err(TabwerkError::Discovery(_))
        ));
    }

    #[test]
    fn backup_names_parse_with_and_without_stamp() {
        assert_eq!(backup_source_stem("page.png.bak"), Some("page"));
        assert_eq!(backup_source_stem("page.JPG.20260101120000.bak"), Some("page"));
        assert_eq!(backup_source_stem("page.png.20260101120000-3.bak"), Some("page"));
        assert_eq!(backup_source_stem("page.png.2026-3.bak"), None);
        assert_eq!(backup_source_stem("my.scan.jpeg.bak"), Some("my.scan"));
        assert_eq!(backup_source_stem("page.txt.bak"), None);
        assert_eq!(backup_source_stem("page.png"), None);
    }

    #[test]
    fn preprocessed_requires_backup_sibling() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        // Successfully preprocessed.
        touch(&root.join("ok.png.bak"));
        touch(&root.join("ok.jpg"));
        // Name collision resolved with a timestamp.
        touch(&root.join("form.png.bak"));
        touch(&root.join("form20260101120000.jpg"));
        touch(&root.join("form20260101120000-2.jpg"));
        // Hyphenated stem without a tag still needs its own backup.
        touch(&root.join("q-7.jpg"));
        // Failed preprocessing: original still in place, no backup.
        touch(&root.join("broken.jpg"));
        // Backup in another directory does not count.
        touch(&root.join("sub/lonely.jpg"));
        touch(&root.join("other/lonely.png.bak"));

        let groups = discover_preprocessed(root).unwrap();

        assert_eq!(groups.len(), 1);
        assert_eq!(
            groups[root],
            vec![
                root.join("form20260101120000-2.jpg"),
                root.join("form20260101120000.jpg"),
                root.join("ok.jpg")
            ]
        );
    }

    #[test]
    fn preprocessed_single_file_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        touch(&root.join("one.jpg.bak"));
        touch(&root.join("one.jpg"));
        touch(&root.join("two.jpg.bak"));
        touch(&root.join("two.jpg"));

        let groups = discover_preprocessed(&root.join("one.jpg")).unwrap();
        assert_eq!(groups[root], vec![root.join("one.jpg")]);
    }
}

//! Deterministic archive extraction, patch application and misc filesystem
//! helpers (atomic move, recursive directory size).

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    TarGz,
    TarBz2,
    TarXz,
    Tar,
    Zip,
}

impl ArchiveKind {
    /// Determine the archive kind from a source filename's extension,
    /// matching EasyBuild's deterministic-by-extension extraction policy.
    pub fn from_filename(path: &Path) -> Result<ArchiveKind> {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let lower = name.to_lowercase();
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Ok(ArchiveKind::TarGz)
        } else if lower.ends_with(".tar.bz2") || lower.ends_with(".tbz2") || lower.ends_with(".tbz") {
            Ok(ArchiveKind::TarBz2)
        } else if lower.ends_with(".tar.xz") || lower.ends_with(".txz") {
            Ok(ArchiveKind::TarXz)
        } else if lower.ends_with(".tar") {
            Ok(ArchiveKind::Tar)
        } else if lower.ends_with(".zip") {
            Ok(ArchiveKind::Zip)
        } else {
            bail!("cannot determine archive type of '{name}' from its extension")
        }
    }
}

/// Extract `archive` into `dest`, which is created if needed. Returns the
/// single top-level directory the archive unpacked into, when there is
/// exactly one, mirroring the common "one directory per tarball" source
/// layout EasyBuild relies on to locate the post-extraction start dir.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<Option<PathBuf>> {
    fs::create_dir_all(dest)
        .with_context(|| format!("failed to create extraction directory {}", dest.display()))?;

    let kind = ArchiveKind::from_filename(archive)?;
    let file = File::open(archive).with_context(|| format!("failed to open {}", archive.display()))?;

    match kind {
        ArchiveKind::TarGz => {
            let decoder = flate2::read::GzDecoder::new(BufReader::new(file));
            tar::Archive::new(decoder).unpack(dest)?;
        }
        ArchiveKind::TarBz2 => {
            let decoder = bzip2::read::BzDecoder::new(BufReader::new(file));
            tar::Archive::new(decoder).unpack(dest)?;
        }
        ArchiveKind::TarXz => {
            let decoder = xz2::read::XzDecoder::new(BufReader::new(file));
            tar::Archive::new(decoder).unpack(dest)?;
        }
        ArchiveKind::Tar => {
            tar::Archive::new(BufReader::new(file)).unpack(dest)?;
        }
        ArchiveKind::Zip => {
            let mut zip = zip::ZipArchive::new(BufReader::new(file))
                .with_context(|| format!("failed to read zip archive {}", archive.display()))?;
            zip.extract(dest)?;
        }
    }

    single_top_level_dir(dest)
}

fn single_top_level_dir(dest: &Path) -> Result<Option<PathBuf>> {
    let mut entries = fs::read_dir(dest)?.filter_map(|e| e.ok()).collect::<Vec<_>>();
    if entries.len() == 1 {
        let entry = entries.remove(0);
        if entry.file_type()?.is_dir() {
            return Ok(Some(entry.path()));
        }
    }
    Ok(None)
}

/// Apply a unified diff `patch_text` against the tree rooted at `target_dir`,
/// stripping `strip_level` leading path components from each patch hunk's
/// file paths (the `-p<N>` convention). Aborts (returns `Err`) on the first
/// hunk that does not apply cleanly.
pub fn apply_patch(patch_text: &str, target_dir: &Path, strip_level: usize) -> Result<()> {
    let patch = diffy::Patch::from_str(patch_text).context("failed to parse patch as a unified diff")?;

    let target_path = strip_patch_path(patch.original().unwrap_or("a/unknown"), strip_level);
    let full_path = target_dir.join(&target_path);

    let original = fs::read_to_string(&full_path)
        .with_context(|| format!("failed to read patch target {}", full_path.display()))?;

    let patched = diffy::apply(&original, &patch)
        .map_err(|e| anyhow::anyhow!("patch rejected against {}: {e}", full_path.display()))?;

    fs::write(&full_path, patched).with_context(|| format!("failed to write patched {}", full_path.display()))?;
    Ok(())
}

fn strip_patch_path(raw: &str, strip_level: usize) -> PathBuf {
    let mut components = raw.split('/').collect::<Vec<_>>();
    if strip_level > 0 && strip_level <= components.len() {
        components.drain(0..strip_level);
    }
    PathBuf::from(components.join("/"))
}

/// Move `from` to `to` atomically when possible (same filesystem rename),
/// falling back to copy-then-remove across filesystem boundaries.
pub fn atomic_move(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
            fs::copy(from, to)
                .with_context(|| format!("failed to copy {} to {}", from.display(), to.display()))?;
            fs::remove_file(from)?;
            Ok(())
        }
        Err(e) => Err(e).with_context(|| format!("failed to move {} to {}", from.display(), to.display())),
    }
}

/// Recursively compute the total size in bytes of all regular files under `path`.
pub fn dir_size(path: &Path) -> Result<u64> {
    let mut total = 0u64;
    for entry in walkdir::WalkDir::new(path) {
        let entry = entry.with_context(|| format!("failed to walk {}", path.display()))?;
        if entry.file_type().is_file() {
            total += entry.metadata()?.len();
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_archive_kind_by_extension() {
        assert_eq!(ArchiveKind::from_filename(Path::new("toy-0.0.tar.gz")).unwrap(), ArchiveKind::TarGz);
        assert_eq!(ArchiveKind::from_filename(Path::new("toy-0.0.tar.xz")).unwrap(), ArchiveKind::TarXz);
        assert_eq!(ArchiveKind::from_filename(Path::new("toy-0.0.zip")).unwrap(), ArchiveKind::Zip);
        assert!(ArchiveKind::from_filename(Path::new("toy-0.0")).is_err());
    }

    #[test]
    fn strips_patch_path_components() {
        assert_eq!(strip_patch_path("a/src/main.c", 1), PathBuf::from("src/main.c"));
        assert_eq!(strip_patch_path("src/main.c", 0), PathBuf::from("src/main.c"));
    }

    #[test]
    fn dir_size_sums_regular_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a"), [0u8; 10]).unwrap();
        fs::write(dir.path().join("b"), [0u8; 20]).unwrap();
        assert_eq!(dir_size(dir.path()).unwrap(), 30);
    }

    #[test]
    fn atomic_move_renames_file() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("from");
        let to = dir.path().join("nested/to");
        fs::write(&from, b"data").unwrap();
        atomic_move(&from, &to).unwrap();
        assert!(!from.exists());
        assert_eq!(fs::read(&to).unwrap(), b"data");
    }
}

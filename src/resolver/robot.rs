//! Robot path discovery: locate an easyconfig file for a dependency by the
//! `<name>/<name>-<version>[-<tc>].eb` filename convention, falling back to
//! `<lowercase-first-letter>/<name>/…` (§4.5).

use std::path::{Path, PathBuf};

use crate::model::Toolchain;

fn conventional_filename(name: &str, full_version: &str, toolchain: Option<&Toolchain>) -> String {
    let mut s = format!("{name}-{full_version}");
    if let Some(tc) = toolchain {
        if !tc.is_system() {
            s.push('-');
            s.push_str(&tc.name);
            s.push('-');
            s.push_str(&tc.version);
        }
    }
    s.push_str(".eb");
    s
}

fn candidate_paths(root: &Path, name: &str, filename: &str) -> Vec<PathBuf> {
    let mut candidates = vec![root.join(name).join(filename)];
    if let Some(first) = name.chars().next() {
        let letter = first.to_lowercase().to_string();
        candidates.push(root.join(letter).join(name).join(filename));
    }
    candidates
}

/// Search `robot_paths` in order for an easyconfig matching `name`,
/// `full_version` and (optionally) `toolchain`. When `toolchain` is given,
/// only the exact filename (with that toolchain's suffix) is tried; when
/// `None`, the system-toolchain (no-suffix) filename is tried.
pub fn locate_easyconfig(
    name: &str,
    full_version: &str,
    toolchain: Option<&Toolchain>,
    robot_paths: &[PathBuf],
) -> Option<PathBuf> {
    let filename = conventional_filename(name, full_version, toolchain);
    for root in robot_paths {
        for candidate in candidate_paths(root, name, &filename) {
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn finds_easyconfig_under_name_subdir() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("zlib")).unwrap();
        fs::write(dir.path().join("zlib/zlib-1.2.11.eb"), "").unwrap();
        let found = locate_easyconfig("zlib", "1.2.11", None, &[dir.path().to_path_buf()]).unwrap();
        assert_eq!(found, dir.path().join("zlib/zlib-1.2.11.eb"));
    }

    #[test]
    fn falls_back_to_lowercase_first_letter_subdir() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("z/zlib")).unwrap();
        fs::write(dir.path().join("z/zlib/zlib-1.2.11.eb"), "").unwrap();
        let found = locate_easyconfig("zlib", "1.2.11", None, &[dir.path().to_path_buf()]).unwrap();
        assert_eq!(found, dir.path().join("z/zlib/zlib-1.2.11.eb"));
    }

    #[test]
    fn includes_toolchain_suffix_when_given() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("zlib")).unwrap();
        let tc = Toolchain { name: "GCC".to_string(), version: "9.3.0".to_string() };
        fs::write(dir.path().join("zlib/zlib-1.2.11-GCC-9.3.0.eb"), "").unwrap();
        let found = locate_easyconfig("zlib", "1.2.11", Some(&tc), &[dir.path().to_path_buf()]).unwrap();
        assert_eq!(found, dir.path().join("zlib/zlib-1.2.11-GCC-9.3.0.eb"));
    }

    #[test]
    fn returns_none_when_not_found_in_any_robot_path() {
        let dir = tempfile::tempdir().unwrap();
        assert!(locate_easyconfig("zlib", "1.2.11", None, &[dir.path().to_path_buf()]).is_none());
    }
}

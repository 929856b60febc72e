use std::fs;
use std::path::PathBuf;

use tracing::warn;

use crate::{check_segment, now_ms, StoreError};

/// Binary blob storage under the `files/` subtree of the state directory.
///
/// Base names are sanitized to `[a-zA-Z0-9._-]` before touching the
/// filesystem; directory segments are not sanitized (they are namespaces
/// chosen by code, e.g. `profile-pictures/<uid>`) but are validated against
/// traversal like record keys.
#[derive(Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn open(state_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = state_dir.into().join("files");
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Replace every byte outside `[a-zA-Z0-9._-]` with `_`.
    pub fn sanitize_name(name: &str) -> String {
        name.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }

    /// Insert a millisecond timestamp before the last extension:
    /// `photo.png` -> `photo_1700000000000.png`.
    fn uniquify(name: &str) -> String {
        match name.rsplit_once('.') {
            Some((base, ext)) if !base.is_empty() => format!("{base}_{}.{ext}", now_ms()),
            _ => format!("{name}_{}", now_ms()),
        }
    }

    /// Store `bytes` under `relative_path`, sanitizing the base name.
    /// Returns the final relative path so callers can build retrieval URLs.
    pub fn save(
        &self,
        relative_path: &str,
        bytes: &[u8],
        make_unique: bool,
    ) -> Result<String, StoreError> {
        let (dirs, base) = split_path(relative_path)?;
        let mut name = Self::sanitize_name(base);
        if make_unique {
            name = Self::uniquify(&name);
        }
        let mut dir = self.root.clone();
        for seg in &dirs {
            dir.push(seg);
        }
        fs::create_dir_all(&dir)?;
        let path = dir.join(&name);
        let tmp = dir.join(format!("{name}.tmp"));
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        let mut rel: Vec<&str> = dirs.clone();
        rel.push(&name);
        Ok(rel.join("/"))
    }

    /// Read a blob back by the relative path `save` returned. Absent files
    /// and invalid paths read as absent.
    pub fn get(&self, relative_path: &str) -> Option<Vec<u8>> {
        let (dirs, base) = match split_path(relative_path) {
            Ok(parts) => parts,
            Err(err) => {
                warn!(path = relative_path, error = %err, "rejected file path");
                return None;
            }
        };
        let mut path = self.root.clone();
        for seg in dirs {
            path.push(seg);
        }
        path.push(Self::sanitize_name(base));
        match fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "file read failed");
                None
            }
        }
    }
}

/// Split a relative path into validated directory segments plus a base name.
fn split_path(relative_path: &str) -> Result<(Vec<&str>, &str), StoreError> {
    let mut segments: Vec<&str> = relative_path.split('/').collect();
    let base = segments.pop().filter(|s| !s.is_empty()).ok_or_else(|| {
        StoreError::InvalidKey {
            key: relative_path.to_string(),
            reason: "empty file name",
        }
    })?;
    for seg in &segments {
        check_segment(relative_path, seg)?;
    }
    Ok((segments, base))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn files() -> (tempfile::TempDir, FileStore) {
        let dir = tempdir().unwrap();
        let fs = FileStore::open(dir.path()).unwrap();
        (dir, fs)
    }

    #[test]
    fn sanitizes_base_name_to_safe_charset() {
        let (_dir, fs) = files();
        let name = fs.save("a b*c?.png", b"img", false).unwrap();
        assert_eq!(name, "a_b_c_.png");
        assert!(name.chars().all(|c| c.is_ascii_alphanumeric()
            || matches!(c, '.' | '_' | '-')));
    }

    #[test]
    fn directory_segments_pass_through_as_structure() {
        let (dir, fs) = files();
        let rel = fs.save("profile-pictures/u1/avatar.jpg", b"img", false).unwrap();
        assert_eq!(rel, "profile-pictures/u1/avatar.jpg");
        assert!(dir
            .path()
            .join("files/profile-pictures/u1/avatar.jpg")
            .is_file());
    }

    #[test]
    fn traversal_directory_segments_are_rejected() {
        let (_dir, fs) = files();
        assert!(fs.save("../outside/x.png", b"img", false).is_err());
        assert!(fs.get("../outside/x.png").is_none());
    }

    #[test]
    fn unique_names_keep_the_extension_last() {
        let (_dir, fs) = files();
        let name = fs.save("photo.png", b"img", true).unwrap();
        assert!(name.starts_with("photo_"));
        assert!(name.ends_with(".png"));
        assert_ne!(name, "photo.png");
    }

    #[test]
    fn round_trip_by_returned_name() {
        let (_dir, fs) = files();
        let rel = fs.save("pics/shot one.png", b"\x89PNG", false).unwrap();
        assert_eq!(fs.get(&rel).unwrap(), b"\x89PNG");
        assert!(fs.get("pics/absent.png").is_none());
    }
}

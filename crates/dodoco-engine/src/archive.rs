//! Tar packing for uploads into a container.

use std::path::Path;

use dodoco_common::error::{DodocoError, Result};

/// Packs a single local file into an in-memory tar archive.
///
/// The entry is stored under the file's own name so that extracting the
/// archive into a directory places the file directly inside it.
///
/// # Errors
///
/// Returns an error if the path has no file name or cannot be read.
pub fn pack_file(path: &Path) -> Result<Vec<u8>> {
    let name = path.file_name().ok_or_else(|| DodocoError::Validation {
        message: format!("'{}' does not name a file", path.display()),
    })?;

    let mut builder = tar::Builder::new(Vec::new());
    builder
        .append_path_with_name(path, name)
        .map_err(|e| DodocoError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
    let bytes = builder.into_inner().map_err(|e| DodocoError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    tracing::debug!(path = %path.display(), bytes = bytes.len(), "packed upload archive");
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    #[test]
    fn packs_file_under_its_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("setup.sh");
        std::fs::write(&path, "echo hi\n").expect("write");

        let bytes = pack_file(&path).expect("pack");
        let mut archive = tar::Archive::new(bytes.as_slice());
        let mut entries = archive.entries().expect("entries");
        let mut entry = entries.next().expect("one entry").expect("entry");
        assert_eq!(entry.path().expect("path").to_str(), Some("setup.sh"));
        let mut content = String::new();
        let _ = entry.read_to_string(&mut content).expect("read");
        assert_eq!(content, "echo hi\n");
        assert!(entries.next().is_none());
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = pack_file(&dir.path().join("nope")).expect_err("missing");
        assert!(matches!(err, DodocoError::Io { .. }));
    }
}

//! Filesystem utilities.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;
use tracing::debug;

/// Write `contents` to `path` atomically.
///
/// The bytes land in a temporary file in the destination directory and are
/// renamed into place, so readers never observe a partially written file and
/// repeated runs never corrupt an existing artifact mid-write.
///
/// # Errors
///
/// Returns an error if the destination directory cannot be created or the
/// temporary file cannot be written or renamed.
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("{} has no parent directory", path.display()))?;
    std::fs::create_dir_all(parent)
        .with_context(|| format!("failed to create {}", parent.display()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create a temporary file in {}", parent.display()))?;
    tmp.write_all(contents)?;
    tmp.flush()?;
    tmp.persist(path)
        .with_context(|| format!("failed to move temporary file into {}", path.display()))?;

    debug!("wrote {} ({} bytes)", path.display(), contents.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("derived").join("config.json");

        atomic_write(&path, b"{\"a\":1}").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"{\"a\":1}");

        atomic_write(&path, b"{\"a\":2}").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"{\"a\":2}");

        // No temporary files left behind.
        let entries: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 1);
    }
}

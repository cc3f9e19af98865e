//! Credential file handling
//!
//! Writes never replace an existing file: content goes to a temporary file in
//! the destination directory (owner read/write only) which is then linked
//! into place with a no-clobber persist.

use crate::error::{ProxyError, Result};
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use tracing::{debug, info};

/// Atomically create `path` with `content`, failing if it already exists
pub fn write_exclusive(path: &Path, content: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(|e| ProxyError::io(dir, e))?;
    temp.write_all(content)
        .and_then(|_| temp.as_file().sync_all())
        .map_err(|e| ProxyError::io(temp.path(), e))?;

    temp.persist_noclobber(path)
        .map_err(|e| ProxyError::io(path, e.error))?;

    debug!(path = %path.display(), bytes = content.len(), "Credential file written");
    Ok(())
}

/// Read a whole file
pub fn read(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| ProxyError::io(path, e))
}

/// Overwrite a proxy file with zeros, flush it to disk and unlink it
pub fn proxy_file_destroy(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let mut file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| ProxyError::io(path, e))?;

    let len = file
        .metadata()
        .map_err(|e| ProxyError::io(path, e))?
        .len();

    let zeros = [0u8; 4096];
    let mut remaining = len;
    file.seek(SeekFrom::Start(0))
        .map_err(|e| ProxyError::io(path, e))?;
    while remaining > 0 {
        let chunk = remaining.min(zeros.len() as u64) as usize;
        file.write_all(&zeros[..chunk])
            .map_err(|e| ProxyError::io(path, e))?;
        remaining -= chunk as u64;
    }
    file.sync_all().map_err(|e| ProxyError::io(path, e))?;
    drop(file);

    std::fs::remove_file(path).map_err(|e| ProxyError::io(path, e))?;

    info!(path = %path.display(), bytes = len, "Proxy file destroyed");
    Ok(())
}

//! Loading script source from disk.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use tracing::trace;

use crate::Result;

/// Read the whole file at `path`.
///
/// Missing files, permission errors and directories all fail with
/// [`BridgeError::Io`](crate::BridgeError::Io). The file is closed before
/// this returns, whatever the outcome.
pub fn load_source(path: &Path) -> Result<Vec<u8>> {
    let mut file = File::open(path)?;
    if file.metadata()?.is_dir() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "is a directory").into());
    }

    let mut source = Vec::new();
    file.read_to_end(&mut source)?;
    trace!(path = %path.display(), bytes = source.len(), "loaded script source");
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BridgeError;

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.sh");
        std::fs::write(&path, "echo hello\n").unwrap();

        assert_eq!(load_source(&path).unwrap(), b"echo hello\n");
    }

    #[test]
    fn test_load_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.sh");
        std::fs::write(&path, "").unwrap();

        assert!(load_source(&path).unwrap().is_empty());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_source(&dir.path().join("missing.sh")).unwrap_err();
        match err {
            BridgeError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::NotFound),
            other => panic!("expected I/O error, got {other:?}"),
        }
    }

    #[test]
    fn test_load_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_source(dir.path()).unwrap_err();
        assert!(matches!(err, BridgeError::Io(_)));
        assert!(err.to_string().contains("directory"));
    }
}

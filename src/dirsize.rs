//! Recursive directory size, used as the denominator for upload progress.

use std::io;
use std::path::Path;

use walkdir::WalkDir;

/// Total size in bytes of every file under `path`.
///
/// A file path yields its own length. Missing or unreadable paths are an
/// error rather than a zero, since a wrong total skews every percentage.
pub fn size(path: impl AsRef<Path>) -> io::Result<u64> {
    let mut total = 0u64;
    for entry in WalkDir::new(path.as_ref()).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_file() {
            total += entry.metadata().map_err(io::Error::from)?.len();
        }
    }
    Ok(total)
}

/// Async wrapper running the walk on the blocking pool
pub async fn size_async(path: impl AsRef<Path>) -> io::Result<u64> {
    let path = path.as_ref().to_path_buf();
    tokio::task::spawn_blocking(move || size(path))
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_sums_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), vec![0u8; 10]).unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("b.txt"), vec![0u8; 20]).unwrap();
        fs::write(dir.path().join("nested").join("c.txt"), vec![0u8; 30]).unwrap();
        fs::create_dir(dir.path().join("empty")).unwrap();

        assert_eq!(size(dir.path()).unwrap(), 60);
    }

    #[test]
    fn test_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("only.bin");
        fs::write(&file, vec![1u8; 42]).unwrap();
        assert_eq!(size(&file).unwrap(), 42);
    }

    #[test]
    fn test_missing_path_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = size(dir.path().join("nope")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_async_wrapper() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a"), b"hello").unwrap();
        assert_eq!(size_async(dir.path()).await.unwrap(), 5);
    }
}

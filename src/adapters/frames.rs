//! Frame source backed by a directory the capture pipeline writes into.
//!
//! The capture side drops JPEG files into a directory; the newest file by
//! modification time is the current frame, and its modification time is
//! the capture timestamp used for the staleness check.

use std::path::PathBuf;
use std::time::SystemTime;

use async_trait::async_trait;

use crate::ports::{Frame, FrameError, FrameSource};

pub struct DirectoryFrameSource {
    dir: PathBuf,
}

impl DirectoryFrameSource {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn newest_file(&self) -> Result<Frame, FrameError> {
        let mut newest: Option<(PathBuf, SystemTime)> = None;
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            let modified = meta.modified()?;
            let replace = match &newest {
                Some((_, best)) => modified > *best,
                None => true,
            };
            if replace {
                newest = Some((entry.path(), modified));
            }
        }
        match newest {
            Some((path, captured_at)) => Ok(Frame { path, captured_at }),
            None => Err(FrameError::Unavailable(format!(
                "no frames in {}",
                self.dir.display()
            ))),
        }
    }
}

#[async_trait]
impl FrameSource for DirectoryFrameSource {
    async fn latest_frame(&self) -> Result<Frame, FrameError> {
        self.newest_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;

    #[tokio::test]
    async fn test_picks_newest_by_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("old.jpg");
        let new = dir.path().join("new.jpg");
        File::create(&old).unwrap();
        let f = File::create(&new).unwrap();
        f.set_modified(SystemTime::now() + Duration::from_secs(5))
            .unwrap();

        let source = DirectoryFrameSource::new(dir.path().to_path_buf());
        let frame = source.latest_frame().await.unwrap();
        assert_eq!(frame.path, new);
    }

    #[tokio::test]
    async fn test_empty_directory_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let source = DirectoryFrameSource::new(dir.path().to_path_buf());
        let err = source.latest_frame().await.unwrap_err();
        assert!(matches!(err, FrameError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_missing_directory_is_io_error() {
        let source = DirectoryFrameSource::new(PathBuf::from("/nonexistent/frames"));
        let err = source.latest_frame().await.unwrap_err();
        assert!(matches!(err, FrameError::Io(_)));
    }

    #[tokio::test]
    async fn test_subdirectories_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let only = dir.path().join("frame.jpg");
        File::create(&only).unwrap();

        let source = DirectoryFrameSource::new(dir.path().to_path_buf());
        let frame = source.latest_frame().await.unwrap();
        assert_eq!(frame.path, only);
    }
}

//! Following an append-only log file.

use crate::error::Result;
use std::io::ErrorKind;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Follows a file from its first byte, delivering every complete line.
///
/// When the file does not exist yet the follower waits for it to appear. A
/// file that shrinks is re-read from the start, and a file replaced under the
/// same path (inode change) is reopened once the rest of the old file has
/// been read.
pub struct LogFollower {
    path: PathBuf,
    poll_interval: Duration,
}

struct OpenFile {
    reader: BufReader<File>,
    inode: u64,
    offset: u64,
}

impl LogFollower {
    pub fn new(path: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            path: path.into(),
            poll_interval,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Follow the file until `cancel` fires, calling `on_line` for every line
    /// in file order without its trailing newline.
    ///
    /// Only a failure to open the file at startup is returned. The line being
    /// handled when `cancel` fires is always finished first.
    pub async fn run<F>(&self, cancel: CancellationToken, mut on_line: F) -> Result<()>
    where
        F: FnMut(&str),
    {
        let Some(mut file) = self.open_initial(&cancel).await? else {
            return Ok(());
        };
        debug!(path = %self.path.display(), "following log file");

        let mut line = Vec::new();
        while !cancel.is_cancelled() {
            match file.reader.read_until(b'\n', &mut line).await {
                Ok(0) => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                    match self.check_rotation(&file).await {
                        Some(Rotation::Replaced) => {
                            // The old file may have grown after the last read.
                            Self::drain(&mut file, &mut line, &mut on_line).await;
                            if let Ok(reopened) = self.open().await {
                                file = reopened;
                                line.clear();
                            }
                        }
                        Some(Rotation::Truncated) => {
                            if let Ok(reopened) = self.open().await {
                                file = reopened;
                                line.clear();
                            }
                        }
                        None => {}
                    }
                }
                Ok(read) => {
                    file.offset += read as u64;
                    emit_complete(&mut line, &mut on_line);
                }
                Err(err) => {
                    warn!(path = %self.path.display(), error = %err, "read failed, retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
            }
        }

        debug!(path = %self.path.display(), "stopped following log file");
        Ok(())
    }

    /// Open the file, waiting while it does not exist. `None` means the wait
    /// was cancelled.
    async fn open_initial(&self, cancel: &CancellationToken) -> Result<Option<OpenFile>> {
        let mut waiting = false;
        loop {
            match self.open().await {
                Ok(file) => return Ok(Some(file)),
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    if !waiting {
                        info!(path = %self.path.display(), "log file does not exist yet, waiting");
                        waiting = true;
                    }
                }
                Err(err) => return Err(err.into()),
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    async fn open(&self) -> std::io::Result<OpenFile> {
        let file = File::open(&self.path).await?;
        let metadata = file.metadata().await?;
        if metadata.is_dir() {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("{} is a directory", self.path.display()),
            ));
        }

        Ok(OpenFile {
            reader: BufReader::new(file),
            inode: metadata.ino(),
            offset: 0,
        })
    }

    /// Detect truncation or replacement of the followed file. Transient
    /// failures keep the current handle.
    async fn check_rotation(&self, current: &OpenFile) -> Option<Rotation> {
        let metadata = tokio::fs::metadata(&self.path).await.ok()?;

        if metadata.ino() != current.inode {
            info!(path = %self.path.display(), "log file replaced, reopening");
            return Some(Rotation::Replaced);
        }

        if metadata.len() < current.offset {
            info!(path = %self.path.display(), "log file truncated, reading from start");
            return Some(Rotation::Truncated);
        }

        None
    }

    /// Deliver every complete line still readable from `file`.
    async fn drain<F>(file: &mut OpenFile, line: &mut Vec<u8>, on_line: &mut F)
    where
        F: FnMut(&str),
    {
        while let Ok(read) = file.reader.read_until(b'\n', line).await {
            if read == 0 {
                break;
            }
            file.offset += read as u64;
            emit_complete(line, on_line);
        }
    }
}

enum Rotation {
    Replaced,
    Truncated,
}

/// Hand `line` to `on_line` once its newline has arrived. A line without one
/// is still being written and stays buffered.
fn emit_complete<F>(line: &mut Vec<u8>, on_line: &mut F)
where
    F: FnMut(&str),
{
    if line.last() != Some(&b'\n') {
        return;
    }
    on_line(String::from_utf8_lossy(line).trim_end_matches(|c: char| c == '\n' || c == '\r'));
    line.clear();
}

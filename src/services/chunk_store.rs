//! src/services/chunk_store.rs
//!
//! ChunkStore: durable blob storage for chunk objects and assembled media.
//! The filesystem backend keeps payloads beneath `base_path/{key}` and makes
//! every write atomic by streaming into a temp file that is fsynced and
//! renamed into place.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt, stream};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    pin::Pin,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

/// A boxed stream of bytes used for both writes and reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Wrap an in-memory buffer as a single-item `ByteStream`.
pub fn bytes_stream(data: Bytes) -> ByteStream {
    Box::pin(stream::once(async move { Ok(data) }))
}

/// Durable blob storage keyed by path.
///
/// `write` must be atomic from the caller's perspective: once it returns
/// `Ok`, readers see the complete object and never a partial one.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Store `body` under `path`, replacing any existing object. Returns the byte count.
    async fn write(&self, path: &str, body: ByteStream, content_type: &str) -> io::Result<u64>;

    /// Open an existing object for sequential reading.
    async fn open_read(&self, path: &str) -> io::Result<ByteStream>;

    /// Remove an object. Deleting a missing object is not an error.
    async fn delete(&self, path: &str) -> io::Result<()>;
}

const MAX_KEY_LEN: usize = 1024;

/// Local-disk `ChunkStore`.
#[derive(Clone, Debug)]
pub struct FsChunkStore {
    base_path: PathBuf,
}

impl FsChunkStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Reject keys that could escape `base_path`.
    fn ensure_key_safe(key: &str) -> io::Result<()> {
        let unsafe_key = key.is_empty()
            || key.len() > MAX_KEY_LEN
            || key.starts_with('/')
            || key.split('/').any(|segment| segment.is_empty() || segment == "..")
            || key
                .bytes()
                .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0');
        if unsafe_key {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("invalid storage key `{}`", key),
            ));
        }
        Ok(())
    }

    fn object_path(&self, key: &str) -> io::Result<PathBuf> {
        Self::ensure_key_safe(key)?;
        Ok(self.base_path.join(key))
    }

    /// Remove empty directories from `start` up to (not including) `stop`.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ChunkStore for FsChunkStore {
    async fn write(&self, path: &str, body: ByteStream, content_type: &str) -> io::Result<u64> {
        let file_path = self.object_path(path)?;
        let parent = file_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| io::Error::other("object path missing parent directory"))?;
        fs::create_dir_all(&parent).await?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let written = match stream_to_file(&tmp_path, body).await {
            Ok(written) => written,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(err);
            }
        };

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }

        debug!(
            path,
            content_type,
            bytes = written,
            "stored object {}",
            file_path.display()
        );
        Ok(written)
    }

    async fn open_read(&self, path: &str) -> io::Result<ByteStream> {
        let file = File::open(self.object_path(path)?).await?;
        Ok(Box::pin(ReaderStream::new(file)))
    }

    async fn delete(&self, path: &str) -> io::Result<()> {
        let file_path = self.object_path(path)?;
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed object {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("object {} already missing", file_path.display());
                return Ok(());
            }
            Err(err) => return Err(err),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent, &self.base_path).await;
        }
        Ok(())
    }
}

/// Stream `body` into a new file at `path`, flushing and fsyncing before returning.
async fn stream_to_file(path: &Path, mut body: ByteStream) -> io::Result<u64> {
    let mut file = File::create(path).await?;
    let mut written: u64 = 0;
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        written += chunk.len() as u64;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}

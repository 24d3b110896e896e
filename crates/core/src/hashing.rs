use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::{Error, Result};

const READ_BUF_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigest {
    pub size: u64,
    /// Lowercase hex SHA-256 of the whole file.
    pub hash: String,
}

pub fn sha256_reader<R: Read>(mut reader: R) -> io::Result<(u64, String)> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BUF_BYTES];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((total, hex::encode(hasher.finalize())))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn digest_file_blocking(path: &Path) -> Result<FileDigest> {
    let file = File::open(path)?;
    let (size, hash) = sha256_reader(file)?;
    Ok(FileDigest { size, hash })
}

pub async fn digest_file(path: &Path) -> Result<FileDigest> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || digest_file_blocking(&path))
        .await
        .map_err(|e| Error::Io(io::Error::other(e)))?
}

/// One contiguous byte range of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub index: u64,
    pub offset: u64,
    pub len: u64,
    pub is_last: bool,
}

/// Partition of `[0, total_size)` into `unit_size` ranges, the last one
/// holding the remainder. Iteration is computed from offsets, so a plan can be
/// walked any number of times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    total_size: u64,
    unit_size: u64,
}

impl ChunkPlan {
    pub fn new(total_size: u64, unit_size: u64) -> Result<Self> {
        if unit_size == 0 {
            return Err(Error::InvalidConfig {
                message: "chunk unit size must be > 0".to_string(),
            });
        }
        Ok(Self {
            total_size,
            unit_size,
        })
    }

    pub fn chunk_count(&self) -> u64 {
        self.total_size.div_ceil(self.unit_size)
    }

    pub fn range(&self, index: u64) -> Option<ChunkRange> {
        let count = self.chunk_count();
        if index >= count {
            return None;
        }
        let offset = index * self.unit_size;
        let len = self.unit_size.min(self.total_size - offset);
        Some(ChunkRange {
            index,
            offset,
            len,
            is_last: index + 1 == count,
        })
    }

    pub fn ranges(&self) -> ChunkRanges {
        ChunkRanges {
            plan: *self,
            next: 0,
        }
    }
}

impl IntoIterator for ChunkPlan {
    type Item = ChunkRange;
    type IntoIter = ChunkRanges;

    fn into_iter(self) -> Self::IntoIter {
        self.ranges()
    }
}

#[derive(Debug, Clone)]
pub struct ChunkRanges {
    plan: ChunkPlan,
    next: u64,
}

impl Iterator for ChunkRanges {
    type Item = ChunkRange;

    fn next(&mut self) -> Option<Self::Item> {
        let range = self.plan.range(self.next)?;
        self.next += 1;
        Some(range)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.plan.chunk_count().saturating_sub(self.next) as usize;
        (left, Some(left))
    }
}

impl ExactSizeIterator for ChunkRanges {}

/// Owns a temp file path and removes it when dropped.
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
}

impl TempArtifact {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!(
                    event = "chunk.artifact.removed",
                    path = %self.path.display(),
                    "chunk.artifact.removed"
                );
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    event = "chunk.artifact.remove_failed",
                    path = %self.path.display(),
                    error = %e,
                    "chunk.artifact.remove_failed"
                );
            }
        }
    }
}

/// A materialised range of a file, ready to be sent.
#[derive(Debug)]
pub struct Chunk {
    pub index: u64,
    pub offset: u64,
    pub len: u64,
    pub hash: String,
    pub is_last: bool,
    artifact: TempArtifact,
}

impl Chunk {
    pub fn temp_path(&self) -> &Path {
        self.artifact.path()
    }

    /// Copies `range` of `source` into a fresh temp file under `temp_dir` and
    /// hashes the staged copy.
    pub fn materialize_blocking(
        source: &Path,
        range: ChunkRange,
        temp_dir: &Path,
        transfer_tag: &str,
    ) -> Result<Self> {
        let artifact = TempArtifact {
            path: temp_dir.join(format!("mirrorback-{transfer_tag}-{}.part", range.index)),
        };

        let mut input = File::open(source)?;
        input.seek(SeekFrom::Start(range.offset))?;
        let mut output = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(artifact.path())?;
        let copied = io::copy(&mut input.take(range.len), &mut output)?;
        output.flush()?;
        drop(output);

        if copied != range.len {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "chunk {} short read: expected {} bytes, got {copied}",
                    range.index, range.len
                ),
            )));
        }

        let (_, hash) = sha256_reader(File::open(artifact.path())?)?;
        Ok(Self {
            index: range.index,
            offset: range.offset,
            len: range.len,
            hash,
            is_last: range.is_last,
            artifact,
        })
    }

    pub async fn materialize(
        source: &Path,
        range: ChunkRange,
        temp_dir: &Path,
        transfer_tag: &str,
    ) -> Result<Self> {
        let source = source.to_path_buf();
        let temp_dir = temp_dir.to_path_buf();
        let tag = transfer_tag.to_string();
        tokio::task::spawn_blocking(move || Self::materialize_blocking(&source, range, &temp_dir, &tag))
            .await
            .map_err(|e| Error::Io(io::Error::other(e)))?
    }

    /// Reads the staged body and refreshes `hash` from it, so the hash always
    /// describes exactly the bytes about to be sent.
    pub async fn read_body(&mut self) -> Result<Vec<u8>> {
        let path = self.artifact.path().to_path_buf();
        let body = tokio::task::spawn_blocking(move || std::fs::read(path))
            .await
            .map_err(|e| Error::Io(io::Error::other(e)))??;
        if body.len() as u64 != self.len {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "chunk {} artifact changed size: expected {} bytes, found {}",
                    self.index,
                    self.len,
                    body.len()
                ),
            )));
        }
        self.hash = sha256_hex(&body);
        Ok(body)
    }
}

use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::TransferError;
use crate::plan::ChunkRange;

/// A chunk of file data ready to be sent.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Byte range within the file.
    pub range: ChunkRange,
    /// Raw chunk data, exactly `range.len()` bytes.
    pub data: Vec<u8>,
}

/// Immutable reference to a local file selected for upload.
///
/// The length is captured once at open time and fixes the chunk size and
/// the `total` part of every `X-Content-Range` header for the upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    path: PathBuf,
    name: String,
    length: u64,
}

impl FileHandle {
    /// Reads metadata for `path`. Directories and other non-regular files
    /// are rejected.
    pub fn open(path: &Path) -> Result<Self, TransferError> {
        let meta = std::fs::metadata(path)?;
        if !meta.is_file() {
            return Err(TransferError::NotAFile(path.display().to_string()));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            path: path.to_path_buf(),
            name,
            length: meta.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name without directories, as sent in `Content-Disposition`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Length in bytes at open time.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Whether the file is still present on disk.
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Reads exactly the bytes of `range`.
    ///
    /// The file is opened and closed within the call. A file that shrank
    /// below the range yields an `UnexpectedEof` I/O error.
    pub fn read_range(&self, range: ChunkRange) -> Result<Chunk, TransferError> {
        let mut file = std::fs::File::open(&self.path)?;
        file.seek(SeekFrom::Start(range.start))?;
        let mut data = vec![0u8; range.len() as usize];
        file.read_exact(&mut data)?;
        Ok(Chunk { range, data })
    }
}

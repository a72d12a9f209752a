//! Chunked file transfer primitives with resume support.
//!
//! Everything in this crate is synchronous and free of network concerns:
//! sampling a file into a [`Fingerprint`], deriving the chunk size for a
//! file, planning the next byte range from a server range-report, and
//! reading that range back from disk.

mod chunked;
mod fingerprint;
mod plan;
mod policy;

pub use chunked::{Chunk, FileHandle};
pub use fingerprint::{Fingerprint, fingerprint, try_fingerprint};
pub use plan::{ChunkPlan, ChunkRange, ReportedRange, chunk_size, next_range, parse_range_report};
pub use policy::UploadPolicy;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a regular file: {0}")]
    NotAFile(String),
}

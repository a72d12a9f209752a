//! Resumable chunked HTTP uploads.
//!
//! This crate implements the **upload lifecycle** on top of
//! `chunkload-transfer` and `chunkload-resume-store`. Transport is behind
//! the [`ChunkTransport`] trait; [`HttpTransport`] is the reqwest-backed
//! implementation used in production.
//!
//! # Pipeline
//!
//! 1. **Enqueue**: open the file, fingerprint it, look up resume state
//! 2. **Start**: attach the upload URL and spawn the session task
//! 3. **Upload**: send chunks, re-plan from each range-report, retry on failure
//! 4. **Finish**: delete resume state on completion, keep it otherwise

pub mod config;
pub mod error;
pub mod machine;
pub mod registry;
pub mod transport;
pub mod types;

// Re-export primary types for convenience.
pub use chunkload_resume_store::{ResumeRecord, ResumeStore, StoreLimits};
pub use chunkload_transfer::{ChunkRange, FileHandle, Fingerprint, UploadPolicy};
pub use config::ChunkloadConfig;
pub use error::{ChunkFailure, ErrorKind, UploadError};
pub use machine::{Step, UploadContext, UploadSession};
pub use registry::UploadRegistry;
pub use transport::{ChunkRequest, ChunkTransport, HttpTransport};
pub use types::{UploadEvent, UploadStatus};

//! Part transfer layer: storage client seam, byte sources, and the
//! single-part uploader.
//!
//! Persistence is deliberately absent here — the engine records every
//! transition. This crate only moves bytes: presign a part, read its range
//! from the source, transmit it, and hand back the backend's integrity
//! token.

mod client;
mod error;
mod source;
mod uploader;

pub use client::{PresignedPart, SourceMeta, StorageClient};
pub use error::TransferError;
pub use source::{BytesSource, FileSource, UploadSource};
pub use uploader::PartUploader;

//! Object-storage client seam.
//!
//! The host app implements [`StorageClient`] on top of its actual backend
//! (S3-style HTTP, gRPC, a device agent — whatever issues signed part
//! targets and integrity tokens). Using a trait keeps the engine decoupled
//! from transport and testable with mocks.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TransferError;

/// Metadata about the source file, passed to `initiate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMeta {
    pub file_name: String,
    pub total_bytes: u64,
    pub content_type: Option<String>,
}

/// Signed upload target for one part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignedPart {
    pub url: String,
    pub headers: HashMap<String, String>,
}

/// The five backend operations the orchestrator consumes.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Starts a multipart upload; returns the backend upload id.
    async fn initiate(&self, meta: &SourceMeta) -> Result<String, TransferError>;

    /// Issues a signed target for one part.
    async fn presign_part(
        &self,
        remote_upload_id: &str,
        part_number: u32,
    ) -> Result<PresignedPart, TransferError>;

    /// Transmits raw part bytes to a signed target; returns the backend's
    /// integrity token (ETag-equivalent) for the part.
    async fn upload_bytes(
        &self,
        target: &PresignedPart,
        body: Bytes,
    ) -> Result<String, TransferError>;

    /// Finalizes the upload from the ordered `(part_number, token)` list.
    async fn complete(
        &self,
        remote_upload_id: &str,
        parts: &[(u32, String)],
    ) -> Result<(), TransferError>;

    /// Abandons the upload. Failures are tolerable — backends expire
    /// incomplete multipart uploads on their own.
    async fn abort(&self, remote_upload_id: &str) -> Result<(), TransferError>;
}

//! Uploads a single part: presign, read the range, transmit, return the
//! integrity token.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::StorageClient;
use crate::error::TransferError;
use crate::source::UploadSource;
use chunklift_model::ByteRange;

/// Stateless single-part uploader shared by all of a session's part tasks.
pub struct PartUploader {
    client: Arc<dyn StorageClient>,
    source: Arc<dyn UploadSource>,
    network_timeout: Duration,
}

impl PartUploader {
    pub fn new(
        client: Arc<dyn StorageClient>,
        source: Arc<dyn UploadSource>,
        network_timeout: Duration,
    ) -> Self {
        Self {
            client,
            source,
            network_timeout,
        }
    }

    /// Runs one upload attempt for one part.
    ///
    /// Each network call is bounded by the configured timeout (elapse maps
    /// to [`TransferError::Timeout`]) and raced against `cancel`. No state
    /// is persisted here; the caller records the outcome.
    pub async fn upload_part(
        &self,
        remote_upload_id: &str,
        part_number: u32,
        range: &ByteRange,
        cancel: &CancellationToken,
    ) -> Result<String, TransferError> {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        let target = self
            .bounded(cancel, self.client.presign_part(remote_upload_id, part_number))
            .await?;

        let body = self.source.read_range(range).await?;
        debug!(
            upload = %remote_upload_id,
            part = part_number,
            bytes = body.len(),
            "transmitting part"
        );

        let token = self
            .bounded(cancel, self.client.upload_bytes(&target, body))
            .await?;
        Ok(token)
    }

    /// Races a network call against the timeout and the cancellation token.
    async fn bounded<T>(
        &self,
        cancel: &CancellationToken,
        call: impl Future<Output = Result<T, TransferError>>,
    ) -> Result<T, TransferError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(TransferError::Cancelled),
            outcome = tokio::time::timeout(self.network_timeout, call) => match outcome {
                Ok(result) => result,
                Err(_) => Err(TransferError::Timeout(self.network_timeout)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{PresignedPart, SourceMeta};
    use crate::source::BytesSource;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Scripted client: records calls, optionally stalls or fails.
    struct ScriptedClient {
        uploads: Mutex<Vec<(u32, usize)>>,
        stall_upload: bool,
        fail_presign: Option<TransferError>,
    }

    impl ScriptedClient {
        fn ok() -> Self {
            Self {
                uploads: Mutex::new(Vec::new()),
                stall_upload: false,
                fail_presign: None,
            }
        }
    }

    #[async_trait]
    impl StorageClient for ScriptedClient {
        async fn initiate(&self, _meta: &SourceMeta) -> Result<String, TransferError> {
            Ok("remote-1".into())
        }

        async fn presign_part(
            &self,
            _remote_upload_id: &str,
            part_number: u32,
        ) -> Result<PresignedPart, TransferError> {
            if let Some(e) = &self.fail_presign {
                return Err(e.clone());
            }
            Ok(PresignedPart {
                url: format!("https://backend/part/{part_number}"),
                headers: HashMap::new(),
            })
        }

        async fn upload_bytes(
            &self,
            target: &PresignedPart,
            body: Bytes,
        ) -> Result<String, TransferError> {
            if self.stall_upload {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            let part: u32 = target.url.rsplit('/').next().unwrap().parse().unwrap();
            self.uploads.lock().unwrap().push((part, body.len()));
            Ok(format!("etag-{part}"))
        }

        async fn complete(
            &self,
            _remote_upload_id: &str,
            _parts: &[(u32, String)],
        ) -> Result<(), TransferError> {
            Ok(())
        }

        async fn abort(&self, _remote_upload_id: &str) -> Result<(), TransferError> {
            Ok(())
        }
    }

    fn uploader(client: ScriptedClient, timeout: Duration) -> PartUploader {
        let source = Arc::new(BytesSource::new(vec![9u8; 4096]));
        PartUploader::new(Arc::new(client), source, timeout)
    }

    #[tokio::test]
    async fn uploads_exact_range_and_returns_token() {
        let client = ScriptedClient::ok();
        let up = uploader(client, Duration::from_secs(5));
        let token = up
            .upload_part(
                "remote-1",
                2,
                &ByteRange::new(1024, 3072),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(token, "etag-2");
    }

    #[tokio::test]
    async fn timeout_maps_to_timeout_error() {
        let client = ScriptedClient {
            stall_upload: true,
            ..ScriptedClient::ok()
        };
        let up = uploader(client, Duration::from_millis(20));
        let err = up
            .upload_part(
                "remote-1",
                1,
                &ByteRange::new(0, 1024),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Timeout(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn cancellation_wins_over_stalled_upload() {
        let client = ScriptedClient {
            stall_upload: true,
            ..ScriptedClient::ok()
        };
        let up = uploader(client, Duration::from_secs(3600));
        let cancel = CancellationToken::new();
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                cancel.cancel();
            })
        };
        let err = up
            .upload_part("remote-1", 1, &ByteRange::new(0, 1024), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Cancelled));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn already_cancelled_short_circuits() {
        let client = ScriptedClient::ok();
        let up = uploader(client, Duration::from_secs(5));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = up
            .upload_part("remote-1", 1, &ByteRange::new(0, 1024), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Cancelled));
    }

    #[tokio::test]
    async fn presign_failure_propagates() {
        let client = ScriptedClient {
            fail_presign: Some(TransferError::Permanent("403".into())),
            ..ScriptedClient::ok()
        };
        let up = uploader(client, Duration::from_secs(5));
        let err = up
            .upload_part(
                "remote-1",
                1,
                &ByteRange::new(0, 1024),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Permanent(_)));
    }
}

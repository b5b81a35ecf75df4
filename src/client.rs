use std::sync::Arc;

use tracing::debug;

use crate::apply::ApplyReport;
use crate::document::Document;
use crate::envelope::SyncMessage;
use crate::error::SyncError;
use crate::kernel::SketchKernel;
use crate::model::board::BoardSnapshot;
use crate::model::diff::BoardDiff;
use crate::owner::{DocumentOwner, ScanOutcome, DEFAULT_QUEUE_CAPACITY};
use crate::source::DesignSource;

/// Async handle to a document running on its own owner thread.
///
/// Clones share the same document. The owner thread exits once every clone is dropped.
#[derive(Clone, Debug)]
pub struct SyncClient {
    inner: Arc<ClientInner>,
}

#[derive(Debug)]
struct ClientInner {
    owner: DocumentOwner,
    queue_capacity: usize,
    worker_name: String,
}

#[derive(Clone, Debug)]
struct ClientConfig {
    queue_capacity: usize,
    worker_name: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ClientBuilder {
    config: ClientConfig,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig {
                queue_capacity: DEFAULT_QUEUE_CAPACITY,
                worker_name: None,
            },
        }
    }

    /// Number of requests that may wait for the owner before senders block.
    pub fn queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.config.queue_capacity = queue_capacity;
        self
    }

    pub fn worker_name(mut self, worker_name: impl Into<String>) -> Self {
        self.config.worker_name = Some(worker_name.into());
        self
    }

    /// Moves `document` onto a new owner thread.
    pub fn spawn<K>(self, document: Document<K>) -> Result<SyncClient, SyncError>
    where
        K: SketchKernel + Default + Send + 'static,
    {
        let queue_capacity = self.config.queue_capacity;
        if queue_capacity == 0 {
            return Err(SyncError::Config {
                reason: "queue capacity must be at least 1".to_string(),
            });
        }

        let worker_name = self
            .config
            .worker_name
            .unwrap_or_else(default_worker_name);
        let owner = DocumentOwner::spawn(document, queue_capacity, worker_name.clone())?;

        Ok(SyncClient {
            inner: Arc::new(ClientInner {
                owner,
                queue_capacity,
                worker_name,
            }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncClient {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Spawns an owner for `document` with default settings.
    pub fn spawn<K>(document: Document<K>) -> Result<Self, SyncError>
    where
        K: SketchKernel + Default + Send + 'static,
    {
        ClientBuilder::new().spawn(document)
    }

    pub fn queue_capacity(&self) -> usize {
        self.inner.queue_capacity
    }

    pub fn worker_name(&self) -> &str {
        &self.inner.worker_name
    }

    /// Runs change detection against `source` and applies the result to the model.
    pub async fn scan<S>(&self, source: S) -> Result<ScanOutcome, SyncError>
    where
        S: DesignSource + Send + 'static,
    {
        self.inner.owner.scan(Box::new(source)).await
    }

    /// Applies a diff received from a peer.
    pub async fn apply_diff(&self, diff: BoardDiff) -> Result<ApplyReport, SyncError> {
        self.inner.owner.apply_diff(diff).await
    }

    /// Replaces the document with a full snapshot received from a peer.
    pub async fn load_board(&self, snapshot: BoardSnapshot) -> Result<ApplyReport, SyncError> {
        self.inner.owner.load_board(snapshot).await
    }

    pub async fn snapshot(&self) -> Result<BoardSnapshot, SyncError> {
        self.inner.owner.snapshot().await
    }

    /// Message carrying the full snapshot, for a peer that just connected.
    pub async fn board_message(&self) -> Result<SyncMessage, SyncError> {
        Ok(SyncMessage::Board(self.snapshot().await?))
    }

    /// Scans `source` and wraps the diff for sending. Returns `None` when nothing changed.
    pub async fn scan_message<S>(&self, source: S) -> Result<Option<SyncMessage>, SyncError>
    where
        S: DesignSource + Send + 'static,
    {
        let outcome = self.scan(source).await?;
        if outcome.diff.is_empty() {
            return Ok(None);
        }

        Ok(Some(SyncMessage::Diff(outcome.diff)))
    }

    /// Applies a message received from a peer.
    ///
    /// Returns `None` for a disconnect, which carries nothing to apply.
    pub async fn handle_message(
        &self,
        message: SyncMessage,
    ) -> Result<Option<ApplyReport>, SyncError> {
        match message {
            SyncMessage::Board(snapshot) => self.load_board(snapshot).await.map(Some),
            SyncMessage::Diff(diff) => self.apply_diff(diff).await.map(Some),
            SyncMessage::Disconnect => {
                debug!(worker = %self.inner.worker_name, "peer disconnected");
                Ok(None)
            }
        }
    }
}

fn default_worker_name() -> String {
    format!("kicad-sync-document-{}", std::process::id())
}

#[cfg(test)]
mod tests {
    use super::{ClientBuilder, SyncClient};
    use crate::document::Document;
    use crate::envelope::{decode_frame, encode_frame, SyncMessage};
    use crate::error::SyncError;
    use crate::kernel::MemorySketch;
    use crate::model::board::BoardSnapshot;
    use crate::source::fixtures::demo_board;

    fn document() -> Document<MemorySketch> {
        let (document, _) =
            Document::from_source(MemorySketch::new(), &demo_board()).expect("board should build");
        document
    }

    #[test]
    fn builder_defaults() {
        let client = SyncClient::spawn(document()).expect("owner should start");
        assert_eq!(client.queue_capacity(), 64);
        assert!(client.worker_name().starts_with("kicad-sync-document-"));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let result = ClientBuilder::new().queue_capacity(0).spawn(document());
        assert!(matches!(result, Err(SyncError::Config { .. })));
    }

    #[tokio::test]
    async fn unchanged_source_yields_no_message() {
        let client = SyncClient::spawn(document()).expect("owner should start");
        let message = client.scan_message(demo_board()).await.expect("scan should run");
        assert!(message.is_none());
    }

    #[tokio::test]
    async fn peer_follows_local_edits_through_frames() {
        let local = ClientBuilder::new()
            .worker_name("local")
            .spawn(document())
            .expect("owner should start");
        let general = local.snapshot().await.expect("snapshot").general;
        let (empty, _) = Document::from_snapshot(MemorySketch::new(), BoardSnapshot::new(general));
        let remote = ClientBuilder::new()
            .worker_name("remote")
            .queue_capacity(4)
            .spawn(empty)
            .expect("owner should start");

        let initial = encode_frame(&local.board_message().await.expect("board message"))
            .expect("frame should encode");
        let report = remote
            .handle_message(decode_frame(&initial).expect("frame should decode"))
            .await
            .expect("board should load")
            .expect("board message carries a report");
        assert!(report.is_clean(), "{report:?}");

        let mut edited = demo_board();
        edited.footprints[0].pads[1].position = Some([13_000_000, 10_000_000]);
        edited.tracks.clear();
        let message = local
            .scan_message(edited)
            .await
            .expect("scan should run")
            .expect("edit should produce a diff");
        assert!(matches!(message, SyncMessage::Diff(_)));

        let frame = encode_frame(&message).expect("frame should encode");
        remote
            .handle_message(decode_frame(&frame).expect("frame should decode"))
            .await
            .expect("diff should apply");

        assert_eq!(
            remote.snapshot().await.expect("snapshot"),
            local.snapshot().await.expect("snapshot")
        );
        assert!(remote
            .handle_message(SyncMessage::Disconnect)
            .await
            .expect("disconnect is accepted")
            .is_none());
    }
}

use std::sync::Arc;

use tokio::runtime::Runtime;

use crate::apply::ApplyReport;
use crate::client::{ClientBuilder, SyncClient};
use crate::document::Document;
use crate::envelope::SyncMessage;
use crate::error::SyncError;
use crate::kernel::SketchKernel;
use crate::model::board::BoardSnapshot;
use crate::model::diff::BoardDiff;
use crate::owner::ScanOutcome;
use crate::source::DesignSource;

/// Blocking wrapper over [`SyncClient`] for callers without an async runtime.
///
/// Methods must not be called from inside another tokio runtime.
#[derive(Clone, Debug)]
pub struct SyncClientBlocking {
    inner: SyncClient,
    runtime: Arc<Runtime>,
}

#[derive(Clone, Debug, Default)]
pub struct SyncClientBlockingBuilder {
    inner: ClientBuilder,
}

impl SyncClientBlockingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.inner = self.inner.queue_capacity(queue_capacity);
        self
    }

    pub fn worker_name(mut self, worker_name: impl Into<String>) -> Self {
        self.inner = self.inner.worker_name(worker_name);
        self
    }

    pub fn spawn<K>(self, document: Document<K>) -> Result<SyncClientBlocking, SyncError>
    where
        K: SketchKernel + Default + Send + 'static,
    {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .map_err(|err| SyncError::RuntimeJoin(err.to_string()))?;
        let inner = self.inner.spawn(document)?;
        Ok(SyncClientBlocking {
            inner,
            runtime: Arc::new(runtime),
        })
    }
}

impl SyncClientBlocking {
    pub fn builder() -> SyncClientBlockingBuilder {
        SyncClientBlockingBuilder::new()
    }

    pub fn spawn<K>(document: Document<K>) -> Result<Self, SyncError>
    where
        K: SketchKernel + Default + Send + 'static,
    {
        SyncClientBlockingBuilder::new().spawn(document)
    }

    pub fn inner(&self) -> &SyncClient {
        &self.inner
    }

    pub fn scan<S>(&self, source: S) -> Result<ScanOutcome, SyncError>
    where
        S: DesignSource + Send + 'static,
    {
        self.runtime.block_on(self.inner.scan(source))
    }

    pub fn apply_diff(&self, diff: BoardDiff) -> Result<ApplyReport, SyncError> {
        self.runtime.block_on(self.inner.apply_diff(diff))
    }

    pub fn load_board(&self, snapshot: BoardSnapshot) -> Result<ApplyReport, SyncError> {
        self.runtime.block_on(self.inner.load_board(snapshot))
    }

    pub fn snapshot(&self) -> Result<BoardSnapshot, SyncError> {
        self.runtime.block_on(self.inner.snapshot())
    }

    pub fn scan_message<S>(&self, source: S) -> Result<Option<SyncMessage>, SyncError>
    where
        S: DesignSource + Send + 'static,
    {
        self.runtime.block_on(self.inner.scan_message(source))
    }

    pub fn handle_message(&self, message: SyncMessage) -> Result<Option<ApplyReport>, SyncError> {
        self.runtime.block_on(self.inner.handle_message(message))
    }
}

#[cfg(test)]
mod tests {
    use super::SyncClientBlocking;
    use crate::document::Document;
    use crate::kernel::MemorySketch;
    use crate::source::BoardFile;

    #[test]
    fn blocking_scan_reports_new_via() {
        let empty = BoardFile::from_json(r#"{"name": "blocking", "thickness": 1600000}"#)
            .expect("board should parse");
        let (document, _) =
            Document::from_source(MemorySketch::new(), &empty).expect("board should build");
        let client = SyncClientBlocking::builder()
            .worker_name("blocking-test")
            .spawn(document)
            .expect("owner should start");

        let with_via = BoardFile::from_json(
            r#"{"thickness": 1600000,
                "tracks": [{"uuid": "V9", "kind": "via", "position": [0, 0], "drill": 300000}]}"#,
        )
        .expect("board should parse");
        let outcome = client.scan(with_via).expect("scan should run");

        let vias = outcome.diff.vias.expect("via class should be present");
        assert_eq!(vias.added.len(), 1);
        assert_eq!(vias.added[0].kiid, "V9");
        assert_eq!(client.snapshot().expect("snapshot").vias.len(), 1);
    }
}

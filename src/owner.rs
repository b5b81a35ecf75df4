use std::thread;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::apply::ApplyReport;
use crate::document::Document;
use crate::error::SyncError;
use crate::kernel::SketchKernel;
use crate::model::board::BoardSnapshot;
use crate::model::diff::BoardDiff;
use crate::source::DesignSource;

pub(crate) const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Result of one detection pass run by the document owner.
#[derive(Debug)]
pub struct ScanOutcome {
    /// What changed; this is what peers should receive.
    pub diff: BoardDiff,
    pub report: ApplyReport,
}

/// Handle to the thread that owns a [`Document`]. Every mutation is queued and runs to
/// completion before the next one starts.
#[derive(Debug)]
pub(crate) struct DocumentOwner {
    request_tx: mpsc::Sender<Command>,
}

enum Command {
    Scan {
        source: Box<dyn DesignSource + Send>,
        reply: oneshot::Sender<ScanOutcome>,
    },
    ApplyDiff {
        diff: BoardDiff,
        reply: oneshot::Sender<ApplyReport>,
    },
    LoadBoard {
        snapshot: BoardSnapshot,
        reply: oneshot::Sender<ApplyReport>,
    },
    Snapshot {
        reply: oneshot::Sender<BoardSnapshot>,
    },
}

impl DocumentOwner {
    pub(crate) fn spawn<K>(
        document: Document<K>,
        queue_capacity: usize,
        worker_name: String,
    ) -> Result<Self, SyncError>
    where
        K: SketchKernel + Default + Send + 'static,
    {
        let (request_tx, mut request_rx) = mpsc::channel::<Command>(queue_capacity);

        let name = worker_name.clone();
        thread::Builder::new()
            .name(worker_name)
            .spawn(move || {
                info!(worker = %name, "document owner started");
                let mut document = document;
                while let Some(command) = request_rx.blocking_recv() {
                    run_command(&mut document, command);
                }
                info!(worker = %name, "document owner stopped");
            })
            .map_err(|err| SyncError::Config {
                reason: format!("could not start document owner: {err}"),
            })?;

        Ok(Self { request_tx })
    }

    pub(crate) async fn scan(
        &self,
        source: Box<dyn DesignSource + Send>,
    ) -> Result<ScanOutcome, SyncError> {
        self.request(|reply| Command::Scan { source, reply }).await
    }

    pub(crate) async fn apply_diff(&self, diff: BoardDiff) -> Result<ApplyReport, SyncError> {
        self.request(|reply| Command::ApplyDiff { diff, reply }).await
    }

    pub(crate) async fn load_board(
        &self,
        snapshot: BoardSnapshot,
    ) -> Result<ApplyReport, SyncError> {
        self.request(|reply| Command::LoadBoard { snapshot, reply })
            .await
    }

    pub(crate) async fn snapshot(&self) -> Result<BoardSnapshot, SyncError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SyncError> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.request_tx
            .send(command(reply_tx))
            .await
            .map_err(|_| SyncError::OwnerClosed)?;

        reply_rx.await.map_err(|_| SyncError::OwnerClosed)
    }
}

fn run_command<K: SketchKernel + Default>(document: &mut Document<K>, command: Command) {
    match command {
        Command::Scan { source, reply } => {
            let (diff, report) = document.scan(source.as_ref());
            debug!(changed = !diff.is_empty(), "scan finished");
            let _ = reply.send(ScanOutcome { diff, report });
        }
        Command::ApplyDiff { diff, reply } => {
            let _ = reply.send(document.apply_remote(&diff));
        }
        Command::LoadBoard { snapshot, reply } => {
            let _ = reply.send(document.load(snapshot));
        }
        Command::Snapshot { reply } => {
            let _ = reply.send(document.snapshot().clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::DocumentOwner;
    use crate::error::SyncError;

    #[tokio::test]
    async fn closed_queue_reports_owner_closed() {
        let (request_tx, request_rx) = mpsc::channel(1);
        drop(request_rx);
        let owner = DocumentOwner { request_tx };

        assert!(matches!(owner.snapshot().await, Err(SyncError::OwnerClosed)));
    }
}

//! One synchronised board: its snapshot and its mechanical model, mutated only through
//! `&mut self` so detection and application never overlap.

use tracing::info;

use crate::apply::{apply_diff, ApplyReport};
use crate::detect::{detect_changes, full_scan};
use crate::error::SyncError;
use crate::kernel::SketchKernel;
use crate::mechanical::MechanicalModel;
use crate::model::board::BoardSnapshot;
use crate::model::diff::BoardDiff;
use crate::source::DesignSource;

#[derive(Debug)]
pub struct Document<K> {
    snapshot: BoardSnapshot,
    model: MechanicalModel<K>,
}

impl<K: SketchKernel> Document<K> {
    /// Builds the model for `snapshot` on top of an empty `kernel`.
    ///
    /// Entities that fail to build are left out of the document's snapshot, so the next
    /// scan reports them as added again.
    pub fn from_snapshot(kernel: K, snapshot: BoardSnapshot) -> (Self, ApplyReport) {
        let mut model = MechanicalModel::new(kernel, &snapshot.general);
        let mut built = BoardSnapshot::new(snapshot.general.clone());
        let report = apply_diff(&mut model, &mut built, &snapshot.as_added_diff());

        info!(
            pcb_name = %built.general.pcb_name,
            pcb_id = %built.general.pcb_id,
            entities = built.entity_count(),
            skipped = report.skipped.len(),
            "board built"
        );
        (
            Self {
                snapshot: built,
                model,
            },
            report,
        )
    }

    /// Scans `source` from scratch and builds the model for it.
    pub fn from_source(
        kernel: K,
        source: &dyn DesignSource,
    ) -> Result<(Self, ApplyReport), SyncError> {
        Ok(Self::from_snapshot(kernel, full_scan(source)?))
    }

    /// Detects what changed in `source` and applies it to the model.
    ///
    /// The returned diff is what should be sent to peers.
    pub fn scan(&mut self, source: &dyn DesignSource) -> (BoardDiff, ApplyReport) {
        let diff = detect_changes(source, &mut self.snapshot);
        let report = apply_diff(&mut self.model, &mut self.snapshot, &diff);
        (diff, report)
    }

    /// Applies a diff received from a peer.
    pub fn apply_remote(&mut self, diff: &BoardDiff) -> ApplyReport {
        apply_diff(&mut self.model, &mut self.snapshot, diff)
    }

    pub fn snapshot(&self) -> &BoardSnapshot {
        &self.snapshot
    }

    pub fn model(&self) -> &MechanicalModel<K> {
        &self.model
    }

    pub fn kernel(&self) -> &K {
        &self.model.kernel
    }

    pub fn into_parts(self) -> (BoardSnapshot, MechanicalModel<K>) {
        (self.snapshot, self.model)
    }
}

impl<K: SketchKernel + Default> Document<K> {
    /// Throws the model away and builds it again from the snapshot.
    pub fn rebuild(&mut self) -> ApplyReport {
        self.load(self.snapshot.clone())
    }

    /// Replaces the whole document with `snapshot` (initial transfer from a peer).
    pub fn load(&mut self, snapshot: BoardSnapshot) -> ApplyReport {
        let (document, report) = Self::from_snapshot(K::default(), snapshot);
        *self = document;
        report
    }
}

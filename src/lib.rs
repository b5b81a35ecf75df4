//! # KiCad Sync RS
//!
//! **Keeps a KiCad board and a parametric mechanical sketch of it in step, one diff at a time.**
//!
//! Each pass over the board export is compared against a stored snapshot. Only what
//! changed is applied to the sketch, so constraints the mechanical side added survive
//! unrelated edits. The same diff can be framed and sent to a peer that holds its own copy.
//!
//! ## Quickstart (async)
//!
//! ```no_run
//! use kicad_sync_rs::{BoardFile, Document, MemorySketch, SyncClient};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), kicad_sync_rs::SyncError> {
//!     let board = BoardFile::open("demo.board.json")?;
//!     let (document, _) = Document::from_source(MemorySketch::new(), &board)?;
//!     let client = SyncClient::spawn(document)?;
//!
//!     let edited = BoardFile::open("demo.board.json")?;
//!     let outcome = client.scan(edited).await?;
//!     println!("changed classes: {:?}", outcome.diff.classes());
//!     Ok(())
//! }
//! ```
//!
//! ## Quickstart (blocking)
//!
//! ```no_run
//! # #[cfg(feature = "blocking")]
//! # fn run() -> Result<(), kicad_sync_rs::SyncError> {
//! use kicad_sync_rs::{BoardFile, Document, MemorySketch, SyncClientBlocking};
//! let board = BoardFile::open("demo.board.json")?;
//! let (document, _) = Document::from_source(MemorySketch::new(), &board)?;
//! let client = SyncClientBlocking::spawn(document)?;
//! println!("entities: {}", client.snapshot()?.entity_count());
//! # Ok(())
//! # }
//! ```
//!
//! Architecture layers:
//! - design source and snapshot model
//! - change detector
//! - diff applier over the identity registry, containers and sketch kernel
//! - document owner thread and clients

/// Change application: diffs into sketch geometry, constraints and containers.
pub mod apply;
/// Constraint naming and composition helpers.
pub mod compose;
/// Change detection against the stored snapshot.
pub mod detect;
/// Snapshot plus model for one board.
pub mod document;
/// Frame encoding for messages exchanged with a peer.
pub mod envelope;
/// Error types returned by this crate.
pub mod error;
/// Sketch kernel seam and the in-memory kernel.
pub mod kernel;
/// Container tree of the mechanical model.
pub mod mechanical;
/// Entity records and diffs.
pub mod model;
/// External id to model handle mapping.
pub mod registry;
/// Design source trait and the JSON board export reader.
pub mod source;
/// Unit and axis conversion between design and model space.
pub mod units;

#[cfg(feature = "async")]
/// Async client over the document owner thread.
pub mod client;
#[cfg(feature = "async")]
mod owner;

#[cfg(feature = "blocking")]
/// Blocking wrapper over the async client.
pub mod blocking;

pub use crate::apply::{apply_diff, ApplyReport, SkippedEntry};
#[cfg(feature = "blocking")]
pub use crate::blocking::{SyncClientBlocking, SyncClientBlockingBuilder};
#[cfg(feature = "async")]
pub use crate::client::{ClientBuilder, SyncClient};
pub use crate::detect::{detect_changes, full_scan};
pub use crate::document::Document;
pub use crate::envelope::{MessageType, SyncMessage};
pub use crate::error::SyncError;
pub use crate::kernel::{MemorySketch, SketchKernel};
pub use crate::mechanical::MechanicalModel;
pub use crate::model::board::{
    BoardInfo, BoardSnapshot, Drawing, DrawingGeometry, Footprint, Layer, Model3d, Pad, Via,
};
pub use crate::model::diff::{BoardDiff, EntityClass};
#[cfg(feature = "async")]
pub use crate::owner::ScanOutcome;
pub use crate::registry::{Registration, Registry};
pub use crate::source::{BoardFile, DesignSource};

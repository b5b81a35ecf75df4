/// Snapshot records: footprints, pads, drawings, vias and the board `general` section.
pub mod board;
/// Three-way diff types and their wire shape.
pub mod diff;
/// Identity, canonical hashing and field overlay shared by every record.
pub mod entity;

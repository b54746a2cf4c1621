//! Core data model for resumable multipart uploads.
//!
//! This crate defines the durable records (sessions, parts), their status
//! machines, the upload configuration, progress snapshots, and the pure
//! chunk planner. It has no I/O — the store, transfer, and engine crates
//! build on these types.

pub mod planner;
pub mod types;

pub use planner::{InvalidConfig, MIN_CHUNK_BYTES, part_count, plan_parts, verify_plan};
pub use types::{
    ByteRange, ConstraintPolicy, NetworkRequirement, PartStatus, ProgressSnapshot, SessionStatus,
    UnknownStatus, UploadConfig, UploadPart, UploadSession,
};

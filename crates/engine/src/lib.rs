//! Upload engine: the session state machine and everything that drives it.
//!
//! This crate implements the **orchestration logic** for resumable
//! multipart uploads. It is a library crate with no transport or platform
//! dependencies; the host app provides a `StorageClient` implementation
//! and (optionally) wires platform constraint signals and a periodic
//! scheduler into the engine.
//!
//! # Lifecycle
//!
//! 1. **Start**: plan chunks, persist session + parts, initiate the
//!    remote upload, begin dispatch
//! 2. **Dispatch**: bounded concurrent part uploads in ascending order,
//!    retry with backoff on transient failures
//! 3. **Complete**: finalize with the ordered integrity tokens once every
//!    part is uploaded
//! 4. **Recover**: re-attach interrupted sessions after a restart, purge
//!    old terminal sessions

pub mod backoff;
pub mod constraints;
pub mod coordinator;
pub mod error;
pub mod progress;
pub mod recovery;
pub mod scheduler;

// Re-export primary types for convenience.
pub use backoff::RetryPolicy;
pub use constraints::{ConstraintMonitor, DeviceConditions};
pub use coordinator::UploadCoordinator;
pub use error::EngineError;
pub use recovery::RecoverySweep;
pub use scheduler::{JobScheduler, PeriodicJob, TokioScheduler};

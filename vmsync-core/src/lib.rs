//! vmsync-core: declarative VM reconciliation engine.
//!
//! Reconciles a declared VM specification (CPU, memory, power state,
//! placement hints) against the live state of a virtualization backend:
//! - resolves symbolic placement names to live inventory handles
//! - detects drift between declared and observed state
//! - issues the minimal set of imperative operations to correct it
//! - tracks asynchronous backend tasks to a terminal outcome
//!
//! The engine is stateless across invocations and idempotent under
//! retry; an external scheduler supplies the trigger, the per-name
//! serialization guarantee, and the retry/backoff policy. The
//! declarative store, process bootstrap, and backend authentication are
//! external collaborators.

pub mod backend;
pub mod error;
pub mod recorder;
pub mod reconcile;
pub mod resolver;
pub mod status;
pub mod task;
pub mod types;
pub mod vm;

pub use error::{Error, Result};
pub use reconcile::{ReconcileOptions, Reconciler};
pub use recorder::{EventRecorder, LogRecorder};
pub use types::{Disposition, ReconcileReport, VmSpec};

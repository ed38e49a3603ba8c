//! Shared harness for the reconciliation integration suites.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use vmsync_core::recorder::LogRecorder;
use vmsync_core::reconcile::{ReconcileOptions, Reconciler};
use vmsync_core::types::{DesiredPowerState, PlacementHints, VmSpec};
use vmsync_sim::SimBackend;

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vmsync_core=debug,vmsync_sim=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Short budgets so failure-path tests finish quickly.
pub fn options() -> ReconcileOptions {
    ReconcileOptions {
        task_budget: Duration::from_millis(250),
        poll_interval: Duration::from_millis(5),
        placement_defaults: Default::default(),
    }
}

/// Default-inventory backend plus a reconciler wired to it.
pub fn harness() -> (Arc<SimBackend>, Reconciler) {
    harness_with(options())
}

pub fn harness_with(options: ReconcileOptions) -> (Arc<SimBackend>, Reconciler) {
    init_logging();
    let backend = Arc::new(SimBackend::with_default_inventory());
    let reconciler = Reconciler::new(backend.clone(), Arc::new(LogRecorder), options);
    (backend, reconciler)
}

pub fn spec(name: &str, power: DesiredPowerState) -> VmSpec {
    VmSpec {
        name: name.to_string(),
        cpu_count: 2,
        memory_mb: 2048,
        power_state: power,
        placement: PlacementHints::default(),
        deletion_requested: false,
    }
}

pub fn deletion_spec(name: &str) -> VmSpec {
    VmSpec {
        deletion_requested: true,
        ..spec(name, DesiredPowerState::PoweredOff)
    }
}

pub fn cancel() -> CancellationToken {
    CancellationToken::new()
}

//! Lifecycle event recording.
//!
//! The reconciler reports significant transitions through this trait so
//! an embedding harness can ship them wherever it records events. The
//! default sink is the tracing log.

use crate::types::DesiredPowerState;

/// Sink for per-VM lifecycle events.
pub trait EventRecorder: Send + Sync {
    fn created(&self, vm: &str, id: &str);
    fn reconfigured(&self, vm: &str);
    fn power_changed(&self, vm: &str, target: DesiredPowerState);
    fn deleted(&self, vm: &str);
    fn failed(&self, vm: &str, reason: &str);
}

/// Records events as structured tracing log lines.
pub struct LogRecorder;

impl EventRecorder for LogRecorder {
    fn created(&self, vm: &str, id: &str) {
        tracing::info!(vm = %vm, id = %id, "vm created");
    }

    fn reconfigured(&self, vm: &str) {
        tracing::info!(vm = %vm, "vm reconfigured");
    }

    fn power_changed(&self, vm: &str, target: DesiredPowerState) {
        tracing::info!(vm = %vm, target = ?target, "vm power state changed");
    }

    fn deleted(&self, vm: &str) {
        tracing::info!(vm = %vm, "vm deleted");
    }

    fn failed(&self, vm: &str, reason: &str) {
        tracing::warn!(vm = %vm, reason = %reason, "vm operation failed");
    }
}

//! Declared-state and observed-state records exchanged with the
//! declarative store, plus the per-invocation report returned to the
//! external scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

/// Power state requested by the declared record.
///
/// `Unknown` is the catch-all for wire values this version does not
/// recognize; validation rejects it explicitly instead of silently
/// skipping power convergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DesiredPowerState {
    PoweredOn,
    PoweredOff,
    Unknown,
}

impl<'de> Deserialize<'de> for DesiredPowerState {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(match value.as_str() {
            "PoweredOn" => DesiredPowerState::PoweredOn,
            "PoweredOff" => DesiredPowerState::PoweredOff,
            _ => DesiredPowerState::Unknown,
        })
    }
}

/// Power state as observed on the backend and reported in status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObservedPowerState {
    PoweredOn,
    PoweredOff,
    Suspended,
}

/// Coarse lifecycle phase reported in status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VmPhase {
    Pending,
    Creating,
    Created,
    Deleting,
    Deleted,
    Failed,
}

/// Symbolic placement names. All optional; the resolver falls back to
/// configured defaults, and past that to "the single existing one".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlacementHints {
    pub datacenter: Option<String>,
    pub folder: Option<String>,
    pub resource_pool: Option<String>,
    pub datastore: Option<String>,
}

/// Declared spec for one VM. Owned by the external declarative store;
/// read-only input to a reconcile invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmSpec {
    /// Unique within the namespace scope the store enforces.
    pub name: String,
    pub cpu_count: u32,
    pub memory_mb: u64,
    pub power_state: DesiredPowerState,
    #[serde(default)]
    pub placement: PlacementHints,
    /// Set by the store when the record is marked for deletion.
    #[serde(default)]
    pub deletion_requested: bool,
}

impl VmSpec {
    /// Reject specs no backend call could satisfy.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidSpec("name must not be empty".into()));
        }
        if self.cpu_count == 0 {
            return Err(Error::InvalidSpec("cpu_count must be positive".into()));
        }
        if self.memory_mb == 0 {
            return Err(Error::InvalidSpec("memory_mb must be positive".into()));
        }
        if self.power_state == DesiredPowerState::Unknown {
            return Err(Error::InvalidSpec(
                "unrecognized desired power state".into(),
            ));
        }
        Ok(())
    }
}

/// Observed status written back to the declarative store once per
/// invocation, even on partial failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservedStatus {
    pub phase: VmPhase,
    pub power_state: Option<ObservedPowerState>,
    /// Backend-assigned unique identifier.
    pub unique_id: Option<String>,
    /// Host the VM is placed on, when the backend reports one.
    pub host: Option<String>,
    /// Guest IP address, once the backend reports one.
    pub ip_address: Option<String>,
    /// Last error, human-readable. Absent when the invocation was clean.
    pub message: Option<String>,
    pub last_reconcile: DateTime<Utc>,
}

/// What the external scheduler should do after this invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Observed state matches declared state; nothing left to do.
    Converged,
    /// The VM is gone and the record can be finalized.
    Deleted,
    /// Not yet converged (soft failure, pending task, timeout); run again.
    Requeue,
    /// Retrying is pointless until the declared record changes.
    Fatal,
}

/// Result of one reconcile invocation. `status` is absent only when
/// placement resolution failed, in which case no reliable observation
/// could be made at all.
#[derive(Debug)]
pub struct ReconcileReport {
    pub disposition: Disposition,
    pub status: Option<ObservedStatus>,
    /// The error that drove a Requeue or Fatal disposition, if any.
    pub error: Option<Error>,
}

impl ReconcileReport {
    pub(crate) fn clean(disposition: Disposition, status: ObservedStatus) -> Self {
        Self {
            disposition,
            status: Some(status),
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> VmSpec {
        VmSpec {
            name: "vm-a".into(),
            cpu_count: 2,
            memory_mb: 2048,
            power_state: DesiredPowerState::PoweredOn,
            placement: PlacementHints::default(),
            deletion_requested: false,
        }
    }

    #[test]
    fn valid_spec_passes() {
        assert!(spec().validate().is_ok());
    }

    #[test]
    fn zero_cpu_and_memory_are_rejected() {
        let mut s = spec();
        s.cpu_count = 0;
        assert!(matches!(s.validate(), Err(Error::InvalidSpec(_))));

        let mut s = spec();
        s.memory_mb = 0;
        assert!(matches!(s.validate(), Err(Error::InvalidSpec(_))));
    }

    #[test]
    fn unrecognized_power_state_deserializes_to_unknown_and_is_rejected() {
        let s: VmSpec = serde_json::from_value(serde_json::json!({
            "name": "vm-a",
            "cpu_count": 2,
            "memory_mb": 2048,
            "power_state": "Suspended"
        }))
        .unwrap();
        assert_eq!(s.power_state, DesiredPowerState::Unknown);
        assert!(matches!(s.validate(), Err(Error::InvalidSpec(_))));
    }

    #[test]
    fn placement_defaults_to_empty_hints() {
        let s: VmSpec = serde_json::from_value(serde_json::json!({
            "name": "vm-a",
            "cpu_count": 1,
            "memory_mb": 512,
            "power_state": "PoweredOff"
        }))
        .unwrap();
        assert!(s.placement.datacenter.is_none());
        assert!(!s.deletion_requested);
    }
}

//! Pure projection of backend observations into the declarative
//! record's status schema. No backend calls; every input maps to an
//! output.

use chrono::{DateTime, Utc};

use crate::backend::{BackendPowerState, VmRecord};
use crate::error::Error;
use crate::types::{ObservedPowerState, ObservedStatus, VmPhase};

/// Backend power enum to declared-schema power enum.
pub fn observed_power(state: BackendPowerState) -> ObservedPowerState {
    match state {
        BackendPowerState::PoweredOn => ObservedPowerState::PoweredOn,
        BackendPowerState::PoweredOff => ObservedPowerState::PoweredOff,
        BackendPowerState::Suspended => ObservedPowerState::Suspended,
    }
}

/// Human-readable condition message for an error kind.
pub fn condition_message(err: &Error) -> String {
    match err {
        Error::NotFound { kind, name } => format!("{kind} {name:?} was not found"),
        Error::Ambiguous { kind, name, count } => {
            format!("{kind} {name:?} matched {count} objects; name one explicitly")
        }
        Error::InvalidSpec(reason) => format!("spec cannot be applied: {reason}"),
        Error::BackendRejected { op, reason } => format!("backend rejected {op}: {reason}"),
        Error::TaskTimeout { .. } => {
            "operation still in progress; will re-check on the next pass".to_string()
        }
        Error::Cancelled => "reconcile interrupted before completion".to_string(),
        Error::Backend(reason) => format!("backend unreachable: {reason}"),
    }
}

/// Assemble the status record from the best-known observation.
pub fn project(
    record: Option<&VmRecord>,
    phase: VmPhase,
    error: Option<&Error>,
    now: DateTime<Utc>,
) -> ObservedStatus {
    ObservedStatus {
        phase,
        power_state: record.map(|r| observed_power(r.power_state)),
        unique_id: record.map(|r| r.id.clone()),
        host: record.and_then(|r| r.host.clone()),
        ip_address: record.and_then(|r| r.ip_address.clone()),
        message: error.map(condition_message),
        last_reconcile: now,
    }
}

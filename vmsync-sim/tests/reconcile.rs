//! Happy-path convergence properties of the reconcile algorithm,
//! exercised against the simulated backend.

mod common;

use std::sync::Arc;
use std::sync::Mutex;

use common::{cancel, deletion_spec, harness, harness_with, options, spec};
use vmsync_core::backend::BackendPowerState;
use vmsync_core::recorder::EventRecorder;
use vmsync_core::reconcile::Reconciler;
use vmsync_core::types::{DesiredPowerState, Disposition, ObservedPowerState, VmPhase};

#[tokio::test]
async fn missing_vm_is_created_then_powered_on() {
    let (backend, reconciler) = harness();

    let report = reconciler
        .reconcile(&spec("vm-a", DesiredPowerState::PoweredOn), &cancel())
        .await;

    assert_eq!(report.disposition, Disposition::Converged);
    let status = report.status.expect("status must be written");
    assert_eq!(status.phase, VmPhase::Created);
    assert_eq!(status.power_state, Some(ObservedPowerState::PoweredOn));
    assert!(status.unique_id.is_some(), "backend id must be reported");
    assert!(
        status.ip_address.is_some(),
        "ip leased on power-on must be reported"
    );
    assert!(status.message.is_none());

    // New VMs start powered off, so one create and one power-on.
    assert_eq!(
        backend.mutating_ops().await,
        vec!["create vm-a", "power_on vm-a"]
    );

    let record = backend.vm_named("vm-a").await.expect("vm must exist");
    assert_eq!(record.cpu_count, 2);
    assert_eq!(record.memory_mb, 2048);
    assert_eq!(record.power_state, BackendPowerState::PoweredOn);
    assert!(record.ip_address.is_some());
}

#[tokio::test]
async fn converged_vm_reconciles_without_mutations() {
    let (backend, reconciler) = harness();
    let dc = backend.datacenter("dc0").await.unwrap();
    backend
        .add_vm(&dc, "vm-a", 2, 2048, BackendPowerState::PoweredOn)
        .await;

    let report = reconciler
        .reconcile(&spec("vm-a", DesiredPowerState::PoweredOn), &cancel())
        .await;

    assert_eq!(report.disposition, Disposition::Converged);
    assert!(
        backend.mutating_ops().await.is_empty(),
        "an already-converged vm must not trigger mutating calls"
    );
}

#[tokio::test]
async fn reconcile_becomes_noop_after_convergence() {
    let (backend, reconciler) = harness();
    let declared = spec("vm-a", DesiredPowerState::PoweredOn);

    let first = reconciler.reconcile(&declared, &cancel()).await;
    assert_eq!(first.disposition, Disposition::Converged);

    backend.clear_ops().await;
    let second = reconciler.reconcile(&declared, &cancel()).await;
    assert_eq!(second.disposition, Disposition::Converged);
    assert!(backend.mutating_ops().await.is_empty());
}

#[tokio::test]
async fn powered_on_vm_is_powered_off() {
    let (backend, reconciler) = harness();
    let dc = backend.datacenter("dc0").await.unwrap();
    backend
        .add_vm(&dc, "vm-a", 2, 2048, BackendPowerState::PoweredOn)
        .await;

    let report = reconciler
        .reconcile(&spec("vm-a", DesiredPowerState::PoweredOff), &cancel())
        .await;

    assert_eq!(report.disposition, Disposition::Converged);
    assert_eq!(
        report.status.unwrap().power_state,
        Some(ObservedPowerState::PoweredOff)
    );
    assert_eq!(backend.mutating_ops().await, vec!["power_off vm-a"]);
}

#[tokio::test]
async fn delete_of_absent_vm_succeeds() {
    let (backend, reconciler) = harness();

    let report = reconciler.reconcile(&deletion_spec("vm-a"), &cancel()).await;

    assert_eq!(report.disposition, Disposition::Deleted);
    assert_eq!(report.status.unwrap().phase, VmPhase::Deleted);
    assert!(report.error.is_none());
    assert!(backend.mutating_ops().await.is_empty());
}

#[tokio::test]
async fn delete_removes_existing_vm() {
    let (backend, reconciler) = harness();
    let dc = backend.datacenter("dc0").await.unwrap();
    backend
        .add_vm(&dc, "vm-a", 2, 2048, BackendPowerState::PoweredOff)
        .await;

    let report = reconciler.reconcile(&deletion_spec("vm-a"), &cancel()).await;

    assert_eq!(report.disposition, Disposition::Deleted);
    assert_eq!(report.status.unwrap().phase, VmPhase::Deleted);
    assert_eq!(backend.mutating_ops().await, vec!["delete vm-a"]);
    assert!(backend.vm_named("vm-a").await.is_none());
}

#[tokio::test]
async fn reconfigure_is_applied_before_power_transition() {
    let (backend, reconciler) = harness();
    let dc = backend.datacenter("dc0").await.unwrap();
    backend
        .add_vm(&dc, "vm-a", 1, 1024, BackendPowerState::PoweredOff)
        .await;

    // The sim rejects reconfiguration of a powered-on VM, so this only
    // converges if the config change lands before the power-on.
    let report = reconciler
        .reconcile(&spec("vm-a", DesiredPowerState::PoweredOn), &cancel())
        .await;

    assert_eq!(report.disposition, Disposition::Converged);
    assert_eq!(
        backend.mutating_ops().await,
        vec!["reconfigure vm-a", "power_on vm-a"]
    );

    let record = backend.vm_named("vm-a").await.unwrap();
    assert_eq!(record.cpu_count, 2);
    assert_eq!(record.memory_mb, 2048);
    assert_eq!(record.power_state, BackendPowerState::PoweredOn);
}

#[tokio::test]
async fn invalid_spec_is_fatal_without_backend_calls() {
    let (backend, reconciler) = harness();
    let mut declared = spec("vm-a", DesiredPowerState::PoweredOn);
    declared.cpu_count = 0;

    let report = reconciler.reconcile(&declared, &cancel()).await;

    assert_eq!(report.disposition, Disposition::Fatal);
    let status = report.status.expect("status is still written");
    assert_eq!(status.phase, VmPhase::Failed);
    assert!(status.message.unwrap().contains("cpu_count"));
    assert!(
        backend.all_ops().await.is_empty(),
        "invalid specs must abort before any backend call"
    );
}

#[tokio::test]
async fn unrecognized_power_state_is_rejected_not_ignored() {
    let (backend, reconciler) = harness();
    let declared: vmsync_core::VmSpec = serde_json::from_value(serde_json::json!({
        "name": "vm-a",
        "cpu_count": 2,
        "memory_mb": 2048,
        "power_state": "Suspended"
    }))
    .unwrap();

    let report = reconciler.reconcile(&declared, &cancel()).await;

    assert_eq!(report.disposition, Disposition::Fatal);
    assert!(backend.all_ops().await.is_empty());
}

#[tokio::test]
async fn placement_hint_selects_the_named_pool() {
    let (backend, reconciler) = harness();
    let dc = backend.datacenter("dc0").await.unwrap();
    backend.add_resource_pool(&dc, "pool1").await;

    let mut declared = spec("vm-a", DesiredPowerState::PoweredOff);
    declared.placement.resource_pool = Some("pool1".to_string());

    let report = reconciler.reconcile(&declared, &cancel()).await;
    assert_eq!(report.disposition, Disposition::Converged);
}

#[tokio::test]
async fn configured_default_breaks_placement_ties() {
    let mut opts = options();
    opts.placement_defaults.resource_pool = Some("pool0".to_string());
    let (backend, reconciler) = harness_with(opts);
    let dc = backend.datacenter("dc0").await.unwrap();
    backend.add_resource_pool(&dc, "pool1").await;

    // Two pools, no hint: only the configured default disambiguates.
    let report = reconciler
        .reconcile(&spec("vm-a", DesiredPowerState::PoweredOff), &cancel())
        .await;
    assert_eq!(report.disposition, Disposition::Converged);
}

struct CountingRecorder {
    events: Mutex<Vec<String>>,
}

impl EventRecorder for CountingRecorder {
    fn created(&self, vm: &str, _id: &str) {
        self.events.lock().unwrap().push(format!("created {vm}"));
    }
    fn reconfigured(&self, vm: &str) {
        self.events.lock().unwrap().push(format!("reconfigured {vm}"));
    }
    fn power_changed(&self, vm: &str, _target: DesiredPowerState) {
        self.events.lock().unwrap().push(format!("power {vm}"));
    }
    fn deleted(&self, vm: &str) {
        self.events.lock().unwrap().push(format!("deleted {vm}"));
    }
    fn failed(&self, vm: &str, _reason: &str) {
        self.events.lock().unwrap().push(format!("failed {vm}"));
    }
}

#[tokio::test]
async fn lifecycle_events_are_recorded() {
    common::init_logging();
    let backend = Arc::new(vmsync_sim::SimBackend::with_default_inventory());
    let recorder = Arc::new(CountingRecorder {
        events: Mutex::new(Vec::new()),
    });
    let reconciler = Reconciler::new(backend.clone(), recorder.clone(), options());

    let report = reconciler
        .reconcile(&spec("vm-a", DesiredPowerState::PoweredOn), &cancel())
        .await;
    assert_eq!(report.disposition, Disposition::Converged);

    let events = recorder.events.lock().unwrap().clone();
    assert_eq!(events, vec!["created vm-a", "power vm-a"]);
}

//! In-memory simulated virtualization backend.
//!
//! Implements the vmsync-core [`Backend`] trait over a mutable
//! in-memory inventory with an explicit task engine: every mutating
//! call enqueues a task that stays `Running` for a configurable number
//! of status polls and applies its effect when it completes. Fault
//! injection (fail a task, reject a submission, hold tasks open)
//! drives the failure-path integration tests; an op log records every
//! backend call so tests can assert call counts and ordering.
//!
//! Like a real backend, the sim rejects hardware reconfiguration on a
//! powered-on VM, creates new VMs powered off, and leases a guest IP
//! address when a VM powers on.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use vmsync_core::backend::{
    Backend, BackendPowerState, CreateParams, ObjectRef, TaskKind, TaskRef, TaskState, VmRecord,
};
use vmsync_core::error::{Error, Result};

/// Effect a task applies to the inventory when it completes.
enum Effect {
    Create { dc_id: String, params: CreateParams },
    Reconfigure { vm_id: String, cpu_count: u32, memory_mb: u64 },
    PowerOn { vm_id: String },
    PowerOff { vm_id: String },
    Delete { vm_id: String },
}

struct SimTask {
    effect: Effect,
    remaining_polls: u32,
    held: bool,
    fail_reason: Option<String>,
    state: TaskState,
}

struct SimVm {
    dc_id: String,
    record: VmRecord,
}

#[derive(Default)]
struct Inner {
    datacenters: Vec<ObjectRef>,
    folders: HashMap<String, Vec<ObjectRef>>,
    resource_pools: HashMap<String, Vec<ObjectRef>>,
    datastores: HashMap<String, Vec<ObjectRef>>,
    vms: HashMap<String, SimVm>,
    tasks: HashMap<String, SimTask>,
    /// Every backend call, in order. Mutating submissions are flagged.
    ops: Vec<(String, bool)>,
    /// Polls a task stays Running for before reaching a terminal state.
    task_latency: u32,
    hold: HashSet<TaskKind>,
    fail_next_task: HashMap<TaskKind, String>,
    reject_next: HashMap<TaskKind, String>,
    fail_next_status_poll: Option<String>,
    leased_ips: u32,
}

/// The simulated backend. Safe for concurrent use; all state sits
/// behind one async lock, matching the "internally synchronized
/// session" property the core relies on.
pub struct SimBackend {
    inner: Mutex<Inner>,
}

impl Default for SimBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SimBackend {
    /// Empty inventory. Populate with the `add_*` methods.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                task_latency: 1,
                ..Inner::default()
            }),
        }
    }

    /// One datacenter `dc0` holding folder `vms`, resource pool `pool0`
    /// and datastore `ds0` - the smallest inventory every placement
    /// hint can resolve against.
    pub fn with_default_inventory() -> Self {
        let dc = ObjectRef {
            id: "datacenter-1".into(),
            name: "dc0".into(),
        };
        let mut inner = Inner {
            task_latency: 1,
            ..Inner::default()
        };
        inner.folders.insert(
            dc.id.clone(),
            vec![ObjectRef {
                id: "folder-1".into(),
                name: "vms".into(),
            }],
        );
        inner.resource_pools.insert(
            dc.id.clone(),
            vec![ObjectRef {
                id: "pool-1".into(),
                name: "pool0".into(),
            }],
        );
        inner.datastores.insert(
            dc.id.clone(),
            vec![ObjectRef {
                id: "datastore-1".into(),
                name: "ds0".into(),
            }],
        );
        inner.datacenters.push(dc);
        Self {
            inner: Mutex::new(inner),
        }
    }

    pub async fn add_datacenter(&self, name: &str) -> ObjectRef {
        let mut inner = self.inner.lock().await;
        let dc = ObjectRef {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
        };
        inner.datacenters.push(dc.clone());
        dc
    }

    /// Assertion/setup helper: the datacenter with this name.
    pub async fn datacenter(&self, name: &str) -> Option<ObjectRef> {
        self.inner
            .lock()
            .await
            .datacenters
            .iter()
            .find(|dc| dc.name == name)
            .cloned()
    }

    pub async fn add_folder(&self, dc: &ObjectRef, name: &str) -> ObjectRef {
        let mut inner = self.inner.lock().await;
        let obj = new_ref(name);
        inner.folders.entry(dc.id.clone()).or_default().push(obj.clone());
        obj
    }

    pub async fn add_resource_pool(&self, dc: &ObjectRef, name: &str) -> ObjectRef {
        let mut inner = self.inner.lock().await;
        let obj = new_ref(name);
        inner
            .resource_pools
            .entry(dc.id.clone())
            .or_default()
            .push(obj.clone());
        obj
    }

    pub async fn add_datastore(&self, dc: &ObjectRef, name: &str) -> ObjectRef {
        let mut inner = self.inner.lock().await;
        let obj = new_ref(name);
        inner
            .datastores
            .entry(dc.id.clone())
            .or_default()
            .push(obj.clone());
        obj
    }

    /// Place a pre-existing VM in the inventory; returns its id.
    pub async fn add_vm(
        &self,
        dc: &ObjectRef,
        name: &str,
        cpu_count: u32,
        memory_mb: u64,
        power_state: BackendPowerState,
    ) -> String {
        let mut inner = self.inner.lock().await;
        let ip_address = match power_state {
            BackendPowerState::PoweredOn => Some(lease_ip(&mut inner)),
            _ => None,
        };
        let id = Uuid::new_v4().to_string();
        inner.vms.insert(
            id.clone(),
            SimVm {
                dc_id: dc.id.clone(),
                record: VmRecord {
                    id: id.clone(),
                    name: name.to_string(),
                    power_state,
                    cpu_count,
                    memory_mb,
                    host: Some("host-0".into()),
                    ip_address,
                },
            },
        );
        id
    }

    /// Number of status polls a task stays Running for.
    pub async fn set_task_latency(&self, polls: u32) {
        self.inner.lock().await.task_latency = polls;
    }

    /// Newly submitted tasks of this kind never reach a terminal state
    /// until [`release_tasks`](Self::release_tasks) is called.
    pub async fn hold_tasks(&self, kind: TaskKind) {
        self.inner.lock().await.hold.insert(kind);
    }

    /// Complete all held tasks immediately, applying their effects -
    /// the backend operation "eventually finished" after the caller
    /// stopped waiting.
    pub async fn release_tasks(&self) {
        let mut inner = self.inner.lock().await;
        inner.hold.clear();
        let ids: Vec<String> = inner.tasks.keys().cloned().collect();
        for id in ids {
            if let Some(mut task) = inner.tasks.remove(&id) {
                task.held = false;
                task.remaining_polls = 0;
                finish_task(&mut inner, &mut task);
                inner.tasks.insert(id, task);
            }
        }
    }

    /// The next task of this kind runs to a Failure terminal state.
    pub async fn fail_next_task(&self, kind: TaskKind, reason: &str) {
        self.inner
            .lock()
            .await
            .fail_next_task
            .insert(kind, reason.to_string());
    }

    /// The next submission of this kind is refused synchronously.
    pub async fn reject_next(&self, kind: TaskKind, reason: &str) {
        self.inner
            .lock()
            .await
            .reject_next
            .insert(kind, reason.to_string());
    }

    /// The next task-status poll fails at the transport level. The task
    /// itself keeps running.
    pub async fn fail_next_status_poll(&self, reason: &str) {
        self.inner.lock().await.fail_next_status_poll = Some(reason.to_string());
    }

    /// Mutating submissions accepted so far, in order.
    pub async fn mutating_ops(&self) -> Vec<String> {
        self.inner
            .lock()
            .await
            .ops
            .iter()
            .filter(|(_, mutating)| *mutating)
            .map(|(op, _)| op.clone())
            .collect()
    }

    /// Every backend call so far, in order.
    pub async fn all_ops(&self) -> Vec<String> {
        self.inner
            .lock()
            .await
            .ops
            .iter()
            .map(|(op, _)| op.clone())
            .collect()
    }

    pub async fn clear_ops(&self) {
        self.inner.lock().await.ops.clear();
    }

    /// Assertion helper: current record of the VM with this name, in
    /// any datacenter.
    pub async fn vm_named(&self, name: &str) -> Option<VmRecord> {
        self.inner
            .lock()
            .await
            .vms
            .values()
            .find(|vm| vm.record.name == name)
            .map(|vm| vm.record.clone())
    }
}

fn lease_ip(inner: &mut Inner) -> String {
    inner.leased_ips += 1;
    format!("10.0.0.{}", 9 + inner.leased_ips)
}

fn new_ref(name: &str) -> ObjectRef {
    ObjectRef {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
    }
}

fn op_name(kind: TaskKind) -> &'static str {
    match kind {
        TaskKind::Create => "create",
        TaskKind::Reconfigure => "reconfigure",
        TaskKind::PowerOn => "power_on",
        TaskKind::PowerOff => "power_off",
        TaskKind::Delete => "delete",
    }
}

fn vm_label(inner: &Inner, vm_id: &str) -> String {
    inner
        .vms
        .get(vm_id)
        .map(|vm| vm.record.name.clone())
        .unwrap_or_else(|| vm_id.to_string())
}

/// Enqueue a task for an accepted mutating call.
fn submit(inner: &mut Inner, kind: TaskKind, label: &str, effect: Effect) -> Result<TaskRef> {
    if let Some(reason) = inner.reject_next.remove(&kind) {
        return Err(Error::BackendRejected {
            op: op_name(kind),
            reason,
        });
    }
    let task = SimTask {
        effect,
        remaining_polls: inner.task_latency,
        held: inner.hold.contains(&kind),
        fail_reason: inner.fail_next_task.remove(&kind),
        state: TaskState::Running,
    };
    let id = Uuid::new_v4().to_string();
    inner.tasks.insert(id.clone(), task);
    inner.ops.push((format!("{} {label}", op_name(kind)), true));
    debug!(task = %id, kind = %kind, vm = %label, "task submitted");
    Ok(TaskRef { id, kind })
}

/// Drive a task to its terminal state and apply its effect.
fn finish_task(inner: &mut Inner, task: &mut SimTask) {
    if task.state != TaskState::Running {
        return;
    }
    if let Some(reason) = task.fail_reason.take() {
        task.state = TaskState::Error(reason);
        return;
    }
    task.state = match apply_effect(inner, &task.effect) {
        Ok(()) => TaskState::Success,
        Err(reason) => TaskState::Error(reason),
    };
}

fn apply_effect(inner: &mut Inner, effect: &Effect) -> std::result::Result<(), String> {
    match effect {
        Effect::Create { dc_id, params } => {
            let duplicate = inner
                .vms
                .values()
                .any(|vm| vm.dc_id == *dc_id && vm.record.name == params.name);
            if duplicate {
                return Err(format!("vm {:?} already exists", params.name));
            }
            // New VMs start powered off.
            let id = Uuid::new_v4().to_string();
            inner.vms.insert(
                id.clone(),
                SimVm {
                    dc_id: dc_id.clone(),
                    record: VmRecord {
                        id,
                        name: params.name.clone(),
                        power_state: BackendPowerState::PoweredOff,
                        cpu_count: params.cpu_count,
                        memory_mb: params.memory_mb,
                        host: Some("host-0".into()),
                        ip_address: None,
                    },
                },
            );
            Ok(())
        }
        Effect::Reconfigure {
            vm_id,
            cpu_count,
            memory_mb,
        } => match inner.vms.get_mut(vm_id) {
            Some(vm) => {
                vm.record.cpu_count = *cpu_count;
                vm.record.memory_mb = *memory_mb;
                Ok(())
            }
            None => Err(format!("vm {vm_id} not found")),
        },
        Effect::PowerOn { vm_id } => set_power(inner, vm_id, BackendPowerState::PoweredOn),
        Effect::PowerOff { vm_id } => set_power(inner, vm_id, BackendPowerState::PoweredOff),
        Effect::Delete { vm_id } => {
            // Absence satisfies deletion.
            inner.vms.remove(vm_id);
            Ok(())
        }
    }
}

fn set_power(
    inner: &mut Inner,
    vm_id: &str,
    state: BackendPowerState,
) -> std::result::Result<(), String> {
    // A powered-on guest gets an IP lease; powering off drops it.
    let ip_address = match state {
        BackendPowerState::PoweredOn => Some(lease_ip(inner)),
        _ => None,
    };
    match inner.vms.get_mut(vm_id) {
        Some(vm) => {
            vm.record.power_state = state;
            vm.record.ip_address = ip_address;
            Ok(())
        }
        None => Err(format!("vm {vm_id} not found")),
    }
}

#[async_trait]
impl Backend for SimBackend {
    async fn list_datacenters(&self) -> Result<Vec<ObjectRef>> {
        let mut inner = self.inner.lock().await;
        inner.ops.push(("list_datacenters".into(), false));
        Ok(inner.datacenters.clone())
    }

    async fn list_folders(&self, datacenter: &ObjectRef) -> Result<Vec<ObjectRef>> {
        let mut inner = self.inner.lock().await;
        inner.ops.push(("list_folders".into(), false));
        Ok(inner.folders.get(&datacenter.id).cloned().unwrap_or_default())
    }

    async fn list_resource_pools(&self, datacenter: &ObjectRef) -> Result<Vec<ObjectRef>> {
        let mut inner = self.inner.lock().await;
        inner.ops.push(("list_resource_pools".into(), false));
        Ok(inner
            .resource_pools
            .get(&datacenter.id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_datastores(&self, datacenter: &ObjectRef) -> Result<Vec<ObjectRef>> {
        let mut inner = self.inner.lock().await;
        inner.ops.push(("list_datastores".into(), false));
        Ok(inner
            .datastores
            .get(&datacenter.id)
            .cloned()
            .unwrap_or_default())
    }

    async fn find_vm(&self, datacenter: &ObjectRef, name: &str) -> Result<Option<VmRecord>> {
        let mut inner = self.inner.lock().await;
        inner.ops.push((format!("find_vm {name}"), false));
        Ok(inner
            .vms
            .values()
            .find(|vm| vm.dc_id == datacenter.id && vm.record.name == name)
            .map(|vm| vm.record.clone()))
    }

    async fn create_vm(&self, datacenter: &ObjectRef, params: CreateParams) -> Result<TaskRef> {
        let mut inner = self.inner.lock().await;
        let label = params.name.clone();
        submit(
            &mut inner,
            TaskKind::Create,
            &label,
            Effect::Create {
                dc_id: datacenter.id.clone(),
                params,
            },
        )
    }

    async fn reconfigure_vm(
        &self,
        vm_id: &str,
        cpu_count: u32,
        memory_mb: u64,
    ) -> Result<TaskRef> {
        let mut inner = self.inner.lock().await;
        if let Some(vm) = inner.vms.get(vm_id) {
            if vm.record.power_state == BackendPowerState::PoweredOn {
                return Err(Error::BackendRejected {
                    op: "reconfigure",
                    reason: "cannot reconfigure a powered-on vm".into(),
                });
            }
        }
        let label = vm_label(&inner, vm_id);
        submit(
            &mut inner,
            TaskKind::Reconfigure,
            &label,
            Effect::Reconfigure {
                vm_id: vm_id.to_string(),
                cpu_count,
                memory_mb,
            },
        )
    }

    async fn power_on_vm(&self, vm_id: &str) -> Result<TaskRef> {
        let mut inner = self.inner.lock().await;
        let label = vm_label(&inner, vm_id);
        submit(
            &mut inner,
            TaskKind::PowerOn,
            &label,
            Effect::PowerOn {
                vm_id: vm_id.to_string(),
            },
        )
    }

    async fn power_off_vm(&self, vm_id: &str) -> Result<TaskRef> {
        let mut inner = self.inner.lock().await;
        let label = vm_label(&inner, vm_id);
        submit(
            &mut inner,
            TaskKind::PowerOff,
            &label,
            Effect::PowerOff {
                vm_id: vm_id.to_string(),
            },
        )
    }

    async fn delete_vm(&self, vm_id: &str) -> Result<TaskRef> {
        let mut inner = self.inner.lock().await;
        let label = vm_label(&inner, vm_id);
        submit(
            &mut inner,
            TaskKind::Delete,
            &label,
            Effect::Delete {
                vm_id: vm_id.to_string(),
            },
        )
    }

    async fn task_state(&self, task: &TaskRef) -> Result<TaskState> {
        let mut inner = self.inner.lock().await;
        if let Some(reason) = inner.fail_next_status_poll.take() {
            return Err(Error::Backend(reason));
        }
        let mut sim_task = match inner.tasks.remove(&task.id) {
            Some(t) => t,
            None => return Err(Error::Backend(format!("unknown task {}", task.id))),
        };
        if sim_task.state == TaskState::Running && !sim_task.held {
            if sim_task.remaining_polls > 0 {
                sim_task.remaining_polls -= 1;
            } else {
                finish_task(&mut inner, &mut sim_task);
            }
        }
        let state = sim_task.state.clone();
        inner.tasks.insert(task.id.clone(), sim_task);
        Ok(state)
    }
}

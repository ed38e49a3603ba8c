//! Capability interface over one virtualization backend.
//!
//! The reconciliation core is written against this trait only. An
//! implementation wraps a pre-authenticated backend session and must be
//! safe for concurrent use by multiple reconcile workers; the core adds
//! no locking of its own on top of it.

use std::fmt;

use async_trait::async_trait;

use crate::error::Result;

/// Reference to a live inventory object (datacenter, folder, resource
/// pool, datastore). `id` is the backend's stable identifier; `name` is
/// the symbolic name resolution matched on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub id: String,
    pub name: String,
}

/// Power state as the backend reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendPowerState {
    PoweredOn,
    PoweredOff,
    Suspended,
}

/// A VM object as the backend reports it at lookup time.
#[derive(Debug, Clone)]
pub struct VmRecord {
    pub id: String,
    pub name: String,
    pub power_state: BackendPowerState,
    pub cpu_count: u32,
    pub memory_mb: u64,
    pub host: Option<String>,
    pub ip_address: Option<String>,
}

/// Kinds of asynchronous backend operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Create,
    Reconfigure,
    PowerOn,
    PowerOff,
    Delete,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskKind::Create => "create",
            TaskKind::Reconfigure => "reconfigure",
            TaskKind::PowerOn => "power_on",
            TaskKind::PowerOff => "power_off",
            TaskKind::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// Reference to one outstanding backend task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRef {
    pub id: String,
    pub kind: TaskKind,
}

/// State of a backend task as reported by the task-status primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Success,
    Error(String),
}

/// Parameters for VM creation, derived from the declared spec and the
/// resolved placement context.
#[derive(Debug, Clone)]
pub struct CreateParams {
    pub name: String,
    pub cpu_count: u32,
    pub memory_mb: u64,
    pub folder: ObjectRef,
    pub resource_pool: ObjectRef,
    /// Datastore path the VM's files are placed under, e.g. `[ds0]`.
    pub file_path: String,
}

/// Lookup, mutate, and task-status primitives of the backend.
///
/// Listing calls are scoped to a datacenter (datacenters themselves are
/// top-level). Mutating calls return a [`TaskRef`] tracked to completion
/// by the caller; a mutating call returning `Ok` only means the backend
/// accepted the submission.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn list_datacenters(&self) -> Result<Vec<ObjectRef>>;
    async fn list_folders(&self, datacenter: &ObjectRef) -> Result<Vec<ObjectRef>>;
    async fn list_resource_pools(&self, datacenter: &ObjectRef) -> Result<Vec<ObjectRef>>;
    async fn list_datastores(&self, datacenter: &ObjectRef) -> Result<Vec<ObjectRef>>;

    /// Find a VM by name within a datacenter. `None` means no such VM.
    async fn find_vm(&self, datacenter: &ObjectRef, name: &str) -> Result<Option<VmRecord>>;

    async fn create_vm(&self, datacenter: &ObjectRef, params: CreateParams) -> Result<TaskRef>;
    async fn reconfigure_vm(&self, vm_id: &str, cpu_count: u32, memory_mb: u64)
        -> Result<TaskRef>;
    async fn power_on_vm(&self, vm_id: &str) -> Result<TaskRef>;
    async fn power_off_vm(&self, vm_id: &str) -> Result<TaskRef>;
    async fn delete_vm(&self, vm_id: &str) -> Result<TaskRef>;

    async fn task_state(&self, task: &TaskRef) -> Result<TaskState>;
}

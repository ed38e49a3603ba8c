//! Handle over zero-or-one backend VM object, bound to a (datacenter,
//! name) pair for the duration of one reconcile invocation.

use std::sync::Arc;

use tracing::{debug, info};

use crate::backend::{Backend, BackendPowerState, CreateParams, ObjectRef, VmRecord};
use crate::error::{Error, Result};
use crate::resolver::ResourceContext;
use crate::task::TaskHandle;
use crate::types::{DesiredPowerState, VmSpec};

/// An existing backend VM. Produced fresh by [`VmHandle::lookup`] on
/// every invocation; never cached across invocations.
pub struct VmHandle {
    backend: Arc<dyn Backend>,
    datacenter: ObjectRef,
    name: String,
    record: VmRecord,
}

impl VmHandle {
    /// Look up an existing VM by name within a datacenter. Absence is
    /// surfaced as `NotFound`; the caller decides whether that means
    /// "needs creation" or is a genuine error. No retries.
    pub async fn lookup(
        backend: Arc<dyn Backend>,
        datacenter: ObjectRef,
        name: &str,
    ) -> Result<VmHandle> {
        match backend.find_vm(&datacenter, name).await? {
            Some(record) => {
                debug!(vm = %name, id = %record.id, "found existing vm");
                Ok(VmHandle {
                    backend,
                    datacenter,
                    name: name.to_string(),
                    record,
                })
            }
            None => Err(Error::not_found("vm", name)),
        }
    }

    /// Submit creation of a VM that does not exist yet. Fails fast on a
    /// malformed spec; backend unavailability surfaces as the returned
    /// task's Failure outcome, not here.
    pub async fn create(
        backend: &dyn Backend,
        ctx: &ResourceContext,
        spec: &VmSpec,
    ) -> Result<TaskHandle> {
        spec.validate()?;
        let params = CreateParams {
            name: spec.name.clone(),
            cpu_count: spec.cpu_count,
            memory_mb: spec.memory_mb,
            folder: ctx.folder().clone(),
            resource_pool: ctx.resource_pool().clone(),
            file_path: ctx.vm_file_path(),
        };
        let task = backend.create_vm(ctx.datacenter(), params).await?;
        info!(vm = %spec.name, task = %task.id, "submitted vm create");
        Ok(TaskHandle::new(task))
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn record(&self) -> &VmRecord {
        &self.record
    }

    /// Re-read the record from the backend. `NotFound` when the VM
    /// disappeared underneath us.
    pub async fn refresh(&mut self) -> Result<()> {
        match self.backend.find_vm(&self.datacenter, &self.name).await? {
            Some(record) => {
                self.record = record;
                Ok(())
            }
            None => Err(Error::not_found("vm", &self.name)),
        }
    }

    /// Submit reconfiguration when declared CPU/memory differ from the
    /// observed record. `Ok(None)` when nothing drifted - no task is
    /// submitted.
    pub async fn reconfigure(&self, spec: &VmSpec) -> Result<Option<TaskHandle>> {
        if self.record.cpu_count == spec.cpu_count && self.record.memory_mb == spec.memory_mb {
            return Ok(None);
        }
        let task = self
            .backend
            .reconfigure_vm(self.id(), spec.cpu_count, spec.memory_mb)
            .await?;
        info!(
            vm = %self.name,
            task = %task.id,
            cpu_count = spec.cpu_count,
            memory_mb = spec.memory_mb,
            "submitted vm reconfigure"
        );
        Ok(Some(TaskHandle::new(task)))
    }

    /// Submit a power transition toward `target`. `Ok(None)` when the
    /// observed state already matches - the redundant request is not
    /// sent, because backend no-op behavior varies.
    pub async fn power_to(&self, target: DesiredPowerState) -> Result<Option<TaskHandle>> {
        let task = match (self.record.power_state, target) {
            (BackendPowerState::PoweredOn, DesiredPowerState::PoweredOn) => return Ok(None),
            (BackendPowerState::PoweredOff, DesiredPowerState::PoweredOff) => return Ok(None),
            (_, DesiredPowerState::PoweredOn) => self.backend.power_on_vm(self.id()).await?,
            (_, DesiredPowerState::PoweredOff) => self.backend.power_off_vm(self.id()).await?,
            (_, DesiredPowerState::Unknown) => {
                return Err(Error::InvalidSpec(
                    "unrecognized desired power state".into(),
                ))
            }
        };
        info!(vm = %self.name, task = %task.id, target = ?target, "submitted power transition");
        Ok(Some(TaskHandle::new(task)))
    }

    /// Submit deletion. Irreversible once the task succeeds; there is no
    /// local rollback.
    pub async fn delete(&self) -> Result<TaskHandle> {
        let task = self.backend.delete_vm(self.id()).await?;
        info!(vm = %self.name, task = %task.id, "submitted vm delete");
        Ok(TaskHandle::new(task))
    }
}

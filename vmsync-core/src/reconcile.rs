//! The convergence algorithm: one invocation drives one VM's declared
//! state into backend reality and reports what it observed.
//!
//! Every invocation is purely a function of (declared spec, current
//! backend reality). Nothing survives between calls, so the external
//! scheduler may re-invoke at any time, for any reason. The scheduler
//! guarantees at most one in-flight reconcile per VM name.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::backend::{Backend, VmRecord};
use crate::error::Error;
use crate::recorder::EventRecorder;
use crate::resolver::{PlacementDefaults, ResourceContext, ResourceResolver};
use crate::status;
use crate::task::{TaskHandle, TaskOutcome, TaskTracker};
use crate::types::{Disposition, ReconcileReport, VmPhase, VmSpec};
use crate::vm::VmHandle;

/// Tunables the embedding harness may override.
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Wait budget per awaited backend task.
    pub task_budget: Duration,
    /// Poll interval while a task is outstanding.
    pub poll_interval: Duration,
    pub placement_defaults: PlacementDefaults,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            task_budget: Duration::from_secs(120),
            poll_interval: Duration::from_millis(500),
            placement_defaults: PlacementDefaults::default(),
        }
    }
}

/// Converges declared state for one VM per invocation.
pub struct Reconciler {
    backend: Arc<dyn Backend>,
    resolver: ResourceResolver,
    tracker: TaskTracker,
    recorder: Arc<dyn EventRecorder>,
    task_budget: Duration,
}

impl Reconciler {
    pub fn new(
        backend: Arc<dyn Backend>,
        recorder: Arc<dyn EventRecorder>,
        options: ReconcileOptions,
    ) -> Self {
        let resolver =
            ResourceResolver::new(Arc::clone(&backend), options.placement_defaults.clone());
        let tracker = TaskTracker::new(Arc::clone(&backend), options.poll_interval);
        Self {
            backend,
            resolver,
            tracker,
            recorder,
            task_budget: options.task_budget,
        }
    }

    /// One reconcile invocation. Idempotent: an already-converged VM
    /// produces zero mutating backend calls.
    pub async fn reconcile(&self, spec: &VmSpec, cancel: &CancellationToken) -> ReconcileReport {
        info!(vm = %spec.name, deletion = spec.deletion_requested, "reconciling");

        // Malformed specs abort before any backend call. The deletion
        // path skips validation: a record marked for deletion must stay
        // deletable even if its spec fields are nonsense.
        if !spec.deletion_requested {
            if let Err(err) = spec.validate() {
                error!(vm = %spec.name, error = %err, "spec rejected");
                self.recorder.failed(&spec.name, &err.to_string());
                return self.report_error(None, VmPhase::Failed, err);
            }
        }

        // Without a resolved placement context no reliable observation
        // can be made; this is the only path that skips status
        // projection entirely.
        let ctx = match self.resolver.resolve(&spec.placement).await {
            Ok(ctx) => ctx,
            Err(err) => {
                error!(vm = %spec.name, error = %err, "placement resolution failed");
                let disposition = if err.is_fatal() {
                    Disposition::Fatal
                } else {
                    Disposition::Requeue
                };
                return ReconcileReport {
                    disposition,
                    status: None,
                    error: Some(err),
                };
            }
        };

        if spec.deletion_requested {
            self.reconcile_delete(spec, &ctx, cancel).await
        } else {
            self.reconcile_presence(spec, &ctx, cancel).await
        }
    }

    /// Create-if-absent, then converge configuration and power state.
    async fn reconcile_presence(
        &self,
        spec: &VmSpec,
        ctx: &ResourceContext,
        cancel: &CancellationToken,
    ) -> ReconcileReport {
        let existing = match VmHandle::lookup(
            Arc::clone(&self.backend),
            ctx.datacenter().clone(),
            &spec.name,
        )
        .await
        {
            Ok(handle) => Some(handle),
            Err(Error::NotFound { .. }) => None,
            Err(err) => {
                warn!(vm = %spec.name, error = %err, "vm lookup failed");
                return self.report_error(None, VmPhase::Pending, err);
            }
        };

        let mut handle = match existing {
            Some(handle) => handle,
            None => match self.create(spec, ctx, cancel).await {
                Ok(handle) => handle,
                Err(report) => return report,
            },
        };

        let mut soft_error: Option<Error> = None;

        // Configuration before power: some backends reject hardware
        // reconfiguration on a powered-on VM.
        match handle.reconfigure(spec).await {
            Ok(None) => {}
            Ok(Some(task)) => match self.await_task(&task, cancel).await {
                TaskOutcome::Success => {
                    self.recorder.reconfigured(&spec.name);
                    if let Err(err) = handle.refresh().await {
                        warn!(vm = %spec.name, error = %err, "refresh after reconfigure failed");
                        soft_error.get_or_insert(err);
                    }
                }
                TaskOutcome::Failure(reason) => {
                    self.recorder.failed(&spec.name, &reason);
                    soft_error.get_or_insert(Error::BackendRejected {
                        op: "reconfigure",
                        reason,
                    });
                }
                TaskOutcome::TimedOut => {
                    soft_error.get_or_insert(Error::TaskTimeout {
                        budget: self.task_budget,
                    });
                }
                TaskOutcome::Cancelled => {
                    return self.report_cancelled(Some(handle.record()), VmPhase::Created)
                }
            },
            Err(err) => {
                warn!(vm = %spec.name, error = %err, "reconfigure submission failed");
                soft_error.get_or_insert(err);
            }
        }

        // Power convergence. Attempted even after a configuration soft
        // failure so status still reflects the closest reachable state.
        match handle.power_to(spec.power_state).await {
            Ok(None) => {}
            Ok(Some(task)) => match self.await_task(&task, cancel).await {
                TaskOutcome::Success => {
                    self.recorder.power_changed(&spec.name, spec.power_state);
                    if let Err(err) = handle.refresh().await {
                        warn!(vm = %spec.name, error = %err, "refresh after power change failed");
                        soft_error.get_or_insert(err);
                    }
                }
                TaskOutcome::Failure(reason) => {
                    self.recorder.failed(&spec.name, &reason);
                    soft_error.get_or_insert(Error::BackendRejected {
                        op: "power",
                        reason,
                    });
                }
                TaskOutcome::TimedOut => {
                    soft_error.get_or_insert(Error::TaskTimeout {
                        budget: self.task_budget,
                    });
                }
                TaskOutcome::Cancelled => {
                    return self.report_cancelled(Some(handle.record()), VmPhase::Created)
                }
            },
            Err(err) => {
                warn!(vm = %spec.name, error = %err, "power submission failed");
                soft_error.get_or_insert(err);
            }
        }

        let status = status::project(
            Some(handle.record()),
            VmPhase::Created,
            soft_error.as_ref(),
            Utc::now(),
        );
        match soft_error {
            None => {
                info!(vm = %spec.name, id = %handle.id(), "converged");
                ReconcileReport::clean(Disposition::Converged, status)
            }
            Some(err) => {
                let disposition = if err.is_fatal() {
                    Disposition::Fatal
                } else {
                    Disposition::Requeue
                };
                ReconcileReport {
                    disposition,
                    status: Some(status),
                    error: Some(err),
                }
            }
        }
    }

    /// Submit creation, await it, and bind a handle to the new object.
    async fn create(
        &self,
        spec: &VmSpec,
        ctx: &ResourceContext,
        cancel: &CancellationToken,
    ) -> Result<VmHandle, ReconcileReport> {
        info!(vm = %spec.name, "vm not found, creating");
        let task = match VmHandle::create(self.backend.as_ref(), ctx, spec).await {
            Ok(task) => task,
            Err(err) => {
                error!(vm = %spec.name, error = %err, "create submission failed");
                self.recorder.failed(&spec.name, &err.to_string());
                let phase = if err.is_fatal() {
                    VmPhase::Failed
                } else {
                    VmPhase::Pending
                };
                return Err(self.report_error(None, phase, err));
            }
        };

        match self.await_task(&task, cancel).await {
            TaskOutcome::Success => {}
            TaskOutcome::Failure(reason) => {
                // No automatic cleanup of a partially provisioned object;
                // the next invocation retries from observed state.
                error!(vm = %spec.name, reason = %reason, "create task failed");
                self.recorder.failed(&spec.name, &reason);
                return Err(self.report_error(
                    None,
                    VmPhase::Failed,
                    Error::BackendRejected {
                        op: "create",
                        reason,
                    },
                ));
            }
            TaskOutcome::TimedOut => {
                return Err(self.report_error(
                    None,
                    VmPhase::Creating,
                    Error::TaskTimeout {
                        budget: self.task_budget,
                    },
                ));
            }
            TaskOutcome::Cancelled => {
                return Err(self.report_cancelled(None, VmPhase::Creating));
            }
        }

        match VmHandle::lookup(
            Arc::clone(&self.backend),
            ctx.datacenter().clone(),
            &spec.name,
        )
        .await
        {
            Ok(handle) => {
                self.recorder.created(&spec.name, handle.id());
                Ok(handle)
            }
            Err(err) => {
                warn!(vm = %spec.name, error = %err, "vm missing after successful create task");
                Err(self.report_error(None, VmPhase::Pending, err))
            }
        }
    }

    /// Delete path. A VM that is already absent satisfies the deletion
    /// goal; delete short-circuits reconfiguration and power ops.
    async fn reconcile_delete(
        &self,
        spec: &VmSpec,
        ctx: &ResourceContext,
        cancel: &CancellationToken,
    ) -> ReconcileReport {
        let handle = match VmHandle::lookup(
            Arc::clone(&self.backend),
            ctx.datacenter().clone(),
            &spec.name,
        )
        .await
        {
            Ok(handle) => handle,
            Err(Error::NotFound { .. }) => {
                info!(vm = %spec.name, "vm already absent, delete satisfied");
                return ReconcileReport::clean(
                    Disposition::Deleted,
                    status::project(None, VmPhase::Deleted, None, Utc::now()),
                );
            }
            Err(err) => {
                warn!(vm = %spec.name, error = %err, "vm lookup failed during delete");
                return self.report_error(None, VmPhase::Deleting, err);
            }
        };

        let task = match handle.delete().await {
            Ok(task) => task,
            Err(err) => {
                warn!(vm = %spec.name, error = %err, "delete submission failed");
                return self.report_error(Some(handle.record()), VmPhase::Deleting, err);
            }
        };

        match self.await_task(&task, cancel).await {
            TaskOutcome::Success => {
                self.recorder.deleted(&spec.name);
                info!(vm = %spec.name, "vm deleted");
                ReconcileReport::clean(
                    Disposition::Deleted,
                    status::project(None, VmPhase::Deleted, None, Utc::now()),
                )
            }
            TaskOutcome::Failure(reason) => {
                self.recorder.failed(&spec.name, &reason);
                self.report_error(
                    Some(handle.record()),
                    VmPhase::Deleting,
                    Error::BackendRejected {
                        op: "delete",
                        reason,
                    },
                )
            }
            TaskOutcome::TimedOut => self.report_error(
                Some(handle.record()),
                VmPhase::Deleting,
                Error::TaskTimeout {
                    budget: self.task_budget,
                },
            ),
            TaskOutcome::Cancelled => {
                self.report_cancelled(Some(handle.record()), VmPhase::Deleting)
            }
        }
    }

    /// Await a task within the configured budget. A transport failure of
    /// the status poll is folded into a Failure outcome - the task may
    /// still be running; the next invocation re-observes reality.
    async fn await_task(&self, task: &TaskHandle, cancel: &CancellationToken) -> TaskOutcome {
        match self
            .tracker
            .await_task(task, self.task_budget, cancel)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => TaskOutcome::Failure(err.to_string()),
        }
    }

    fn report_error(
        &self,
        record: Option<&VmRecord>,
        phase: VmPhase,
        err: Error,
    ) -> ReconcileReport {
        let disposition = if err.is_fatal() {
            Disposition::Fatal
        } else {
            Disposition::Requeue
        };
        ReconcileReport {
            disposition,
            status: Some(status::project(record, phase, Some(&err), Utc::now())),
            error: Some(err),
        }
    }

    /// Cancellation aborts the invocation without marking the VM failed:
    /// the status carries no error message, only the best-known state.
    fn report_cancelled(&self, record: Option<&VmRecord>, phase: VmPhase) -> ReconcileReport {
        ReconcileReport {
            disposition: Disposition::Requeue,
            status: Some(status::project(record, phase, None, Utc::now())),
            error: Some(Error::Cancelled),
        }
    }
}

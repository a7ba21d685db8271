//! Restore orchestrator.
//!
//! Drives a restore in two phases:
//!
//! ## Preparation (no remote mutation)
//! - Resolve the snapshot and probe the target topology
//! - Evaluate the version gate and run every precondition
//!
//! ## Execution
//! - Publish `restoring` and arm the exit guard
//! - Run the catalog steps that apply to this target
//! - Downgrade the guard, publish `complete`, then restore host keys
//!
//! Any failure or interruption between publishing `restoring` and
//! publishing `complete` leaves the target marked `failed`.

use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::context::{RestoreRequest, RunContext};
use crate::gate::VersionGate;
use crate::guard::ExitGuard;
use crate::preflight::{Confirmation, Preflight};
use crate::remote::{RemoteExecutor, TargetHost};
use crate::report::RestoreReport;
use crate::snapshot::Snapshot;
use crate::status::{RestoreState, StatusPublisher, STATUS_FILE};
use crate::steps::{self, PlannedStep, Step, StepDeps, StepPolicy};
use crate::tools::ToolRunner;
use crate::topology::TopologyProber;
use crate::{Error, Result};

/// Restore orchestrator for a single target
pub struct RestoreOrchestrator {
    config: Arc<Config>,
    executor: Arc<dyn RemoteExecutor>,
    tools: Arc<dyn ToolRunner>,
    confirmation: Arc<dyn Confirmation>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_rx: Mutex<broadcast::Receiver<()>>,
}

impl RestoreOrchestrator {
    /// Create a new orchestrator
    pub fn new(
        config: Config,
        executor: Arc<dyn RemoteExecutor>,
        tools: Arc<dyn ToolRunner>,
        confirmation: Arc<dyn Confirmation>,
    ) -> Result<Self> {
        config.validate()?;
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        Ok(Self {
            config: Arc::new(config),
            executor,
            tools,
            confirmation,
            shutdown_tx,
            shutdown_rx: Mutex::new(shutdown_rx),
        })
    }

    /// Signal shutdown; honoured at the next step boundary
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get a clone of the shutdown sender for external signal handling
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Resolve, probe and validate a request without mutating the target
    pub async fn prepare(&self, request: &RestoreRequest) -> Result<RunContext> {
        let host: TargetHost = request.target_host.parse()?;

        let result = self.prepare_internal(&host, request).await;
        if result.is_err() {
            if let Err(e) = self.executor.release(&host).await {
                debug!("Failed to release connection to {}: {}", host, e);
            }
        }
        result
    }

    async fn prepare_internal(&self, host: &TargetHost, request: &RestoreRequest) -> Result<RunContext> {
        let snapshot = Snapshot::load(&self.config.data_dir, request.snapshot_id.as_deref()).await?;
        info!(
            "Restoring snapshot {} ({}, version {}) to {}",
            snapshot.id, snapshot.strategy, snapshot.instance_version, host
        );

        let topology = TopologyProber::new(self.executor.as_ref(), &self.config)
            .probe(host)
            .await?;
        let gate = VersionGate::evaluate(
            &snapshot.instance_version,
            &topology.remote_version,
            topology.is_cluster,
        );

        let restore_settings = Preflight::new(self.executor.as_ref(), self.confirmation.as_ref())
            .check(host, request, &snapshot, &topology, &gate)
            .await?;

        Ok(RunContext {
            host: host.clone(),
            snapshot,
            topology,
            gate,
            restore_settings,
            force: request.force,
            verbose: request.verbose,
            config: self.config.clone(),
        })
    }

    /// Catalog entries and whether each applies to the context
    pub fn plan(&self, ctx: &RunContext) -> Vec<PlannedStep> {
        steps::plan(ctx)
    }

    /// Prepare and execute a restore
    pub async fn run(&self, request: &RestoreRequest) -> Result<RestoreReport> {
        let ctx = self.prepare(request).await?;
        for planned in self.plan(&ctx) {
            debug!(
                "Plan: {:<20} {}",
                planned.step.name(),
                if planned.enabled { "enabled" } else { "skipped" }
            );
        }
        self.execute(&ctx).await
    }

    /// Execute a prepared restore
    pub async fn execute(&self, ctx: &RunContext) -> Result<RestoreReport> {
        let start = Instant::now();
        let mut report = RestoreReport::new(ctx);

        let status = Arc::new(StatusPublisher::new(
            self.executor.clone(),
            ctx.host.clone(),
            ctx.is_cluster(),
            ctx.config.common_path(STATUS_FILE),
        ));

        if let Err(e) = status.publish(RestoreState::Restoring).await {
            error!("Could not mark {} as restoring: {}", ctx.host, e);
            if let Err(e) = self.executor.release(&ctx.host).await {
                debug!("Failed to release connection to {}: {}", ctx.host, e);
            }
            return Err(e);
        }
        let guard = ExitGuard::arm(status.clone(), self.executor.clone(), ctx.host.clone());

        let outcome = AssertUnwindSafe(self.run_steps(ctx, &guard, &status, &mut report))
            .catch_unwind()
            .await;
        let result = match outcome {
            Ok(result) => result,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "panic".to_string());
                Err(Error::step("orchestrator", message))
            }
        };

        guard.fire().await;

        report.state = status.current();
        report.end_time = chrono::Utc::now().timestamp_millis();
        report.duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                info!("{}", report.completion_message());
                if let Some(hint) = report.setup_hint() {
                    info!("{}", hint);
                }
                Ok(report)
            }
            Err(e) => {
                error!("Restore of {} failed: {}", ctx.host, e);
                Err(e)
            }
        }
    }

    async fn run_steps(
        &self,
        ctx: &RunContext,
        guard: &ExitGuard,
        status: &StatusPublisher,
        report: &mut RestoreReport,
    ) -> Result<()> {
        let deps = StepDeps {
            executor: self.executor.as_ref(),
            tools: self.tools.as_ref(),
        };

        for step in steps::BEFORE_COMPLETE {
            self.checkpoint()?;
            self.run_step(*step, ctx, &deps, report).await?;
        }
        self.checkpoint()?;

        guard.downgrade()?;
        status.publish(RestoreState::Complete).await?;
        info!("Restore of {} marked complete", ctx.host);

        for step in steps::AFTER_COMPLETE {
            self.run_step(*step, ctx, &deps, report).await?;
        }
        Ok(())
    }

    async fn run_step(
        &self,
        step: Step,
        ctx: &RunContext,
        deps: &StepDeps<'_>,
        report: &mut RestoreReport,
    ) -> Result<()> {
        if !step.is_enabled(ctx) {
            debug!("Skipping {}", step.name());
            report.skipped_steps.push(step.name().to_string());
            return Ok(());
        }

        info!("{} ...", step.description());
        report.executed_steps.push(step.name().to_string());

        match step.execute(ctx, deps).await {
            Ok(()) => Ok(()),
            Err(e) => match step.policy() {
                StepPolicy::Fatal => {
                    error!("{} failed: {}", step.description(), e);
                    Err(match e {
                        Error::StepFailed { .. } => e,
                        other => Error::step(step.name(), other),
                    })
                }
                StepPolicy::BestEffort => {
                    warn!("{} failed, continuing: {}", step.description(), e);
                    report.warnings.push(format!("{}: {}", step.name(), e));
                    Ok(())
                }
            },
        }
    }

    /// Fail with `Interrupted` if shutdown was requested
    fn checkpoint(&self) -> Result<()> {
        match self.shutdown_rx.lock().try_recv() {
            Ok(()) | Err(broadcast::error::TryRecvError::Lagged(_)) => {
                warn!("Shutdown requested, stopping before the next step");
                Err(Error::Interrupted)
            }
            Err(_) => Ok(()),
        }
    }
}

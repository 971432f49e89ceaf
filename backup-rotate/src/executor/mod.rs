//! Backup run orchestration.
//!
//! One run processes one configuration: plan the periods due, take the lock,
//! run the `before` hooks, hold the bind mounts, then rotate and transfer
//! each period in turn. Mounts live on the `execute` future's stack and are
//! undone when a signal drops it. The lock is owned by the run itself and
//! outlives that future until `abort` has waited for in-flight store
//! operations.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::Config;
use crate::hooks::{HookContext, HookRunner, HookStage};
use crate::lock::{DirLock, LockGuard};
use crate::mounts::{self, MountGuard};
use crate::report::PeriodResult;
use crate::retention::{self, Generation, Period};
use crate::rotation::{self, RotationStep};
use crate::store::{self, GenerationStore};
use crate::transfer::RsyncInvocation;
use crate::utils::errors::{Result, RotateError};

/// Per-invocation choices made on the command line.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Date the calendar rules are evaluated for
    pub date: NaiveDate,
    /// Periods forced regardless of the calendar; empty means follow it
    pub periods: Vec<Period>,
    pub dry_run: bool,
}

pub struct BackupRun {
    config: Arc<Config>,
    store: Arc<dyn GenerationStore>,
    options: RunOptions,
    results: Vec<PeriodResult>,
    /// Set while the cleanup hooks of an interrupted run are still owed
    hooks_pending: Option<HookContext>,
    lock: Option<LockGuard>,
    /// Held by every store operation running on the blocking pool
    store_busy: Arc<Mutex<()>>,
}

impl BackupRun {
    pub fn new(config: Arc<Config>, options: RunOptions) -> Self {
        let store = store::from_config(&config);
        Self {
            config,
            store,
            options,
            results: Vec::new(),
            hooks_pending: None,
            lock: None,
            store_busy: Arc::new(Mutex::new(())),
        }
    }

    /// Periods this run processes, in order.
    pub fn periods(&self) -> Vec<Period> {
        if self.options.periods.is_empty() {
            retention::plan_for_date(
                self.options.date,
                &self.config.retention,
                &self.config.schedule,
            )
        } else {
            retention::plan_forced(&self.options.periods, &self.config.retention)
        }
    }

    /// Generations written so far.
    pub fn results(&self) -> &[PeriodResult] {
        &self.results
    }

    pub fn store(&self) -> &Arc<dyn GenerationStore> {
        &self.store
    }

    /// Execute the run.
    pub async fn execute(&mut self) -> Result<()> {
        let periods = self.periods();
        if periods.is_empty() {
            info!("No periods due on {} for {}", self.options.date, self.config.name);
            return Ok(());
        }

        info!(
            "Backing up {} to {} ({})",
            self.config.source.display(),
            self.store.describe(),
            periods.iter().map(Period::as_str).collect::<Vec<_>>().join(", ")
        );

        if self.options.dry_run {
            return self.dry_run(&periods);
        }

        mounts::check_privileges(&self.config.mounts)?;
        self.lock = Some(DirLock::new(self.config.lock_path()).acquire()?);

        let config = Arc::clone(&self.config);
        let hooks = HookRunner::new(&config.hooks);
        let mut ctx = self.hook_context(&periods);
        self.hooks_pending = Some(ctx.clone());

        let result = self.backup(&hooks, &ctx, &periods).await;

        match &result {
            Ok(()) => hooks.run_logged(HookStage::After, &ctx).await,
            Err(e) => {
                ctx.error = Some(e.to_string());
                hooks.run_logged(HookStage::Failed, &ctx).await;
            }
        }
        hooks.run_logged(HookStage::Finally, &ctx).await;
        self.hooks_pending = None;
        self.release_lock();

        match &result {
            Ok(()) => info!("Backup {} finished", self.config.name),
            Err(e) => warn!("Backup {} failed: {e}", self.config.name),
        }
        result
    }

    /// Finish a run whose `execute` future was dropped.
    ///
    /// Waits for a rotation still running on the blocking pool, runs the
    /// `failed` and `finally` hooks if the `before` hooks had started, then
    /// releases the lock.
    pub async fn abort(&mut self, error: &RotateError) {
        let store_busy = Arc::clone(&self.store_busy);
        let _idle = store_busy.lock().await;

        if let Some(mut ctx) = self.hooks_pending.take() {
            ctx.error = Some(error.to_string());

            let config = Arc::clone(&self.config);
            let hooks = HookRunner::new(&config.hooks);
            hooks.run_logged(HookStage::Failed, &ctx).await;
            hooks.run_logged(HookStage::Finally, &ctx).await;
        }

        self.release_lock();
    }

    fn release_lock(&mut self) {
        if let Some(lock) = self.lock.take() {
            if let Err(e) = lock.release() {
                warn!("Failed to release lock: {e}");
            }
        }
    }

    async fn backup(
        &mut self,
        hooks: &HookRunner<'_>,
        ctx: &HookContext,
        periods: &[Period],
    ) -> Result<()> {
        hooks.run(HookStage::Before, ctx).await?;

        let _mounts = MountGuard::mount_all(&self.config.mounts)?;
        self.blocking(|store| store.ensure_root()).await?;

        for period in periods {
            let result = self.run_period(*period).await?;
            self.results.push(result);
        }
        Ok(())
    }

    async fn run_period(&self, period: Period) -> Result<PeriodResult> {
        let keep = self.config.retention.keep(period);
        let target = Generation::new(period, 0);
        info!("Starting {period} backup (keeping {keep})");

        let steps = self
            .blocking(move |store| rotation::rotate(store, period, keep))
            .await?;

        let candidates = link_candidates(period);
        let link_dests = self
            .blocking(move |store| {
                let mut found = Vec::new();
                for generation in candidates {
                    if store.exists(&generation.dir_name())? {
                        found.push(generation);
                    }
                }
                Ok(found)
            })
            .await?;

        let invocation =
            RsyncInvocation::build(&self.config, self.store.as_ref(), target, &link_dests);
        let report = invocation.run().await?;

        info!("Wrote {target} in {:.1}s", report.duration.as_secs_f64());

        let (removed, rotated) = count_steps(&steps);
        Ok(PeriodResult {
            period,
            generation: target,
            removed,
            rotated,
            outcome: report.outcome,
            stats: report.stats,
            duration: report.duration,
        })
    }

    /// Log what a real run would do, changing nothing.
    fn dry_run(&self, periods: &[Period]) -> Result<()> {
        mounts::log_planned(&self.config.mounts);
        let hooks = HookRunner::new(&self.config.hooks);
        for stage in [HookStage::Before, HookStage::After, HookStage::Failed, HookStage::Finally] {
            for command in hooks.commands(stage) {
                info!("Would run {} hook: {command}", stage.as_str());
            }
        }

        let mut names: BTreeSet<String> = self.store.list()?.into_iter().collect();

        for period in periods {
            let keep = self.config.retention.keep(*period);
            let listing: Vec<String> = names.iter().cloned().collect();
            let steps = rotation::plan_rotation(
                *period,
                keep,
                &rotation::existing_slots(*period, &listing),
            );
            for step in &steps {
                info!("Would {step}");
            }
            simulate(&mut names, &steps);

            let link_dests: Vec<Generation> = link_candidates(*period)
                .into_iter()
                .filter(|generation| names.contains(&generation.dir_name()))
                .collect();
            let target = Generation::new(*period, 0);
            let invocation =
                RsyncInvocation::build(&self.config, self.store.as_ref(), target, &link_dests);
            info!("Would run {}", invocation.command_line());
            names.insert(target.dir_name());
        }
        Ok(())
    }

    fn hook_context(&self, periods: &[Period]) -> HookContext {
        HookContext {
            name: self.config.name.clone(),
            source: self.config.source.display().to_string(),
            destination: self.store.describe(),
            periods: periods.iter().map(|p| p.as_str().to_string()).collect(),
            error: None,
        }
    }

    /// Run a store operation on the blocking pool.
    ///
    /// The task keeps `store_busy` locked until it returns, even when the
    /// awaiting future is dropped.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn GenerationStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let busy = Arc::clone(&self.store_busy).lock_owned().await;
        tokio::task::spawn_blocking(move || {
            let _busy = busy;
            f(store.as_ref())
        })
        .await
        .map_err(|e| RotateError::Io(std::io::Error::other(e)))?
    }
}

/// Generations the new `<period>-00` is hard-linked against, when present.
fn link_candidates(period: Period) -> Vec<Generation> {
    let mut candidates = vec![Generation::new(period, 1)];
    if period != Period::Daily {
        candidates.push(Generation::new(Period::Daily, 0));
    }
    candidates
}

fn count_steps(steps: &[RotationStep]) -> (usize, usize) {
    steps.iter().fold((0, 0), |(removed, rotated), step| match step {
        RotationStep::Remove(_) => (removed + 1, rotated),
        RotationStep::Rename { .. } => (removed, rotated + 1),
    })
}

/// Apply rotation steps to a set of entry names.
fn simulate(names: &mut BTreeSet<String>, steps: &[RotationStep]) {
    for step in steps {
        match step {
            RotationStep::Remove(generation) => {
                names.remove(&generation.dir_name());
            }
            RotationStep::Rename { from, to } => {
                names.remove(&from.dir_name());
                names.insert(to.dir_name());
            }
        }
    }
}

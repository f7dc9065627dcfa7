//! Execution service: orchestration of recipe installs, uninstalls and
//! single-step operations.
//!
//! Whole-recipe runs are spawned onto the runtime and tracked per recipe:
//! resolve → single-flight guard → spawn → for each step: apply/revert →
//! lock file → events. Install walks steps in ascending order, uninstall in
//! descending order. The latest run of each recipe stays queryable.

use super::error::{RecipeError, Result};
use super::recipe::Recipe;
use super::registry::RecipeProvider;
use super::state::LockStore;
use super::step::RecipeStep;
use super::types::*;
use crate::provenance::eventlog;
use crate::steps::StepContext;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex, OwnedMutexGuard};

/// A tracked whole-recipe run.
#[derive(Debug)]
struct Execution {
    progress: watch::Sender<ExecutionDto>,
    cancel: watch::Sender<bool>,
}

impl Execution {
    fn snapshot(&self) -> ExecutionDto {
        self.progress.borrow().clone()
    }

    fn update(&self, f: impl FnOnce(&mut ExecutionDto)) {
        self.progress.send_modify(f);
    }
}

/// Orchestrates recipes from a provider against one step context.
pub struct RecipeExecutionService {
    provider: Arc<dyn RecipeProvider>,
    ctx: StepContext,
    state_dir: PathBuf,
    locks: LockStore,
    policy: Policy,
    guards: DashMap<String, Arc<Mutex<()>>>,
    executions: DashMap<String, Arc<Execution>>,
}

impl std::fmt::Debug for RecipeExecutionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecipeExecutionService")
            .field("state_dir", &self.state_dir)
            .field("policy", &self.policy)
            .field("executions", &self.executions.len())
            .finish()
    }
}

/// Counters for one run.
#[derive(Debug, Default)]
struct Tally {
    completed: u32,
    failed: u32,
    /// When the step in flight started
    step_started: Option<Instant>,
}

impl RecipeExecutionService {
    pub fn new(
        provider: Arc<dyn RecipeProvider>,
        ctx: StepContext,
        state_dir: impl Into<PathBuf>,
        policy: Policy,
    ) -> Arc<Self> {
        let ctx = ctx.with_command_timeout(Duration::from_secs(policy.step_timeout_secs));
        let state_dir = state_dir.into();
        Arc::new(Self {
            provider,
            ctx,
            locks: LockStore::new(state_dir.clone()),
            state_dir,
            policy,
            guards: DashMap::new(),
            executions: DashMap::new(),
        })
    }

    pub fn context(&self) -> &StepContext {
        &self.ctx
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.policy.step_timeout_secs)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    fn dto_for(&self, recipe: &Recipe) -> RecipeDto {
        let mut dto = recipe.to_dto(&self.ctx);
        dto.execution = self.executions.get(recipe.id()).map(|e| e.snapshot());
        dto
    }

    pub fn list_recipes(&self) -> Vec<RecipeDto> {
        self.provider
            .get_all()
            .iter()
            .map(|r| self.dto_for(r))
            .collect()
    }

    pub fn get_recipe(&self, id: &str) -> Result<RecipeDto> {
        let recipe = self.provider.get_by_id(id)?;
        Ok(self.dto_for(&recipe))
    }

    /// Latest whole-recipe execution for `id`.
    pub fn execution_status(&self, id: &str) -> Result<ExecutionDto> {
        self.provider.get_by_id(id)?;
        self.executions
            .get(id)
            .map(|e| e.snapshot())
            .ok_or_else(|| RecipeError::NoExecution(id.to_string()))
    }

    /// Re-read recipe definitions from the provider's source.
    pub fn reload(&self) -> Result<usize> {
        self.provider.reload()
    }

    // ========================================================================
    // Whole-recipe execution
    // ========================================================================

    /// Start applying every step in ascending order. Returns before completion.
    pub async fn install(self: &Arc<Self>, id: &str) -> Result<RecipeDto> {
        let (recipe, _) = self.start(id, Operation::Install)?;
        Ok(self.dto_for(&recipe))
    }

    /// Start reverting every step in descending order. Returns before completion.
    pub async fn uninstall(self: &Arc<Self>, id: &str) -> Result<RecipeDto> {
        let (recipe, _) = self.start(id, Operation::Uninstall)?;
        Ok(self.dto_for(&recipe))
    }

    /// Start an execution and wait for it to finish.
    pub async fn run_to_completion(
        self: &Arc<Self>,
        id: &str,
        operation: Operation,
    ) -> Result<ExecutionDto> {
        let (_, execution) = self.start(id, operation)?;
        wait_terminal(&execution).await
    }

    /// Request cancellation. The run stops before its next step.
    pub fn cancel(&self, id: &str) -> Result<ExecutionDto> {
        self.provider.get_by_id(id)?;
        let execution = self
            .executions
            .get(id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| RecipeError::NotRunning(id.to_string()))?;
        let snapshot = execution.snapshot();
        if snapshot.state.is_terminal() {
            return Err(RecipeError::NotRunning(id.to_string()));
        }
        execution.cancel.send_replace(true);
        tracing::info!(recipe = id, run_id = %snapshot.run_id, "cancellation requested");
        Ok(snapshot)
    }

    /// Cancel every running execution and wait for all of them to stop.
    pub async fn shutdown(&self) {
        let running: Vec<Arc<Execution>> = self
            .executions
            .iter()
            .map(|e| Arc::clone(e.value()))
            .filter(|e| !e.snapshot().state.is_terminal())
            .collect();
        if running.is_empty() {
            return;
        }
        tracing::info!(count = running.len(), "cancelling running executions");
        for execution in &running {
            execution.cancel.send_replace(true);
        }
        for execution in &running {
            if let Err(e) = wait_terminal(execution).await {
                tracing::warn!(error = %e, "execution did not report completion");
            }
        }
    }

    fn acquire(&self, id: &str) -> Result<OwnedMutexGuard<()>> {
        let guard = Arc::clone(self.guards.entry(id.to_string()).or_default().value());
        guard
            .try_lock_owned()
            .map_err(|_| RecipeError::ExecutionInProgress(id.to_string()))
    }

    fn start(
        self: &Arc<Self>,
        id: &str,
        operation: Operation,
    ) -> Result<(Arc<Recipe>, Arc<Execution>)> {
        let recipe = self.provider.get_by_id(id)?;
        let guard = self.acquire(id)?;

        let run_id = eventlog::generate_run_id();
        let (progress, _) = watch::channel(ExecutionDto {
            run_id: run_id.clone(),
            recipe: id.to_string(),
            operation,
            state: ExecutionState::Pending,
            current_step: None,
            failed_step: None,
            started_at: eventlog::now_iso8601(),
            finished_at: None,
            outcomes: Vec::new(),
        });
        let (cancel, cancel_rx) = watch::channel(false);
        let execution = Arc::new(Execution { progress, cancel });
        self.executions
            .insert(id.to_string(), Arc::clone(&execution));

        tracing::info!(recipe = id, %run_id, %operation, steps = recipe.len(), "execution scheduled");

        let service = Arc::clone(self);
        let task_recipe = Arc::clone(&recipe);
        let task_execution = Arc::clone(&execution);
        tokio::spawn(async move {
            service
                .execute(task_recipe, operation, task_execution, cancel_rx, guard)
                .await;
        });

        Ok((recipe, execution))
    }

    async fn execute(
        &self,
        recipe: Arc<Recipe>,
        operation: Operation,
        execution: Arc<Execution>,
        cancel: watch::Receiver<bool>,
        guard: OwnedMutexGuard<()>,
    ) {
        let start = Instant::now();
        let run_id = execution.snapshot().run_id;
        execution.update(|d| d.state = ExecutionState::Running);
        self.emit(
            recipe.id(),
            RecipeEvent::ExecutionStarted {
                recipe: recipe.id().to_string(),
                run_id: run_id.clone(),
                operation,
                recipectl_version: env!("CARGO_PKG_VERSION").to_string(),
            },
        );

        let mut tally = Tally::default();
        let budget = Duration::from_secs(self.policy.execution_timeout_secs);
        let outcome = tokio::time::timeout(
            budget,
            self.run_steps(&recipe, operation, &execution, &cancel, &mut tally),
        )
        .await;
        let final_state = match outcome {
            Ok(state) => state,
            Err(_) => {
                let message = format!("execution timed out after {}s", budget.as_secs());
                if let Some(index) = execution.snapshot().current_step {
                    let action = operation.step_action();
                    self.interrupt(&recipe, index, action, &message, &execution, &tally);
                }
                tally.failed += 1;
                tracing::error!(recipe = recipe.id(), %run_id, seconds = budget.as_secs(), "execution timed out");
                ExecutionState::TimedOut
            }
        };

        let total = start.elapsed().as_secs_f64();
        self.emit(
            recipe.id(),
            RecipeEvent::ExecutionCompleted {
                recipe: recipe.id().to_string(),
                run_id: run_id.clone(),
                state: final_state,
                steps_completed: tally.completed,
                steps_failed: tally.failed,
                total_seconds: total,
            },
        );
        tracing::info!(
            recipe = recipe.id(),
            %run_id,
            state = %final_state,
            completed = tally.completed,
            failed = tally.failed,
            seconds = total,
            "execution finished"
        );

        // A terminal state is only visible once the guard is free
        drop(guard);
        execution.update(|d| {
            d.state = final_state;
            d.current_step = None;
            d.finished_at = Some(eventlog::now_iso8601());
        });
    }

    async fn run_steps(
        &self,
        recipe: &Recipe,
        operation: Operation,
        execution: &Execution,
        cancel: &watch::Receiver<bool>,
        tally: &mut Tally,
    ) -> ExecutionState {
        let action = operation.step_action();
        let order: Vec<usize> = match operation {
            Operation::Install => (0..recipe.len()).collect(),
            Operation::Uninstall => (0..recipe.len()).rev().collect(),
        };

        for index in order {
            if *cancel.borrow() {
                tracing::info!(recipe = recipe.id(), next_step = index, "execution cancelled");
                return ExecutionState::Cancelled;
            }
            let Ok(step) = recipe.step(index) else {
                continue;
            };

            execution.update(|d| d.current_step = Some(index));
            tally.step_started = Some(Instant::now());
            let result = self.run_step(recipe, step, action).await;
            let duration_ms = elapsed_ms(tally.step_started);

            let error = result.as_ref().err().map(|e| e.to_string());
            execution.update(|d| {
                d.outcomes.push(StepOutcome {
                    index,
                    status: step.status(),
                    duration_ms,
                    error: error.clone(),
                });
                if error.is_some() && d.failed_step.is_none() {
                    d.failed_step = Some(index);
                }
            });

            match result {
                Ok(()) => tally.completed += 1,
                Err(_) => {
                    tally.failed += 1;
                    if self.policy.failure == FailurePolicy::StopOnFirst {
                        tracing::warn!(recipe = recipe.id(), step = index, "stopping after first failure");
                        return ExecutionState::Failed;
                    }
                }
            }
        }

        if tally.failed > 0 {
            ExecutionState::Failed
        } else {
            ExecutionState::Succeeded
        }
    }

    /// Record the step cut off by the execution timeout as failed, the same
    /// way a step failure is recorded.
    fn interrupt(
        &self,
        recipe: &Recipe,
        index: usize,
        action: StepAction,
        message: &str,
        execution: &Execution,
        tally: &Tally,
    ) {
        let Ok(step) = recipe.step(index) else {
            return;
        };
        step.fail(message);
        self.persist(recipe);
        let duration_ms = elapsed_ms(tally.step_started);
        execution.update(|d| {
            d.outcomes.push(StepOutcome {
                index,
                status: StepStatus::Failed,
                duration_ms,
                error: Some(message.to_string()),
            });
            d.failed_step.get_or_insert(index);
        });
        self.emit(
            recipe.id(),
            RecipeEvent::StepFailed {
                recipe: recipe.id().to_string(),
                step: index,
                action,
                error: message.to_string(),
            },
        );
        tracing::warn!(recipe = recipe.id(), step = index, %action, error = message, "step interrupted");
    }

    /// Run one step with events, logging and lock persistence.
    async fn run_step(
        &self,
        recipe: &Recipe,
        step: &RecipeStep,
        action: StepAction,
    ) -> Result<()> {
        let index = step.index();
        self.emit(
            recipe.id(),
            RecipeEvent::StepStarted {
                recipe: recipe.id().to_string(),
                step: index,
                action,
            },
        );
        tracing::debug!(recipe = recipe.id(), step = index, %action, name = %step.name(), "step started");

        let started = Instant::now();
        let result = match action {
            StepAction::Apply => step.apply(recipe.id(), &self.ctx, self.step_timeout()).await,
            StepAction::Revert => step.revert(recipe.id(), &self.ctx, self.step_timeout()).await,
        };
        self.persist(recipe);

        match result {
            Ok(()) => {
                let duration = started.elapsed().as_secs_f64();
                self.emit(
                    recipe.id(),
                    RecipeEvent::StepCompleted {
                        recipe: recipe.id().to_string(),
                        step: index,
                        action,
                        duration_seconds: duration,
                    },
                );
                tracing::info!(recipe = recipe.id(), step = index, %action, seconds = duration, "step completed");
                Ok(())
            }
            Err(e) => {
                self.emit(
                    recipe.id(),
                    RecipeEvent::StepFailed {
                        recipe: recipe.id().to_string(),
                        step: index,
                        action,
                        error: e.to_string(),
                    },
                );
                tracing::warn!(recipe = recipe.id(), step = index, %action, error = %e, "step failed");
                Err(e)
            }
        }
    }

    // ========================================================================
    // Single-step execution
    // ========================================================================

    /// Apply one step and wait for the result.
    pub async fn apply_step(self: &Arc<Self>, id: &str, index: usize) -> Result<StepDto> {
        self.single_step(id, index, StepAction::Apply).await
    }

    /// Revert one step and wait for the result.
    pub async fn revert_step(self: &Arc<Self>, id: &str, index: usize) -> Result<StepDto> {
        self.single_step(id, index, StepAction::Revert).await
    }

    /// The step runs on its own task holding the guard. A caller that stops
    /// waiting (a dropped HTTP request) does not cut the step short.
    async fn single_step(
        self: &Arc<Self>,
        id: &str,
        index: usize,
        action: StepAction,
    ) -> Result<StepDto> {
        let recipe = self.provider.get_by_id(id)?;
        recipe.step(index)?;
        let guard = self.acquire(id)?;

        let service = Arc::clone(self);
        let task = tokio::spawn(async move {
            let _guard = guard;
            let step = recipe.step(index)?;
            service.run_step(&recipe, step, action).await?;
            Ok::<_, RecipeError>(step.to_dto(&service.ctx))
        });
        task.await
            .map_err(|e| RecipeError::state(format!("step task for '{id}' did not finish: {e}")))?
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    fn persist(&self, recipe: &Recipe) {
        if !self.policy.lock_file {
            return;
        }
        if let Err(e) = self.locks.save(&recipe.to_lock()) {
            tracing::warn!(recipe = recipe.id(), error = %e, "cannot persist step status");
        }
    }

    fn emit(&self, recipe: &str, event: RecipeEvent) {
        if !self.policy.events {
            return;
        }
        if let Err(e) = eventlog::append_event(&self.state_dir, recipe, event) {
            tracing::warn!(recipe, error = %e, "cannot append event");
        }
    }
}

fn elapsed_ms(since: Option<Instant>) -> u64 {
    since.map_or(0, |t| u64::try_from(t.elapsed().as_millis()).unwrap_or(u64::MAX))
}

async fn wait_terminal(execution: &Execution) -> Result<ExecutionDto> {
    let mut rx = execution.progress.subscribe();
    let dto = rx
        .wait_for(|d| d.state.is_terminal())
        .await
        .map_err(|_| RecipeError::state("execution record dropped"))?;
    Ok(dto.clone())
}

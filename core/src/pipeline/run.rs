use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::Instrument;
use uuid::Uuid;

use crate::budget::{BudgetLedger, LedgerSnapshot, PriceTable};
use crate::context::{AppContext, Services};
use crate::error::PipelineError;
use crate::executor::{
    AdmissionLimiter, ExecutionObserver, ExecutionSummary, ParallelExecutor, WorkQueue,
};
use crate::lock::ExclusivityLock;
use crate::planner::{DiscoveryReport, Plan, TaskPlanner};
use crate::state::{CheckpointStore, Stage, WorkflowState};
use crate::util::lock_unpoisoned;

use super::agents::{AgentOutput, ScaffoldReport, SchemaDesign};

const COMPLETED_SOURCES: &str = "completedSources";

#[derive(Clone, Default)]
pub struct RunOptions {
    /// Continue a previous run instead of refusing to touch its state.
    pub resume: bool,
    /// Overrides both the configured and the persisted ceiling.
    pub max_cost: Option<f64>,
    pub observers: Vec<Arc<dyn ExecutionObserver>>,
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub run_id: String,
    pub planned_tasks: usize,
    pub skipped_stages: Vec<Stage>,
    pub summary: ExecutionSummary,
    pub ledger: LedgerSnapshot,
}

/// Runs analyze → design → scaffold → migrate for one project under the
/// project lock, checkpointing after every stage.
pub struct PipelineRunner {
    ctx: AppContext,
    services: Services,
    project_root: PathBuf,
    store: CheckpointStore,
    lock: Arc<ExclusivityLock>,
    limiter: Arc<AdmissionLimiter>,
    cancelled: AtomicBool,
    active: Mutex<Option<Arc<ParallelExecutor>>>,
}

impl PipelineRunner {
    pub fn new(ctx: AppContext, services: Services, project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        let cfg = ctx.cfg();
        let store = CheckpointStore::for_project(&project_root, &cfg.state);
        let lock = Arc::new(ExclusivityLock::for_project(&project_root, &cfg.state));
        let limiter = Arc::new(AdmissionLimiter::from_config(&cfg.limiter));
        Self {
            ctx,
            services,
            project_root,
            store,
            lock,
            limiter,
            cancelled: AtomicBool::new(false),
            active: Mutex::new(None),
        }
    }

    pub async fn from_context(
        ctx: AppContext,
        project_root: impl Into<PathBuf>,
    ) -> Result<Self, PipelineError> {
        let services = ctx.build_services().await?;
        Ok(Self::new(ctx, services, project_root))
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    pub fn lock(&self) -> Arc<ExclusivityLock> {
        self.lock.clone()
    }

    /// Stop at the next stage boundary; the migrate stage stops dispatching.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(executor) = lock_unpoisoned(&self.active).as_ref() {
            executor.cancel();
        }
    }

    fn check_cancelled(&self) -> Result<(), PipelineError> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Analyze and plan without taking the lock or touching state.
    pub async fn plan_only(&self) -> Result<Plan, PipelineError> {
        let ledger = BudgetLedger::new(PriceTable::from_config(&self.ctx.cfg().pricing), None);
        let report = self.analyze(&ledger).await?;
        let discovery = parse_discovery(report)?;
        Ok(TaskPlanner::from_config(self.ctx.cfg()).create_plan(&discovery))
    }

    pub async fn run(&self, opts: RunOptions) -> Result<RunReport, PipelineError> {
        let run_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!(
            "pipeline",
            run_id = %run_id,
            project = %self.project_root.display()
        );

        async {
            self.lock.acquire()?;
            let result = self.run_locked(&run_id, opts).await;
            if let Err(e) = self.lock.release() {
                tracing::warn!(error = %e, "failed to release lock");
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run_locked(&self, run_id: &str, opts: RunOptions) -> Result<RunReport, PipelineError> {
        let cfg = self.ctx.cfg();

        let mut state = match self.store.load()? {
            Some(state) if !opts.resume => {
                return Err(PipelineError::ResumeRequired {
                    stage: state.current_stage,
                });
            }
            Some(state) => {
                tracing::info!(
                    stage = %state.current_stage,
                    checkpoints = state.checkpoints.len(),
                    cost = state.total_cost,
                    "resuming previous run"
                );
                state
            }
            None => self.store.start(opts.max_cost.or(cfg.budget.max_cost))?,
        };

        let max_cost = opts.max_cost.or(state.max_cost).or(cfg.budget.max_cost);
        if state.max_cost != max_cost {
            state.max_cost = max_cost;
            self.store.save(&state)?;
        }

        let ledger = Arc::new(BudgetLedger::new(
            PriceTable::from_config(&cfg.pricing),
            max_cost,
        ));
        ledger.restore(state.total_cost, state.total_tokens, state.api_call_count);

        if state.current_stage == Stage::Completed {
            tracing::info!("previous run had already completed; clearing its state");
            self.store.clear()?;
            return Ok(RunReport {
                run_id: run_id.to_string(),
                ledger: ledger.snapshot(),
                ..RunReport::default()
            });
        }

        let mut done = completed_sources(&state);
        match self.run_stages(&state, &ledger, &opts, &mut done).await {
            Ok(mut report) => {
                let snap = ledger.snapshot();
                self.store
                    .record_usage_totals(snap.total_cost, snap.total_tokens(), snap.api_calls)?;
                self.store.checkpoint(
                    Stage::Completed,
                    "migration complete",
                    json!({
                        "completedSources": done,
                        "totalCost": snap.total_cost,
                    }),
                )?;
                self.store.clear()?;
                tracing::info!(
                    migrated = report.summary.completed,
                    cost = snap.total_cost,
                    "pipeline completed"
                );
                report.run_id = run_id.to_string();
                report.ledger = snap;
                Ok(report)
            }
            Err(err) => {
                self.persist_failure(&err, &ledger, &done);
                Err(err)
            }
        }
    }

    /// Best effort: the original error is what the caller needs to see.
    fn persist_failure(&self, err: &PipelineError, ledger: &BudgetLedger, done: &[String]) {
        if self.store.current().is_none() {
            return;
        }
        let snap = ledger.snapshot();
        let persisted = self
            .store
            .record_usage_totals(snap.total_cost, snap.total_tokens(), snap.api_calls)
            .and_then(|_| {
                self.store.fail(
                    err.to_string(),
                    json!({
                        "error": err.to_string(),
                        "completedSources": done,
                    }),
                )
            });
        match persisted {
            Ok(_) => tracing::warn!(error = %err, "run failed; progress saved for --resume"),
            Err(e) => tracing::error!(error = %e, original = %err, "could not persist failure"),
        }
    }

    async fn run_stages(
        &self,
        state: &WorkflowState,
        ledger: &Arc<BudgetLedger>,
        opts: &RunOptions,
        done: &mut Vec<String>,
    ) -> Result<RunReport, PipelineError> {
        let mut skipped = Vec::new();

        let report: Value = match stage_payload(state, Stage::Analyzing, "report")? {
            Some(report) => {
                skipped.push(Stage::Analyzing);
                report
            }
            None => {
                let report = self.analyze(ledger).await?;
                self.store.checkpoint(
                    Stage::Analyzing,
                    "documentation analyzed",
                    json!({ "report": report }),
                )?;
                report
            }
        };
        self.check_cancelled()?;

        let design: SchemaDesign = match stage_payload(state, Stage::Designing, "design")? {
            Some(design) => {
                skipped.push(Stage::Designing);
                design
            }
            None => {
                let design = self.design(&report, ledger).await?;
                self.store.checkpoint(
                    Stage::Designing,
                    "content schemas designed",
                    json!({ "design": design }),
                )?;
                design
            }
        };
        self.check_cancelled()?;

        match stage_payload::<ScaffoldReport>(state, Stage::Implementing, "scaffold")? {
            Some(_) => skipped.push(Stage::Implementing),
            None => {
                let scaffold = self.scaffold(&design, ledger).await?;
                self.store.checkpoint(
                    Stage::Implementing,
                    "site structure scaffolded",
                    json!({ "scaffold": scaffold }),
                )?;
            }
        }
        self.check_cancelled()?;

        let discovery = parse_discovery(report)?;
        let planner = TaskPlanner::from_config(self.ctx.cfg()).with_collections(design.collection_names());
        let full_plan = planner.create_plan(&discovery);
        let plan = full_plan.without(done, &planner);
        if plan.len() < full_plan.len() {
            tracing::info!(
                skipped = full_plan.len() - plan.len(),
                remaining = plan.len(),
                "skipping documents migrated by an earlier run"
            );
        }

        let summary = self.migrate(&plan, ledger, opts).await;
        for source in summary.completed_refs() {
            if !done.contains(&source) {
                done.push(source);
            }
        }

        if let Some(err) = summary.budget_error.clone() {
            return Err(err.into());
        }
        self.check_cancelled()?;
        if summary.failed > 0 {
            return Err(PipelineError::Stage {
                stage: Stage::Migrating,
                message: format!(
                    "{} of {} documents failed to migrate",
                    summary.failed,
                    summary.total()
                ),
            });
        }

        self.store.checkpoint(
            Stage::Migrating,
            "documents migrated",
            json!({
                "completedSources": done,
                "completed": summary.completed,
            }),
        )?;

        Ok(RunReport {
            run_id: String::new(),
            planned_tasks: full_plan.len(),
            skipped_stages: skipped,
            summary,
            ledger: LedgerSnapshot::default(),
        })
    }

    async fn admit(&self) {
        self.limiter.acquire(self.ctx.cfg().planner.base_tokens).await;
    }

    fn charge<T>(&self, ledger: &BudgetLedger, out: &AgentOutput<T>) -> Result<(), PipelineError> {
        if let Some(usage) = out.usage.as_ref() {
            let model = out
                .model
                .as_deref()
                .unwrap_or(self.ctx.cfg().service.model.as_str());
            match out.cost {
                Some(cost) => ledger.record_priced(model, usage, cost)?,
                None => ledger.record_usage(model, usage)?,
            };
        }
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(stage = "analyze"))]
    async fn analyze(&self, ledger: &BudgetLedger) -> Result<Value, PipelineError> {
        self.admit().await;
        let sink = self.ctx.sink();
        let out = self
            .services
            .agents
            .analyze(&self.project_root, sink.as_ref())
            .await
            .map_err(|e| stage_error(Stage::Analyzing, e))?;
        self.charge(ledger, &out)?;
        Ok(out.value)
    }

    #[tracing::instrument(skip_all, fields(stage = "design"))]
    async fn design(&self, report: &Value, ledger: &BudgetLedger) -> Result<SchemaDesign, PipelineError> {
        self.admit().await;
        let sink = self.ctx.sink();
        let out = self
            .services
            .agents
            .design_schemas(report, sink.as_ref())
            .await
            .map_err(|e| stage_error(Stage::Designing, e))?;
        self.charge(ledger, &out)?;
        tracing::info!(collections = out.value.collections.len(), "schemas designed");
        Ok(out.value)
    }

    #[tracing::instrument(skip_all, fields(stage = "scaffold"))]
    async fn scaffold(
        &self,
        design: &SchemaDesign,
        ledger: &BudgetLedger,
    ) -> Result<ScaffoldReport, PipelineError> {
        self.admit().await;
        let sink = self.ctx.sink();
        let out = self
            .services
            .agents
            .scaffold(&self.project_root, design, sink.as_ref())
            .await
            .map_err(|e| stage_error(Stage::Implementing, e))?;
        self.charge(ledger, &out)?;
        Ok(out.value)
    }

    #[tracing::instrument(skip_all, fields(stage = "migrate", tasks = plan.len()))]
    async fn migrate(
        &self,
        plan: &Plan,
        ledger: &Arc<BudgetLedger>,
        opts: &RunOptions,
    ) -> ExecutionSummary {
        let cfg = self.ctx.cfg();
        let mut builder = ParallelExecutor::builder(self.services.runner.clone(), ledger.clone())
            .queue(WorkQueue::new(cfg.executor.max_concurrency, self.limiter.clone()))
            .sink(self.ctx.sink())
            .default_model(cfg.service.model.clone());
        if let Some(retry) = self.services.retry.as_ref() {
            builder = builder.retry_strategy(retry.clone());
        }
        for observer in &opts.observers {
            builder = builder.observer(observer.clone());
        }

        let executor = Arc::new(builder.build());
        *lock_unpoisoned(&self.active) = Some(executor.clone());
        // A cancel that raced the assignment above must still take effect.
        if self.cancelled.load(Ordering::SeqCst) {
            executor.cancel();
        }

        let summary = executor.execute(plan).await;
        *lock_unpoisoned(&self.active) = None;
        summary
    }
}

fn stage_error(stage: Stage, err: anyhow::Error) -> PipelineError {
    PipelineError::Stage {
        stage,
        message: format!("{err:#}"),
    }
}

fn parse_discovery(report: Value) -> Result<DiscoveryReport, PipelineError> {
    DiscoveryReport::from_value(report).map_err(|e| PipelineError::Stage {
        stage: Stage::Analyzing,
        message: format!("unrecognized discovery report: {e}"),
    })
}

/// Payload `key` of the latest checkpoint for `stage`, if that stage ran.
fn stage_payload<T: DeserializeOwned>(
    state: &WorkflowState,
    stage: Stage,
    key: &str,
) -> Result<Option<T>, PipelineError> {
    let Some(value) = state
        .latest_checkpoint(stage)
        .and_then(|cp| cp.payload.get(key))
    else {
        return Ok(None);
    };
    serde_json::from_value(value.clone())
        .map(Some)
        .map_err(|e| PipelineError::Stage {
            stage,
            message: format!("saved {key} is unreadable: {e}"),
        })
}

/// Sources recorded as migrated by the latest migrate or failure checkpoint.
fn completed_sources(state: &WorkflowState) -> Vec<String> {
    let mut done: Vec<String> = Vec::new();
    for stage in [Stage::Migrating, Stage::Failed] {
        let sources = state
            .latest_checkpoint(stage)
            .and_then(|cp| cp.payload.get(COMPLETED_SOURCES))
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str);
        for source in sources {
            if !done.iter().any(|d| d == source) {
                done.push(source.to_string());
            }
        }
    }
    done
}

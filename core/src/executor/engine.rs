use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::FutureExt;
use serde::{Deserialize, Serialize};

use crate::budget::BudgetLedger;
use crate::context::{NullSink, OutputSink};
use crate::error::{BudgetError, ExecutorError};
use crate::planner::Plan;
use crate::util::lock_unpoisoned;

use super::limiter::AdmissionLimiter;
use super::queue::WorkQueue;
use super::traits::{ExecutionObserver, RetryStrategyPlugin, TaskRunner};
use super::types::{ExecutionSummary, MigrationTask, TaskReport, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorState {
    #[default]
    Idle,
    Running,
    Paused,
    Cancelled,
}

impl fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutorState::Idle => "idle",
            ExecutorState::Running => "running",
            ExecutorState::Paused => "paused",
            ExecutorState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

struct Shared {
    queue: WorkQueue,
    runner: Arc<dyn TaskRunner>,
    ledger: Arc<BudgetLedger>,
    retry: Option<Arc<dyn RetryStrategyPlugin>>,
    observers: Vec<Arc<dyn ExecutionObserver>>,
    sink: Arc<dyn OutputSink>,
    default_model: String,
    state: Mutex<ExecutorState>,
    cancelled: AtomicBool,
    budget_error: Mutex<Option<BudgetError>>,
    tasks: Mutex<BTreeMap<String, MigrationTask>>,
}

impl Shared {
    fn set_status(&self, source_ref: &str, status: TaskStatus, error: Option<String>) {
        if let Some(task) = lock_unpoisoned(&self.tasks).get_mut(source_ref) {
            task.status = status;
            task.error = error;
        }
    }

    /// First budget rejection wins; everything not yet started is cancelled.
    fn stop_on_budget(&self, err: BudgetError) {
        {
            let mut slot = lock_unpoisoned(&self.budget_error);
            if slot.is_none() {
                *slot = Some(err.clone());
            }
        }
        self.cancelled.store(true, Ordering::SeqCst);
        *lock_unpoisoned(&self.state) = ExecutorState::Cancelled;
        let dropped = self.queue.clear();
        tracing::warn!(error = %err, cancelled = dropped, "budget ceiling reached; stopping");
    }

    fn report(
        task: &MigrationTask,
        status: TaskStatus,
        attempts: u32,
        started: Instant,
    ) -> TaskReport {
        TaskReport {
            source_ref: task.source_ref.clone(),
            target_ref: task.target_ref.clone(),
            status,
            attempts,
            duration_ms: started.elapsed().as_millis() as u64,
            cost: 0.0,
            tokens: 0,
            output_ref: None,
            error: None,
            cancelled: false,
        }
    }

    fn cancelled_report(task: &MigrationTask, reason: &str) -> TaskReport {
        let mut report = Self::report(task, TaskStatus::Failed, 0, Instant::now());
        report.error = Some(reason.to_string());
        report.cancelled = true;
        report
    }

    /// Body of one queued task. Runs after the queue granted a slot and the
    /// limiter admitted the first attempt.
    async fn run_task(self: Arc<Self>, task: MigrationTask) -> Result<TaskReport, ExecutorError> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Ok(Self::cancelled_report(&task, "run cancelled"));
        }
        if self.ledger.is_over_budget() {
            return Ok(Self::cancelled_report(&task, "budget ceiling reached"));
        }

        self.set_status(&task.source_ref, TaskStatus::InProgress, None);
        for observer in &self.observers {
            observer.on_task_start(&task);
        }

        let started = Instant::now();
        let mut cost = 0.0;
        let mut tokens = 0u64;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            if attempt > 1 {
                self.queue.limiter().acquire(task.estimated_tokens).await;
            }

            let (error, permanent) = match self.runner.execute(&task, self.sink.as_ref()).await {
                Ok(outcome) => {
                    if let Some(usage) = outcome.usage.as_ref() {
                        let model = outcome.model.as_deref().unwrap_or(&self.default_model);
                        let recorded = match outcome.cost {
                            Some(reported) => self.ledger.record_priced(model, usage, reported),
                            None => self.ledger.record_usage(model, usage),
                        };
                        match recorded {
                            Ok(c) => {
                                cost += c;
                                tokens = tokens.saturating_add(usage.total());
                            }
                            Err(err) => {
                                let mut report =
                                    Self::report(&task, TaskStatus::Failed, attempt, started);
                                report.error = Some(err.to_string());
                                report.cost = cost;
                                report.tokens = tokens;
                                self.stop_on_budget(err);
                                return Ok(report);
                            }
                        }
                    }

                    if outcome.success {
                        let mut report =
                            Self::report(&task, TaskStatus::Completed, attempt, started);
                        report.cost = cost;
                        report.tokens = tokens;
                        report.output_ref = outcome.output_ref;
                        return Ok(report);
                    }
                    let error = outcome
                        .error
                        .unwrap_or_else(|| "collaborator reported failure".to_string());
                    (error, outcome.permanent)
                }
                Err(err) => (format!("{err:#}"), false),
            };

            let retry_after = self
                .retry
                .as_ref()
                .filter(|_| !permanent)
                .filter(|strategy| strategy.should_retry(attempt, &error))
                .and_then(|strategy| strategy.next_delay(attempt, &error));

            match retry_after {
                Some(delay) if !self.cancelled.load(Ordering::SeqCst) => {
                    tracing::warn!(
                        task = %task.source_ref,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "task attempt failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                _ => {
                    let mut report = Self::report(&task, TaskStatus::Failed, attempt, started);
                    report.error = Some(error);
                    report.cost = cost;
                    report.tokens = tokens;
                    return Ok(report);
                }
            }
        }
    }

    /// Turn whatever the queue handed back into a report and notify observers.
    fn settle(
        &self,
        task: &MigrationTask,
        result: Result<TaskReport, ExecutorError>,
        done: &AtomicUsize,
        total: usize,
    ) -> TaskReport {
        let report = match result {
            Ok(report) => report,
            Err(ExecutorError::Cancelled) => Self::cancelled_report(task, "run cancelled"),
            Err(err) => {
                let mut report = Self::report(task, TaskStatus::Failed, 1, Instant::now());
                report.error = Some(err.to_string());
                report
            }
        };

        self.set_status(&task.source_ref, report.status, report.error.clone());
        for observer in &self.observers {
            if report.is_success() {
                observer.on_task_complete(&report);
            } else {
                observer.on_task_error(&report);
            }
        }

        let done = done.fetch_add(1, Ordering::SeqCst) + 1;
        for observer in &self.observers {
            observer.on_progress(done, total);
        }

        match (&report.status, report.cancelled) {
            (TaskStatus::Completed, _) => {
                tracing::info!(task = %report.source_ref, attempts = report.attempts, cost = report.cost, "task completed")
            }
            (_, true) => tracing::debug!(task = %report.source_ref, "task cancelled before start"),
            _ => tracing::warn!(
                task = %report.source_ref,
                attempts = report.attempts,
                error = report.error.as_deref().unwrap_or(""),
                "task failed"
            ),
        }
        report
    }
}

/// Drives a batch of migration tasks through the work queue.
///
/// Failures are isolated per task and collected into the summary. A budget
/// rejection fails the offending task and cancels everything still pending.
pub struct ParallelExecutor {
    shared: Arc<Shared>,
}

impl ParallelExecutor {
    pub fn builder(runner: Arc<dyn TaskRunner>, ledger: Arc<BudgetLedger>) -> ParallelExecutorBuilder {
        ParallelExecutorBuilder::new(runner, ledger)
    }

    pub fn state(&self) -> ExecutorState {
        *lock_unpoisoned(&self.shared.state)
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.shared.queue
    }

    /// Current view of every task submitted by the latest `execute`.
    pub fn tasks(&self) -> Vec<MigrationTask> {
        lock_unpoisoned(&self.shared.tasks).values().cloned().collect()
    }

    pub fn pause(&self) {
        self.shared.queue.pause();
        let mut state = lock_unpoisoned(&self.shared.state);
        if *state == ExecutorState::Running {
            *state = ExecutorState::Paused;
        }
    }

    pub fn resume(&self) {
        {
            let mut state = lock_unpoisoned(&self.shared.state);
            if *state == ExecutorState::Paused {
                *state = ExecutorState::Running;
            }
        }
        self.shared.queue.resume();
    }

    /// Cooperative cancel: pending tasks are rejected, queued-but-dispatched
    /// tasks short-circuit before contacting the collaborator, in-flight
    /// calls finish. Cancellation is final; later `execute` calls report
    /// every task as cancelled.
    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::SeqCst);
        *lock_unpoisoned(&self.shared.state) = ExecutorState::Cancelled;
        let dropped = self.shared.queue.clear();
        tracing::info!(cancelled = dropped, "execution cancelled");
    }

    pub async fn execute(&self, plan: &Plan) -> ExecutionSummary {
        self.execute_tasks(plan.tasks.clone()).await
    }

    pub async fn execute_tasks(&self, mut tasks: Vec<MigrationTask>) -> ExecutionSummary {
        let shared = &self.shared;
        let started = Instant::now();
        let cost_before = shared.ledger.total_cost();
        let tokens_before = shared.ledger.snapshot().total_tokens();

        *lock_unpoisoned(&shared.budget_error) = None;
        {
            let mut state = lock_unpoisoned(&shared.state);
            if !shared.cancelled.load(Ordering::SeqCst) {
                *state = if shared.queue.is_paused() {
                    ExecutorState::Paused
                } else {
                    ExecutorState::Running
                };
            }
        }

        tasks.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.source_ref.cmp(&b.source_ref))
        });
        for task in tasks.iter_mut() {
            task.status = TaskStatus::Pending;
            task.error = None;
        }
        *lock_unpoisoned(&shared.tasks) = tasks
            .iter()
            .map(|t| (t.source_ref.clone(), t.clone()))
            .collect();

        let total = tasks.len();
        tracing::info!(
            tasks = total,
            limit = shared.queue.limit(),
            tier = shared.queue.limiter().tier(),
            "starting execution"
        );

        let done = Arc::new(AtomicUsize::new(0));
        let externally_paused = shared.queue.is_paused();
        shared.queue.pause();
        let pending: Vec<_> = tasks
            .into_iter()
            .map(|task| {
                let worker = Arc::clone(shared);
                let settler = Arc::clone(shared);
                let done = Arc::clone(&done);
                let body_task = task.clone();
                shared
                    .queue
                    .enqueue(
                        move || worker.run_task(body_task),
                        task.estimated_tokens,
                        task.priority,
                    )
                    .map(move |result| settler.settle(&task, result, &done, total))
            })
            .collect();
        if !externally_paused {
            shared.queue.resume();
        }

        let reports = futures::future::join_all(pending).await;

        let mut summary = ExecutionSummary {
            total_time: started.elapsed(),
            total_cost: (shared.ledger.total_cost() - cost_before).max(0.0),
            total_tokens: shared
                .ledger
                .snapshot()
                .total_tokens()
                .saturating_sub(tokens_before),
            budget_error: lock_unpoisoned(&shared.budget_error).clone(),
            ..ExecutionSummary::default()
        };
        for report in &reports {
            if report.is_success() {
                summary.completed += 1;
            } else {
                summary.failed += 1;
                if report.cancelled {
                    summary.cancelled += 1;
                }
            }
        }
        summary.reports = reports;

        {
            let mut state = lock_unpoisoned(&shared.state);
            if !shared.cancelled.load(Ordering::SeqCst) {
                *state = ExecutorState::Idle;
            }
        }

        tracing::info!(
            completed = summary.completed,
            failed = summary.failed,
            cancelled = summary.cancelled,
            cost = summary.total_cost,
            elapsed_ms = summary.total_time.as_millis() as u64,
            "execution finished"
        );
        summary
    }
}

pub struct ParallelExecutorBuilder {
    runner: Arc<dyn TaskRunner>,
    ledger: Arc<BudgetLedger>,
    queue: Option<WorkQueue>,
    concurrency: usize,
    limiter: Option<Arc<AdmissionLimiter>>,
    retry: Option<Arc<dyn RetryStrategyPlugin>>,
    observers: Vec<Arc<dyn ExecutionObserver>>,
    sink: Option<Arc<dyn OutputSink>>,
    default_model: Option<String>,
}

impl ParallelExecutorBuilder {
    pub fn new(runner: Arc<dyn TaskRunner>, ledger: Arc<BudgetLedger>) -> Self {
        Self {
            runner,
            ledger,
            queue: None,
            concurrency: 1,
            limiter: None,
            retry: None,
            observers: Vec::new(),
            sink: None,
            default_model: None,
        }
    }

    /// Use an existing queue. Overrides `concurrency` and `limiter`.
    pub fn queue(mut self, queue: WorkQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn concurrency(mut self, limit: usize) -> Self {
        self.concurrency = limit.max(1);
        self
    }

    pub fn limiter(mut self, limiter: Arc<AdmissionLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn retry_strategy(mut self, strategy: Arc<dyn RetryStrategyPlugin>) -> Self {
        self.retry = Some(strategy);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn build(self) -> ParallelExecutor {
        let queue = self.queue.unwrap_or_else(|| {
            let limiter = self
                .limiter
                .unwrap_or_else(|| Arc::new(AdmissionLimiter::unlimited()));
            WorkQueue::new(self.concurrency, limiter)
        });
        let default_model = self
            .default_model
            .unwrap_or_else(|| crate::config::PricingConfig::default().default_model);

        ParallelExecutor {
            shared: Arc::new(Shared {
                queue,
                runner: self.runner,
                ledger: self.ledger,
                retry: self.retry,
                observers: self.observers,
                sink: self.sink.unwrap_or_else(|| Arc::new(NullSink)),
                default_model,
                state: Mutex::new(ExecutorState::Idle),
                cancelled: AtomicBool::new(false),
                budget_error: Mutex::new(None),
                tasks: Mutex::new(BTreeMap::new()),
            }),
        }
    }
}

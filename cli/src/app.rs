//! Command implementations: merge flag overrides into the config, wire the
//! plugin services and print results.
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use docmigrate_core::api::{
    self as core_api, AppConfig, AppContext, CheckpointStore, CliError, ExclusivityLock,
    ExecutionObserver, PipelineError, PipelineRunner, Plan, ProgressMonitor, RunOptions,
};
use docmigrate_plugins::services::PluginServicesFactory;

use crate::commands::cli::{PlanArgs, RunArgs, StatusArgs, UnlockArgs};

/// How long a signalled run gets to persist its failure checkpoint.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub fn load_config(path: Option<&Path>) -> Result<AppConfig, CliError> {
    let loaded = match path {
        Some(path) => core_api::load_from_file(path).map(|mut cfg| {
            docmigrate_core::config::apply_env_overrides(&mut cfg, |k| std::env::var(k).ok());
            cfg
        }),
        None => core_api::load_default(),
    };
    loaded.map_err(|e| CliError::Config(format!("{e:#}")))
}

pub fn apply_run_overrides(cfg: &mut AppConfig, args: &RunArgs) -> Result<(), CliError> {
    if let Some(max) = args.max_cost {
        if !max.is_finite() || max < 0.0 {
            return Err(CliError::Config(format!("--max-cost must be >= 0, got {max}")));
        }
        cfg.budget.max_cost = Some(max);
    }
    if let Some(n) = args.concurrency {
        if n == 0 {
            return Err(CliError::Config("--concurrency must be at least 1".into()));
        }
        cfg.executor.max_concurrency = n;
    }
    if let Some(tier) = &args.tier {
        cfg.limiter.tier = tier.clone();
    }
    if cfg.limiter.selected_quota().is_none() {
        let known: Vec<&str> = cfg.limiter.tiers.keys().map(String::as_str).collect();
        return Err(CliError::Config(format!(
            "unknown tier '{}' (known: {})",
            cfg.limiter.tier,
            known.join(", ")
        )));
    }
    if args.quiet {
        cfg.executor.progress_bar = false;
    }
    Ok(())
}

fn context(cfg: AppConfig, dry_run: bool) -> AppContext {
    AppContext::new(cfg, Some(Arc::new(PluginServicesFactory::new(dry_run))))
}

#[tracing::instrument(name = "cli.run", skip_all, fields(project = %args.project.project.display()))]
pub async fn run_cmd(args: RunArgs, mut cfg: AppConfig) -> Result<i32, CliError> {
    apply_run_overrides(&mut cfg, &args)?;
    let show_progress = cfg.executor.progress_bar && atty::is(atty::Stream::Stderr);

    let ctx = context(cfg, args.dry_run);
    let runner = Arc::new(PipelineRunner::from_context(ctx, &args.project.project).await?);
    let progress = Arc::new(ProgressMonitor::new(0, show_progress));

    let watcher = {
        let runner = runner.clone();
        core_api::release_on_signal(
            runner.lock(),
            SHUTDOWN_GRACE,
            move |_| runner.cancel(),
            |_| {
                std::process::exit(130);
            },
        )
    };

    let observers: Vec<Arc<dyn ExecutionObserver>> = vec![progress.clone()];
    let result = runner
        .run(RunOptions {
            resume: args.resume,
            max_cost: args.max_cost,
            observers,
        })
        .await;
    watcher.abort();
    progress.finish(result.is_ok());

    let report = result?;
    let summary = &report.summary;
    let already_done = report.planned_tasks.saturating_sub(summary.total());
    println!(
        "Migrated {} of {} documents ({} already done). Cost ${:.4}, {} tokens, {:.1}s.",
        summary.completed,
        report.planned_tasks,
        already_done,
        report.ledger.total_cost,
        report.ledger.total_tokens(),
        summary.total_time.as_secs_f64()
    );
    if !report.skipped_stages.is_empty() {
        let stages: Vec<String> = report.skipped_stages.iter().map(|s| s.to_string()).collect();
        println!("Reused saved stages: {}", stages.join(", "));
    }
    if args.dry_run {
        println!("Dry run: nothing was sent to the service.");
    }
    Ok(0)
}

pub async fn plan_cmd(args: PlanArgs, cfg: AppConfig) -> Result<i32, CliError> {
    let ctx = context(cfg, args.dry_run);
    let runner = PipelineRunner::from_context(ctx, &args.project.project).await?;
    let plan = runner.plan_only().await?;

    if args.json {
        let out = serde_json::json!({
            "tasks": plan.tasks,
            "totalCost": plan.total_cost,
            "totalTimeSecs": plan.total_time.as_secs(),
            "countsByCategory": plan.counts_by_category,
        });
        println!("{}", serde_json::to_string_pretty(&out).map_err(|e| CliError::Command(e.to_string()))?);
    } else {
        print_plan(&plan);
    }
    Ok(0)
}

fn print_plan(plan: &Plan) {
    if plan.is_empty() {
        println!("No documents found to migrate.");
        return;
    }
    for task in &plan.tasks {
        println!("  [{}] {} -> {}", task.priority, task.source_ref, task.target_ref);
    }
    println!();
    for (category, count) in &plan.counts_by_category {
        println!("  {category:<14} {count}");
    }
    println!(
        "{} documents, ~{} tokens, estimated ${:.4} and {}s",
        plan.len(),
        plan.estimated_tokens(),
        plan.total_cost,
        plan.total_time.as_secs()
    );
}

pub fn status_cmd(args: StatusArgs, cfg: &AppConfig) -> Result<i32, CliError> {
    let root = &args.project.project;
    let store = CheckpointStore::for_project(root, &cfg.state);
    let lock = ExclusivityLock::for_project(root, &cfg.state);

    let state = store.load().map_err(PipelineError::from)?;
    let owner = lock.owner().map_err(PipelineError::from)?;
    let live = lock.is_locked();

    if args.json {
        let out = serde_json::json!({ "state": state, "lock": owner, "locked": live });
        println!("{}", serde_json::to_string_pretty(&out).map_err(|e| CliError::Command(e.to_string()))?);
        return Ok(0);
    }

    match &state {
        None => println!("No migration in progress."),
        Some(state) => {
            println!("Stage:       {}", state.current_stage);
            println!("Started:     {}", state.started_at.to_rfc3339());
            println!("Updated:     {}", state.updated_at.to_rfc3339());
            match state.max_cost {
                Some(max) => println!("Spend:       ${:.4} of ${:.4}", state.total_cost, max),
                None => println!("Spend:       ${:.4} (no ceiling)", state.total_cost),
            }
            println!("Tokens:      {} over {} calls", state.total_tokens, state.api_call_count);
            for cp in &state.checkpoints {
                println!(
                    "  {}  {:<12} {}",
                    cp.timestamp.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S"),
                    cp.stage,
                    cp.description
                );
            }
            if state.is_failed() {
                println!("Resume with: docmigrate run --resume --project {}", root.display());
            }
        }
    }

    match owner {
        Some(record) => println!(
            "Lock:        pid {} since {} ({}s){}",
            record.owner_pid,
            record.acquired_at.to_rfc3339(),
            record.age().num_seconds(),
            if live { "" } else { ", stale" }
        ),
        None if live => println!("Lock:        present but unreadable"),
        None => println!("Lock:        free"),
    }
    Ok(0)
}

pub fn unlock_cmd(args: UnlockArgs, cfg: &AppConfig) -> Result<i32, CliError> {
    let lock = ExclusivityLock::for_project(&args.project.project, &cfg.state);

    if lock.is_locked() && !args.force {
        let who = match lock.owner().map_err(PipelineError::from)? {
            Some(record) => format!("pid {} since {}", record.owner_pid, record.acquired_at.to_rfc3339()),
            None => "an unknown owner".to_string(),
        };
        return Err(CliError::Command(format!(
            "lock is held by {who}; pass --force if that process is gone"
        )));
    }

    let removed = lock.force_release().map_err(PipelineError::from)?;
    if removed {
        println!("Removed {}", lock.path().display());
    } else {
        println!("No lock to remove.");
    }
    Ok(0)
}

use clap::Parser;
mod app;
mod commands;
use commands::cli;
use docmigrate_core::error::{self, CheckpointError, PipelineError};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

static LOG_GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
    std::sync::OnceLock::new();

#[tokio::main]
async fn main() {
    let exit = match real_main().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e}");
            exit_code_for_error(&e)
        }
    };

    std::process::exit(exit);
}

async fn real_main() -> Result<i32, error::CliError> {
    let args = cli::Args::parse();
    let cfg = app::load_config(args.config.as_deref())?;
    init_tracing(&cfg.logging).map_err(error::CliError::Command)?;

    dispatch(args.command, cfg).await
}

fn exit_code_for_error(e: &error::CliError) -> i32 {
    // 0: success
    // 11: config error
    // 12: lock held or contended
    // 13: budget ceiling reached
    // 14: state file unusable, or a previous run needs --resume
    // 20: IO error
    // 50: internal/uncategorized
    // 130: interrupted
    match e {
        error::CliError::Config(_) => 11,
        error::CliError::Pipeline(pe) => match pe {
            PipelineError::Config(_) => 11,
            PipelineError::Lock(_) => 12,
            PipelineError::Budget(_) => 13,
            PipelineError::Checkpoint(CheckpointError::Io { .. }) => 20,
            PipelineError::Checkpoint(_) => 14,
            PipelineError::ResumeRequired { .. } => 14,
            PipelineError::Cancelled => 130,
            PipelineError::Executor(_) | PipelineError::Stage { .. } | PipelineError::Plugin(_) => 50,
        },
        error::CliError::Io(_) => 20,
        error::CliError::Command(_) => 20,
        error::CliError::Anyhow(_) => 50,
    }
}

async fn dispatch(cmd: cli::Commands, cfg: docmigrate_core::config::AppConfig) -> Result<i32, error::CliError> {
    match cmd {
        cli::Commands::Run(run_args) => app::run_cmd(run_args, cfg).await,
        cli::Commands::Plan(plan_args) => app::plan_cmd(plan_args, cfg).await,
        cli::Commands::Status(status_args) => app::status_cmd(status_args, &cfg),
        cli::Commands::Unlock(unlock_args) => app::unlock_cmd(unlock_args, &cfg),
    }
}

fn init_tracing(logging: &docmigrate_core::config::LoggingConfig) -> Result<(), String> {
    if !logging.enabled {
        return Ok(());
    }

    let filter = match std::env::var("RUST_LOG") {
        Ok(v) if !v.trim().is_empty() => EnvFilter::from_default_env(),
        _ => EnvFilter::try_new(logging.level.clone()).map_err(|e| e.to_string())?,
    };

    let mut maybe_writer = None;

    if logging.file {
        let dir = match logging
            .directory
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            Some(d) => std::path::PathBuf::from(d),
            None => std::env::temp_dir().join("docmigrate"),
        };

        std::fs::create_dir_all(&dir).map_err(|e| format!("create log dir failed: {e}"))?;
        let file_name = format!("docmigrate.{}.log", std::process::id());
        let appender = tracing_appender::rolling::never(dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        let _ = LOG_GUARD.set(guard);
        maybe_writer = Some(non_blocking);
    }

    if !logging.console && maybe_writer.is_none() {
        return Err("logging disabled for both console and file".to_string());
    }

    let console_layer = logging.console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(atty::is(atty::Stream::Stderr))
    });

    let file_layer = maybe_writer.map(|w| {
        tracing_subscriber::fmt::layer()
            .with_writer(w)
            .with_ansi(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(())
}

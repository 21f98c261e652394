use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "docmigrate", version, about = "Migrate a documentation tree into a site, resumably and on a budget")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Read configuration from this file instead of the default locations.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ProjectArgs {
    /// Project root holding the documentation and the `.docmigrate` state directory.
    #[arg(long, default_value = ".")]
    pub project: PathBuf,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Hard spend ceiling for this run.
    #[arg(long)]
    pub max_cost: Option<f64>,

    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Service tier whose quota the admission limiter enforces.
    #[arg(long)]
    pub tier: Option<String>,

    /// Continue the run recorded in the project's state file.
    #[arg(long, default_value_t = false)]
    pub resume: bool,

    /// Discover locally and pretend to migrate; no service calls.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// No progress bar.
    #[arg(long, short, default_value_t = false)]
    pub quiet: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct PlanArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Use local discovery even when a service endpoint is configured.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct StatusArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct UnlockArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Remove the lock even if its owner looks alive.
    #[arg(long, default_value_t = false)]
    pub force: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run (or resume) the migration pipeline.
    Run(RunArgs),
    /// Print the migration plan and its estimate without migrating.
    Plan(PlanArgs),
    /// Show saved progress and who holds the lock.
    Status(StatusArgs),
    /// Remove the project lock.
    Unlock(UnlockArgs),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_flags() {
        let args = Args::parse_from([
            "docmigrate",
            "run",
            "--project",
            "site",
            "--max-cost",
            "2.5",
            "--concurrency",
            "3",
            "--tier",
            "tier2",
            "--resume",
            "--dry-run",
            "-q",
        ]);
        let Commands::Run(run) = args.command else {
            panic!("expected run");
        };
        assert_eq!(run.project.project, PathBuf::from("site"));
        assert_eq!(run.max_cost, Some(2.5));
        assert_eq!(run.concurrency, Some(3));
        assert_eq!(run.tier.as_deref(), Some("tier2"));
        assert!(run.resume && run.dry_run && run.quiet);
    }

    #[test]
    fn test_unlock_defaults_to_current_dir() {
        let args = Args::parse_from(["docmigrate", "unlock", "--force"]);
        let Commands::Unlock(unlock) = args.command else {
            panic!("expected unlock");
        };
        assert!(unlock.force);
        assert_eq!(unlock.project.project, PathBuf::from("."));
    }
}

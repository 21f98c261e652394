use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::util::lock_unpoisoned;

use super::traits::ExecutionObserver;
use super::types::{MigrationTask, TaskReport};

/// Terminal progress for a migration batch: one overall bar plus a spinner
/// per in-flight task.
pub struct ProgressMonitor {
    multi: MultiProgress,
    overall: ProgressBar,
    task_bars: Mutex<HashMap<String, ProgressBar>>,
    enabled: bool,
}

impl ProgressMonitor {
    /// `enabled = false` gives a monitor that draws nothing (quiet or non-TTY runs).
    pub fn new(total_tasks: usize, enabled: bool) -> Self {
        if !enabled {
            return Self {
                multi: MultiProgress::new(),
                overall: ProgressBar::hidden(),
                task_bars: Mutex::new(HashMap::new()),
                enabled: false,
            };
        }

        let multi = MultiProgress::new();
        let overall = multi.add(ProgressBar::new(total_tasks as u64));
        let style = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} docs ({percent}%) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░  ");
        overall.set_style(style);
        overall.set_message("starting");

        Self {
            multi,
            overall,
            task_bars: Mutex::new(HashMap::new()),
            enabled: true,
        }
    }

    pub fn set_message(&self, msg: &str) {
        if self.enabled {
            self.overall.set_message(msg.to_string());
        }
    }

    pub fn finish(&self, success: bool) {
        if !self.enabled {
            return;
        }
        let msg = if success {
            "✅ migration finished"
        } else {
            "❌ migration incomplete"
        };
        self.overall.finish_with_message(msg);
    }

    fn finish_task(&self, report: &TaskReport, icon: &str) {
        if !self.enabled {
            return;
        }
        if let Some(bar) = lock_unpoisoned(&self.task_bars).remove(&report.source_ref) {
            bar.finish_with_message(format!(
                "{} {} ({}ms)",
                icon, report.source_ref, report.duration_ms
            ));
        }
    }
}

impl ExecutionObserver for ProgressMonitor {
    fn on_task_start(&self, task: &MigrationTask) {
        if !self.enabled {
            return;
        }
        let bar = self.multi.add(ProgressBar::new_spinner());
        let style = ProgressStyle::default_spinner()
            .template("  {spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        bar.set_style(style);
        bar.set_message(format!("⏳ {}", task.source_ref));
        bar.enable_steady_tick(Duration::from_millis(100));
        lock_unpoisoned(&self.task_bars).insert(task.source_ref.clone(), bar);
    }

    fn on_task_complete(&self, report: &TaskReport) {
        self.finish_task(report, "✅");
    }

    fn on_task_error(&self, report: &TaskReport) {
        if report.cancelled {
            self.finish_task(report, "⏹");
        } else {
            self.finish_task(report, "❌");
        }
    }

    fn on_progress(&self, done: usize, total: usize) {
        if !self.enabled {
            return;
        }
        self.overall.set_length(total as u64);
        self.overall.set_position(done as u64);
    }
}

impl Drop for ProgressMonitor {
    fn drop(&mut self) {
        for (_, bar) in lock_unpoisoned(&self.task_bars).drain() {
            bar.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::types::TaskStatus;

    fn report(source: &str, status: TaskStatus) -> TaskReport {
        TaskReport {
            source_ref: source.to_string(),
            target_ref: format!("out/{source}"),
            status,
            attempts: 1,
            duration_ms: 12,
            cost: 0.0,
            tokens: 0,
            output_ref: None,
            error: None,
            cancelled: false,
        }
    }

    #[test]
    fn test_progress_monitor_disabled() {
        let monitor = ProgressMonitor::new(3, false);
        let task = MigrationTask::new("a.md", "out/a.md", "guide", 0, 10);

        monitor.on_task_start(&task);
        monitor.on_task_complete(&report("a.md", TaskStatus::Completed));
        monitor.on_progress(1, 3);
        monitor.set_message("test");
        monitor.finish(true);
        assert!(lock_unpoisoned(&monitor.task_bars).is_empty());
    }

    #[test]
    fn test_progress_monitor_tracks_spinners() {
        let monitor = ProgressMonitor::new(2, true);
        monitor.on_task_start(&MigrationTask::new("a.md", "out/a.md", "guide", 0, 10));
        monitor.on_task_start(&MigrationTask::new("b.md", "out/b.md", "guide", 0, 10));
        assert_eq!(lock_unpoisoned(&monitor.task_bars).len(), 2);

        monitor.on_task_complete(&report("a.md", TaskStatus::Completed));
        monitor.on_task_error(&report("b.md", TaskStatus::Failed));
        monitor.on_progress(2, 2);
        assert!(lock_unpoisoned(&monitor.task_bars).is_empty());
        monitor.finish(false);
    }
}

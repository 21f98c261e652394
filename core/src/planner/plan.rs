use std::collections::BTreeMap;
use std::time::Duration;

use crate::budget::{PriceTable, TokenUsage};
use crate::config::{AppConfig, PlannerConfig};
use crate::executor::MigrationTask;

use super::category::{classify, Classification};
use super::discovery::{DiscoveredDoc, DiscoveryReport};

/// Ordered migration work plus its up-front estimate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub tasks: Vec<MigrationTask>,
    pub total_cost: f64,
    pub total_time: Duration,
    pub counts_by_category: BTreeMap<String, usize>,
}

impl Plan {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn estimated_tokens(&self) -> u64 {
        self.tasks.iter().map(|t| t.estimated_tokens).sum()
    }

    /// Drop tasks whose source is in `done`, keeping the estimate consistent.
    pub fn without(&self, done: &[String], planner: &TaskPlanner) -> Plan {
        let tasks: Vec<MigrationTask> = self
            .tasks
            .iter()
            .filter(|t| !done.contains(&t.source_ref))
            .cloned()
            .collect();
        planner.summarize(tasks)
    }
}

/// Turns a discovery report into an ordered, estimated task list.
#[derive(Debug, Clone)]
pub struct TaskPlanner {
    cfg: PlannerConfig,
    prices: PriceTable,
    model: String,
    seconds_per_task: u64,
    workers: usize,
    collections: Vec<String>,
}

impl TaskPlanner {
    pub fn new(
        cfg: PlannerConfig,
        prices: PriceTable,
        model: impl Into<String>,
        seconds_per_task: u64,
        workers: usize,
    ) -> Self {
        Self {
            cfg,
            prices,
            model: model.into(),
            seconds_per_task,
            workers: workers.max(1),
            collections: Vec::new(),
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::new(
            cfg.planner.clone(),
            PriceTable::from_config(&cfg.pricing),
            cfg.service.model.clone(),
            cfg.executor.seconds_per_task,
            cfg.executor.max_concurrency,
        )
    }

    /// Schema collections designed for the target site; declared categories
    /// must name one of these to be honored.
    pub fn with_collections(mut self, collections: Vec<String>) -> Self {
        self.collections = collections;
        self
    }

    pub fn create_plan(&self, report: &DiscoveryReport) -> Plan {
        let tasks = report
            .documents()
            .iter()
            .map(|doc| self.task_for(doc))
            .collect();
        let plan = self.summarize(tasks);
        tracing::info!(
            tasks = plan.len(),
            cost = plan.total_cost,
            secs = plan.total_time.as_secs(),
            "migration plan created"
        );
        plan
    }

    fn summarize(&self, mut tasks: Vec<MigrationTask>) -> Plan {
        tasks.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.source_ref.cmp(&b.source_ref))
        });

        let mut counts_by_category = BTreeMap::new();
        let mut total_cost = 0.0;
        for task in &tasks {
            *counts_by_category.entry(task.category.clone()).or_insert(0) += 1;
            let input = task.estimated_tokens.saturating_sub(self.cfg.output_tokens);
            total_cost += self
                .prices
                .cost(&self.model, &TokenUsage::new(input, self.cfg.output_tokens));
        }

        let total_secs = (tasks.len() as u64)
            .saturating_mul(self.seconds_per_task)
            .div_ceil(self.workers as u64);

        Plan {
            tasks,
            total_cost,
            total_time: Duration::from_secs(total_secs),
            counts_by_category,
        }
    }

    fn task_for(&self, doc: &DiscoveredDoc) -> MigrationTask {
        let Classification { category, dir } =
            classify(&doc.path, doc.declared_category.as_deref(), &self.collections);

        let root_level = !doc.path.contains('/');
        let index_like = is_index_name(&doc.path);
        let priority = category
            .base_priority()
            .saturating_sub(u32::from(root_level))
            .saturating_sub(u32::from(index_like));

        let target = if root_level && index_like {
            format!("{}/index.md", self.content_root())
        } else {
            format!("{}/{}/{}", self.content_root(), dir, strip_docs_prefix(&doc.path))
        };

        let estimated = self
            .input_tokens(doc)
            .saturating_add(self.cfg.output_tokens);

        MigrationTask::new(doc.path.clone(), target, dir, priority, estimated)
    }

    fn content_root(&self) -> &str {
        self.cfg.content_root.trim_end_matches('/')
    }

    fn input_tokens(&self, doc: &DiscoveredDoc) -> u64 {
        if let Some(bytes) = doc.size_bytes {
            return (bytes / 4).max(1);
        }
        let lowered = doc.path.to_ascii_lowercase();
        let heavy = ["readme", "api", "architecture"]
            .iter()
            .any(|word| lowered.contains(word));
        if heavy {
            self.cfg.base_tokens.saturating_mul(2)
        } else {
            self.cfg.base_tokens
        }
    }
}

fn file_stem(path: &str) -> &str {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.split('.').next().unwrap_or(name)
}

fn is_index_name(path: &str) -> bool {
    let stem = file_stem(path);
    stem.eq_ignore_ascii_case("index") || stem.eq_ignore_ascii_case("readme")
}

/// `docs/guides/x.md` → `guides/x.md`, so targets don't nest a second docs dir.
fn strip_docs_prefix(path: &str) -> &str {
    for prefix in ["docs/", "doc/", "documentation/"] {
        if let Some(rest) = path.strip_prefix(prefix) {
            if !rest.is_empty() {
                return rest;
            }
        }
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelRates;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn planner() -> TaskPlanner {
        let mut models = BTreeMap::new();
        models.insert(
            "flat".to_string(),
            ModelRates {
                input_per_mtok: 1.0,
                output_per_mtok: 1.0,
            },
        );
        let cfg = PlannerConfig {
            content_root: "src/content/docs/".to_string(),
            base_tokens: 1_000,
            output_tokens: 500,
        };
        TaskPlanner::new(cfg, PriceTable::new("flat", models), "flat", 30, 2)
    }

    fn report(value: serde_json::Value) -> DiscoveryReport {
        DiscoveryReport::from_value(value).unwrap()
    }

    #[test]
    fn test_order_targets_and_priorities() {
        let plan = planner().create_plan(&report(json!([
            "docs/reference/cli.md",
            "CHANGELOG.md",
            "docs/guides/install.md",
            "README.md",
            "docs/guides/README.md",
            "notes/misc.md"
        ])));

        let order: Vec<(&str, u32)> = plan
            .tasks
            .iter()
            .map(|t| (t.source_ref.as_str(), t.priority))
            .collect();
        assert_eq!(
            order,
            vec![
                ("README.md", 0),
                ("docs/guides/README.md", 0),
                ("docs/guides/install.md", 2),
                ("CHANGELOG.md", 4),
                ("docs/reference/cli.md", 4),
                ("notes/misc.md", 6),
            ]
        );

        let target = |src: &str| {
            plan.tasks
                .iter()
                .find(|t| t.source_ref == src)
                .map(|t| t.target_ref.clone())
                .unwrap()
        };
        assert_eq!(target("README.md"), "src/content/docs/index.md");
        assert_eq!(
            target("docs/guides/install.md"),
            "src/content/docs/guides/guides/install.md"
        );
        assert_eq!(target("notes/misc.md"), "src/content/docs/misc/notes/misc.md");

        assert_eq!(plan.counts_by_category["guides"], 1);
        assert_eq!(plan.counts_by_category["overview"], 2);
    }

    #[test]
    fn test_estimates() {
        let plan = planner().create_plan(&report(json!({
            "documents": [
                {"path": "docs/big.md", "size": 40_000},
                "docs/api-notes.md",
                "docs/plain.md"
            ]
        })));
        let tokens = |src: &str| {
            plan.tasks
                .iter()
                .find(|t| t.source_ref == src)
                .unwrap()
                .estimated_tokens
        };
        assert_eq!(tokens("docs/big.md"), 10_000 + 500);
        assert_eq!(tokens("docs/api-notes.md"), 2_000 + 500);
        assert_eq!(tokens("docs/plain.md"), 1_000 + 500);

        // $1 per million tokens either way.
        let expected = (10_500 + 2_500 + 1_500) as f64 / 1_000_000.0;
        assert!((plan.total_cost - expected).abs() < 1e-12);
        // 3 tasks × 30s over 2 workers, rounded up.
        assert_eq!(plan.total_time, Duration::from_secs(45));
        assert_eq!(plan.estimated_tokens(), 14_500);
    }

    #[test]
    fn test_empty_report() {
        let plan = planner().create_plan(&report(json!([])));
        assert!(plan.is_empty());
        assert_eq!(plan.total_cost, 0.0);
        assert_eq!(plan.total_time, Duration::ZERO);
    }

    #[test]
    fn test_without_drops_completed_sources() {
        let p = planner();
        let plan = p.create_plan(&report(json!(["a.md", "b.md", "c.md"])));
        let rest = plan.without(&["b.md".to_string()], &p);
        let sources: Vec<_> = rest.tasks.iter().map(|t| t.source_ref.as_str()).collect();
        assert_eq!(sources, vec!["a.md", "c.md"]);
        assert_eq!(rest.counts_by_category["misc"], 2);
    }
}

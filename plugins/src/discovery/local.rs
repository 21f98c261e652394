//! Filesystem-only stage collaborators: no service calls, no usage.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use docmigrate_core::api::{
    classify, AgentOutput, DiscoveryReport, OutputSink, PipelineAgents, ScaffoldReport,
    SchemaCollection, SchemaDesign,
};

const PATTERNS: &[&str] = &["**/*.md", "**/*.mdx"];
const SKIPPED_DIRS: &[&str] = &["node_modules", "target", "dist", "build", "vendor"];

#[derive(Debug, Clone)]
pub struct LocalDiscoveryAgents {
    content_root: String,
    state_dir: String,
}

impl LocalDiscoveryAgents {
    pub fn new(content_root: impl Into<String>, state_dir: impl Into<String>) -> Self {
        Self {
            content_root: content_root.into(),
            state_dir: state_dir.into(),
        }
    }

    fn skipped(&self, rel: &Path) -> bool {
        let hidden_or_vendored = rel.components().any(|c| match c {
            Component::Normal(part) => {
                let part = part.to_string_lossy();
                part.starts_with('.') || SKIPPED_DIRS.contains(&part.as_ref())
            }
            _ => false,
        });
        hidden_or_vendored
            || rel.starts_with(&self.content_root)
            || rel.starts_with(&self.state_dir)
    }

    /// Markdown files under `root` as `{ "files": [{ "path", "size" }] }`.
    pub fn discover(&self, root: &Path) -> Result<Value> {
        let mut found = BTreeSet::new();
        for pattern in PATTERNS {
            let full = root.join(pattern);
            let full = full.to_string_lossy();
            let paths = glob::glob(&full).with_context(|| format!("invalid glob pattern {full}"))?;
            for entry in paths {
                let path = match entry {
                    Ok(path) => path,
                    Err(e) => {
                        tracing::warn!("Glob error: {}", e);
                        continue;
                    }
                };
                let Ok(rel) = path.strip_prefix(root) else {
                    continue;
                };
                if self.skipped(rel) || !path.is_file() {
                    continue;
                }
                let size = fs::metadata(&path).map(|m| m.len()).ok();
                let rel = rel.to_string_lossy().replace('\\', "/");
                found.insert((rel, size));
            }
        }

        let files: Vec<Value> = found
            .into_iter()
            .map(|(path, size)| match size {
                Some(size) => json!({ "path": path, "size": size }),
                None => json!({ "path": path }),
            })
            .collect();
        tracing::info!(root = %root.display(), files = files.len(), "local discovery finished");
        Ok(json!({ "files": files }))
    }
}

#[async_trait]
impl PipelineAgents for LocalDiscoveryAgents {
    fn name(&self) -> &str {
        "local"
    }

    async fn analyze(&self, root: &Path, _sink: &dyn OutputSink) -> Result<AgentOutput<Value>> {
        let root = root.to_path_buf();
        let this = self.clone();
        let report = tokio::task::spawn_blocking(move || this.discover(&root)).await??;
        Ok(AgentOutput::free(report))
    }

    /// One collection per category found in the report.
    async fn design_schemas(
        &self,
        report: &Value,
        _sink: &dyn OutputSink,
    ) -> Result<AgentOutput<SchemaDesign>> {
        let report = DiscoveryReport::from_value(report.clone())
            .context("discovery report has an unrecognized shape")?;
        let dirs: BTreeSet<String> = report
            .documents()
            .iter()
            .map(|doc| classify(&doc.path, doc.declared_category.as_deref(), &[]).dir)
            .collect();

        let collections = dirs
            .into_iter()
            .map(|name| SchemaCollection {
                description: format!("Migrated {name} pages"),
                fields: vec!["title".into(), "description".into()],
                name,
            })
            .collect();
        Ok(AgentOutput::free(SchemaDesign {
            collections,
            notes: Some("derived from local discovery".into()),
        }))
    }

    async fn scaffold(
        &self,
        root: &Path,
        design: &SchemaDesign,
        _sink: &dyn OutputSink,
    ) -> Result<AgentOutput<ScaffoldReport>> {
        let content_root = root.join(&self.content_root);
        let mut created = Vec::new();
        for name in design.collection_names() {
            let dir = content_root.join(&name);
            if !dir.exists() {
                tokio::fs::create_dir_all(&dir)
                    .await
                    .with_context(|| format!("failed to create {}", dir.display()))?;
                created.push(format!("{}/{}", self.content_root, name));
            }
        }
        Ok(AgentOutput::free(ScaffoldReport {
            content_root: self.content_root.clone(),
            created,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docmigrate_core::api::NullSink;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    fn agents() -> LocalDiscoveryAgents {
        LocalDiscoveryAgents::new("src/content/docs", ".docmigrate")
    }

    #[test]
    fn test_discover_skips_hidden_vendored_and_output() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "README.md", "# hi");
        touch(dir.path(), "docs/guide/setup.mdx", "setup");
        touch(dir.path(), "node_modules/pkg/README.md", "x");
        touch(dir.path(), ".github/CONTRIBUTING.md", "x");
        touch(dir.path(), "src/content/docs/guides/old.md", "x");
        touch(dir.path(), "notes.txt", "x");

        let report = agents().discover(dir.path()).unwrap();
        let paths: Vec<&str> = report["files"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["path"].as_str().unwrap())
            .collect();
        assert_eq!(paths, vec!["README.md", "docs/guide/setup.mdx"]);
        assert_eq!(report["files"][0]["size"], 4);
    }

    #[tokio::test]
    async fn test_design_then_scaffold_creates_collection_dirs() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "README.md", "# hi");
        touch(dir.path(), "docs/api/client.md", "api");

        let agents = agents();
        let report = agents.analyze(dir.path(), &NullSink).await.unwrap().value;
        let design = agents.design_schemas(&report, &NullSink).await.unwrap().value;
        assert!(!design.collections.is_empty());

        let out = agents.scaffold(dir.path(), &design, &NullSink).await.unwrap();
        assert!(out.usage.is_none());
        for name in design.collection_names() {
            assert!(dir.path().join("src/content/docs").join(name).is_dir());
        }
        assert_eq!(out.value.created.len(), design.collections.len());

        let again = agents.scaffold(dir.path(), &design, &NullSink).await.unwrap();
        assert!(again.value.created.is_empty());
    }
}

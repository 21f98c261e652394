use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry of a discovery report: a bare path or a path with metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DocEntry {
    Path(String),
    Detailed {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        category: Option<String>,
        #[serde(default, alias = "size", skip_serializing_if = "Option::is_none")]
        size_bytes: Option<u64>,
    },
}

/// The shapes an analysis step may hand back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DiscoveryReport {
    Paths(Vec<DocEntry>),
    Files { files: Vec<DocEntry> },
    Documents { documents: Vec<DocEntry> },
    Categories { categories: BTreeMap<String, Vec<DocEntry>> },
}

/// A discovered document after normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDoc {
    pub path: String,
    pub declared_category: Option<String>,
    pub size_bytes: Option<u64>,
}

impl DiscoveryReport {
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Flatten into documents with forward-slash relative paths, dropping
    /// empty and duplicate paths (first occurrence wins).
    pub fn documents(&self) -> Vec<DiscoveredDoc> {
        let flat: Vec<(Option<&str>, &DocEntry)> = match self {
            DiscoveryReport::Paths(entries)
            | DiscoveryReport::Files { files: entries }
            | DiscoveryReport::Documents { documents: entries } => {
                entries.iter().map(|e| (None, e)).collect()
            }
            DiscoveryReport::Categories { categories } => categories
                .iter()
                .flat_map(|(name, entries)| entries.iter().map(move |e| (Some(name.as_str()), e)))
                .collect(),
        };

        let mut seen = HashSet::new();
        flat.into_iter()
            .filter_map(|(group, entry)| {
                let doc = match entry {
                    DocEntry::Path(path) => DiscoveredDoc {
                        path: normalize_path(path),
                        declared_category: group.map(str::to_string),
                        size_bytes: None,
                    },
                    DocEntry::Detailed {
                        path,
                        category,
                        size_bytes,
                    } => DiscoveredDoc {
                        path: normalize_path(path),
                        declared_category: category
                            .clone()
                            .or_else(|| group.map(str::to_string)),
                        size_bytes: *size_bytes,
                    },
                };
                (!doc.path.is_empty() && seen.insert(doc.path.clone())).then_some(doc)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.documents().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn normalize_path(path: &str) -> String {
    let unified = path.trim().replace('\\', "/");
    let mut rest = unified.as_str();
    while let Some(stripped) = rest.strip_prefix("./") {
        rest = stripped;
    }
    rest.trim_start_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn paths(report: &DiscoveryReport) -> Vec<String> {
        report.documents().into_iter().map(|d| d.path).collect()
    }

    #[test]
    fn test_all_shapes_normalize() {
        let list = DiscoveryReport::from_value(json!(["README.md", "./docs/guide.md"])).unwrap();
        assert_eq!(paths(&list), vec!["README.md", "docs/guide.md"]);

        let files = DiscoveryReport::from_value(json!({"files": ["a.md"]})).unwrap();
        assert!(matches!(files, DiscoveryReport::Files { .. }));

        let docs = DiscoveryReport::from_value(json!({
            "documents": [{"path": "docs\\api\\auth.md", "size": 4096}]
        }))
        .unwrap();
        let doc = &docs.documents()[0];
        assert_eq!(doc.path, "docs/api/auth.md");
        assert_eq!(doc.size_bytes, Some(4096));

        let grouped = DiscoveryReport::from_value(json!({
            "categories": {"recipes": ["cook/pasta.md"], "guides": ["g.md"]}
        }))
        .unwrap();
        let docs = grouped.documents();
        assert_eq!(docs.len(), 2);
        let pasta = docs.iter().find(|d| d.path == "cook/pasta.md").unwrap();
        assert_eq!(pasta.declared_category.as_deref(), Some("recipes"));
    }

    #[test]
    fn test_duplicates_and_blanks_dropped() {
        let report = DiscoveryReport::from_value(json!(["a.md", "./a.md", "  ", "b.md"])).unwrap();
        assert_eq!(paths(&report), vec!["a.md", "b.md"]);
        assert_eq!(report.len(), 2);
    }

    #[test]
    fn test_unknown_shape_rejected() {
        assert!(DiscoveryReport::from_value(json!({"pages": []})).is_err());
        assert!(DiscoveryReport::from_value(json!(42)).is_err());
    }
}

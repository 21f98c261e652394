use std::fmt;
use std::sync::OnceLock;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocCategory {
    Readme,
    Guide,
    Tutorial,
    Concept,
    Architecture,
    Reference,
    Api,
    Changelog,
    Other,
}

impl DocCategory {
    /// Static urgency per category; lower migrates first.
    pub fn base_priority(self) -> u32 {
        match self {
            DocCategory::Readme => 1,
            DocCategory::Guide | DocCategory::Tutorial => 2,
            DocCategory::Concept | DocCategory::Architecture => 3,
            DocCategory::Reference | DocCategory::Api => 4,
            DocCategory::Changelog => 5,
            DocCategory::Other => 6,
        }
    }

    /// Directory under the content root.
    pub fn dir_name(self) -> &'static str {
        match self {
            DocCategory::Readme => "overview",
            DocCategory::Guide => "guides",
            DocCategory::Tutorial => "tutorials",
            DocCategory::Concept => "concepts",
            DocCategory::Architecture => "architecture",
            DocCategory::Reference => "reference",
            DocCategory::Api => "api",
            DocCategory::Changelog => "changelog",
            DocCategory::Other => "misc",
        }
    }

    /// Match a free-form collection name ("guides", "API") onto a category.
    pub fn from_name(name: &str) -> Option<Self> {
        let lowered = name.trim().to_ascii_lowercase();
        let singular = lowered.strip_suffix('s').unwrap_or(&lowered);
        [
            DocCategory::Readme,
            DocCategory::Guide,
            DocCategory::Tutorial,
            DocCategory::Concept,
            DocCategory::Architecture,
            DocCategory::Reference,
            DocCategory::Api,
            DocCategory::Changelog,
        ]
        .into_iter()
        .find(|c| {
            let dir = c.dir_name();
            dir == lowered || dir.strip_suffix('s').unwrap_or(dir) == singular
        })
    }
}

impl fmt::Display for DocCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Pattern rules, checked in order; first match wins.
const RULES: &[(DocCategory, &str)] = &[
    (DocCategory::Readme, r"(^|/)(readme|index)(\.[a-z]+)?$"),
    (
        DocCategory::Changelog,
        r"(^|/)(changelog|changes|history|release[-_ ]?notes)[^/]*$",
    ),
    (DocCategory::Api, r"(^|/)(api|openapi|endpoints?)(/|[-_.])"),
    (DocCategory::Architecture, r"(^|/)(architecture|design|adrs?)(/|[-_.])"),
    (DocCategory::Tutorial, r"(^|/)tutorials?(/|[-_.])"),
    (
        DocCategory::Guide,
        r"(^|/)(guides?|how-?to|getting[-_]started|quick-?start)(/|[-_.])",
    ),
    (DocCategory::Concept, r"(^|/)(concepts?|overview|explanations?)(/|[-_.])"),
    (
        DocCategory::Reference,
        r"(^|/)(reference|ref|cli|config(uration)?)(/|[-_.])",
    ),
];

fn compiled_rules() -> &'static [(DocCategory, Regex)] {
    static COMPILED: OnceLock<Vec<(DocCategory, Regex)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        RULES
            .iter()
            .filter_map(|(category, pattern)| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map(|re| (*category, re))
                    .map_err(|e| tracing::error!(pattern, error = %e, "bad category rule"))
                    .ok()
            })
            .collect()
    })
}

/// Category assigned to one document and the directory it lands in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub category: DocCategory,
    pub dir: String,
}

/// Categorize `path`: pattern rules first, then a declared category naming a
/// designed schema collection, then `other`.
pub fn classify(path: &str, declared: Option<&str>, collections: &[String]) -> Classification {
    if let Some((category, _)) = compiled_rules().iter().find(|(_, re)| re.is_match(path)) {
        return Classification {
            category: *category,
            dir: category.dir_name().to_string(),
        };
    }

    if let Some(declared) = declared {
        let known = collections
            .iter()
            .any(|c| c.eq_ignore_ascii_case(declared.trim()));
        if known {
            let category = DocCategory::from_name(declared).unwrap_or(DocCategory::Other);
            return Classification {
                category,
                dir: slug(declared),
            };
        }
    }

    Classification {
        category: DocCategory::Other,
        dir: DocCategory::Other.dir_name().to_string(),
    }
}

fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else if !out.ends_with('-') && !out.is_empty() {
            out.push('-');
        }
    }
    let trimmed = out.trim_end_matches('-');
    if trimmed.is_empty() {
        DocCategory::Other.dir_name().to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cat(path: &str) -> DocCategory {
        classify(path, None, &[]).category
    }

    #[test]
    fn test_all_rules_compile() {
        assert_eq!(compiled_rules().len(), RULES.len());
    }

    #[test]
    fn test_pattern_rules() {
        assert_eq!(cat("README.md"), DocCategory::Readme);
        assert_eq!(cat("docs/index.mdx"), DocCategory::Readme);
        assert_eq!(cat("CHANGELOG.md"), DocCategory::Changelog);
        assert_eq!(cat("docs/api/auth.md"), DocCategory::Api);
        assert_eq!(cat("docs/architecture/storage.md"), DocCategory::Architecture);
        assert_eq!(cat("docs/tutorials/first-app.md"), DocCategory::Tutorial);
        assert_eq!(cat("docs/getting-started.md"), DocCategory::Guide);
        assert_eq!(cat("docs/concepts/model.md"), DocCategory::Concept);
        assert_eq!(cat("docs/reference/flags.md"), DocCategory::Reference);
        assert_eq!(cat("notes/random.md"), DocCategory::Other);
    }

    #[test]
    fn test_declared_category_needs_schema_collection() {
        let collections = vec!["Recipes".to_string()];
        let hit = classify("cook/pasta.md", Some("recipes"), &collections);
        assert_eq!(hit.dir, "recipes");
        assert_eq!(hit.category, DocCategory::Other);

        let miss = classify("cook/pasta.md", Some("cookbook"), &collections);
        assert_eq!(miss.dir, "misc");
    }

    #[test]
    fn test_declared_known_name_keeps_priority() {
        let collections = vec!["Guides".to_string()];
        let c = classify("misc/setup.md", Some("Guides"), &collections);
        assert_eq!(c.category, DocCategory::Guide);
        assert_eq!(c.dir, "guides");
    }

    #[test]
    fn test_from_name() {
        assert_eq!(DocCategory::from_name("API"), Some(DocCategory::Api));
        assert_eq!(DocCategory::from_name("tutorial"), Some(DocCategory::Tutorial));
        assert_eq!(DocCategory::from_name("blog"), None);
    }
}

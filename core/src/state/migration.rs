//! Schema-version migrations for the persisted workflow state.
//!
//! Migrations operate on raw JSON so that shapes older than the current
//! `WorkflowState` can still be read. Each step is a pure function from one
//! version to a later one; versions never go down.

use serde_json::{Map, Value};

use crate::error::MigrationError;

pub const CURRENT_SCHEMA_VERSION: u32 = 3;

/// Files written before versioning existed carry no `schemaVersion`.
pub const LEGACY_SCHEMA_VERSION: u32 = 1;

pub type MigrationFn = fn(Value) -> Result<Value, MigrationError>;

#[derive(Clone, Copy)]
pub struct Migration {
    pub from: u32,
    pub to: u32,
    pub apply: MigrationFn,
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration")
            .field("from", &self.from)
            .field("to", &self.to)
            .finish()
    }
}

pub fn builtin_migrations() -> Vec<Migration> {
    vec![
        Migration {
            from: 1,
            to: 2,
            apply: v1_add_usage_counters,
        },
        Migration {
            from: 2,
            to: 3,
            apply: v2_rename_budget_and_fill_payloads,
        },
    ]
}

pub fn needs_migration(from: u32, to: u32) -> bool {
    from < to
}

/// Read `schemaVersion`, treating a missing field as the legacy version.
pub fn schema_version(state: &Value) -> Result<u32, MigrationError> {
    match state.get("schemaVersion") {
        None | Some(Value::Null) => Ok(LEGACY_SCHEMA_VERSION),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .filter(|v| *v >= LEGACY_SCHEMA_VERSION)
            .ok_or_else(|| MigrationError::InvalidVersion(n.to_string())),
        Some(other) => Err(MigrationError::InvalidVersion(other.to_string())),
    }
}

/// Bring `state` up to `target` with the built-in migrations.
pub fn migrate(state: Value, target: u32) -> Result<Value, MigrationError> {
    migrate_with(&builtin_migrations(), state, target)
}

/// Bring `state` up to `target` using `migrations`.
///
/// Steps are tried in ascending `from` order; a step applies when
/// `from <= current < to <= target`. Ending anywhere but `target` is an error
/// and the partially migrated value is discarded.
pub fn migrate_with(
    migrations: &[Migration],
    mut state: Value,
    target: u32,
) -> Result<Value, MigrationError> {
    let start = schema_version(&state)?;
    if start > target {
        return Err(MigrationError::Downgrade {
            from: start,
            to: target,
        });
    }
    if start == target {
        return Ok(state);
    }

    let mut ordered: Vec<&Migration> = migrations.iter().collect();
    ordered.sort_by_key(|m| (m.from, m.to));

    let mut current = start;
    for step in ordered {
        if step.from <= current && current < step.to && step.to <= target {
            state = (step.apply)(state)?;
            set_version(&mut state, step.to, step.from)?;
            tracing::debug!(from = current, to = step.to, "applied state migration");
            current = step.to;
        }
    }

    if current != target {
        return Err(MigrationError::PathNotFound {
            from: start,
            to: target,
            reached: current,
        });
    }
    Ok(state)
}

/// Fields a current-version state must carry, with their JSON types.
const REQUIRED_FIELDS: &[(&str, JsonKind)] = &[
    ("schemaVersion", JsonKind::Number),
    ("startedAt", JsonKind::String),
    ("updatedAt", JsonKind::String),
    ("currentStage", JsonKind::String),
    ("checkpoints", JsonKind::Array),
    ("apiCallCount", JsonKind::Number),
    ("totalCost", JsonKind::Number),
    ("totalTokens", JsonKind::Number),
];

const CHECKPOINT_FIELDS: &[(&str, JsonKind)] = &[
    ("stage", JsonKind::String),
    ("timestamp", JsonKind::String),
    ("description", JsonKind::String),
    ("payload", JsonKind::Any),
];

#[derive(Clone, Copy)]
enum JsonKind {
    Number,
    String,
    Array,
    Any,
}

impl JsonKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            JsonKind::Number => value.is_number(),
            JsonKind::String => value.is_string(),
            JsonKind::Array => value.is_array(),
            JsonKind::Any => true,
        }
    }
}

/// Every required field that is absent or has the wrong JSON type.
pub fn missing_fields(state: &Value) -> Vec<String> {
    let Some(obj) = state.as_object() else {
        return vec!["<root object>".to_string()];
    };

    let mut missing: Vec<String> = REQUIRED_FIELDS
        .iter()
        .filter(|(name, kind)| !obj.get(*name).is_some_and(|v| kind.matches(v)))
        .map(|(name, _)| (*name).to_string())
        .collect();

    if let Some(max_cost) = obj.get("maxCost") {
        if !(max_cost.is_null() || max_cost.is_number()) {
            missing.push("maxCost".to_string());
        }
    }

    if let Some(Value::Array(checkpoints)) = obj.get("checkpoints") {
        for (idx, checkpoint) in checkpoints.iter().enumerate() {
            let Some(cp) = checkpoint.as_object() else {
                missing.push(format!("checkpoints[{idx}]"));
                continue;
            };
            for (name, kind) in CHECKPOINT_FIELDS {
                if !cp.get(*name).is_some_and(|v| kind.matches(v)) {
                    missing.push(format!("checkpoints[{idx}].{name}"));
                }
            }
        }
    }
    missing
}

pub fn validate(state: &Value) -> bool {
    missing_fields(state).is_empty()
}

fn as_object_mut(state: &mut Value, from: u32, to: u32) -> Result<&mut Map<String, Value>, MigrationError> {
    state.as_object_mut().ok_or(MigrationError::Step {
        from,
        to,
        reason: "state is not a JSON object".to_string(),
    })
}

fn set_version(state: &mut Value, version: u32, from: u32) -> Result<(), MigrationError> {
    as_object_mut(state, from, version)?.insert("schemaVersion".to_string(), Value::from(version));
    Ok(())
}

/// v1 had no usage counters.
fn v1_add_usage_counters(mut state: Value) -> Result<Value, MigrationError> {
    let obj = as_object_mut(&mut state, 1, 2)?;
    obj.entry("totalTokens").or_insert_with(|| Value::from(0u64));
    obj.entry("apiCallCount").or_insert_with(|| Value::from(0u64));
    Ok(state)
}

/// v2 called the ceiling `budget` and allowed checkpoints without payloads.
fn v2_rename_budget_and_fill_payloads(mut state: Value) -> Result<Value, MigrationError> {
    let obj = as_object_mut(&mut state, 2, 3)?;

    if let Some(budget) = obj.remove("budget") {
        if !budget.is_null() && !budget.is_number() {
            return Err(MigrationError::Step {
                from: 2,
                to: 3,
                reason: format!("budget is not a number: {budget}"),
            });
        }
        obj.entry("maxCost").or_insert(budget);
    }
    obj.entry("maxCost").or_insert(Value::Null);

    if let Some(Value::Array(checkpoints)) = obj.get_mut("checkpoints") {
        for checkpoint in checkpoints.iter_mut().filter_map(Value::as_object_mut) {
            checkpoint
                .entry("payload")
                .or_insert_with(|| Value::Object(Map::new()));
        }
    }
    Ok(state)
}

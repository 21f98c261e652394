use std::path::{Path, PathBuf};

use super::types::AppConfig;

/// Get the default docmigrate data directory: ~/.docmigrate
pub fn get_data_dir() -> anyhow::Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".docmigrate"))
}

pub fn load_default() -> anyhow::Result<AppConfig> {
    // Priority 1: ~/.docmigrate/config.toml (highest)
    let global_config = get_data_dir()?.join("config.toml");

    // Priority 2: ./docmigrate.toml (current directory)
    let local_config = Path::new("docmigrate.toml");

    let mut cfg = if global_config.exists() {
        load_from_file(&global_config)?
    } else if local_config.exists() {
        load_from_file(local_config)?
    } else {
        AppConfig::default()
    };

    apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());
    Ok(cfg)
}

pub fn load_from_file(path: &Path) -> anyhow::Result<AppConfig> {
    let s = std::fs::read_to_string(path)?;
    let cfg = toml::from_str::<AppConfig>(&s)
        .map_err(|e| anyhow::anyhow!("invalid config {}: {e}", path.display()))?;
    Ok(cfg)
}

/// Environment variable overrides (Priority 0: highest).
///
/// `lookup` is injected so tests do not have to mutate the process environment.
pub fn apply_env_overrides<F>(cfg: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(v) = get("DOCMIGRATE_SERVICE_URL") {
        cfg.service.endpoint = v;
    }
    if let Some(v) = get("DOCMIGRATE_API_KEY") {
        cfg.service.api_key = v;
    }
    if let Some(v) = get("DOCMIGRATE_MODEL") {
        cfg.service.model = v;
    }
    if let Some(v) = get("DOCMIGRATE_TIER") {
        cfg.limiter.tier = v;
    }
    if let Some(v) = get("DOCMIGRATE_MAX_COST") {
        match v.trim().parse::<f64>() {
            Ok(max) => cfg.budget.max_cost = Some(max),
            Err(_) => tracing::warn!("ignoring non-numeric DOCMIGRATE_MAX_COST={}", v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("DOCMIGRATE_SERVICE_URL", "http://localhost:9000"),
            ("DOCMIGRATE_TIER", "tier3"),
            ("DOCMIGRATE_MAX_COST", "4.25"),
            ("DOCMIGRATE_MODEL", "   "),
        ]
        .into_iter()
        .collect();

        let mut cfg = AppConfig::default();
        apply_env_overrides(&mut cfg, |k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.service.endpoint, "http://localhost:9000");
        assert_eq!(cfg.limiter.tier, "tier3");
        assert_eq!(cfg.budget.max_cost, Some(4.25));
        // Blank values are ignored.
        assert_eq!(cfg.service.model, AppConfig::default().service.model);
    }

    #[test]
    fn test_bad_max_cost_is_ignored() {
        let mut cfg = AppConfig::default();
        apply_env_overrides(&mut cfg, |k| {
            (k == "DOCMIGRATE_MAX_COST").then(|| "lots".to_string())
        });
        assert_eq!(cfg.budget.max_cost, None);
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("docmigrate.toml");
        std::fs::write(&path, "[executor]\nmax_concurrency = 3\n").unwrap();

        let cfg = load_from_file(&path).unwrap();
        assert_eq!(cfg.executor.max_concurrency, 3);
    }

    #[test]
    fn test_load_from_invalid_file_names_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("docmigrate.toml");
        std::fs::write(&path, "[executor\n").unwrap();

        let err = load_from_file(&path).unwrap_err().to_string();
        assert!(err.contains("docmigrate.toml"));
    }
}

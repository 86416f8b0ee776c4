use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::query::embedding::MINILM_DIMENSION;
use crate::resolution::DisambiguationRule;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NewsgraphConfig {
    /// Relational database path
    pub database: Option<String>,
    /// Vector database path
    pub vector_database: Option<String>,
    pub vector: VectorConfig,
    pub search: SearchConfig,
    pub resolution: ResolutionConfig,
    pub traversal: TraversalConfig,
    pub reconcile: ReconcileConfig,
}

impl NewsgraphConfig {
    pub fn database_path(&self, base: &Path) -> PathBuf {
        self.database
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| default_database_path_in(base))
    }

    pub fn vector_database_path(&self, base: &Path) -> PathBuf {
        self.vector_database
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| default_vector_path_in(base))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    /// Fixed collection dimension
    pub dimension: usize,
    /// "all-MiniLM-L6-v2" for the transformer model, "hashing" for the offline embedder
    pub model: String,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            dimension: MINILM_DIMENSION,
            model: "all-MiniLM-L6-v2".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub vector_weight: f32,
    pub text_weight: f32,
    pub default_top_k: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            vector_weight: 0.6,
            text_weight: 0.4,
            default_top_k: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    /// Minimum confidence for accepting a best match
    pub acceptance_threshold: f32,
    /// Cap on concurrent LLM comparison calls
    pub max_in_flight: usize,
    /// Timeout for one LLM comparison call
    pub llm_timeout_ms: u64,
    /// Groups of type labels that may denote the same kind of thing
    pub compatible_types: Vec<Vec<String>>,
    /// Default disambiguation rules by entity type
    pub type_rules: BTreeMap<String, Vec<DisambiguationRule>>,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: 0.7,
            max_in_flight: 4,
            llm_timeout_ms: 10_000,
            compatible_types: Vec::new(),
            type_rules: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TraversalConfig {
    pub max_depth: usize,
    pub max_entities: usize,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            max_depth: 2,
            max_entities: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Seconds between orphan-vector sweeps; unset disables the sweep
    pub interval_secs: Option<u64>,
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("newsgraph.toml")
}

pub fn default_database_path_in(base: &Path) -> PathBuf {
    base.join(".newsgraph").join("newsgraph.db")
}

pub fn default_vector_path_in(base: &Path) -> PathBuf {
    base.join(".newsgraph").join("vectors.db")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<NewsgraphConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: NewsgraphConfig = toml::from_str(&contents)?;
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &NewsgraphConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_db_dir(db_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(&dir.path().join("nope.toml"))).unwrap().is_none());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("newsgraph.toml");
        std::fs::write(
            &path,
            r#"
            database = "data/graph.db"

            [search]
            text_weight = 0.5

            [resolution.type_rules]
            "公司" = [{ pattern = "股价|iPhone", weight = 0.6 }]
            "#,
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap().unwrap();
        assert_eq!(config.database.as_deref(), Some("data/graph.db"));
        assert_eq!(config.search.text_weight, 0.5);
        assert_eq!(config.search.vector_weight, 0.6);
        assert_eq!(config.resolution.acceptance_threshold, 0.7);
        assert_eq!(config.resolution.type_rules["公司"].len(), 1);
        assert_eq!(config.traversal.max_entities, 50);
    }

    #[test]
    fn test_write_config_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("newsgraph.toml");
        write_config(&path, &NewsgraphConfig::default(), false).unwrap();
        assert!(write_config(&path, &NewsgraphConfig::default(), false).is_err());
        assert!(write_config(&path, &NewsgraphConfig::default(), true).is_ok());

        let reloaded = load_config(Some(&path)).unwrap().unwrap();
        assert_eq!(reloaded.vector.dimension, MINILM_DIMENSION);
    }

    #[test]
    fn test_default_paths() {
        let config = NewsgraphConfig::default();
        let base = Path::new("/tmp/project");
        assert_eq!(config.database_path(base), base.join(".newsgraph/newsgraph.db"));
        assert_eq!(config.vector_database_path(base), base.join(".newsgraph/vectors.db"));
    }
}

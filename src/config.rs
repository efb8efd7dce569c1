use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub manifest: ManifestConfig,
    #[serde(default)]
    pub qdrant: QdrantConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ManifestConfig {
    /// SQLite file holding the ingestion manifest.
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QdrantConfig {
    #[serde(default = "default_qdrant_url")]
    pub url: String,
    #[serde(default = "default_logs_collection")]
    pub logs_collection: String,
    #[serde(default = "default_tickets_collection")]
    pub tickets_collection: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: default_qdrant_url(),
            logs_collection: default_logs_collection(),
            tickets_collection: default_tickets_collection(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dims: default_dims(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_llm_model(),
            temperature: 0.0,
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    /// Hard cap on reasoning steps before the loop aborts.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// Corrective re-prompts allowed when model output fails the grammar.
    #[serde(default = "default_max_reparse")]
    pub max_reparse: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_reparse: default_max_reparse(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub default_k: usize,
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    /// Over-fetch multiplier so threshold discards still leave k candidates.
    #[serde(default = "default_overfetch_factor")]
    pub overfetch_factor: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: default_k(),
            threshold: default_threshold(),
            overfetch_factor: default_overfetch_factor(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestionConfig {
    pub logs_dir: PathBuf,
    pub tickets_dir: PathBuf,
    #[serde(default = "default_log_globs")]
    pub log_globs: Vec<String>,
    #[serde(default = "default_ticket_globs")]
    pub ticket_globs: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_qdrant_url() -> String {
    "http://localhost:6333".to_string()
}
fn default_logs_collection() -> String {
    "aks_logs".to_string()
}
fn default_tickets_collection() -> String {
    "tickets".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_dims() -> usize {
    1536
}
fn default_batch_size() -> usize {
    10
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_llm_model() -> String {
    "gpt-4.1-mini".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    60
}
fn default_max_steps() -> usize {
    8
}
fn default_max_reparse() -> usize {
    2
}
fn default_k() -> usize {
    5
}
fn default_threshold() -> f32 {
    0.5
}
fn default_overfetch_factor() -> usize {
    3
}
fn default_max_chars() -> usize {
    2000
}
fn default_overlap_chars() -> usize {
    200
}
fn default_log_globs() -> Vec<String> {
    vec!["**/*.log".to_string(), "**/*.txt".to_string()]
}
fn default_ticket_globs() -> Vec<String> {
    vec!["**/*.json".to_string()]
}
fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

impl Config {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).with_context(|| "Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.chunking.max_chars == 0 {
            anyhow::bail!("chunking.max_chars must be > 0");
        }
        if self.chunking.overlap_chars >= self.chunking.max_chars {
            anyhow::bail!("chunking.overlap_chars must be < chunking.max_chars");
        }
        if self.embedding.dims == 0 {
            anyhow::bail!("embedding.dims must be > 0");
        }
        if self.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be > 0");
        }
        if !(0.0..=1.0).contains(&self.retrieval.threshold) {
            anyhow::bail!("retrieval.threshold must be in [0.0, 1.0]");
        }
        if self.retrieval.default_k == 0 {
            anyhow::bail!("retrieval.default_k must be >= 1");
        }
        if self.retrieval.overfetch_factor == 0 {
            anyhow::bail!("retrieval.overfetch_factor must be >= 1");
        }
        if self.agent.max_steps == 0 {
            anyhow::bail!("agent.max_steps must be >= 1");
        }
        Ok(())
    }

    pub fn embedding_retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.embedding.max_retries, Duration::from_secs(1))
    }

    pub fn llm_retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.llm.max_retries, Duration::from_secs(1))
    }

    pub fn qdrant_retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.qdrant.max_retries, Duration::from_secs(1))
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    Config::from_toml_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[manifest]
path = "data/manifest.sqlite"

[ingestion]
logs_dir = "data/logs"
tickets_dir = "data/tickets"
"#;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config = Config::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.qdrant.logs_collection, "aks_logs");
        assert_eq!(config.retrieval.default_k, 5);
        assert!((config.retrieval.threshold - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.agent.max_steps, 8);
        assert_eq!(config.embedding.dims, 1536);
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let content = format!("{}\n[retrieval]\nthreshold = 1.5\n", MINIMAL);
        assert!(Config::from_toml_str(&content).is_err());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_max() {
        let content = format!(
            "{}\n[chunking]\nmax_chars = 100\noverlap_chars = 100\n",
            MINIMAL
        );
        assert!(Config::from_toml_str(&content).is_err());
    }

    #[test]
    fn test_zero_steps_rejected() {
        let content = format!("{}\n[agent]\nmax_steps = 0\n", MINIMAL);
        assert!(Config::from_toml_str(&content).is_err());
    }
}

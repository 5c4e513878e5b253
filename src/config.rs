use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const SYNC_WORKERS_DEFAULT: u16 = 4;

/// Default embedding model requested from the provider.
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-large";
/// Default vector dimensionality requested from the provider.
const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1024;
/// Roughly 4 chars per token keeps 6000 chars well under an 8k-token limit.
const DEFAULT_MAX_INPUT_CHARS: usize = 6000;

/// Configuration for the external embedding provider.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Base URL of an OpenAI-compatible embeddings API
    #[serde(default = "default_embedding_endpoint")]
    pub endpoint: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model name sent with each request
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Vector dimensionality requested from the provider
    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: usize,

    /// Input truncation limit in characters
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,

    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_embedding_max_retries")]
    pub max_retries: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: default_embedding_endpoint(),
            api_key_env: default_api_key_env(),
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
            timeout_secs: default_embedding_timeout_secs(),
            max_retries: default_embedding_max_retries(),
        }
    }
}

fn default_embedding_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_embedding_dimensions() -> usize {
    DEFAULT_EMBEDDING_DIMENSIONS
}

fn default_max_input_chars() -> usize {
    DEFAULT_MAX_INPUT_CHARS
}

fn default_embedding_timeout_secs() -> u64 {
    30
}

fn default_embedding_max_retries() -> usize {
    3
}

/// Configuration for source-page fetching.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScrapeConfig {
    #[serde(default = "default_scrape_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_scrape_max_retries")]
    pub max_retries: u64,

    #[serde(default = "default_allowed_schemes")]
    pub allowed_schemes: Vec<String>,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_scrape_timeout_secs(),
            max_retries: default_scrape_max_retries(),
            allowed_schemes: default_allowed_schemes(),
        }
    }
}

fn default_scrape_timeout_secs() -> u64 {
    30
}

fn default_scrape_max_retries() -> u64 {
    5
}

fn default_allowed_schemes() -> Vec<String> {
    vec!["http".to_string(), "https".to_string()]
}

/// Configuration for the synchronization pipeline.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Worker threads processing template items concurrently. Capped to
    /// stay inside the embedding provider's rate limits.
    #[serde(default = "sync_workers")]
    pub workers: u16,

    /// Default chunk size for batched incremental repair
    #[serde(default)]
    pub default_batch_size: Option<usize>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            workers: SYNC_WORKERS_DEFAULT,
            default_batch_size: None,
        }
    }
}

fn sync_workers() -> u16 {
    SYNC_WORKERS_DEFAULT
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_search_results")]
    pub default_results: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_results: default_search_results(),
        }
    }
}

fn default_search_results() -> usize {
    5
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_templates_dir")]
    pub templates_dir: String,

    #[serde(default = "default_index_dir")]
    pub index_dir: String,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub scrape: ScrapeConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: String,
}

fn default_templates_dir() -> String {
    "templates".to_string()
}

fn default_index_dir() -> String {
    "index".to_string()
}

impl Config {
    fn validate(&mut self) {
        if self.sync.workers == 0 {
            self.sync.workers = 1
        }

        if self.embedding.dimensions == 0 {
            panic!("embedding.dimensions must be greater than 0");
        }

        if self.embedding.max_input_chars == 0 {
            panic!("embedding.max_input_chars must be greater than 0");
        }

        if self.embedding.timeout_secs == 0 {
            panic!("embedding.timeout_secs must be greater than 0");
        }

        if self.scrape.allowed_schemes.is_empty() {
            panic!("scrape.allowed_schemes must not be empty");
        }

        if self.search.default_results == 0 {
            panic!("search.default_results must be greater than 0");
        }

        if let Some(0) = self.sync.default_batch_size {
            panic!("sync.default_batch_size must be greater than 0 when set");
        }
    }

    pub fn load_with(base_path: &str) -> Self {
        let config_path = Path::new(base_path).join("config.yaml");

        // create new if does not exist
        if !config_path.exists() {
            std::fs::create_dir_all(base_path).expect("cannot create config directory");
            std::fs::write(
                &config_path,
                serde_yml::to_string(&Self::default()).unwrap().as_bytes(),
            )
            .expect("cannot write default config");
        }

        let config_str =
            std::fs::read_to_string(&config_path).expect("config file is not readable");
        let mut config: Self = serde_yml::from_str(&config_str).expect("config is malformed");

        config.base_path = base_path.to_string();

        config.validate();

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config).unwrap() {
            config.save();
        }

        config
    }

    /// In-memory config rooted at a path, without touching disk.
    pub fn with_base_path(base_path: &str) -> Self {
        let mut config = Self::default();
        config.base_path = base_path.to_string();
        config
    }

    pub fn save(&self) {
        let config_path = Path::new(&self.base_path).join("config.yaml");
        let config_str = serde_yml::to_string(&self).unwrap();
        std::fs::write(config_path, config_str.as_bytes()).expect("cannot write config");
    }

    pub fn templates_path(&self) -> PathBuf {
        Path::new(&self.base_path).join(&self.templates_dir)
    }

    pub fn index_path(&self) -> PathBuf {
        Path::new(&self.base_path).join(&self.index_dir)
    }
}

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Number of text zones assumed when a template config does not declare any.
pub const DEFAULT_TEXT_ZONES: u32 = 2;

/// A template's `example` field accepts either a single caption or a list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Example {
    One(String),
    Many(Vec<Option<String>>),
}

impl Example {
    /// Non-null example captions, in declaration order.
    pub fn valid_entries(&self) -> Vec<&str> {
        match self {
            Example::One(s) => vec![s.as_str()],
            Example::Many(list) => list.iter().flatten().map(|s| s.as_str()).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateRecord {
    /// Directory name of the template; globally unique and stable.
    #[serde(default)]
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Keyword lists in the wild contain null entries; they are dropped at
    /// use sites, not rejected at parse time.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<Option<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<Example>,

    /// Text zone declarations. Only the count matters to the index; the
    /// zone bodies are kept verbatim so write-through saves don't lose them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub text: Vec<serde_yml::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scraped_text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aside_text: Option<String>,

    /// ISO-8601 timestamp of when the template entered the catalog.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_at: Option<String>,

    /// Unrecognized config keys, preserved across load/save round trips.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yml::Value>,
}

impl TemplateRecord {
    pub fn text_zone_count(&self) -> u32 {
        if self.text.is_empty() {
            DEFAULT_TEXT_ZONES
        } else {
            self.text.len() as u32
        }
    }

    /// Non-null keywords, in declaration order.
    pub fn valid_keywords(&self) -> Vec<&str> {
        self.keywords.iter().flatten().map(|s| s.as_str()).collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed template config: {0}")]
    Yaml(#[from] serde_yml::Error),

    #[error("template has no id")]
    MissingId,
}

/// Source of truth for template records. The sync pipeline reads the full
/// catalog from here and writes enrichment-derived fields back through
/// `save`.
pub trait TemplateStore: Send + Sync {
    fn list_all(&self) -> Result<Vec<TemplateRecord>, StoreError>;
    fn get(&self, id: &str) -> Result<Option<TemplateRecord>, StoreError>;
    fn save(&self, record: &TemplateRecord) -> Result<(), StoreError>;
}

/// Directory-backed store: one subdirectory per template holding a
/// `config.yml`. The subdirectory name is the template id.
#[derive(Debug, Clone)]
pub struct DirStore {
    base_dir: PathBuf,
}

const CONFIG_FILE: &str = "config.yml";

impl DirStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(DirStore { base_dir })
    }

    fn config_path(&self, id: &str) -> PathBuf {
        self.base_dir.join(id).join(CONFIG_FILE)
    }

    fn load_record(&self, id: &str, path: &Path) -> Result<TemplateRecord, StoreError> {
        let raw = std::fs::read_to_string(path)?;
        let mut record: TemplateRecord = serde_yml::from_str(&raw)?;
        record.id = id.to_string();
        Ok(record)
    }
}

impl TemplateStore for DirStore {
    fn list_all(&self) -> Result<Vec<TemplateRecord>, StoreError> {
        let mut records = vec![];

        for entry in std::fs::read_dir(&self.base_dir)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }

            let id = match entry.file_name().to_str() {
                Some(name) => name.to_string(),
                None => continue,
            };

            let config_path = entry.path().join(CONFIG_FILE);
            if !config_path.exists() {
                continue;
            }

            match self.load_record(&id, &config_path) {
                Ok(record) => records.push(record),
                // one broken config must not hide the rest of the catalog
                Err(err) => log::error!("skipping template {id}: {err}"),
            }
        }

        records.sort_by(|a, b| a.id.cmp(&b.id));

        log::debug!("loaded {} template configs", records.len());
        Ok(records)
    }

    fn get(&self, id: &str) -> Result<Option<TemplateRecord>, StoreError> {
        let path = self.config_path(id);
        if !path.exists() {
            return Ok(None);
        }

        self.load_record(id, &path).map(Some)
    }

    fn save(&self, record: &TemplateRecord) -> Result<(), StoreError> {
        if record.id.is_empty() {
            return Err(StoreError::MissingId);
        }

        let path = self.config_path(&record.id);
        let dir = path.parent().expect("config path always has a parent");
        std::fs::create_dir_all(dir)?;

        let yaml = serde_yml::to_string(record)?;

        let temp_path = dir.join(format!("{CONFIG_FILE}.tmp"));
        std::fs::write(&temp_path, yaml.as_bytes())?;
        std::fs::rename(&temp_path, &path)?;

        Ok(())
    }
}

use anyhow::{Context, Result, bail};
use ner::{EntityType, ExtractorConfig, MatchMode, RetryPolicy};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bind: String,
    pub mode: OperationMode,
    pub backend: BackendConfig,
    pub extraction: ExtractionConfig,
    pub concurrency: ConcurrencyConfig,
    pub retry: RetryPolicy,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    Fast,      // Many parallel category calls, short timeouts
    Accurate,  // Sequential calls, generous timeouts, no cache
    Balanced,  // Default
}

impl FromStr for OperationMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "fast" => Ok(OperationMode::Fast),
            "accurate" => Ok(OperationMode::Accurate),
            "balanced" => Ok(OperationMode::Balanced),
            other => bail!("unknown operation mode: {}", other),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Tgi,
    Ollama,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "tgi" => Ok(BackendKind::Tgi),
            "ollama" => Ok(BackendKind::Ollama),
            other => bail!("unknown backend: {}", other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub base_url: String,
    /// Only used by Ollama; TGI serves a single model.
    pub model: String,
    /// Prompt tokens kept when truncating.
    pub context_window: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Tgi,
            base_url: "http://localhost:8080".to_string(),
            model: "uniner-7b-type".to_string(),
            context_window: 2048,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Labels as accepted by `EntityType::from_str`.
    pub entity_types: Vec<String>,
    pub max_new_tokens: usize,
    pub template: String,
    pub match_mode: MatchMode,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        let defaults = ExtractorConfig::default();
        Self {
            entity_types: defaults
                .entity_types
                .iter()
                .map(|t| t.label().to_string())
                .collect(),
            max_new_tokens: defaults.max_new_tokens,
            template: defaults.template,
            match_mode: defaults.match_mode,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub max_concurrent_llm_calls: usize,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
            mode: OperationMode::Balanced,
            backend: BackendConfig::default(),
            extraction: ExtractionConfig::default(),
            concurrency: ConcurrencyConfig {
                max_concurrent_llm_calls: 3,
                request_timeout_secs: 60,
            },
            retry: RetryPolicy::new(3, 1000, 10000),
            cache: CacheConfig {
                enabled: true,
                max_entries: 10000,
            },
        }
    }
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        AppConfig::default().concurrency
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        AppConfig::default().cache
    }
}

impl AppConfig {
    pub fn fast_mode() -> Self {
        Self {
            mode: OperationMode::Fast,
            concurrency: ConcurrencyConfig {
                max_concurrent_llm_calls: 12,
                request_timeout_secs: 30,
            },
            retry: RetryPolicy::new(2, 500, 5000),
            cache: CacheConfig {
                enabled: true,
                max_entries: 50000,
            },
            ..Self::default()
        }
    }

    pub fn accurate_mode() -> Self {
        Self {
            mode: OperationMode::Accurate,
            concurrency: ConcurrencyConfig {
                max_concurrent_llm_calls: 1,
                request_timeout_secs: 120,
            },
            retry: RetryPolicy::new(5, 2000, 20000),
            cache: CacheConfig {
                enabled: false,
                max_entries: 0,
            },
            ..Self::default()
        }
    }

    pub fn for_mode(mode: OperationMode) -> Self {
        match mode {
            OperationMode::Fast => Self::fast_mode(),
            OperationMode::Accurate => Self::accurate_mode(),
            OperationMode::Balanced => Self::default(),
        }
    }

    /// Layers, lowest first: the preset for `NER_MODE` (or the file's
    /// `mode`), the keys set in the `NER_CONFIG` file, then env overrides.
    pub fn load() -> Result<Self> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    pub fn load_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let file = match lookup("NER_CONFIG") {
            Some(path) => Some(read_json(Path::new(&path))?),
            None => None,
        };
        let mode = match lookup("NER_MODE") {
            Some(mode) => Some(mode.parse::<OperationMode>()?),
            None => None,
        };
        let mut config = Self::layered(mode, file)?;
        config.apply_overrides(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// The file's keys over the preset its `mode` selects.
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::layered(None, Some(read_json(path)?))
    }

    fn layered(mode: Option<OperationMode>, file: Option<Value>) -> Result<Self> {
        let file_mode = match file.as_ref().and_then(|f| f.get("mode")) {
            Some(m) => Some(
                serde_json::from_value::<OperationMode>(m.clone())
                    .context("Invalid mode in config file")?,
            ),
            None => None,
        };
        let mode = mode.or(file_mode).unwrap_or(OperationMode::Balanced);
        let preset = Self::for_mode(mode);

        let mut config = match file {
            Some(file) => {
                let mut merged = serde_json::to_value(&preset)?;
                merge_json(&mut merged, file);
                serde_json::from_value(merged).context("Failed to parse config file")?
            }
            None => preset,
        };
        config.mode = mode;
        Ok(config)
    }

    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(bind) = lookup("NER_BIND") {
            self.bind = bind;
        }
        if let Some(kind) = lookup("NER_BACKEND") {
            self.backend.kind = kind.parse()?;
        }
        if let Some(url) = lookup("NER_BASE_URL") {
            self.backend.base_url = url;
        }
        if let Some(model) = lookup("NER_MODEL") {
            self.backend.model = model;
        }
        if let Some(types) = lookup("NER_ENTITY_TYPES") {
            self.extraction.entity_types = types
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        Ok(())
    }

    /// Checks the settings parsed here; `Extractor::new` checks the rest.
    pub fn validate(&self) -> Result<()> {
        self.extractor_config().map(|_| ())
    }

    pub fn extractor_config(&self) -> Result<ExtractorConfig> {
        let entity_types = EntityType::parse_list(&self.extraction.entity_types)
            .context("Invalid entity_types in configuration")?;
        if entity_types.is_empty() {
            bail!("Configuration must name at least one entity type");
        }
        if self.concurrency.max_concurrent_llm_calls == 0 {
            bail!("max_concurrent_llm_calls must be positive");
        }

        Ok(ExtractorConfig {
            entity_types,
            max_new_tokens: self.extraction.max_new_tokens,
            template: self.extraction.template.clone(),
            max_concurrency: self.concurrency.max_concurrent_llm_calls,
            request_timeout_secs: self.concurrency.request_timeout_secs,
            retry: self.retry.clone(),
            match_mode: self.extraction.match_mode,
        })
    }
}

fn read_json(path: &Path) -> Result<Value> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse config file {}", path.display()))
}

/// Objects merge key by key; anything else in `overlay` replaces `base`.
fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                merge_json(base.entry(key).or_insert(Value::Null), value);
            }
        }
        (base, overlay) => *base = overlay,
    }
}

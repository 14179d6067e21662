use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default text window length (characters)
const DEFAULT_CHUNK_SIZE: usize = 500;
/// Default overlap between consecutive windows
const DEFAULT_CHUNK_OVERLAP: usize = 100;
/// Default joint text/image embedding model
const DEFAULT_EMBEDDING_MODEL: &str = "clip-vit-b-32";
/// Default vision-capable generation model
const DEFAULT_LLM_MODEL: &str = "gpt-4o";
/// Default result count when a query does not specify k
const DEFAULT_K: usize = 5;
/// Images larger than this on either side are downscaled before embedding
const DEFAULT_MAX_IMAGE_DIMENSION: u32 = 1024;
/// Default generation call timeout in seconds
const DEFAULT_GENERATION_TIMEOUT_SECS: u64 = 60;
/// Default embedding model download timeout in seconds
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;

/// Errors raised by configuration validation and I/O.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config is malformed: {0}")]
    Malformed(#[from] serde_yml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Text window length in characters
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Overlap between consecutive windows, must be < chunk_size
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Embedding model name (selects the embedding adapter)
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Generation model name (selects the generation adapter)
    #[serde(default = "default_llm_model")]
    pub llm_model: String,

    /// Default number of results when a query omits k
    #[serde(default = "default_k")]
    pub default_k: usize,

    /// Maximum image width/height before downscaling (aspect preserved)
    #[serde(default = "default_max_image_dimension")]
    pub max_image_dimension: u32,

    /// Timeout for a single generation call in seconds
    #[serde(default = "default_generation_timeout_secs")]
    pub generation_timeout_secs: u64,

    /// Timeout for embedding model download in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub model_download_timeout_secs: u64,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            llm_model: DEFAULT_LLM_MODEL.to_string(),
            default_k: DEFAULT_K,
            max_image_dimension: DEFAULT_MAX_IMAGE_DIMENSION,
            generation_timeout_secs: DEFAULT_GENERATION_TIMEOUT_SECS,
            model_download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            base_path: PathBuf::new(),
        }
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_llm_model() -> String {
    DEFAULT_LLM_MODEL.to_string()
}

fn default_k() -> usize {
    DEFAULT_K
}

fn default_max_image_dimension() -> u32 {
    DEFAULT_MAX_IMAGE_DIMENSION
}

fn default_generation_timeout_secs() -> u64 {
    DEFAULT_GENERATION_TIMEOUT_SECS
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

impl Config {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be greater than 0".into()));
        }

        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::Invalid(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }

        if self.default_k == 0 {
            return Err(ConfigError::Invalid("default_k must be greater than 0".into()));
        }

        if self.max_image_dimension == 0 {
            return Err(ConfigError::Invalid(
                "max_image_dimension must be greater than 0".into(),
            ));
        }

        if self.generation_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "generation_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.model_download_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "model_download_timeout_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Load config.yaml from `base_path`, creating it with defaults when
    /// absent. Validation happens once here; components receive an already
    /// validated config.
    pub fn load_with(base_path: &Path) -> Result<Self, ConfigError> {
        let config_path = base_path.join("config.yaml");

        if !config_path.exists() {
            std::fs::create_dir_all(base_path)?;
            let mut config = Self::default();
            config.base_path = base_path.to_path_buf();
            config.save()?;
            return Ok(config);
        }

        let config_str = std::fs::read_to_string(&config_path)?;
        let mut config: Self = serde_yml::from_str(&config_str)?;
        config.base_path = base_path.to_path_buf();

        config.validate()?;

        // resave in case new fields were added since the file was written
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let config_str = serde_yml::to_string(&self)?;
        std::fs::write(self.base_path.join("config.yaml"), config_str)?;
        Ok(())
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

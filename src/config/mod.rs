use crate::compaction::ModelFamily;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a [`ContextManager`](crate::compaction::ContextManager).
///
/// Set once at construction; build a new manager to change it.
///
/// # Example
///
/// ```
/// use workset::config::ContextManagerConfig;
///
/// let config = ContextManagerConfig::default()
///     .with_max_context_tokens(128_000)
///     .with_target_context_tokens(100_000)
///     .with_segment_size(6);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextManagerConfig {
    /// Hard ceiling on estimated tokens (default: `230_000`)
    pub max_context_tokens: usize,
    /// Soft target; compaction starts above it (default: `225_000`)
    pub target_context_tokens: usize,
    /// Messages per segment (default: 8)
    pub segment_size: usize,
    /// Model used for scoring and compaction calls. `None` lets the runtime pick.
    pub compaction_model: Option<String>,
    /// Where snapshots are written. `None` disables persistence.
    pub snapshot_dir: Option<PathBuf>,
    /// Estimator calibration. Derived from `compaction_model` when unset.
    pub model_family: Option<ModelFamily>,
    /// Reserved for the upcoming model response (default: `5_000`)
    pub safety_margin_tokens: usize,
    /// Newest messages always kept raw (default: 5)
    pub min_recent_messages: usize,
    /// Above the ceiling, reclaim down to this share of it (default: 0.70)
    pub emergency_floor_ratio: f64,
    /// Deadline for each generation call in seconds (default: 30)
    pub generation_timeout_secs: u64,
}

impl Default for ContextManagerConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: 230_000,
            target_context_tokens: 225_000,
            segment_size: 8,
            compaction_model: None,
            snapshot_dir: None,
            model_family: None,
            safety_margin_tokens: 5_000,
            min_recent_messages: 5,
            emergency_floor_ratio: 0.70,
            generation_timeout_secs: 30,
        }
    }
}

impl ContextManagerConfig {
    #[must_use]
    pub fn with_max_context_tokens(mut self, tokens: usize) -> Self {
        self.max_context_tokens = tokens;
        self
    }

    #[must_use]
    pub fn with_target_context_tokens(mut self, tokens: usize) -> Self {
        self.target_context_tokens = tokens;
        self
    }

    #[must_use]
    pub fn with_segment_size(mut self, size: usize) -> Self {
        self.segment_size = size;
        self
    }

    #[must_use]
    pub fn with_compaction_model(mut self, model: impl Into<String>) -> Self {
        self.compaction_model = Some(model.into());
        self
    }

    #[must_use]
    pub fn with_snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.snapshot_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_model_family(mut self, family: ModelFamily) -> Self {
        self.model_family = Some(family);
        self
    }

    #[must_use]
    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Estimator family in effect.
    #[must_use]
    pub fn family(&self) -> ModelFamily {
        self.model_family.unwrap_or_else(|| {
            self.compaction_model
                .as_deref()
                .map(ModelFamily::from_model_id)
                .unwrap_or_default()
        })
    }

    #[must_use]
    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    /// Token total to reclaim down to when the ceiling is exceeded.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn emergency_floor_tokens(&self) -> usize {
        (self.max_context_tokens as f64 * self.emergency_floor_ratio) as usize
    }

    pub fn validate(&self) -> Result<()> {
        if self.target_context_tokens >= self.max_context_tokens {
            return Err(Error::Config(format!(
                "target_context_tokens ({}) must be below max_context_tokens ({})",
                self.target_context_tokens, self.max_context_tokens
            )));
        }
        if self.segment_size == 0 {
            return Err(Error::Config("segment_size must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.emergency_floor_ratio) {
            return Err(Error::Config(format!(
                "emergency_floor_ratio ({}) must be within [0, 1]",
                self.emergency_floor_ratio
            )));
        }
        Ok(())
    }
}

/// File configuration for the `workset` binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    pub context: ContextManagerConfig,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .map(|d| d.join("workset"))
            .unwrap_or_else(|| PathBuf::from(".workset"));

        Self {
            data_dir,
            context: ContextManagerConfig::default(),
        }
    }
}

impl Config {
    /// Directory for session snapshots.
    #[must_use]
    pub fn snapshot_dir(&self) -> PathBuf {
        self.context
            .snapshot_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("snapshots"))
    }

    /// Default config file location.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("workset").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from(".workset/config.toml"))
    }

    /// Load from `path`, or the default location. A missing file yields defaults.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = path.unwrap_or_else(Self::default_path);

        let config: Config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        config.context.validate()?;
        Ok(config)
    }
}

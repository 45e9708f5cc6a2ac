//! Marquee configuration
//!
//! Loaded from a TOML file. Every section has defaults, so an empty file is
//! a valid (in-memory friendly) configuration; the GitHub adapter
//! additionally needs `store.owner` and `store.repo`.

use std::path::Path;
use std::time::Duration;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::domain::{AssetLayout, AssetName, DeadlineParser};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MarqueeConfig {
    pub store: StoreSettings,
    pub assets: AssetSettings,
    pub reaper: ReaperSettings,
    pub deadline: DeadlineSettings,
    pub sync: SyncSettings,
}

/// Remote store (GitHub repository branch)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub api_base: String,
    /// Environment variable holding the API token
    pub token_env: String,
    pub request_timeout_secs: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            owner: String::new(),
            repo: String::new(),
            branch: "main".to_string(),
            api_base: "https://api.github.com".to_string(),
            token_env: "GITHUB_TOKEN".to_string(),
            request_timeout_secs: 15,
        }
    }
}

impl StoreSettings {
    /// Checks what only the GitHub adapter needs.
    pub fn validate_github(&self) -> Result<(), ConfigError> {
        if self.owner.trim().is_empty() || self.repo.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "store.owner and store.repo are required".to_string(),
            ));
        }
        if self.branch.trim().is_empty() {
            return Err(ConfigError::Invalid("store.branch is empty".to_string()));
        }
        Ok(())
    }
}

/// Asset paths and history depth
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetSettings {
    pub prefix: String,
    pub extension: String,
    pub default_asset: String,
    /// Historical slots kept besides the live one
    pub max_versions: u32,
    pub fallback_path: String,
    pub expiry_path: String,
    /// Skip rotation and publish when the upload equals the live content
    pub skip_unchanged: bool,
    /// Also keep a `<asset>-<timestamp>` copy of every upload
    pub timestamped_copies: bool,
    /// HTML page listing every timestamped copy; requires `timestamped_copies`
    pub gallery_path: Option<String>,
    /// Prepended to the copy's store path in the gallery `<img src>`
    pub gallery_image_base: String,
}

impl Default for AssetSettings {
    fn default() -> Self {
        Self {
            prefix: "uploads/".to_string(),
            extension: ".png".to_string(),
            default_asset: "poster".to_string(),
            max_versions: 3,
            fallback_path: "uploads/fallback.png".to_string(),
            expiry_path: "uploads/expiry.json".to_string(),
            skip_unchanged: true,
            timestamped_copies: false,
            gallery_path: None,
            gallery_image_base: String::new(),
        }
    }
}

impl AssetSettings {
    pub fn layout(&self) -> AssetLayout {
        AssetLayout::new(&self.prefix, &self.extension)
    }

    /// Store paths no asset may own: fallback, expiry document, gallery.
    pub fn reserved_paths(&self) -> Vec<String> {
        let mut paths = vec![self.fallback_path.clone(), self.expiry_path.clone()];
        paths.extend(self.gallery_path.clone());
        paths
    }

    pub fn default_asset(&self) -> Result<AssetName, ConfigError> {
        AssetName::parse(&self.default_asset)
            .map_err(|e| ConfigError::Invalid(format!("assets.default_asset: {e}")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaperSettings {
    pub period_secs: u64,
}

impl Default for ReaperSettings {
    fn default() -> Self {
        Self { period_secs: 60 }
    }
}

impl ReaperSettings {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadlineSettings {
    /// Reference zone for "end of day", in minutes east of UTC
    pub utc_offset_minutes: i32,
}

impl DeadlineSettings {
    pub fn parser(&self) -> Result<DeadlineParser, ConfigError> {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .map(DeadlineParser::new)
            .ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "deadline.utc_offset_minutes out of range: {}",
                    self.utc_offset_minutes
                ))
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Resolve+write attempts per publish (first try plus retries)
    pub max_attempts: u32,
    pub call_timeout_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            call_timeout_secs: 20,
        }
    }
}

impl MarqueeConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Store-independent checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync.max_attempts == 0 {
            return Err(ConfigError::Invalid("sync.max_attempts must be >= 1".into()));
        }
        if self.sync.call_timeout_secs == 0 {
            return Err(ConfigError::Invalid("sync.call_timeout_secs must be >= 1".into()));
        }
        if self.reaper.period_secs == 0 {
            return Err(ConfigError::Invalid("reaper.period_secs must be >= 1".into()));
        }
        self.deadline.parser()?;

        let assets = &self.assets;
        let asset = assets.default_asset()?;
        if assets.fallback_path.trim().is_empty() || assets.expiry_path.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "assets.fallback_path and assets.expiry_path are required".into(),
            ));
        }
        if assets.fallback_path == assets.expiry_path {
            return Err(ConfigError::Invalid(
                "assets.fallback_path and assets.expiry_path must differ".into(),
            ));
        }

        if let Some(gallery) = &assets.gallery_path {
            if !assets.timestamped_copies {
                return Err(ConfigError::Invalid(
                    "assets.gallery_path requires assets.timestamped_copies".into(),
                ));
            }
            if gallery.trim().is_empty()
                || *gallery == assets.fallback_path
                || *gallery == assets.expiry_path
            {
                return Err(ConfigError::Invalid(
                    "assets.gallery_path must be a distinct non-empty path".into(),
                ));
            }
        }
        if asset.is_derived() {
            return Err(ConfigError::Invalid(format!(
                "assets.default_asset {asset} looks like a slot or timestamped copy"
            )));
        }

        let layout = assets.layout();
        if let Some(path) = assets
            .reserved_paths()
            .into_iter()
            .find(|path| layout.claims(&asset, path))
        {
            return Err(ConfigError::Invalid(format!(
                "{path} collides with a path of asset {asset}"
            )));
        }
        Ok(())
    }
}

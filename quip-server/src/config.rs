use quip_core::{QuipError, Result, ServiceLimits};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_PREFIX: &str = "QUIP";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub limits: LimitsConfig,
    pub reaper: ReaperConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Prefix for link fields in responses. Empty means root-relative links.
    #[serde(default)]
    pub public_base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl StorageConfig {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("quip.db")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub max_upload_bytes: u64,
    pub max_paste_bytes: u64,
}

impl From<&LimitsConfig> for ServiceLimits {
    fn from(limits: &LimitsConfig) -> Self {
        ServiceLimits {
            max_upload_bytes: limits.max_upload_bytes,
            max_paste_bytes: limits.max_paste_bytes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperConfig {
    pub interval_secs: u64,
    pub batch_size: usize,
    /// Unreferenced blobs younger than this are left alone by the orphan sweep.
    pub orphan_grace_secs: u64,
}

impl ReaperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn orphan_grace(&self) -> Duration {
        Duration::from_secs(self.orphan_grace_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        let limits = ServiceLimits::default();
        Self {
            server: ServerConfig {
                bind_addr: "0.0.0.0:8080".to_string(),
                public_base_url: String::new(),
            },
            storage: StorageConfig {
                data_dir: PathBuf::from("./data"),
            },
            limits: LimitsConfig {
                max_upload_bytes: limits.max_upload_bytes,
                max_paste_bytes: limits.max_paste_bytes,
            },
            reaper: ReaperConfig {
                interval_secs: 60,
                batch_size: quip_core::reaper::DEFAULT_BATCH_SIZE,
                orphan_grace_secs: 3600,
            },
        }
    }
}

impl Config {
    /// Load defaults, then `path` if it exists, then `QUIP_*` environment overrides.
    pub fn load(path: &str) -> Result<Self> {
        let defaults = Config::default();
        let settings = ::config::Config::builder()
            .set_default("server.bind_addr", defaults.server.bind_addr)
            .and_then(|b| b.set_default("server.public_base_url", defaults.server.public_base_url))
            .and_then(|b| {
                b.set_default(
                    "storage.data_dir",
                    defaults.storage.data_dir.to_string_lossy().into_owned(),
                )
            })
            .and_then(|b| {
                b.set_default("limits.max_upload_bytes", defaults.limits.max_upload_bytes)
            })
            .and_then(|b| b.set_default("limits.max_paste_bytes", defaults.limits.max_paste_bytes))
            .and_then(|b| b.set_default("reaper.interval_secs", defaults.reaper.interval_secs))
            .and_then(|b| b.set_default("reaper.batch_size", defaults.reaper.batch_size as u64))
            .and_then(|b| {
                b.set_default("reaper.orphan_grace_secs", defaults.reaper.orphan_grace_secs)
            })
            .map_err(|e| QuipError::Config(e.to_string()))?
            .add_source(::config::File::with_name(path).required(false))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(|e| QuipError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| QuipError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.limits.max_upload_bytes == 0 {
            return Err(QuipError::Config(
                "limits.max_upload_bytes must be positive".to_string(),
            ));
        }
        if self.limits.max_paste_bytes == 0 {
            return Err(QuipError::Config(
                "limits.max_paste_bytes must be positive".to_string(),
            ));
        }
        if self.reaper.batch_size == 0 {
            return Err(QuipError::Config("reaper.batch_size must be positive".to_string()));
        }
        Ok(())
    }

    /// Base for link fields, without a trailing slash.
    pub fn base_url(&self) -> String {
        self.server.public_base_url.trim_end_matches('/').to_string()
    }
}

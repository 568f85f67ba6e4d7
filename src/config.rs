use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub geocoding: GeocodingConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Police-log message-thread feed.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    #[serde(default = "default_source_url")]
    pub base_url: String,
    /// How far back the recent pass looks, in hours.
    #[serde(default = "default_window_hours")]
    pub window_hours: i64,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_source_url(),
            window_hours: default_window_hours(),
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            timeout_secs: default_source_timeout(),
        }
    }
}

fn default_source_url() -> String {
    "https://politiloggen-vis-frontend.bks-prod.politiet.no/api/messagethread".to_string()
}
fn default_window_hours() -> i64 {
    6
}
fn default_page_size() -> usize {
    50
}
fn default_max_pages() -> usize {
    20
}
fn default_source_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_openai_url")]
    pub base_url: String,
    /// Width of each concurrent extraction chunk.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_extraction_timeout")]
    pub timeout_secs: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: default_openai_url(),
            batch_size: default_batch_size(),
            timeout_secs: default_extraction_timeout(),
        }
    }
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_openai_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_batch_size() -> usize {
    12
}
fn default_extraction_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeocodingConfig {
    #[serde(default = "default_places_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_geocoding_timeout")]
    pub timeout_secs: u64,
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            endpoint: default_places_endpoint(),
            language: default_language(),
            timeout_secs: default_geocoding_timeout(),
        }
    }
}

fn default_places_endpoint() -> String {
    "https://maps.googleapis.com/maps/api/place/findplacefromtext/json".to_string()
}
fn default_language() -> String {
    "no".to_string()
}
fn default_geocoding_timeout() -> u64 {
    15
}

#[derive(Debug, Deserialize, Clone)]
pub struct LifecycleConfig {
    /// Active incidents with no activity for this long are disabled.
    #[serde(default = "default_staleness_hours")]
    pub staleness_hours: i64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            staleness_hours: default_staleness_hours(),
        }
    }
}

fn default_staleness_hours() -> i64 {
    24 * 7
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

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

/// Upper bound for hour-valued settings (100 years).
pub const MAX_HOURS: i64 = 24 * 365 * 100;

pub fn validate(config: &Config) -> Result<()> {
    // Validate source
    if config.source.window_hours <= 0 {
        anyhow::bail!("source.window_hours must be > 0");
    }
    if config.source.window_hours > MAX_HOURS {
        anyhow::bail!("source.window_hours must be <= {}", MAX_HOURS);
    }
    if config.source.page_size == 0 {
        anyhow::bail!("source.page_size must be > 0");
    }
    if config.source.max_pages == 0 {
        anyhow::bail!("source.max_pages must be > 0");
    }

    // Validate extraction
    if config.extraction.batch_size == 0 {
        anyhow::bail!("extraction.batch_size must be > 0");
    }
    if config.extraction.model.trim().is_empty() {
        anyhow::bail!("extraction.model must not be empty");
    }

    // Validate lifecycle
    if config.lifecycle.staleness_hours <= 0 {
        anyhow::bail!("lifecycle.staleness_hours must be > 0");
    }
    if config.lifecycle.staleness_hours > MAX_HOURS {
        anyhow::bail!("lifecycle.staleness_hours must be <= {}", MAX_HOURS);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg = parse("[db]\npath = \"./data/blip.sqlite\"\n").unwrap();
        assert_eq!(cfg.source.window_hours, 6);
        assert_eq!(cfg.extraction.batch_size, 12);
        assert_eq!(cfg.extraction.model, "gpt-4o-mini");
        assert_eq!(cfg.lifecycle.staleness_hours, 168);
        assert_eq!(cfg.geocoding.language, "no");
        assert_eq!(cfg.server.bind, "127.0.0.1:7340");
    }

    #[test]
    fn test_overrides() {
        let cfg = parse(
            r#"
[db]
path = "x.sqlite"

[source]
window_hours = 12

[extraction]
batch_size = 4

[lifecycle]
staleness_hours = 48
"#,
        )
        .unwrap();
        assert_eq!(cfg.source.window_hours, 12);
        assert_eq!(cfg.extraction.batch_size, 4);
        assert_eq!(cfg.lifecycle.staleness_hours, 48);
    }

    #[test]
    fn test_rejects_zero_batch_size() {
        let err = parse("[db]\npath = \"x\"\n[extraction]\nbatch_size = 0\n").unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn test_rejects_non_positive_staleness() {
        let err = parse("[db]\npath = \"x\"\n[lifecycle]\nstaleness_hours = 0\n").unwrap_err();
        assert!(err.to_string().contains("staleness_hours"));
    }

    #[test]
    fn test_rejects_hours_beyond_range() {
        let err = parse("[db]\npath = \"x\"\n[source]\nwindow_hours = 9000000000000000\n")
            .unwrap_err();
        assert!(err.to_string().contains("source.window_hours must be <="));

        let err = parse("[db]\npath = \"x\"\n[lifecycle]\nstaleness_hours = 876001\n")
            .unwrap_err();
        assert!(err.to_string().contains("lifecycle.staleness_hours must be <="));

        let cfg = parse("[db]\npath = \"x\"\n[lifecycle]\nstaleness_hours = 876000\n").unwrap();
        assert_eq!(cfg.lifecycle.staleness_hours, MAX_HOURS);
    }

    #[test]
    fn test_missing_db_section_fails() {
        assert!(toml::from_str::<Config>("[server]\nbind = \"0.0.0.0:1\"\n").is_err());
    }
}

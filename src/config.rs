// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Archive paths, the external compiler, logging, and the list of patch jobs.
// Missing sections fall back to defaults; a missing file means "all defaults".

use anyhow::{Context, Result};
use serde::Deserialize;
use shader_archive::ShaderStage;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub archive: ArchiveConfig,
    pub compiler: CompilerConfig,
    pub logging: LoggingConfig,
    #[serde(rename = "patch")]
    pub patches: Vec<PatchJob>,
}

/// Input and output archive locations
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub input: PathBuf,
    /// The patched archive is only written when this is set.
    pub output: Option<PathBuf>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from("shaders.bfsha"),
            output: None,
        }
    }
}

/// External shader compiler settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    pub program: PathBuf,
    pub timeout_secs: Option<u64>,
    pub scratch_dir: Option<PathBuf>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("uam"),
            timeout_secs: None,
            scratch_dir: None,
        }
    }
}

impl CompilerConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Logging settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub log_to_file: bool,
    pub log_file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_to_file: false,
            log_file: "shader_archive.log".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn level_filter(&self) -> log::LevelFilter {
        self.level.parse().unwrap_or_else(|_| {
            log::warn!("Unknown log level '{}', defaulting to info", self.level);
            log::LevelFilter::Info
        })
    }
}

/// One recompile-and-replace job
#[derive(Debug, Deserialize)]
pub struct PatchJob {
    pub model: String,
    /// Option name -> choice name used to pick the program.
    #[serde(default)]
    pub options: HashMap<String, String>,
    pub stage: ShaderStage,
    pub source: PathBuf,
    #[serde(default)]
    pub macros: HashMap<String, String>,
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_patch_jobs() {
        let config: Config = toml::from_str(
            r#"
            [archive]
            input = "in.bfsha"
            output = "out.bfsha"

            [compiler]
            program = "/opt/uam"
            timeout_secs = 30

            [[patch]]
            model = "water"
            options = { QUALITY = "HIGH" }
            stage = "fragment"
            source = "water.frag"
            macros = { WAVES = "4" }
            "#,
        )
        .unwrap();
        assert_eq!(config.archive.output, Some(PathBuf::from("out.bfsha")));
        assert_eq!(config.compiler.timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.patches.len(), 1);
        let job = &config.patches[0];
        assert_eq!(job.stage, ShaderStage::Fragment);
        assert_eq!(job.options["QUALITY"], "HIGH");
        assert_eq!(job.macros["WAVES"], "4");
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.patches.is_empty());
        assert_eq!(config.compiler.program, PathBuf::from("uam"));
        assert_eq!(config.logging.level_filter(), log::LevelFilter::Info);
    }
}

//! Application settings and file filtering rules.
//!
//! Settings are read from TOML. Every section is optional and falls back to
//! its defaults, so an empty file is a valid configuration:
//!
//! ```toml
//! log_level = "info"
//!
//! [journal]
//! path = "operations.log"
//!
//! [classifier]
//! mode = "model"
//! model_path = "model.json"
//!
//! [watch]
//! retry_attempts = 5
//! retry_delay_ms = 200
//!
//! [training]
//! test_fraction = 0.2
//! seed = 42
//! trees = 25
//! max_depth = 8
//!
//! [encryption]
//! key_path = "encryption.key"
//!
//! [categories]
//! Documents = ["pdf", "odt"]
//! Ebooks = ["epub", "mobi"]
//!
//! [filters]
//! enable_hidden_files = false
//!
//! [filters.exclude]
//! filenames = ["desktop.ini"]
//! patterns = ["*.part"]
//! extensions = ["tmp", "crdownload"]
//! regex = ['^~\$']
//!
//! [filters.include]
//! patterns = [".keep-me"]
//! ```

use crate::file_category::RuleClassifier;
use crate::file_organizer::RetryPolicy;
use crate::forest::ForestParams;
use crate::training::TrainConfig;
use glob::Pattern;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Name of the per-directory configuration file.
pub const LOCAL_CONFIG_FILE: &str = ".tidyfoldrc.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read configuration {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration {}: {reason}", path.display())]
    Invalid { path: PathBuf, reason: String },

    #[error("invalid glob pattern '{0}': expected *.ext or dir/**")]
    InvalidGlob(String),

    #[error("invalid regex pattern '{pattern}': {reason}")]
    InvalidRegex { pattern: String, reason: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
    pub journal: JournalSettings,
    pub classifier: ClassifierSettings,
    pub watch: WatchSettings,
    pub training: TrainingSettings,
    pub encryption: EncryptionSettings,
    /// Extension overrides keyed by category label.
    pub categories: HashMap<String, Vec<String>>,
    pub filters: FilterRules,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            journal: JournalSettings::default(),
            classifier: ClassifierSettings::default(),
            watch: WatchSettings::default(),
            training: TrainingSettings::default(),
            encryption: EncryptionSettings::default(),
            categories: HashMap::new(),
            filters: FilterRules::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalSettings {
    pub path: PathBuf,
}

impl Default for JournalSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("operations.log"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierMode {
    #[default]
    Rules,
    Model,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierSettings {
    pub mode: ClassifierMode,
    pub model_path: PathBuf,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            mode: ClassifierMode::Rules,
            model_path: PathBuf::from("model.json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchSettings {
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            retry_attempts: 5,
            retry_delay_ms: 200,
        }
    }
}

impl WatchSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry_attempts.max(1),
            delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    pub test_fraction: f64,
    pub seed: u64,
    pub trees: usize,
    pub max_depth: usize,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        let forest = ForestParams::default();
        Self {
            test_fraction: 0.2,
            seed: forest.seed,
            trees: forest.trees,
            max_depth: forest.max_depth,
        }
    }
}

impl TrainingSettings {
    pub fn train_config(&self) -> TrainConfig {
        TrainConfig {
            test_fraction: self.test_fraction,
            forest: ForestParams {
                trees: self.trees,
                max_depth: self.max_depth,
                seed: self.seed,
                ..ForestParams::default()
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionSettings {
    /// Base64 key file, generated by the first `encrypt`.
    pub key_path: PathBuf,
}

impl Default for EncryptionSettings {
    fn default() -> Self {
        Self {
            key_path: PathBuf::from("encryption.key"),
        }
    }
}

/// Which files the organizer is allowed to touch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterRules {
    /// Hidden (dot) files are skipped unless this is set.
    #[serde(default)]
    pub enable_hidden_files: bool,
    #[serde(default)]
    pub exclude: ExcludeRules,
    /// Whitelist that wins over every exclusion.
    #[serde(default)]
    pub include: IncludeRules,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExcludeRules {
    #[serde(default)]
    pub filenames: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub regex: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IncludeRules {
    #[serde(default)]
    pub patterns: Vec<String>,
}

impl Settings {
    /// Loads settings, trying in order: the explicit `config_path`,
    /// `./.tidyfoldrc.toml`, `~/.config/tidyfold/config.toml`, then defaults.
    ///
    /// Only an explicitly named file is required to exist.
    pub fn load(config_path: Option<&Path>) -> ConfigResult<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.is_file() {
            return Self::load_from_file(&local);
        }

        if let Ok(home) = std::env::var("HOME") {
            let user = PathBuf::from(home)
                .join(".config")
                .join("tidyfold")
                .join("config.toml");
            if user.is_file() {
                return Self::load_from_file(&user);
            }
        }

        tracing::debug!("no configuration file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::Io {
                    path: path.to_path_buf(),
                    source: e,
                }
            }
        })?;

        let settings = toml::from_str(&content).map_err(|e| ConfigError::Invalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(settings)
    }

    pub fn compile_filters(&self) -> ConfigResult<CompiledFilters> {
        CompiledFilters::new(&self.filters)
    }

    /// Builds the rule table with the `[categories]` overrides applied.
    pub fn rule_classifier(&self) -> RuleClassifier {
        RuleClassifier::with_overrides(&self.categories)
    }
}

fn compile_globs(patterns: &[String]) -> ConfigResult<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| Pattern::new(p).map_err(|_| ConfigError::InvalidGlob(p.clone())))
        .collect()
}

/// Filter rules with every pattern pre-compiled.
#[derive(Debug, Clone, Default)]
pub struct CompiledFilters {
    enable_hidden_files: bool,
    exclude_filenames: HashSet<String>,
    exclude_extensions: HashSet<String>,
    exclude_patterns: Vec<Pattern>,
    exclude_regexes: Vec<Regex>,
    include_patterns: Vec<Pattern>,
}

impl CompiledFilters {
    pub fn new(rules: &FilterRules) -> ConfigResult<Self> {
        let exclude_regexes = rules
            .exclude
            .regex
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| ConfigError::InvalidRegex {
                    pattern: p.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<ConfigResult<Vec<_>>>()?;

        Ok(Self {
            enable_hidden_files: rules.enable_hidden_files,
            exclude_filenames: rules.exclude.filenames.iter().cloned().collect(),
            exclude_extensions: rules
                .exclude
                .extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_lowercase())
                .collect(),
            exclude_patterns: compile_globs(&rules.exclude.patterns)?,
            exclude_regexes,
            include_patterns: compile_globs(&rules.include.patterns)?,
        })
    }

    /// Decides whether `path` (relative to the scanned directory) is eligible.
    ///
    /// An include pattern match always wins. Otherwise the file is rejected
    /// if it is hidden (and hidden files are disabled) or matches any
    /// exclusion by exact name, extension, glob or regex.
    pub fn should_include(&self, path: &Path) -> bool {
        if self.include_patterns.iter().any(|p| p.matches_path(path)) {
            return true;
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();

        if name.starts_with('.') && !self.enable_hidden_files {
            return false;
        }
        if self.exclude_filenames.contains(name.as_ref()) {
            return false;
        }
        if let Some(ext) = path.extension()
            && self
                .exclude_extensions
                .contains(&ext.to_string_lossy().to_lowercase())
        {
            return false;
        }

        !self.exclude_patterns.iter().any(|p| p.matches_path(path))
            && !self.exclude_regexes.iter().any(|r| r.is_match(&name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn filters(configure: impl FnOnce(&mut FilterRules)) -> CompiledFilters {
        let mut rules = FilterRules {
            enable_hidden_files: true,
            ..Default::default()
        };
        configure(&mut rules);
        CompiledFilters::new(&rules).unwrap()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.log_level, "info");
        assert_eq!(settings.journal.path, PathBuf::from("operations.log"));
        assert_eq!(settings.classifier.mode, ClassifierMode::Rules);
        assert_eq!(settings.watch.retry_attempts, 5);
        assert_eq!(settings.training.test_fraction, 0.2);
        assert_eq!(settings.training.seed, 42);
        assert_eq!(settings.encryption.key_path, PathBuf::from("encryption.key"));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
log_level = "debug"

[classifier]
mode = "model"

[watch]
retry_delay_ms = 50

[categories]
Ebooks = ["epub"]

[encryption]
key_path = "keys/tidyfold.key"

[filters.exclude]
extensions = [".tmp"]
"#,
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.classifier.mode, ClassifierMode::Model);
        assert_eq!(settings.classifier.model_path, PathBuf::from("model.json"));
        assert_eq!(settings.watch.retry_attempts, 5);
        assert_eq!(
            settings.watch.retry_policy().delay,
            Duration::from_millis(50)
        );
        assert_eq!(settings.categories["Ebooks"], vec!["epub".to_string()]);
        assert_eq!(settings.encryption.key_path, PathBuf::from("keys/tidyfold.key"));

        let compiled = settings.compile_filters().unwrap();
        assert!(!compiled.should_include(Path::new("partial.TMP")));
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let result = Settings::load(Some(&temp_dir.path().join("nope.toml")));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("bad.toml");
        fs::write(&path, "log_level = [").unwrap();
        assert!(matches!(
            Settings::load(Some(&path)),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_training_settings_flow_into_config() {
        let settings = TrainingSettings {
            test_fraction: 0.3,
            seed: 7,
            trees: 3,
            max_depth: 4,
        };
        let config = settings.train_config();
        assert_eq!(config.test_fraction, 0.3);
        assert_eq!(config.forest.seed, 7);
        assert_eq!(config.forest.trees, 3);
        assert_eq!(config.forest.max_depth, 4);
    }

    #[test]
    fn test_hidden_files() {
        let strict = CompiledFilters::new(&FilterRules::default()).unwrap();
        assert!(!strict.should_include(Path::new(".DS_Store")));
        assert!(strict.should_include(Path::new("notes.txt")));

        let relaxed = filters(|_| {});
        assert!(relaxed.should_include(Path::new(".DS_Store")));
    }

    #[test]
    fn test_exclusions() {
        let compiled = filters(|rules| {
            rules.exclude.filenames = vec!["desktop.ini".to_string()];
            rules.exclude.extensions = vec!["bak".to_string()];
            rules.exclude.patterns = vec!["*.part".to_string()];
            rules.exclude.regex = vec![r"^~\$".to_string()];
        });

        assert!(!compiled.should_include(Path::new("desktop.ini")));
        assert!(!compiled.should_include(Path::new("old.BAK")));
        assert!(!compiled.should_include(Path::new("movie.mkv.part")));
        assert!(!compiled.should_include(Path::new("~$report.docx")));
        assert!(compiled.should_include(Path::new("report.docx")));
    }

    #[test]
    fn test_glob_respects_directory_boundaries() {
        let compiled = filters(|rules| {
            rules.exclude.patterns = vec!["**/logs/**".to_string()];
        });

        assert!(!compiled.should_include(Path::new("logs/app.log")));
        assert!(!compiled.should_include(Path::new("srv/logs/app.log")));
        assert!(compiled.should_include(Path::new("my_logs/app.log")));
    }

    #[test]
    fn test_include_wins_over_exclude() {
        let rules = FilterRules {
            enable_hidden_files: false,
            exclude: ExcludeRules {
                extensions: vec!["tmp".to_string()],
                ..Default::default()
            },
            include: IncludeRules {
                patterns: vec![".keep".to_string(), "important.tmp".to_string()],
            },
        };
        let compiled = CompiledFilters::new(&rules).unwrap();

        assert!(compiled.should_include(Path::new(".keep")));
        assert!(compiled.should_include(Path::new("important.tmp")));
        assert!(!compiled.should_include(Path::new("other.tmp")));
        assert!(!compiled.should_include(Path::new(".other")));
    }

    #[test]
    fn test_bad_patterns_rejected() {
        let mut rules = FilterRules::default();
        rules.exclude.regex = vec!["[invalid(".to_string()];
        assert!(matches!(
            CompiledFilters::new(&rules),
            Err(ConfigError::InvalidRegex { .. })
        ));

        let mut rules = FilterRules::default();
        rules.exclude.patterns = vec!["[unclosed".to_string()];
        assert!(matches!(
            CompiledFilters::new(&rules),
            Err(ConfigError::InvalidGlob(_))
        ));
    }
}

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_NAME: &str = "jobscout";

/// Upper bound for any configured pause.
const MAX_PAUSE_SECS: f64 = 3600.0;

pub const DEFAULT_PROFILE: &str = "Junior/graduate developer with a background in data. \
Strong in Python and SQL, familiar with ETL/ELT tooling (dbt, Snowflake), cloud platforms \
and some Go. Looking for junior or mid-level backend, data engineering or data science \
roles in Norway.";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub search_queries: Vec<String>,
    pub reject_title_terms: Vec<String>,
    pub require_description_terms: Vec<String>,
    pub classifier: ClassifierConfig,
    pub delay_min_secs: f64,
    pub delay_max_secs: f64,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub paths: Paths,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClassifierConfig {
    pub model: String,
    pub batch_size: usize,
    pub max_description_chars: usize,
    pub batch_pause_secs: f64,
    /// Candidate profile the model judges postings against.
    pub profile: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Paths {
    pub database: Option<PathBuf>,
    pub tracker: Option<PathBuf>,
    pub digest: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            search_queries: strings(&[
                "Data Science",
                "Data Engineer",
                "Backend Engineer",
                "backend",
                "software engineer",
                "Utvikler",
                "Systemutvikler",
                "Dataanalytiker",
                "IT-konsulent",
                "Python SQL",
                "DBT Snowflake",
            ]),
            reject_title_terms: strings(&[
                "senior", "lead", "principal", "manager", "leder", "sjef", "head of", "architect",
                ".net", "c#",
            ]),
            require_description_terms: strings(&[
                "python",
                "go",
                "sql",
                "etl",
                "elt",
                "data",
                "machine learning",
                "ai",
                "cloud",
            ]),
            classifier: ClassifierConfig::default(),
            delay_min_secs: 0.5,
            delay_max_secs: 1.5,
            http_timeout_secs: 30,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/124.0 Safari/537.36"
                .to_string(),
            paths: Paths::default(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model: "gemini-flash".to_string(),
            batch_size: 10,
            max_description_chars: 2000,
            batch_pause_secs: 2.0,
            profile: DEFAULT_PROFILE.to_string(),
        }
    }
}

impl Config {
    /// Loads `path`, or the per-user config file when no path is given.
    /// A missing default file yields the built-in defaults; a missing explicit
    /// file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(p) => Self::from_file(p)?,
            None => match Self::default_config_path() {
                Some(p) if p.exists() => Self::from_file(&p)?,
                _ => Self::default(),
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        // An empty file deserializes to unit, not to an empty mapping.
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.classifier.batch_size == 0 {
            return Err(anyhow!("classifier.batch_size must be at least 1"));
        }
        if self.classifier.max_description_chars == 0 {
            return Err(anyhow!("classifier.max_description_chars must be at least 1"));
        }
        check_secs("delay_min_secs", self.delay_min_secs)?;
        check_secs("delay_max_secs", self.delay_max_secs)?;
        check_secs("classifier.batch_pause_secs", self.classifier.batch_pause_secs)?;
        if self.delay_max_secs < self.delay_min_secs {
            return Err(anyhow!(
                "delay range {}..{} is invalid",
                self.delay_min_secs,
                self.delay_max_secs
            ));
        }
        Ok(())
    }

    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    fn data_dir() -> PathBuf {
        // Use XDG data directory or fallback to the working directory
        directories::ProjectDirs::from("", "", APP_NAME)
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn database_path(&self) -> PathBuf {
        self.paths
            .database
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("jobs.db"))
    }

    pub fn tracker_path(&self) -> PathBuf {
        self.paths
            .tracker
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("job_application_tracker.xlsx"))
    }

    pub fn digest_path(&self) -> PathBuf {
        self.paths
            .digest
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("new_jobs.txt"))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn check_secs(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || !(0.0..=MAX_PAUSE_SECS).contains(&value) {
        return Err(anyhow!(
            "{name} must be between 0 and {MAX_PAUSE_SECS} seconds, got {value}"
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.classifier.batch_size, 10);
        assert_eq!(config.classifier.max_description_chars, 2000);
        assert!(config.reject_title_terms.contains(&"senior".to_string()));
    }

    #[test]
    fn test_partial_yaml_keeps_other_defaults() {
        let config = Config::from_yaml(
            "search_queries: [\"Rust\"]\nclassifier:\n  batch_size: 5\npaths:\n  database: /tmp/x.db\n",
        )
        .unwrap();
        assert_eq!(config.search_queries, vec!["Rust".to_string()]);
        assert_eq!(config.classifier.batch_size, 5);
        assert_eq!(config.classifier.max_description_chars, 2000);
        assert_eq!(config.database_path(), PathBuf::from("/tmp/x.db"));
        assert!(!config.require_description_terms.is_empty());
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let config = Config::from_yaml("  \n").unwrap();
        assert_eq!(config.classifier.model, "gemini-flash");
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(Config::from_yaml("serach_queries: []\n").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.classifier.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.delay_min_secs = 2.0;
        config.delay_max_secs = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_finite_and_huge_pauses() {
        for bad in [f64::NAN, f64::INFINITY, 1e300, -1.0] {
            let mut config = Config::default();
            config.classifier.batch_pause_secs = bad;
            assert!(config.validate().is_err(), "batch pause {bad}");

            let mut config = Config::default();
            config.delay_max_secs = bad;
            assert!(config.validate().is_err(), "delay max {bad}");

            let mut config = Config::default();
            config.delay_min_secs = bad;
            config.delay_max_secs = bad;
            assert!(config.validate().is_err(), "delay range {bad}");
        }

        let config = Config::from_yaml("delay_min_secs: .nan\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_explicit_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.yaml");
        assert!(Config::load(Some(&missing)).is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "delay_min_secs: 0.0\ndelay_max_secs: 0.0\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.delay_max_secs, 0.0);
    }
}
